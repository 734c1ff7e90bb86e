//! Building a system from config files: registries, boards, resolver and
//! teardown.

mod common;

use common::{dsp_text, Fixture};
use dxp_core::codes;
use dxp_driver_mock::{catalogs_with_errors, ErrorConfig, ErrorScenario, MockConfig};
use dxp_hardware::{System, XerxesError};

#[test]
fn test_module_line_builds_board() {
    let fx = Fixture::standard();
    let system = fx.built();

    assert_eq!(system.ndxp(), 1);
    assert_eq!(system.ndxpchan(), 2);
    let board = system.board(0).unwrap();
    assert_eq!(board.nchan(), 4);
    assert_eq!(board.used.bits(), 0b0011);
    assert_eq!(board.det_chans, vec![5, 6, -1, -1]);
    assert_eq!(system.get_detectors().unwrap(), vec![5, 6]);
    assert_eq!(system.get_board_type(6).unwrap(), "dxpx10p");

    let (io_chan, used) = system.get_electronics()[0];
    assert_eq!(used, 0b0011);
    assert_eq!(system.elec_to_det(io_chan, 1).unwrap(), 6);
}

#[test]
fn test_resolver() {
    let fx = Fixture::standard();
    let system = fx.built();
    assert_eq!(system.det_to_elec(5).unwrap(), (0, 0));
    assert_eq!(system.det_to_elec(6).unwrap(), (0, 1));

    let err = system.det_to_elec(99).unwrap_err();
    assert_eq!(err.code(), codes::NODETCHAN);
    assert!(system.det_to_elec(-1).is_err());

    let io_chan = system.board(0).unwrap().io_chan;
    assert!(matches!(
        system.elec_to_det(io_chan, 4),
        Err(XerxesError::NoModuleChannel { mod_chan: 4, nchan: 4 })
    ));
    assert!(matches!(
        system.elec_to_det(io_chan + 100, 0),
        Err(XerxesError::UnknownIoChannel { .. })
    ));
}

#[test]
fn test_images_loaded_once_per_filename() {
    let fx = Fixture::standard();
    fx.write(
        "modules.cfg",
        "board_type dxpx10p\n\
         interface epp 0x378\n\
         default_dsp x10p.dsp\n\
         default_fippi fippi0.fip\n\
         module crate0slot2 0 1 2 3\n\
         module crate0slot3 4 5 6 7\n\
         dsp 2 x10p.dsp\n",
    );
    let system = fx.built();
    let stats = fx.stats();
    assert_eq!(stats.dsp_load_count("x10p.dsp"), 1);
    assert_eq!(stats.fippi_load_count("fippi0.fip"), 1);
    assert_eq!(stats.transport_inits, 1);

    let id = system.find_dsp("x10p.dsp").unwrap();
    for board in system.boards() {
        assert!(board.channels.iter().all(|slot| slot.dsp == Some(id)));
    }
}

#[test]
fn test_replacing_dsp_resizes_params() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    let slot = &system.board(0).unwrap().channels[0];
    assert_eq!(slot.params().len(), 50);

    system.replace_dspconfig(5, "x10p_big.dsp").unwrap();
    let board = system.board(0).unwrap();
    assert_eq!(board.channels[0].params().len(), 80);
    assert_eq!(board.channels[1].params().len(), 50);
    assert_eq!(system.max_symbols(5).unwrap(), 80);
    assert_eq!(system.max_symbols(6).unwrap(), 50);
}

#[test]
fn test_reset_all_is_idempotent() {
    let fx = Fixture::standard();
    let mut system = fx.built();
    system.reset_all();
    system.reset_all();
    assert_eq!(system.ndxp(), 0);
    assert!(system.find_dsp("x10p.dsp").is_none());
    assert!(system.find_btype("dxpx10p").is_none());
    assert!(matches!(system.get_detectors(), Err(XerxesError::NoChannels)));

    // The same directory builds again after teardown.
    system.read_config("xia.cfg").unwrap();
    system.assign_channel().unwrap();
    assert_eq!(system.ndxpchan(), 2);
}

#[test]
fn test_elec_to_det_across_channel_counts() {
    let fx = Fixture::standard_with(MockConfig {
        channels_per_module: 8,
        ..MockConfig::default()
    });
    fx.write(
        "modules.cfg",
        "board_type dxpx10p\n\
         interface epp 0x378\n\
         default_dsp x10p.dsp\n\
         module crate0slot2 0 1\n\
         module crate0slot3 2 3 4 5 6 7\n\
         dsp 5 x10p_big.dsp\n",
    );
    let system = fx.built();

    let second = system.board(1).unwrap();
    assert_eq!(second.nchan(), 6);
    assert_eq!(system.elec_to_det(second.io_chan, 5).unwrap(), 7);
    assert_eq!(system.det_to_elec(7).unwrap(), (1, 5));
    let lengths: Vec<usize> = second.channels.iter().map(|slot| slot.params().len()).collect();
    assert_eq!(lengths, vec![50, 50, 50, 50, 50, 80]);
    let first = system.board(0).unwrap();
    assert_eq!(system.elec_to_det(first.io_chan, 1).unwrap(), 1);
}

#[test]
fn test_teardown_closes_modules() {
    let fx = Fixture::standard();
    let mut system = fx.built();
    assert_eq!(fx.hw.module_count(), 1);

    system.reset_all();
    assert_eq!(fx.hw.module_count(), 0);
    assert_eq!(fx.stats().closes, 1);

    system.read_config("xia.cfg").unwrap();
    system.assign_channel().unwrap();
    assert_eq!(fx.hw.module_count(), 1);
    system.del_board(0).unwrap();
    assert_eq!(fx.hw.module_count(), 0);
    assert_eq!(fx.stats().closes, 2);

    system.reset_all();
    assert_eq!(fx.stats().closes, 2);
}

#[test]
fn test_failed_driver_init_closes_module() {
    let fx = Fixture::standard();
    let (drivers, transports) = catalogs_with_errors(
        &fx.hw,
        ErrorConfig::scenario(ErrorScenario::AlwaysFail {
            operation: "init_driver",
        }),
    );
    let mut system = System::new(fx.settings(), drivers, transports);
    let err = system.add_board("udxp", "usb0", "usb", "udxp-1", &[0]).unwrap_err();
    assert!(matches!(err, XerxesError::Driver { operation: "init_driver", .. }));
    assert_eq!(system.ndxp(), 0);
    assert_eq!(fx.hw.module_count(), 0);
    assert_eq!(fx.stats().closes, 1);
}

#[test]
fn test_duplicate_detector_rejected() {
    let fx = Fixture::standard();
    fx.write(
        "modules.cfg",
        "board_type dxpx10p\ninterface epp 0x378\ndefault_dsp x10p.dsp\n\
         module crate0slot2 0 1 2 3\nmodule crate0slot3 3 4 5 6\n",
    );
    let mut system = fx.system();
    system.read_config("xia.cfg").unwrap();
    let err = system.assign_channel().unwrap_err();
    assert!(matches!(
        err,
        XerxesError::DuplicateDetectorChannel { det_chan: 3, module: 0 }
    ));
    assert_eq!(err.code(), codes::BAD_PARAM);
}

#[test]
fn test_channel_directive_out_of_range() {
    let fx = Fixture::standard();
    fx.write(
        "modules.cfg",
        "board_type dxpx10p\ninterface epp 0x378\nmodule crate0slot2 0 1\ndsp 2 x10p.dsp\n",
    );
    let mut system = fx.system();
    system.read_config("xia.cfg").unwrap();
    let err = system.assign_channel().unwrap_err();
    assert!(matches!(
        err,
        XerxesError::BadChannelIndex { line: 4, channel: 2, nchan: 2 }
    ));
}

#[test]
fn test_per_channel_images_and_end_blocks() {
    let fx = Fixture::standard();
    fx.write(
        "modules.cfg",
        "board_type dxpx10p\n\
         interface epp 0x378\n\
         default_dsp x10p.dsp\n\
         default_fippi fippi0.fip\n\
         module crate0slot2 0 1\n\
         fippi 1 fippi1.fip\n\
         end\n\
         board_type dxp4c2x\n\
         iolibrary scsi\n\
         interface camac\n\
         default_dsp x10p_big.dsp\n\
         module crate1slot5 10 11 12 13\n",
    );
    let mut system = fx.system();
    system.load_system_str("dxpx10p\ndxp2x\nmodules modules.cfg\n").unwrap();
    system.assign_channel().unwrap();

    assert_eq!(system.ndxp(), 2);
    let first = system.board(0).unwrap();
    assert_ne!(first.channels[0].fippi, first.channels[1].fippi);
    let second = system.board(1).unwrap();
    assert_eq!(system.board_type(second.btype).unwrap().name, "dxp4c2x");
    assert_eq!(system.interface(second.iface).unwrap().iolib, "scsi");
    assert!(second.channels[0].fippi.is_none());
    assert_eq!(second.channels[3].params().len(), 80);
    assert_eq!(fx.stats().transport_inits, 2);
}

#[test]
fn test_modules_file_errors() {
    let fx = Fixture::standard();
    let mut system = fx.system();

    let err = system.load_modules_str("interface epp 0x378\nmodule slot2 0\n").unwrap_err();
    assert_eq!(err.code(), codes::UNKNOWN_BTYPE);

    let err = system.load_modules_str("board_type dxpx10p\nmodule slot2 0\n").unwrap_err();
    assert_eq!(err.code(), codes::INITIALIZE);

    let err = system.load_modules_str("board_type dxpx10p\nbogus x\n").unwrap_err();
    assert!(matches!(err, XerxesError::UnrecognizedDirective { line: 2, .. }));

    let err = system.load_modules_str("board_type dxp9000\n").unwrap_err();
    assert_eq!(err.code(), codes::UNKNOWN_BTYPE);
}

#[test]
fn test_missing_system_file() {
    let fx = Fixture::empty();
    let mut system = fx.system();
    let err = system.read_config("xia.cfg").unwrap_err();
    assert!(matches!(err, XerxesError::OpenFailed { .. }));
}

#[test]
fn test_null_modules_file_skips() {
    let fx = Fixture::empty();
    fx.write("xia.cfg", "dxpx10p\nmodules NULL\n");
    let mut system = fx.system();
    system.read_config("xia.cfg").unwrap();
    system.assign_channel().unwrap();
    assert_eq!(system.ndxp(), 0);
}

#[test]
fn test_programmatic_boards_and_deletion() {
    let fx = Fixture::standard();
    let mut system = fx.system();
    let a = system.add_board("udxp", "usb0", "usb", "udxp-1", &[0]).unwrap();
    let b = system.add_board("udxp", "usb0", "usb", "udxp-2", &[1]).unwrap();
    assert_eq!(system.add_board("udxp", "usb0", "usb", "udxp-1", &[0]).unwrap(), a);
    assert_eq!((a, b), (0, 1));

    let btype = system.find_btype("udxp").unwrap();
    system.add_dsp(btype, "x10p.dsp").unwrap();
    let err = system.del_btype("udxp").unwrap_err();
    assert_eq!(err.code(), codes::MEMINUSE);

    let removed = system.del_board(0).unwrap();
    assert_eq!(removed.iostring, "udxp-1");
    assert_eq!(system.board(0).unwrap().module, 0);
    assert_eq!(system.det_to_elec(1).unwrap(), (0, 0));

    system.del_board_by_address("usb", "usb0", "udxp-2").unwrap();
    assert_eq!(fx.hw.module_count(), 0);
    system.del_dsp("x10p.dsp").unwrap();
    system.del_btype("udxp").unwrap();
    assert!(matches!(system.del_dsp("x10p.dsp"), Err(XerxesError::NoMatch { .. })));
}

#[test]
fn test_module_capacity() {
    let fx = Fixture::standard();
    let mut settings = fx.settings();
    settings.max_modules = 1;
    let (drivers, transports) = dxp_driver_mock::catalogs(&fx.hw);
    let mut system = dxp_hardware::System::new(settings, drivers, transports);
    system.add_board("udxp", "usb0", "usb", "a", &[0]).unwrap();
    let err = system.add_board("udxp", "usb0", "usb", "b", &[1]).unwrap_err();
    assert!(matches!(err, XerxesError::ArrayCapacityExceeded { max: 1, .. }));
}

#[test]
fn test_locate_files() {
    let fx = Fixture::standard();
    let system = fx.built();
    let files = system.locate_system_files().unwrap();
    assert!(files.config.unwrap().ends_with("xia.cfg"));
    assert!(files.preamp.unwrap().ends_with("preamp.cfg"));
    let channel = system.locate_channel_files(5).unwrap();
    assert!(channel.dsp.unwrap().ends_with("x10p.dsp"));
    assert!(channel.user_fippi.is_none());
}

#[test]
fn test_summary_serializes() {
    let fx = Fixture::standard();
    let system = fx.built();
    let json = serde_json::to_value(system.summary()).unwrap();
    assert_eq!(json["ndxpchan"], 2);
    assert_eq!(json["boards"][0]["used"], 3);
    assert_eq!(dsp_text(3).lines().filter(|l| l.starts_with("symbol")).count(), 3);
}

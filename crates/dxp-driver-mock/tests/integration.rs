//! Integration tests for the simulated board and transport
//!
//! These drive the mock through the core traits only, the way the
//! orchestrator in `dxp-hardware` does.

use dxp_core::{
    ChannelData, ChannelTarget, ControlTask, DriverErrorKind, FpgaKind, FpgaSet, MemoryRegion,
    ModuleLink, PreampInfo,
};
use dxp_driver_mock::*;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const DSP: &str = "program 0x0c00 0x1234\nsymbol MCALEN rw\nsymbol RUNERROR r\nsymbol ERRINFO r\nsymbol CALTASK rw\nsymbol POLARITY rw 0 1\nsymbol SLOWLEN rw 1 28\n";

fn image_file(dir: &tempfile::TempDir, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(text.as_bytes()).unwrap();
    path
}

struct Bench {
    hw: Arc<MockHardware>,
    driver: Arc<dyn dxp_core::BoardDriver>,
    transport: Arc<dyn dxp_core::Transport>,
    io_chan: i32,
    dir: tempfile::TempDir,
}

impl Bench {
    fn new(config: MockConfig) -> Self {
        let hw = MockHardware::new(config);
        let (drivers, transports) = catalogs(&hw);
        let driver = drivers.create("dxpx10p", None).unwrap();
        let transport = transports.create("epp", "0x378").unwrap();
        transport.initialize(4, "0x378").unwrap();
        driver.init_driver(transport.as_ref()).unwrap();
        let io_chan = transport.open("crate0slot2").unwrap();
        Self {
            hw,
            driver,
            transport,
            io_chan,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn link(&self) -> ModuleLink<'_> {
        ModuleLink {
            transport: self.transport.as_ref(),
            io_chan: self.io_chan,
            module: 0,
        }
    }

    fn boot(&self) -> dxp_core::DspImage {
        let path = image_file(&self.dir, "x10p.dsp", DSP);
        let dsp = self.driver.load_dsp("x10p.dsp", &path).unwrap();
        self.driver
            .download_dsp(self.link(), ChannelTarget::All, &dsp)
            .unwrap();
        for chan in 0..4 {
            self.driver
                .download_dsp_done(self.link(), chan, &dsp, Duration::from_secs(1))
                .unwrap();
        }
        dsp
    }
}

#[test]
fn test_catalogs_cover_known_names() {
    let hw = MockHardware::new(MockConfig::default());
    let (drivers, transports) = catalogs(&hw);
    for name in dxp_core::KNOWN_BOARD_TYPES {
        assert!(drivers.contains(name), "{} missing", name);
    }
    for tag in MOCK_TAGS {
        assert!(transports.contains(tag));
    }
    assert!(drivers.contains("dxp2x"));
}

#[test]
fn test_image_loads_are_counted() {
    let bench = Bench::new(MockConfig::default());
    bench.boot();
    let fip = image_file(&bench.dir, "f.fip", "0001 0002\n");
    bench.driver.load_fippi("f.fip", &fip).unwrap();
    let stats = bench.hw.stats();
    assert_eq!(stats.dsp_load_count("x10p.dsp"), 1);
    assert_eq!(stats.fippi_load_count("f.fip"), 1);
    assert_eq!(stats.transport_inits, 1);
    assert_eq!(stats.driver_inits, 1);
}

#[test]
fn test_download_journal_records_targets() {
    let bench = Bench::new(MockConfig::default());
    let fip_path = image_file(&bench.dir, "f.fip", "0001\n");
    let fippi = bench.driver.load_fippi("f.fip", &fip_path).unwrap();
    let set = FpgaSet {
        fippi: Some(&fippi),
        ..FpgaSet::default()
    };
    bench
        .driver
        .download_fpga(bench.link(), ChannelTarget::All, FpgaKind::All, &set)
        .unwrap();
    bench
        .driver
        .download_fpga(bench.link(), ChannelTarget::Channel(2), FpgaKind::Fippi, &set)
        .unwrap();
    bench
        .driver
        .download_fpga_done(bench.link(), ChannelTarget::All, FpgaKind::All)
        .unwrap();

    let downloads = bench.hw.downloads();
    assert_eq!(downloads.len(), 2);
    assert_eq!(downloads[0].target, ChannelTarget::All);
    assert_eq!(downloads[1].target, ChannelTarget::Channel(2));
    assert_eq!(downloads[1].kind, DownloadKind::Fpga(FpgaKind::Fippi));
    bench.hw.clear_downloads();
    assert!(bench.hw.downloads().is_empty());
}

#[test]
fn test_broadcast_can_be_disabled() {
    let hw = MockHardware::new(MockConfig::default());
    let driver = MockBoardDriver::new("udxp", Arc::clone(&hw), ErrorConfig::none()).without_broadcast();
    let transport = MockTransport::new("usb", "usb0", Arc::clone(&hw), ErrorConfig::none());
    let io_chan = dxp_core::Transport::open(&transport, "udxp0").unwrap();
    let link = ModuleLink {
        transport: &transport,
        io_chan,
        module: 0,
    };
    let dsp = firmware::parse_dsp("udxp", "u.dsp", DSP).unwrap();
    let err = dxp_core::BoardDriver::download_dsp(&driver, link, ChannelTarget::All, &dsp).unwrap_err();
    assert_eq!(err.kind, DriverErrorKind::Unsupported);
    assert!(dxp_core::BoardDriver::download_dsp(&driver, link, ChannelTarget::Channel(0), &dsp).is_ok());
}

#[test]
fn test_params_require_matching_buffer() {
    let bench = Bench::new(MockConfig::default());
    let dsp = bench.boot();
    let mut params = vec![0u16; dsp.nsymbols()];
    bench
        .driver
        .read_dspparams(bench.link(), 1, &dsp, &mut params)
        .unwrap();
    assert_eq!(params[dsp.symbol_index("SLOWLEN").unwrap()], 1);

    let mut short = vec![0u16; 2];
    let err = bench
        .driver
        .read_dspparams(bench.link(), 1, &dsp, &mut short)
        .unwrap_err();
    assert_eq!(err.kind, DriverErrorKind::InvalidParameter);
}

#[test]
fn test_modify_symbol_checks_bounds_and_access() {
    let bench = Bench::new(MockConfig::default());
    let dsp = bench.boot();
    let link = bench.link();
    bench.driver.modify_dspsymbol(link, 0, "SLOWLEN", 20, &dsp).unwrap();
    assert_eq!(bench.driver.read_dspsymbol(link, 0, "SLOWLEN", &dsp).unwrap(), 20.0);
    assert!(bench.driver.modify_dspsymbol(link, 0, "SLOWLEN", 29, &dsp).is_err());
    assert!(bench.driver.modify_dspsymbol(link, 0, "RUNERROR", 0, &dsp).is_err());
    let err = bench.driver.read_dspsymbol(link, 0, "NOPE", &dsp).unwrap_err();
    assert_eq!(err.kind, DriverErrorKind::Symbol);
}

#[test]
fn test_run_fills_spectrum() {
    let bench = Bench::new(MockConfig::default());
    let dsp = bench.boot();
    let link = bench.link();
    bench.driver.begin_run(link, ChannelTarget::All, 1, false).unwrap();
    assert!(bench.driver.run_active(link, 3).unwrap());
    bench.driver.end_run(link, ChannelTarget::All).unwrap();
    assert!(!bench.driver.run_active(link, 3).unwrap());

    let params = bench.hw.channel_params(bench.io_chan, 0).unwrap();
    let spectrum = bench.driver.read_spectrum(link, 0, &dsp, &params).unwrap();
    assert_eq!(spectrum.len(), 1024);
    assert!(spectrum.iter().any(|&bin| bin > 0));
    let baseline = bench.driver.read_baseline(link, 0, &dsp, &params).unwrap();
    assert_eq!(baseline.len(), 256);
}

#[test]
fn test_run_error_decoded_and_cleared() {
    let bench = Bench::new(MockConfig::default());
    let dsp = bench.boot();
    let address = dsp.symbol_index("RUNERROR").unwrap();
    assert!(bench.hw.poke_param(bench.io_chan, 0, address, 7));
    let params = bench.hw.channel_params(bench.io_chan, 0).unwrap();
    assert_eq!(bench.driver.decode_error(&dsp, &params).0, 7);
    bench.driver.clear_error(bench.link(), 0, &dsp).unwrap();
    let params = bench.hw.channel_params(bench.io_chan, 0).unwrap();
    assert_eq!(bench.driver.decode_error(&dsp, &params), (0, 0));
}

#[test]
fn test_dsp_boot_polls_and_timeout() {
    let bench = Bench::new(MockConfig {
        dsp_boot_polls: Some(50),
        ..MockConfig::default()
    });
    let path = image_file(&bench.dir, "x10p.dsp", DSP);
    let dsp = bench.driver.load_dsp("x10p.dsp", &path).unwrap();
    let link = bench.link();
    bench.driver.download_dsp(link, ChannelTarget::Channel(0), &dsp).unwrap();
    assert!(bench.driver.test_spectrum_memory(link, 0, &dsp).is_err());
    let err = bench
        .driver
        .download_dsp_done(link, 0, &dsp, Duration::from_millis(300))
        .unwrap_err();
    assert_eq!(err.kind, DriverErrorKind::Timeout);
    assert!(bench.hw.stats().waited >= Duration::from_millis(300));
}

#[test]
fn test_control_task_lifecycle() {
    let bench = Bench::new(MockConfig::default());
    let dsp = bench.boot();
    let link = bench.link();
    let task = ControlTask(3);
    assert!(bench.driver.control_task_data(link, 0, task, &dsp).is_err());
    bench.driver.begin_control_task(link, 0, task, &[], &dsp).unwrap();
    assert!(bench.driver.begin_control_task(link, 0, task, &[], &dsp).is_err());
    let info = bench.driver.control_task_info(link, 0, task, &dsp).unwrap();
    let data = bench.driver.control_task_data(link, 0, task, &dsp).unwrap();
    assert_eq!(data.len(), info[0] as usize);
    bench.driver.end_control_task(link, 0).unwrap();
}

#[test]
fn test_asc_setup_applies_polarity() {
    let bench = Bench::new(MockConfig::default());
    let dsp = bench.boot();
    let mut params = vec![0u16; dsp.nsymbols()];
    let preamp = PreampInfo {
        gain: 1.0,
        polarity: 1,
        ..PreampInfo::default()
    };
    let mut data = ChannelData {
        mod_chan: 2,
        dsp: &dsp,
        params: &mut params,
        preamp,
    };
    bench.driver.setup_asc(bench.link(), &mut data, 0.05).unwrap();
    bench
        .driver
        .calibrate_asc(bench.link(), std::slice::from_mut(&mut data))
        .unwrap();
    assert_eq!(params[dsp.symbol_index("POLARITY").unwrap()], 1);
    assert_eq!(bench.hw.channel_preamp(bench.io_chan, 2), Some(preamp));
    let stats = bench.hw.stats();
    assert_eq!((stats.asc_setups, stats.asc_calibrations), (1, 1));
}

#[test]
fn test_memory_registers_and_command() {
    let bench = Bench::new(MockConfig::default());
    let link = bench.link();
    let region: MemoryRegion = "data:100:3".parse().unwrap();
    bench.driver.write_mem(link, 0, &region, &[1, 2, 3]).unwrap();
    assert_eq!(bench.driver.read_mem(link, 0, &region).unwrap(), vec![1, 2, 3]);
    bench.driver.write_reg(link, 0, "CSR", 0x40).unwrap();
    assert_eq!(bench.driver.read_reg(link, 0, "CSR").unwrap(), 0x40);
    assert_eq!(bench.driver.command(link, 0, 9, &[1], 4).unwrap(), vec![9, 1, 0, 0]);
}

#[test]
fn test_lock_resource_is_exclusive() {
    let bench = Bench::new(MockConfig::default());
    bench.transport.lock_resource(bench.io_chan, true).unwrap();
    let err = bench.transport.lock_resource(bench.io_chan, true).unwrap_err();
    assert_eq!(err.kind, DriverErrorKind::Lock);
    bench.transport.lock_resource(bench.io_chan, false).unwrap();
}

#[test]
fn test_injected_failure_reaches_caller() {
    let hw = MockHardware::new(MockConfig::default());
    let (drivers, _) = catalogs_with_errors(
        &hw,
        ErrorConfig::scenario(ErrorScenario::AlwaysFail {
            operation: "calibrate_channel",
        }),
    );
    let driver = drivers.create("dxp4c2x", None).unwrap();
    let transport = MockTransport::new("camac", "scsi", Arc::clone(&hw), ErrorConfig::none());
    let link = ModuleLink {
        transport: &transport,
        io_chan: 1,
        module: 0,
    };
    let err = driver.calibrate_channel(link, 1, &mut []).unwrap_err();
    assert_eq!(err.kind, DriverErrorKind::Hardware);
}

#[test]
fn test_unknown_io_chan() {
    let bench = Bench::new(MockConfig::default());
    assert!(bench.transport.close(99).is_err());
    bench.transport.close(bench.io_chan).unwrap();
    assert_eq!(bench.hw.module_count(), 0);
}

#[test]
fn test_open_twice_is_refused() {
    let bench = Bench::new(MockConfig::default());
    let err = bench.transport.open("crate0slot2").unwrap_err();
    assert_eq!(err.kind, DriverErrorKind::Open);
    bench.transport.close(bench.io_chan).unwrap();
    let reopened = bench.transport.open("crate0slot2").unwrap();
    assert_ne!(reopened, bench.io_chan);
    let stats = bench.hw.stats();
    assert_eq!((stats.opens, stats.closes), (2, 1));
}

#[test]
fn test_run_stats_accumulate_until_fresh_start() {
    let bench = Bench::new(MockConfig::default());
    let dsp = bench.boot();
    let link = bench.link();
    let params = bench.hw.channel_params(bench.io_chan, 1).unwrap();

    bench.driver.begin_run(link, ChannelTarget::All, 1, false).unwrap();
    bench.driver.end_run(link, ChannelTarget::All).unwrap();
    let spectrum = bench.driver.read_spectrum(link, 1, &dsp, &params).unwrap();
    let stats = bench.driver.run_stats(link, 1, &dsp, &params).unwrap();
    let binned: u64 = spectrum.iter().map(|&bin| u64::from(bin)).sum();
    assert_eq!(stats.events, binned);
    assert_eq!(stats.livetime, 1.0);
    assert!(stats.fast_peaks > stats.events);
    assert!(stats.icr > stats.ocr);
    assert_eq!(stats.nevents(), stats.events + stats.underflows + stats.overflows);

    bench.driver.begin_run(link, ChannelTarget::All, 1, true).unwrap();
    bench.driver.end_run(link, ChannelTarget::All).unwrap();
    let resumed = bench.driver.run_stats(link, 1, &dsp, &params).unwrap();
    assert_eq!(resumed.livetime, 2.0);
    assert!(resumed.events > stats.events);

    bench.driver.begin_run(link, ChannelTarget::All, 1, false).unwrap();
    let fresh = bench.driver.run_stats(link, 1, &dsp, &params).unwrap();
    assert_eq!(fresh, dxp_core::RunStats::default());
}

const SCA_DSP: &str = "program 0x0c00\nsymbol MCALEN rw\nsymbol NUMSCA rw 0 16\nsymbol EVTLEN rw\nsymbol THRESHOLD rw 0 1000\nsymbol LIVETIME r\n";

#[test]
fn test_sca_regions_partition_spectrum() {
    let bench = Bench::new(MockConfig::default());
    let path = image_file(&bench.dir, "sca.dsp", SCA_DSP);
    let dsp = bench.driver.load_dsp("sca.dsp", &path).unwrap();
    let link = bench.link();
    bench.driver.download_dsp(link, ChannelTarget::Channel(0), &dsp).unwrap();

    let params = bench.hw.channel_params(bench.io_chan, 0).unwrap();
    assert_eq!(bench.driver.sca_length(&dsp, &params).unwrap(), 0);
    assert!(bench.driver.read_sca(link, 0, &dsp, &params).unwrap().is_empty());
    assert_eq!(bench.driver.event_length(&dsp, &params).unwrap(), 512);

    bench.driver.begin_run(link, ChannelTarget::Channel(0), 1, false).unwrap();
    bench.driver.end_run(link, ChannelTarget::Channel(0)).unwrap();
    assert!(bench.hw.poke_param(bench.io_chan, 0, dsp.symbol_index("NUMSCA").unwrap(), 3));
    assert!(bench.hw.poke_param(bench.io_chan, 0, dsp.symbol_index("EVTLEN").unwrap(), 64));
    let params = bench.hw.channel_params(bench.io_chan, 0).unwrap();
    assert_eq!(bench.driver.event_length(&dsp, &params).unwrap(), 64);

    let sca = bench.driver.read_sca(link, 0, &dsp, &params).unwrap();
    let spectrum = bench.driver.read_spectrum(link, 0, &dsp, &params).unwrap();
    assert_eq!(sca.len(), 3);
    assert_eq!(sca.iter().sum::<u64>(), spectrum.iter().map(|&bin| u64::from(bin)).sum::<u64>());
}

#[test]
fn test_change_gains_scales_threshold() {
    let bench = Bench::new(MockConfig::default());
    let path = image_file(&bench.dir, "sca.dsp", SCA_DSP);
    let dsp = bench.driver.load_dsp("sca.dsp", &path).unwrap();
    let link = bench.link();
    bench.driver.download_dsp(link, ChannelTarget::Channel(2), &dsp).unwrap();
    let threshold = dsp.symbol_index("THRESHOLD").unwrap();
    assert!(bench.hw.poke_param(bench.io_chan, 2, threshold, 100));

    let mut params = bench.hw.channel_params(bench.io_chan, 2).unwrap();
    bench.driver.change_gains(link, 2, 1.5, &dsp, &mut params).unwrap();
    assert_eq!(params[threshold], 150);
    assert_eq!(bench.hw.channel_params(bench.io_chan, 2).unwrap()[threshold], 150);
    assert_eq!(bench.hw.channel_gain(bench.io_chan, 2), Some(1.5));

    // Clamped to the symbol's upper bound.
    bench.driver.change_gains(link, 2, 10.0, &dsp, &mut params).unwrap();
    assert_eq!(params[threshold], 1000);

    let err = bench.driver.change_gains(link, 2, 0.0, &dsp, &mut params).unwrap_err();
    assert_eq!(err.kind, DriverErrorKind::InvalidParameter);
    assert_eq!(bench.hw.stats().gain_changes, 2);
}

#[test]
fn test_write_dspparam_by_table_entry() {
    let bench = Bench::new(MockConfig::default());
    let dsp = bench.boot();
    let link = bench.link();
    let slowlen = &dsp.symbols[dsp.symbol_index("SLOWLEN").unwrap()];
    bench.driver.write_dspparam(link, 3, &dsp, slowlen, 12).unwrap();
    assert_eq!(
        bench.hw.channel_params(bench.io_chan, 3).unwrap()[slowlen.address as usize],
        12
    );
    let runerror = &dsp.symbols[dsp.symbol_index("RUNERROR").unwrap()];
    let err = bench.driver.write_dspparam(link, 3, &dsp, runerror, 1).unwrap_err();
    assert_eq!(err.kind, DriverErrorKind::InvalidParameter);
    assert_eq!(bench.hw.stats().param_word_writes, 1);
}

//! Downloads, setup, runs, symbols and passthrough against the simulated
//! hardware.

mod common;

use common::{dsp_text, Fixture};
use dxp_core::{codes, ControlTask, FpgaKind, RunState, RunStatus};
use dxp_driver_mock::{
    catalogs_with_errors, DownloadKind, ErrorConfig, ErrorScenario, MockDriverFactory,
    MockTransportFactory,
};
use dxp_hardware::{FileLocator, SharedSystem, System, XerxesError};
use std::sync::Arc;

const SLOWLEN: usize = 6;
const POLARITY: usize = 5;
const RUNERROR: usize = 2;
const PEAKINT: usize = 7;

fn io_chan(system: &System) -> i32 {
    system.board(0).unwrap().io_chan
}

/// Standard image plus SCA and threshold parameters.
fn write_extended_dsp(fx: &Fixture) {
    let text = dsp_text(50) + "symbol NUMSCA rw 0 16\nsymbol THRESHOLD rw 0 1000\n";
    fx.write("ext.dsp", &text);
}

fn system_failing(fx: &Fixture, operation: &'static str) -> System {
    let (drivers, transports) = catalogs_with_errors(
        &fx.hw,
        ErrorConfig::scenario(ErrorScenario::AlwaysFail { operation }),
    );
    let settings = fx.settings();
    let locator = FileLocator::new(&settings).with_env(|_| None);
    System::new(settings, drivers, transports).with_locator(locator)
}

// =============================================================================
// Bring-up
// =============================================================================

#[test]
fn test_initialize_applies_defaults_and_preamp() {
    let fx = Fixture::standard();
    let system = fx.initialized();
    let io = io_chan(&system);

    let params = fx.hw.channel_params(io, 0).unwrap();
    assert_eq!(params.len(), 50);
    assert_eq!(params[SLOWLEN], 20);
    assert_eq!(params[POLARITY], 1);
    assert_eq!(fx.hw.channel_params(io, 1).unwrap()[POLARITY], 0);
    assert_eq!(system.board(0).unwrap().channels[0].params()[SLOWLEN], 20);

    let preamp = fx.hw.channel_preamp(io, 1).unwrap();
    assert_eq!(preamp.gain, 2.0);
    assert!(fx.hw.channel_preamp(io, 2).is_none());

    let stats = fx.stats();
    assert_eq!(stats.asc_setups, 2);
    assert_eq!(stats.asc_calibrations, 2);
    assert_eq!(fx.hw.channel_dsp(io, 0).as_deref(), Some("x10p.dsp"));
}

#[test]
fn test_initialize_without_preamp_file() {
    let fx = Fixture::standard();
    fx.write("xia.cfg", "dxpx10p\npreamp NULL\nmodules modules.cfg\n");
    let mut system = fx.initialized();
    assert_eq!(fx.stats().asc_setups, 0);
    assert_eq!(system.initialize_asc(0.05).unwrap(), None);
}

#[test]
fn test_missing_preamp_file() {
    let fx = Fixture::standard();
    fx.write("xia.cfg", "dxpx10p\npreamp absent.cfg\nmodules modules.cfg\n");
    let mut system = fx.system();
    let err = system.initialize("xia.cfg").unwrap_err();
    assert!(matches!(err, XerxesError::OpenFailed { .. }));
}

#[test]
fn test_preamp_energy_and_unknown_detector() {
    let fx = Fixture::standard();
    fx.write("preamp.cfg", "energy 8.0\n5 1.0 -1 -1 1 0.01\n42 1.0 1 -1 1 0.01\n");
    let mut system = fx.initialized();
    assert_eq!(system.initialize_asc(0.05).unwrap(), Some(8.0));
    assert_eq!(system.board(0).unwrap().channels[0].preamp.polarity, -1);
}

#[test]
fn test_unknown_default_symbol() {
    let fx = Fixture::standard();
    fx.write("defaults.dat", "SLOWLEN 20\nNOSUCH 1\n");
    let mut system = fx.system();
    let err = system.initialize("xia.cfg").unwrap_err();
    assert!(matches!(err, XerxesError::NoSymbol { ref name, .. } if name == "NOSUCH"));
}

// =============================================================================
// Downloads
// =============================================================================

#[test]
fn test_dsp_broadcast_plus_differing_channel() {
    let fx = Fixture::standard();
    fx.write(
        "modules.cfg",
        "board_type dxpx10p\ninterface epp 0x378\ndefault_dsp x10p.dsp\n\
         default_fippi fippi0.fip\nmodule crate0slot2 0 1 2 3\ndsp 1 x10p_big.dsp\n",
    );
    let mut system = fx.built();
    fx.hw.clear_downloads();
    system.dspconfig().unwrap();

    let dsp: Vec<_> = fx
        .hw
        .downloads()
        .into_iter()
        .filter(|record| record.kind == DownloadKind::Dsp)
        .collect();
    assert_eq!(dsp.len(), 2);
    assert_eq!(dsp[0].filename, "x10p.dsp");
    assert_eq!(dsp[1].filename, "x10p_big.dsp");
    assert_eq!(fx.hw.channel_params(io_chan(&system), 1).unwrap().len(), 80);
}

#[test]
fn test_per_channel_fallback_without_broadcast() {
    let fx = Fixture::standard();
    let mut drivers = dxp_core::DriverCatalog::new();
    drivers.register(Arc::new(MockDriverFactory::new(Arc::clone(&fx.hw)).without_broadcast()));
    let mut transports = dxp_core::TransportCatalog::new();
    transports.register(Arc::new(MockTransportFactory::new(Arc::clone(&fx.hw))));
    let settings = fx.settings();
    let locator = FileLocator::new(&settings).with_env(|_| None);
    let mut system = System::new(settings, drivers, transports).with_locator(locator);

    system.initialize("xia.cfg").unwrap();
    let downloads = fx.hw.downloads();
    let dsp = downloads.iter().filter(|r| r.kind == DownloadKind::Dsp).count();
    let fpga = downloads
        .iter()
        .filter(|r| matches!(r.kind, DownloadKind::Fpga(_)))
        .count();
    assert_eq!(dsp, 2);
    assert_eq!(fpga, 2);
    assert_eq!(fx.hw.channel_params(io_chan(&system), 1).unwrap()[SLOWLEN], 20);
}

#[test]
fn test_replace_fippi() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    fx.hw.clear_downloads();
    system.replace_fipconfig(6, "fippi1.fip").unwrap();
    let board = system.board(0).unwrap();
    assert_ne!(board.channels[0].fippi, board.channels[1].fippi);

    let downloads = fx.hw.downloads();
    assert_eq!(downloads.len(), 1);
    assert_eq!(downloads[0].kind, DownloadKind::Fpga(FpgaKind::Fippi));
    assert_eq!(downloads[0].filename, "fippi1.fip");

    system.replace_fpgaconfig(5, FpgaKind::Mmu, "fippi1.fip").unwrap();
    assert!(system.board(0).unwrap().mmu.is_some());
}

#[test]
fn test_reset_channel() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    let io = io_chan(&system);
    fx.hw.poke_param(io, 0, SLOWLEN, 3);
    system.reset_channel(5).unwrap();
    assert_eq!(fx.hw.channel_params(io, 0).unwrap()[SLOWLEN], 20);
    assert_eq!(fx.stats().asc_calibrations, 3);
}

#[test]
fn test_upload_without_dsp_image() {
    let fx = Fixture::standard();
    fx.write(
        "modules.cfg",
        "board_type dxpx10p\ninterface epp 0x378\nmodule crate0slot2 0\n",
    );
    let mut system = fx.built();
    let err = system.upload_dspparams(0).unwrap_err();
    assert_eq!(err.code(), codes::INITIALIZE);
}

// =============================================================================
// Runs
// =============================================================================

#[test]
fn test_run_state_machine() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    assert_eq!(system.isrunning(5).unwrap(), RunStatus::empty());

    system.start_run(Some(1), false).unwrap();
    assert_eq!(system.isrunning(5).unwrap(), RunStatus::RUN | RunStatus::HARDWARE);
    let (det, status) = system.isrunning_any().unwrap();
    assert_eq!(det, Some(5));
    assert!(status.contains(RunStatus::HARDWARE));

    let err = system.start_run(None, false).unwrap_err();
    assert!(err.is_run_active());
    assert_eq!(err.code(), codes::RUNACTIVE);

    system.stop_run().unwrap();
    assert_eq!(system.isrunning_any().unwrap(), (None, RunStatus::empty()));
    assert_eq!(fx.stats().begin_runs, 1);

    let readout = system.readout_detector_run(5).unwrap();
    assert_eq!(readout.spectrum.len(), 1024);
    assert_eq!(readout.baseline.len(), 256);
    assert!(readout.total_counts() > 0);
    assert_eq!(readout.params.len(), 50);
    assert_eq!(system.nspec(5).unwrap(), 1024);
    assert_eq!(system.nbase(5).unwrap(), 256);
}

#[test]
fn test_single_channel_run() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    system.stop_one_run(6).unwrap();

    system.start_one_run(6, Some(2), false).unwrap();
    assert!(system.start_one_run(6, None, true).unwrap_err().is_run_active());
    assert_eq!(system.board(0).unwrap().last_gate, 2);
    system.stop_one_run(6).unwrap();

    system.resume_one_run(6).unwrap();
    system.stop_one_run(6).unwrap();
    assert!(system.board(0).unwrap().run.is_idle());
}

#[test]
fn test_run_error_reported_and_cleared() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    let io = io_chan(&system);
    let runerror = system.get_symbol_index(5, "RUNERROR").unwrap();
    assert!(fx.hw.poke_param(io, 0, runerror, 7));

    let err = system.readout_detector_run(5).unwrap_err();
    assert!(matches!(err, XerxesError::DspRunError { det_chan: 5, runerror: 7, .. }));
    assert_eq!(err.code(), codes::DSPRUNERROR);
    assert!(system.readout_detector_run(5).is_ok());
}

#[test]
fn test_hardware_only_run_is_detected() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    fx.hw.set_hardware_running(io_chan(&system), 1, true);
    let (det, status) = system.isrunning_any().unwrap();
    assert_eq!(det, Some(6));
    assert_eq!(status, RunStatus::HARDWARE);
    assert!(system.start_run(None, false).is_err());
    assert!(system.board(0).unwrap().run.is_idle());
}

#[test]
fn test_control_task_lifecycle() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    let task = ControlTask(3);

    let info = system.control_task_info(5, task).unwrap();
    assert_eq!(info[0], 256);

    system.start_control_task(5, task, &[]).unwrap();
    assert_eq!(system.isrunning(5).unwrap(), RunStatus::CONTROL_TASK);
    assert!(system.start_run(None, false).unwrap_err().is_run_active());
    assert_eq!(system.get_control_task_data(5, task).unwrap().len(), 256);
    system.stop_control_task(5).unwrap();
    assert!(system.isrunning(5).unwrap().is_empty());
}

#[test]
fn test_control_task_data_refused_during_run() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    system.start_run(None, false).unwrap();
    let err = system.get_control_task_data(5, ControlTask(3)).unwrap_err();
    assert!(err.is_run_active());
    system.stop_run().unwrap();
}

#[test]
fn test_stop_control_task_without_task_is_noop() {
    let fx = Fixture::standard();
    let mut system = system_failing(&fx, "end_control_task");
    system.initialize("xia.cfg").unwrap();

    system.stop_control_task(5).unwrap();
    assert!(system.board(0).unwrap().run.is_idle());

    system.start_run(Some(1), false).unwrap();
    system.stop_control_task(5).unwrap();
    assert_eq!(system.board(0).unwrap().run, RunState::RunActive { gate: 1 });
    assert!(system.isrunning(5).unwrap().contains(RunStatus::RUN));
    system.stop_run().unwrap();

    system.start_control_task(5, ControlTask(3), &[]).unwrap();
    let err = system.stop_control_task(5).unwrap_err();
    assert!(matches!(err, XerxesError::Driver { operation: "end_control_task", .. }));
}

// =============================================================================
// Statistics and SCA
// =============================================================================

#[test]
fn test_statistics_follow_run() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    assert_eq!(system.get_statistics(5).unwrap().events, 0);

    system.start_run(Some(1), false).unwrap();
    system.stop_run().unwrap();
    let stats = system.get_statistics(5).unwrap();
    let readout = system.readout_detector_run(5).unwrap();
    assert_eq!(stats.events, readout.total_counts());
    assert_eq!(stats.livetime, 1.0);
    assert!(stats.nevents() > stats.events);
    assert!(stats.fast_peaks > stats.events);
    assert_eq!(stats.baseline_events, 256);

    system.resume_run().unwrap();
    system.stop_run().unwrap();
    assert_eq!(system.get_statistics(5).unwrap().livetime, 2.0);
}

#[test]
fn test_buffer_lengths_without_sca() {
    let fx = Fixture::standard();
    let system = fx.initialized();
    assert_eq!(system.nevent(5).unwrap(), 512);
    assert_eq!(system.nsca(5).unwrap(), 0);
    assert!(system.readout_sca(5).unwrap().is_empty());
    assert_eq!(system.nsca(99).unwrap_err().code(), codes::NODETCHAN);
}

#[test]
fn test_sca_regions_cover_spectrum() {
    let fx = Fixture::standard();
    write_extended_dsp(&fx);
    let mut system = fx.initialized();
    system.replace_dspconfig(5, "ext.dsp").unwrap();
    system.set_one_dspsymbol(5, "NUMSCA", 4).unwrap();
    assert_eq!(system.nsca(5).unwrap(), 4);

    system.start_run(Some(1), false).unwrap();
    system.stop_run().unwrap();
    let sca = system.readout_sca(5).unwrap();
    let readout = system.readout_detector_run(5).unwrap();
    assert_eq!(sca.len(), 4);
    assert_eq!(sca.iter().sum::<u64>(), readout.total_counts());
}

// =============================================================================
// Gains and parameter downloads
// =============================================================================

#[test]
fn test_modify_gains() {
    let fx = Fixture::standard();
    write_extended_dsp(&fx);
    let mut system = fx.initialized();
    let io = io_chan(&system);
    system.replace_dspconfig(5, "ext.dsp").unwrap();
    let threshold = system.get_symbol_index(5, "THRESHOLD").unwrap();
    system.set_one_dspsymbol(5, "THRESHOLD", 100).unwrap();

    system.modify_gains(2.0).unwrap();
    assert_eq!(fx.hw.channel_gain(io, 0), Some(2.0));
    assert_eq!(fx.hw.channel_gain(io, 1), Some(2.0));
    assert_eq!(fx.hw.channel_params(io, 0).unwrap()[threshold], 200);
    assert_eq!(system.board(0).unwrap().channels[0].params()[threshold], 200);

    system.set_one_dspsymbol(5, "THRESHOLD", 800).unwrap();
    system.modify_one_gains(5, 1.5).unwrap();
    assert_eq!(system.get_one_dspsymbol(5, "THRESHOLD").unwrap(), 1000);
    assert_eq!(fx.hw.channel_gain(io, 0), Some(3.0));
    assert_eq!(fx.hw.channel_gain(io, 1), Some(2.0));
    assert_eq!(fx.stats().gain_changes, 3);

    assert!(matches!(system.modify_one_gains(5, 0.0), Err(XerxesError::BadParameter(_))));
    assert!(matches!(system.modify_gains(f32::NAN), Err(XerxesError::BadParameter(_))));
    assert_eq!(fx.stats().gain_changes, 3);
}

#[test]
fn test_download_params_by_index() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    let io = io_chan(&system);

    let written = system
        .download_one_params(5, &[(SLOWLEN, 12), (RUNERROR, 1)])
        .unwrap();
    assert_eq!(written, 1);
    assert_eq!(fx.hw.channel_params(io, 0).unwrap()[SLOWLEN], 12);
    assert_eq!(fx.hw.channel_params(io, 0).unwrap()[RUNERROR], 0);
    assert_eq!(system.board(0).unwrap().channels[0].params()[SLOWLEN], 12);

    let err = system
        .download_one_params(5, &[(SLOWLEN, 13), (50, 1)])
        .unwrap_err();
    assert!(matches!(err, XerxesError::IndexOutOfBounds { index: 50, len: 50 }));
    assert_eq!(fx.hw.channel_params(io, 0).unwrap()[SLOWLEN], 12);

    system.download_params(&[(PEAKINT, 30)]).unwrap();
    assert_eq!(system.get_one_dspsymbol(5, "PEAKINT").unwrap(), 30);
    assert_eq!(system.get_one_dspsymbol(6, "PEAKINT").unwrap(), 30);
    assert_eq!(fx.stats().param_word_writes, 3);
}

#[test]
fn test_download_params_surfaces_driver_error() {
    let fx = Fixture::standard();
    let mut system = system_failing(&fx, "write_dspparam");
    system.initialize("xia.cfg").unwrap();
    let err = system.download_one_params(6, &[(SLOWLEN, 12)]).unwrap_err();
    assert!(matches!(err, XerxesError::Driver { operation: "write_dspparam", module: 0, .. }));
    assert_eq!(system.board(0).unwrap().channels[1].params()[SLOWLEN], 20);
}

// =============================================================================
// Configuration snapshots
// =============================================================================

#[test]
fn test_config_snapshot_file_restores_parameters() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    let path = fx.dir.path().join("saved.json");
    system.set_one_dspsymbol(5, "SLOWLEN", 12).unwrap();

    let saved = system.save_config_file(&path).unwrap();
    assert_eq!(saved.preamp.as_deref(), Some("preamp.cfg"));
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["channels"]["5"]["symbols"][SLOWLEN], "SLOWLEN");
    assert_eq!(json["channels"]["5"]["values"][SLOWLEN], 12);
    assert_eq!(json["channels"]["6"]["dsp"], "x10p.dsp");

    system.set_dspsymbol("SLOWLEN", 3).unwrap();
    let restored = system.restore_config_file(&path).unwrap();
    assert_eq!(restored, saved);
    assert_eq!(system.get_one_dspsymbol(5, "SLOWLEN").unwrap(), 12);
    assert_eq!(system.get_one_dspsymbol(6, "SLOWLEN").unwrap(), 20);
}

#[test]
fn test_restore_with_unknown_symbol_changes_nothing() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    let mut snapshot = system.save_config().unwrap();
    snapshot.channels.get_mut(&6).unwrap().symbols[SLOWLEN] = "NOSUCH".into();

    system.set_dspsymbol("SLOWLEN", 3).unwrap();
    let err = system.restore_config(&snapshot).unwrap_err();
    assert_eq!(err.code(), codes::NOSYMBOL);
    assert_eq!(system.get_one_dspsymbol(5, "SLOWLEN").unwrap(), 3);
    assert_eq!(system.get_one_dspsymbol(6, "SLOWLEN").unwrap(), 3);

    snapshot.channels.get_mut(&6).unwrap().values.pop();
    assert!(matches!(system.restore_config(&snapshot), Err(XerxesError::BadParameter(_))));
}

#[test]
fn test_restore_rejects_malformed_file() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    fx.write("broken.json", "{\n  \"channels\": [\n");
    let err = system
        .restore_config_file(&fx.dir.path().join("broken.json"))
        .unwrap_err();
    assert!(matches!(err, XerxesError::MalformedLine { .. }));
    let err = system
        .restore_config_file(&fx.dir.path().join("missing.json"))
        .unwrap_err();
    assert_eq!(err.code(), codes::OPEN_FILE);
}

// =============================================================================
// Symbols
// =============================================================================

#[test]
fn test_symbol_access() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();

    assert_eq!(system.get_symbol_index(5, "SLOWLEN").unwrap(), SLOWLEN);
    assert_eq!(system.get_one_dspsymbol(5, "SLOWLEN").unwrap(), 20);
    system.set_one_dspsymbol(5, "SLOWLEN", 12).unwrap();
    assert_eq!(system.get_dspsymbol(5, "SLOWLEN").unwrap(), 12.0);
    assert_eq!(system.board(0).unwrap().channels[0].params()[SLOWLEN], 12);

    system.set_dspsymbol("SLOWLEN", 9).unwrap();
    assert_eq!(system.get_one_dspsymbol(6, "SLOWLEN").unwrap(), 9);

    let err = system.set_one_dspsymbol(5, "SLOWLEN", 40).unwrap_err();
    assert!(err.is_driver_failure());
    let err = system.get_symbol_index(5, "NOSUCH").unwrap_err();
    assert_eq!(err.code(), codes::NOSYMBOL);
}

#[test]
fn test_symbol_tables() {
    let fx = Fixture::standard();
    let system = fx.initialized();
    assert_eq!(system.max_symbols(5).unwrap(), 50);
    let names = system.symbolname_list(5).unwrap();
    assert_eq!(names.len(), 50);
    assert_eq!(names[0], "MCALEN");
    assert_eq!(system.symbolname_by_index(5, SLOWLEN).unwrap(), "SLOWLEN");
    assert!(matches!(
        system.symbolname_by_index(5, 50),
        Err(XerxesError::IndexOutOfBounds { index: 50, len: 50 })
    ));
    let limits = system.symbolname_limits(5).unwrap();
    assert_eq!((limits[SLOWLEN].lower, limits[SLOWLEN].upper), (1, 28));
}

#[test]
fn test_symbol_write_refused_while_running() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    system.start_run(None, false).unwrap();
    let err = system.set_one_dspsymbol(5, "SLOWLEN", 12).unwrap_err();
    assert!(err.is_run_active());
    let err = system.replace_dspconfig(5, "x10p_big.dsp").unwrap_err();
    assert!(err.is_run_active());
    system.stop_run().unwrap();
}

// =============================================================================
// Calibration and passthrough
// =============================================================================

#[test]
fn test_calibrate() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();
    system.calibrate(2).unwrap();
    system.calibrate_one_channel(6, 4).unwrap();
    assert_eq!(fx.stats().channel_calibrations, 3);
    let caltask = system.get_symbol_index(6, "CALTASK").unwrap();
    assert_eq!(system.board(0).unwrap().channels[1].params()[caltask], 4);
}

#[test]
fn test_calibration_failure_surfaces_driver_error() {
    let fx = Fixture::standard();
    let mut system = system_failing(&fx, "calibrate_channel");
    system.initialize("xia.cfg").unwrap();

    let err = system.calibrate(1).unwrap_err();
    assert!(matches!(
        err,
        XerxesError::Driver { operation: "calibrate_channel", module: 0, .. }
    ));
}

#[test]
fn test_passthrough() {
    let fx = Fixture::standard();
    let mut system = fx.initialized();

    system.lock_resource(5, true).unwrap();
    assert!(system.board(0).unwrap().locked);
    assert!(system.lock_resource(6, true).unwrap_err().is_driver_failure());
    system.lock_resource(5, false).unwrap();
    assert!(!system.board(0).unwrap().locked);

    system.write_memory(5, "data:0x100:3", &[1, 2, 3]).unwrap();
    assert_eq!(system.read_memory(5, "data:100:4").unwrap(), vec![1, 2, 3, 0]);
    assert!(matches!(
        system.write_memory(5, "data:0x100:3", &[1]),
        Err(XerxesError::BadParameter(_))
    ));
    assert!(matches!(system.read_memory(5, "data"), Err(XerxesError::BadParameter(_))));

    system.write_register(5, "CSR", 0x12).unwrap();
    assert_eq!(system.read_register(5, "CSR").unwrap(), 0x12);
    assert_eq!(system.command(5, 0x81, &[1, 2], 4).unwrap(), vec![0x81, 1, 2, 0]);
}

#[test]
fn test_shared_system_polls_from_worker() {
    let fx = Fixture::standard();
    let shared = SharedSystem::new(fx.initialized());
    shared.with(|system| system.start_run(Some(1), false)).unwrap();

    let poller = shared.clone();
    let status = std::thread::spawn(move || poller.with(|system| system.isrunning_any()))
        .join()
        .unwrap()
        .unwrap();
    assert_eq!(status.0, Some(5));

    shared.with(|system| system.stop_run()).unwrap();
    let system = shared.try_unwrap().unwrap();
    assert!(system.board(0).unwrap().run.is_idle());
}

//! Shared fixture: a temporary directory of config and firmware files and
//! a system wired to the simulated hardware.

#![allow(dead_code)]

use dxp_driver_mock::{catalogs, MockConfig, MockHardware, MockStats};
use dxp_hardware::{FileLocator, System, XerxesSettings};
use std::sync::Arc;
use tempfile::TempDir;

/// Parameter names every test image starts with.
const NAMED: &[&str] = &[
    "MCALEN", "BASELEN", "RUNERROR", "ERRINFO", "CALTASK", "POLARITY", "SLOWLEN", "PEAKINT",
];

/// Mock DSP image text with `nsymbols` parameters.
pub fn dsp_text(nsymbols: usize) -> String {
    let mut text = String::from("* simulated DSP program\nprogram 0x0c00 0x1234 0x5678\n");
    for index in 0..nsymbols {
        match NAMED.get(index) {
            Some(&"RUNERROR") | Some(&"ERRINFO") => {
                text.push_str(&format!("symbol {} r\n", NAMED[index]))
            }
            Some(&"SLOWLEN") => text.push_str("symbol SLOWLEN rw 1 28\n"),
            Some(name) => text.push_str(&format!("symbol {}\n", name)),
            None => text.push_str(&format!("symbol PARAM{}\n", index)),
        }
    }
    text
}

pub const SYSTEM_FILE: &str = "\
* test system
dxpx10p
preamp preamp.cfg
modules modules.cfg
";

pub const MODULES_FILE: &str = "\
board_type dxpx10p
interface epp 0x378
default_dsp x10p.dsp
default_fippi fippi0.fip
default_param defaults.dat
module crate0slot2 5 6 -1 -1
end
";

pub const PREAMP_FILE: &str = "\
* detChan gainmod polarity vmin vmax vstep
ENERGY 5.9
5 1.0 1 -1.0 1.0 0.01
6 2.0 0 -1.0 1.0 0.01
";

pub const DEFAULTS_FILE: &str = "SLOWLEN 20\nPEAKINT 24\n";

pub struct Fixture {
    pub dir: TempDir,
    pub hw: Arc<MockHardware>,
}

impl Fixture {
    /// Empty directory and fresh simulated hardware.
    pub fn empty() -> Self {
        Self::with_config(MockConfig::default())
    }

    pub fn with_config(config: MockConfig) -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
            hw: MockHardware::new(config),
        }
    }

    /// Directory with the standard system, modules, preamp, defaults and
    /// firmware files.
    pub fn standard() -> Self {
        Self::standard_with(MockConfig::default())
    }

    /// Standard files in front of hardware built from `config`.
    pub fn standard_with(config: MockConfig) -> Self {
        let fixture = Self::with_config(config);
        fixture.write("xia.cfg", SYSTEM_FILE);
        fixture.write("modules.cfg", MODULES_FILE);
        fixture.write("preamp.cfg", PREAMP_FILE);
        fixture.write("defaults.dat", DEFAULTS_FILE);
        fixture.write("x10p.dsp", &dsp_text(50));
        fixture.write("x10p_big.dsp", &dsp_text(80));
        fixture.write("fippi0.fip", "0001 0002 0003\n");
        fixture.write("fippi1.fip", "0004 0005\n");
        fixture
    }

    pub fn write(&self, name: &str, text: &str) {
        std::fs::write(self.dir.path().join(name), text).expect("write fixture file");
    }

    pub fn settings(&self) -> XerxesSettings {
        XerxesSettings {
            home_vars: Vec::new(),
            search_paths: vec![self.dir.path().to_path_buf()],
            dsp_settle_ms: 0,
            ..XerxesSettings::default()
        }
    }

    /// Unconfigured system searching only the fixture directory.
    pub fn system(&self) -> System {
        let settings = self.settings();
        let locator = FileLocator::new(&settings).with_env(|_| None);
        let (drivers, transports) = catalogs(&self.hw);
        System::new(settings, drivers, transports).with_locator(locator)
    }

    /// Built but not downloaded: system and modules files applied.
    pub fn built(&self) -> System {
        let mut system = self.system();
        system.read_config("xia.cfg").expect("read_config");
        system.assign_channel().expect("assign_channel");
        system
    }

    /// Fully initialized system.
    pub fn initialized(&self) -> System {
        let mut system = self.system();
        system.initialize("xia.cfg").expect("initialize");
        system
    }

    pub fn stats(&self) -> MockStats {
        self.hw.stats()
    }
}

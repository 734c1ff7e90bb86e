//! Firmware and parameter-defaults images.
//!
//! Images are decoded by a board driver and then owned by the registries in
//! `dxp-hardware`. Modules never own images; their channel slots hold
//! handles into the registry, so one image is shared by every channel that
//! was configured with the same filename.

use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// Host access permitted on a DSP parameter.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
    pub struct ParamAccess: u8 {
        /// Host may read the parameter.
        const READ = 0x1;
        /// Host may write the parameter.
        const WRITE = 0x2;
    }
}

/// One entry of a DSP image's parameter table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSymbol {
    /// Symbol name, case sensitive.
    pub name: String,
    /// Offset into the channel's live parameter block.
    pub address: u16,
    /// Host access permitted on the parameter.
    pub access: ParamAccess,
    /// Smallest accepted value.
    pub lower: u16,
    /// Largest accepted value.
    pub upper: u16,
}

impl ParamSymbol {
    /// Read/write symbol spanning the full 16-bit range.
    pub fn new(name: impl Into<String>, address: u16) -> Self {
        Self {
            name: name.into(),
            address,
            access: ParamAccess::READ | ParamAccess::WRITE,
            lower: 0,
            upper: u16::MAX,
        }
    }
}

/// Decoded DSP program plus its parameter table.
#[derive(Debug, Clone, PartialEq)]
pub struct DspImage {
    /// Registry key the image was loaded under.
    pub filename: String,
    /// Program words; empty if the image carries only a symbol table.
    pub program: Vec<u16>,
    /// Parameter table in address order.
    pub symbols: Vec<ParamSymbol>,
}

impl DspImage {
    /// Image from decoded parts.
    pub fn new(filename: impl Into<String>, program: Vec<u16>, symbols: Vec<ParamSymbol>) -> Self {
        Self {
            filename: filename.into(),
            program,
            symbols,
        }
    }

    /// Number of parameters; also the length of every live buffer bound to
    /// this image.
    pub fn nsymbols(&self) -> usize {
        self.symbols.len()
    }

    /// Index of `name` in the parameter table.
    pub fn symbol_index(&self, name: &str) -> Option<usize> {
        self.symbols.iter().position(|sym| sym.name == name)
    }

    /// Table entry of `name`.
    pub fn symbol(&self, name: &str) -> Option<&ParamSymbol> {
        self.symbols.iter().find(|sym| sym.name == name)
    }
}

/// Decoded FPGA configuration (FiPPI, user FiPPI or MMU).
#[derive(Debug, Clone, PartialEq)]
pub struct FippiImage {
    /// Registry key the image was loaded under.
    pub filename: String,
    /// Configuration words.
    pub data: Vec<u16>,
}

impl FippiImage {
    /// Image from decoded configuration words.
    pub fn new(filename: impl Into<String>, data: Vec<u16>) -> Self {
        Self {
            filename: filename.into(),
            data,
        }
    }
}

/// Symbol values overlaid on a channel's parameters after DSP download.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamDefaults {
    /// Registry key the defaults were loaded under.
    pub filename: String,
    /// `(symbol, value)` pairs in file order.
    pub entries: Vec<(String, u16)>,
}

impl ParamDefaults {
    /// Defaults from decoded entries.
    pub fn new(filename: impl Into<String>, entries: Vec<(String, u16)>) -> Self {
        Self {
            filename: filename.into(),
            entries,
        }
    }

    /// True for the `NULL` placeholder filename, which carries no entries.
    pub fn is_null_name(filename: &str) -> bool {
        filename
            .get(..4)
            .is_some_and(|head| head.eq_ignore_ascii_case("null"))
    }
}

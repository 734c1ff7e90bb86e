//! Configuration input.
//!
//! - [`tokenizer`]: line/token splitting shared by both text formats
//! - [`system_file`]: the system (`XIA_CONFIG`) file
//! - [`modules_file`]: the per-module board description file
//! - [`preamp_file`]: per-detector analog front-end settings
//! - [`locate`]: file search across home directories and environment
//! - [`settings`]: figment-loaded library settings

pub mod locate;
pub mod modules_file;
pub mod preamp_file;
pub mod settings;
pub mod system_file;
pub mod tokenizer;

pub use locate::FileLocator;
pub use modules_file::{parse_modules, ImageSlot, ModuleDirective};
pub use preamp_file::{parse_preamp, PreampEntry, PreampSettings};
pub use settings::{load_settings, SettingsError, XerxesSettings};
pub use system_file::{parse_system, SystemDirective};

//! Error types for the Xerxes core.
//!
//! Every fallible operation in the workspace returns [`XerxesError`]. Each
//! variant carries the structured context needed to format a diagnostic at
//! the logging boundary, and maps back onto the legacy integer status codes
//! through [`XerxesError::code`] for hosts that still speak them.
//!
//! ## Error Hierarchy
//!
//! - **Configuration**: `FileNotFound`, `OpenFailed`, `UnrecognizedDirective`,
//!   `MalformedLine`, `UnknownBoardType`, `DuplicateDetectorChannel`
//! - **Registry**: `NoMatch`, `InUse`, `ArrayCapacityExceeded`, `OutOfMemory`
//! - **Resolution**: `UnknownDetectorChannel`, `UnknownIoChannel`,
//!   `NoModuleChannel`, `BadChannelIndex`
//! - **Acquisition**: `RunActive`, `DspRunError`, `NoSymbol`, `Driver`
//!
//! Drivers and transports report [`DriverError`]; the orchestration layer
//! wraps those in [`XerxesError::Driver`] together with the operation name
//! and the module that failed.

use crate::codes;
use crate::types::{IoChan, RunStatus};
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Category of a failure reported by a board driver or transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Opening a module on the transport failed.
    Open,
    /// Transport-level read or write failed.
    Communication,
    /// Transport or driver initialisation failed.
    Initialization,
    /// A firmware or defaults file could not be read or decoded.
    FirmwareFormat,
    /// FPGA download did not complete.
    FpgaDownload,
    /// DSP download did not complete.
    DspDownload,
    /// Hardware memory self-test failed.
    Memory,
    /// A symbol or register name is unknown to the loaded image.
    Symbol,
    /// The hardware did not become ready in time.
    Timeout,
    /// Value outside the accepted range.
    InvalidParameter,
    /// The board type does not implement this capability.
    Unsupported,
    /// Resource locking is unavailable or failed.
    Lock,
    /// Any other hardware fault.
    Hardware,
}

impl DriverErrorKind {
    /// Legacy status code used when the driver does not supply one.
    pub fn default_code(self) -> i32 {
        match self {
            DriverErrorKind::Open => codes::MDOPEN,
            DriverErrorKind::Communication => codes::MDIO,
            DriverErrorKind::Initialization => codes::MDINITIALIZE,
            DriverErrorKind::FirmwareFormat => codes::DSPLOAD,
            DriverErrorKind::FpgaDownload => codes::FIPDOWNLOAD,
            DriverErrorKind::DspDownload => codes::DSPDOWNLOAD,
            DriverErrorKind::Memory => codes::MEMERROR,
            DriverErrorKind::Symbol => codes::NOSYMBOL,
            DriverErrorKind::Timeout => codes::DSPTIMEOUT,
            DriverErrorKind::InvalidParameter => codes::BAD_PARAM,
            DriverErrorKind::Unsupported => codes::NOSUPPORT,
            DriverErrorKind::Lock => codes::MDLOCK,
            DriverErrorKind::Hardware => codes::MDIO,
        }
    }
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Open => "open",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::FirmwareFormat => "firmware_format",
            DriverErrorKind::FpgaDownload => "fpga_download",
            DriverErrorKind::DspDownload => "dsp_download",
            DriverErrorKind::Memory => "memory",
            DriverErrorKind::Symbol => "symbol",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unsupported => "unsupported",
            DriverErrorKind::Lock => "lock",
            DriverErrorKind::Hardware => "hardware",
        };
        write!(f, "{}", label)
    }
}

/// Failure reported by a [`BoardDriver`](crate::BoardDriver) or
/// [`Transport`](crate::Transport).
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Board type or interface tag that reported the failure.
    pub driver_type: String,
    /// Failure category.
    pub kind: DriverErrorKind,
    /// Human-readable detail.
    pub message: String,
    code: Option<i32>,
}

impl DriverError {
    /// Error with the kind's default legacy code.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
            code: None,
        }
    }

    /// Capability not implemented by this board type.
    pub fn unsupported(driver_type: impl Into<String>, operation: &str) -> Self {
        Self::new(
            driver_type,
            DriverErrorKind::Unsupported,
            format!("'{}' is not supported", operation),
        )
    }

    /// Override the legacy status code reported for this error.
    #[must_use]
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    /// Legacy status code: the explicit one if set, else the kind's default.
    pub fn code(&self) -> i32 {
        self.code.unwrap_or_else(|| self.kind.default_code())
    }
}

/// Result alias for driver and transport calls.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

// =============================================================================
// Library Errors
// =============================================================================

/// Convenience alias for results using the library error type.
pub type Result<T> = std::result::Result<T, XerxesError>;

/// Primary error type of the Xerxes core.
#[derive(Error, Debug)]
pub enum XerxesError {
    /// No file matched after walking the whole search path.
    #[error("File not found: {name}")]
    FileNotFound { name: String },

    /// A located file could not be opened or read.
    #[error("Unable to open {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    /// Board type name not known, or no driver is registered for it.
    #[error("Unknown board type '{name}'")]
    UnknownBoardType { name: String },

    /// Detector channel is not registered on any module.
    #[error("Detector channel {det_chan} is not defined")]
    UnknownDetectorChannel { det_chan: i32 },

    /// No module is open on the given I/O channel.
    #[error("No module is open on I/O channel {io_chan}")]
    UnknownIoChannel { io_chan: IoChan },

    /// Module channel index exceeds the matched module's channel count.
    #[error("Module channel {mod_chan} out of range: module has {nchan} channels")]
    NoModuleChannel { mod_chan: usize, nchan: usize },

    /// Channel index in a config directive is outside the module.
    #[error("Line {line}: channel #{channel} out of range, module has {nchan} channels")]
    BadChannelIndex { line: usize, channel: i64, nchan: usize },

    /// Detector id assigned to more than one channel.
    #[error("Detector channel {det_chan} already assigned to module {module}")]
    DuplicateDetectorChannel { det_chan: i32, module: usize },

    /// A buffer required by the operation was never allocated.
    #[error("No memory allocated for {what}")]
    OutOfMemory { what: String },

    /// Registry lookup by key found nothing.
    #[error("No {kind} matching '{key}'")]
    NoMatch { kind: &'static str, key: String },

    /// Registry entry still referenced by a module.
    #[error("{kind} '{key}' is still used by module {module}")]
    InUse {
        kind: &'static str,
        key: String,
        module: usize,
    },

    /// Config file directive not recognized.
    #[error("Line {line}: unrecognized directive '{token}'")]
    UnrecognizedDirective { line: usize, token: String },

    /// Config line has the right directive but bad arguments.
    #[error("Line {line}: {message}")]
    MalformedLine { line: usize, message: String },

    /// Invalid argument passed by the caller.
    #[error("Bad parameter: {0}")]
    BadParameter(String),

    /// A run or control task is active where none may be.
    #[error("Detector channel {det_chan}: {}", describe_activity(.status))]
    RunActive { det_chan: i32, status: RunStatus },

    /// More modules than the configured maximum, or more channels than a
    /// module mask can hold.
    #[error("Capacity exceeded: at most {max} {what}")]
    ArrayCapacityExceeded { what: &'static str, max: usize },

    /// System not configured far enough for the request.
    #[error("Initialization error: {0}")]
    Initialize(String),

    /// Operation on an empty system.
    #[error("No channels are defined")]
    NoChannels,

    /// Symbol name not present in the DSP image's parameter table.
    #[error("Symbol '{name}' not found in DSP image {image}")]
    NoSymbol { name: String, image: String },

    /// Index past the end of a symbol table.
    #[error("Index {index} out of bounds, table has {len} entries")]
    IndexOutOfBounds { index: usize, len: usize },

    /// The DSP reported an error after a run.
    #[error("DSP run error on detector channel {det_chan}: runerror={runerror} errinfo={errinfo}")]
    DspRunError {
        det_chan: i32,
        runerror: u16,
        errinfo: u16,
    },

    /// A driver or transport call failed.
    #[error("{operation} failed on module {module}: {source}")]
    Driver {
        operation: &'static str,
        module: usize,
        #[source]
        source: DriverError,
    },

    /// File system failure outside config parsing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_activity(status: &RunStatus) -> &'static str {
    if status.contains(RunStatus::HARDWARE) {
        "hardware run is active"
    } else if status.contains(RunStatus::CONTROL_TASK) {
        "control task is active"
    } else {
        "run is active according to software state"
    }
}

impl XerxesError {
    /// Legacy integer status code for this error.
    pub fn code(&self) -> i32 {
        match self {
            XerxesError::FileNotFound { .. } => codes::FILENOTFOUND,
            XerxesError::OpenFailed { .. } | XerxesError::Io(_) => codes::OPEN_FILE,
            XerxesError::UnknownBoardType { .. } => codes::UNKNOWN_BTYPE,
            XerxesError::UnknownDetectorChannel { .. } => codes::NODETCHAN,
            XerxesError::UnknownIoChannel { .. } => codes::NOIOCHAN,
            XerxesError::NoModuleChannel { .. } => codes::NOMODCHAN,
            XerxesError::BadChannelIndex { .. } => codes::BADCHANNEL,
            XerxesError::DuplicateDetectorChannel { .. }
            | XerxesError::MalformedLine { .. }
            | XerxesError::BadParameter(_) => codes::BAD_PARAM,
            XerxesError::OutOfMemory { .. } => codes::NOMEM,
            XerxesError::NoMatch { .. } => codes::NOMATCH,
            XerxesError::InUse { .. } => codes::MEMINUSE,
            XerxesError::UnrecognizedDirective { .. } => codes::INPUT_UNDEFINED,
            XerxesError::RunActive { .. } => codes::RUNACTIVE,
            XerxesError::ArrayCapacityExceeded { .. } => codes::ARRAY_TOO_SMALL,
            XerxesError::Initialize(_) => codes::INITIALIZE,
            XerxesError::NoChannels => codes::NOCHANNELS,
            XerxesError::NoSymbol { .. } => codes::NOSYMBOL,
            XerxesError::IndexOutOfBounds { .. } => codes::INDEXOOB,
            XerxesError::DspRunError { .. } => codes::DSPRUNERROR,
            XerxesError::Driver { source, .. } => source.code(),
        }
    }

    /// True for "run or control task already active" failures.
    pub fn is_run_active(&self) -> bool {
        matches!(self, XerxesError::RunActive { .. })
    }

    /// True for lookups that found nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            XerxesError::FileNotFound { .. }
                | XerxesError::UnknownDetectorChannel { .. }
                | XerxesError::UnknownIoChannel { .. }
                | XerxesError::NoMatch { .. }
                | XerxesError::NoSymbol { .. }
        )
    }

    /// True when the failure came from a driver or transport call.
    pub fn is_driver_failure(&self) -> bool {
        matches!(self, XerxesError::Driver { .. })
    }

    /// Wrap a driver error with the failing operation and module.
    pub fn driver(operation: &'static str, module: usize, source: DriverError) -> Self {
        XerxesError::Driver {
            operation,
            module,
            source,
        }
    }
}

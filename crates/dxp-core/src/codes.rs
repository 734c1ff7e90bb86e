//! Legacy integer status codes.
//!
//! Hosts that predate [`XerxesError`](crate::XerxesError) expect these
//! numeric values; [`XerxesError::code`](crate::XerxesError::code) maps onto
//! them.

/// Operation succeeded.
pub const SUCCESS: i32 = 0;

// Machine-dependent transport layer
/// A module could not be opened.
pub const MDOPEN: i32 = 1;
/// A bus transfer failed.
pub const MDIO: i32 = 2;
/// The transport library failed to initialize.
pub const MDINITIALIZE: i32 = 3;
/// The hardware lock could not be taken or released.
pub const MDLOCK: i32 = 4;

// DSP and firmware
/// Board memory could not be accessed.
pub const MEMERROR: i32 = 201;
/// The DSP reported a run error.
pub const DSPRUNERROR: i32 = 202;
/// An FPGA download failed.
pub const FIPDOWNLOAD: i32 = 203;
/// A DSP download failed.
pub const DSPDOWNLOAD: i32 = 204;
/// No DSP parameter has the requested name.
pub const NOSYMBOL: i32 = 208;
/// A DSP image could not be decoded.
pub const DSPLOAD: i32 = 210;
/// DSP parameter memory could not be transferred.
pub const DSPPARAMS: i32 = 211;

// Configuration and lookup
/// An argument or parameter value is invalid.
pub const BAD_PARAM: i32 = 301;
/// A file could not be opened.
pub const OPEN_FILE: i32 = 303;
/// A required configuration entry is missing.
pub const INPUT_UNDEFINED: i32 = 306;
/// A fixed capacity was exceeded.
pub const ARRAY_TOO_SMALL: i32 = 307;
/// No detector channel is configured.
pub const NOCHANNELS: i32 = 308;
/// The detector channel is unknown.
pub const NODETCHAN: i32 = 309;
/// The I/O channel is unknown.
pub const NOIOCHAN: i32 = 310;
/// The module channel is out of range.
pub const NOMODCHAN: i32 = 311;
/// A file was not found on any search path.
pub const FILENOTFOUND: i32 = 313;
/// Initialization failed.
pub const INITIALIZE: i32 = 315;
/// The board type is unknown.
pub const UNKNOWN_BTYPE: i32 = 316;
/// No registry entry matches the key.
pub const NOMATCH: i32 = 317;
/// A channel index in a config file is out of range.
pub const BADCHANNEL: i32 = 318;
/// The DSP did not become ready in time.
pub const DSPTIMEOUT: i32 = 319;

// Host-side resources and run control
/// A buffer could not be allocated.
pub const NOMEM: i32 = 401;
/// An index is out of bounds.
pub const INDEXOOB: i32 = 404;
/// A run is active.
pub const RUNACTIVE: i32 = 405;
/// The entry is still referenced.
pub const MEMINUSE: i32 = 406;
/// The board does not support the operation.
pub const NOSUPPORT: i32 = 408;

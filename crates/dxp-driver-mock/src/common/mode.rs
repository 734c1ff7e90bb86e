//! Operational modes for the simulated hardware.
//!
//! - **Instant**: waits are recorded but never slept, DSPs are ready at once
//! - **Realistic**: transport waits sleep and DSPs take a few polls to boot
//! - **Chaos**: like Realistic, meant to be paired with an [`ErrorConfig`](super::ErrorConfig)

use std::time::Duration;

/// Operational modes for mock devices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MockMode {
    /// Zero delays, deterministic - for unit tests
    #[default]
    Instant,
    /// Hardware-like timing - for integration tests
    Realistic,
    /// Configurable failures - for resilience testing
    Chaos,
}

impl MockMode {
    /// Whether `Transport::wait` actually sleeps.
    pub fn sleeps(self) -> bool {
        !matches!(self, MockMode::Instant)
    }

    /// Number of ready polls a freshly downloaded DSP needs.
    pub fn dsp_boot_polls(self) -> u32 {
        match self {
            MockMode::Instant => 0,
            MockMode::Realistic | MockMode::Chaos => 3,
        }
    }

    /// Interval between DSP ready polls.
    pub fn poll_interval(self) -> Duration {
        match self {
            MockMode::Instant => Duration::from_millis(100),
            MockMode::Realistic | MockMode::Chaos => Duration::from_millis(5),
        }
    }
}

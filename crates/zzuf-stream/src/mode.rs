//! Capability mode selection.
//!
//! Chosen once when the interceptor is built and never changed afterwards.

use crate::reals::REAL___SREFILL;
use zzuf_config::{log_config_warn, StreamMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityMode {
    /// The host libc exposes its buffer refill routine (`__srefill`). Whole
    /// buffers are corrupted as they are filled; every other entry point only
    /// takes the descriptor lock.
    RefillHook,
    /// Block reads are reconciled against the real stream cursor; character
    /// and line reads are corrupted one byte at a time.
    Differential,
    /// No cursor queries at all: block reads are replayed through the real
    /// character primitive as well.
    CharacterReplay,
}

impl CapabilityMode {
    /// Pick the strategy the host library supports best.
    pub fn detect() -> Self {
        if Self::refill_available() {
            CapabilityMode::RefillHook
        } else {
            CapabilityMode::Differential
        }
    }

    pub fn refill_available() -> bool {
        !REAL___SREFILL.probe().is_null()
    }

    /// Honour a configured mode where the host allows it.
    pub fn select(requested: StreamMode) -> Self {
        match requested {
            StreamMode::Auto => Self::detect(),
            StreamMode::Differential => CapabilityMode::Differential,
            StreamMode::Replay => CapabilityMode::CharacterReplay,
            StreamMode::Refill if Self::refill_available() => CapabilityMode::RefillHook,
            StreamMode::Refill => {
                log_config_warn!("refill mode requested but __srefill is unavailable");
                Self::detect()
            }
        }
    }

    /// Whether character, line and block entry points corrupt what they read.
    #[inline]
    pub fn corrupts_on_read(self) -> bool {
        self != CapabilityMode::RefillHook
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityMode::RefillHook => "refill",
            CapabilityMode::Differential => "differential",
            CapabilityMode::CharacterReplay => "replay",
        }
    }
}

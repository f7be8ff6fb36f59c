//! # zzuf-stream
//!
//! Position-synchronized corruption of buffered stdio reads.
//!
//! The preload library routes every intercepted stdio entry point through an
//! [`Interceptor`]. For descriptors selected by the [`WatchPolicy`] it keeps
//! a logical offset per stream, hands each freshly produced byte window to a
//! [`FuzzEngine`] exactly once, and keeps buffered, character and line
//! oriented reads consistent with each other.
//!
//! Three strategies are available (see [`CapabilityMode`]):
//! - refill hook, where the BSD `__srefill` routine is wrapped and whole
//!   buffers are corrupted as they fill
//! - differential, where block reads are reconciled against the real cursor
//! - character replay, where every composite read is rebuilt from `fgetc`
//!
//! Nothing in this crate writes through C stdio, so diagnostics never
//! re-enter the intercepted functions.

#![allow(clippy::missing_safety_doc)]

pub mod composite;
pub mod engine;
pub mod interceptor;
pub mod mode;
pub mod policy;
pub mod reals;
pub mod session;
pub mod stream;
pub mod sync;
pub mod testing;

pub use engine::{FuzzEngine, XorFuzzer};
pub use interceptor::Interceptor;
pub use mode::CapabilityMode;
pub use policy::{PatternPolicy, PolicyError, WatchPolicy};
pub use session::{Session, SessionTable};
pub use stream::{LibcStream, RawStream, EOF};

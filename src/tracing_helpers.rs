//! Filepath: src/tracing_helpers.rs
//!
//! Logging macros gated on the `tracing` feature.
//!
//! The tree sits on a hot update path — one insert and one delete per
//! sample — so instrumentation must cost nothing unless asked for. With
//! the feature off (the default), every macro below expands to an empty
//! token stream and its arguments are never evaluated. With the feature
//! on, each macro forwards to the matching level of the `tracing` crate.
//!
//! Levels as used in this crate: `trace_log!` follows individual
//! structure mutations (slot taken, edge split, node released),
//! `debug_log!` marks policy decisions (window eviction), `warn_log!`
//! flags caller-side bookkeeping drift that the tree can tolerate, and
//! `error_log!` fires where an operation is about to fail.
//!
//! ```bash
//! # Instrumented test run, scoped to this crate
//! RUST_LOG=cuttree=debug cargo test --features tracing
//! ```

#![allow(unused_macros, unused_imports)]

/// Per-mutation tracing, the most verbose level.
#[cfg(feature = "tracing")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

/// Policy decisions worth seeing in a debug session.
#[cfg(feature = "tracing")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

/// Tolerated inconsistencies between the caller and the tree.
#[cfg(feature = "tracing")]
macro_rules! warn_log {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn_log {
    ($($arg:tt)*) => {};
}

/// Imminent operation failure.
#[cfg(feature = "tracing")]
macro_rules! error_log {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! error_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use error_log;
pub(crate) use trace_log;
pub(crate) use warn_log;

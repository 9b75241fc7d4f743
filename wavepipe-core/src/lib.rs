//! # Wavepipe Core
//!
//! Push-based real-time audio streaming pipeline. Independently written
//! producers and consumers chain through one flow-control contract
//! ([`stream::AudioSink`]); the infrastructure here handles everything
//! between them:
//!
//! - [`stream`]: the contract itself, the bounded ring buffer with
//!   overwrite/pre-buffering policy, the open/closed valve, and the
//!   push-to-pull reader.
//! - [`device`]: many logical channels multiplexed onto one shared
//!   hardware stream — use-counted device registry, per-round transfer
//!   sizing, underrun zero-fill and automatic device-error recovery.
//! - [`mixer`]: software N-to-1 stream summation on a coalesced
//!   schedule.
//! - [`driver`]: the tokio timing loop standing in for the reactor.
//!
//! Samples are mono `f32` in `[-1.0, 1.0]` everywhere above the
//! transport; hardware blocks are interleaved `i16`.

pub mod device;
pub mod driver;
pub mod error;
pub mod mixer;
pub mod stream;

pub use error::{Error, Result};

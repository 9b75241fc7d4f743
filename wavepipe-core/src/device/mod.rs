//! Shared hardware devices and the logical channels multiplexed on them
//!
//! - [`transport`]: the backend interface (`Transport`, `BlockGeometry`)
//! - [`registry`]: `transport:target` keyed, use-counted device lifecycle
//! - [`multiplexer`]: per-round transfer sizing, mixing and recovery
//! - [`channel`]: the producer-facing front-end for one logical stream

pub mod channel;
pub mod multiplexer;
pub mod registry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{CaptureSink, Channel};
pub use multiplexer::DeviceMux;
pub use registry::{DeviceKey, DeviceRegistry};
pub use transport::{BlockGeometry, NullTransport, OpenMode, Transport, TransportFactory};

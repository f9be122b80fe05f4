//! Wire protocol: JSON text envelopes plus length-prefixed binary frames.

pub mod envelope;
pub mod frame;

pub use envelope::{InboundMessage, OutboundMessage};
pub use frame::{BinaryFrame, FrameError};

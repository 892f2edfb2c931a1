//! Stellarium integration
//!
//! - Telescope Control binary protocol (position and goto frames)
//! - Telescope Control bridge between the push-to topics and Stellarium
//! - Remote Control REST client for introspection

mod error;
pub mod protocol;
pub mod bridge;
pub mod rpc;

pub use error::{StellariumError, StellariumResult};
pub use protocol::{decode_goto, encode_goto, encode_position, FrameBuffer, SlewTarget};
pub use bridge::{StellariumLink, StellariumTc, DEFAULT_HANDSHAKE_TIMEOUT};
pub use rpc::{StellariumRpc, DEFAULT_API_URL};

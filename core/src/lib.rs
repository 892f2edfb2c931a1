//! Push-To Core
//!
//! Estimation and messaging pieces shared by every push-to component.
//!
//! ## Features
//!
//! - Angle pair <-> unit direction vector conversions
//! - Encoder count to telescope attitude conversion with pole reflection
//! - 8-term pointing model (forward correction and iterative inversion)
//! - Telescope-to-sky alignment from star sightings (Wahba's problem via SVD)
//! - Horizontal <-> equatorial conversion for an observing site
//! - Tagged DATA/ALIGN/CMD messages with a lossless JSON encoding
//! - Single-writer publish/subscribe topics carrying encoded messages

mod error;
pub mod direction;
pub mod attitude;
pub mod alignment;
pub mod location;
pub mod message;
pub mod bus;

pub use error::{CoreError, CoreResult};
pub use direction::{angles_from_vec, vec_from_angles, Direction};
pub use attitude::{EncoderConfig, PointingModel};
pub use alignment::{Aligner, AlignmentQuality, StarObservation};
pub use location::{Equatorial, Horizontal, Location, LocationConfig, SkyConverter};
pub use message::{AlignMessage, CmdMessage, DataMessage, Decoded, Message, CMD_RESET, CMD_STOP};
pub use bus::{Publisher, Subscriber, DEFAULT_TOPIC_CAPACITY};

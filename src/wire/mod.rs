//! Request and response shapes exchanged with the target VM.
//!
//! The byte layout on the physical channel belongs to the transport
//! collaborator; this module only fixes which state subsets a request asks
//! for and how a structured inspection response decodes.

mod request;
mod response;

pub use request::StateRequest;
pub use response::{
    FrameType, WireCallbackMapping, WireEvent, WireFrame, WireState, WireValue,
};

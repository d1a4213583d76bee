#![doc = include_str!("../README.md")]

#[cfg(feature = "async-tokio")]
mod disconnect;
mod definition;
mod error;
mod id;
mod layout;
mod lease;
mod lessee;
mod lifecycle;
mod record;
mod request;
mod sequencer;
mod status;
mod store;
mod time;

pub use crate::definition::*;
#[cfg(feature = "async-tokio")]
pub use crate::disconnect::*;
pub use crate::error::*;
pub use crate::id::*;
pub use crate::layout::*;
pub use crate::lease::*;
pub use crate::lessee::*;
pub use crate::lifecycle::*;
pub use crate::record::*;
pub use crate::request::*;
pub use crate::sequencer::*;
pub use crate::status::*;
pub use crate::store::*;
pub use crate::time::*;

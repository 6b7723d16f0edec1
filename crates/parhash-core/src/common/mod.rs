//! Types shared between the dispatcher and anything that talks to it.

pub mod error;

pub use error::{Error, Result};

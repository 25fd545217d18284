//! The realtime plumbing of tonedeaf: configuration, presence, and the
//! cross-process broadcast fabric.

mod config;
mod fabric;
mod presence;
mod util;

pub use config::*;
pub use fabric::*;
pub use presence::*;
pub use util::*;

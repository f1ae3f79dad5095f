//! Data models for projects and their server-side snapshots

mod capabilities;
mod log;
mod ports;
mod snapshot;
mod state;

pub use capabilities::*;
pub use log::*;
pub use ports::*;
pub use snapshot::*;
pub use state::*;

//! Command implementations for projsync

pub mod control;
pub mod installer;
pub mod list;
pub mod watch;

pub use control::control;
pub use installer::installer;
pub use list::list;
pub use watch::watch;

//! # Configuration
//!
//! - `controller`: controller-level settings read from the environment
//! - `watches`: the watches file listing managed resource types

pub mod controller;
pub mod watches;

pub use controller::ControllerConfig;
pub use watches::{Watch, WatchesError};

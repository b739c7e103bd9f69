//! # Runtime
//!
//! Operator process wiring.
//!
//! - `initialization`: startup sequence
//! - `watch_loop`: one controller per watched kind and namespace
//! - `error_policy`: requeue backoff for failed reconciliations

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

//! Terraform Operator Library
//!
//! Reconciles Kubernetes resources of user-declared kinds into Terraform
//! deployments. The kinds to watch, their Terraform templates and optional
//! value overrides come from a watches file loaded at startup.
//!
//! ## Quick Start
//!
//! ```rust
//! use terraform_operator::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod deployment;
pub mod observability;
pub mod prelude;
pub mod runtime;

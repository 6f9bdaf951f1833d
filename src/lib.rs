//! nsgpush - push firewall rules to an Azure network security group
//!
//! Reads a JSON rules file, translates each record into a security rule, and
//! replaces the rule set of one network security group with a single
//! create-or-update call.
//!
//! # Architecture
//!
//! - [`core`] - Rule loading, translation, and the ARM client
//! - [`credential`] - Bearer token pickup from the ambient Azure session
//! - [`config`] - Config file loading and merging with CLI flags
//! - [`audit`] - Apply history log
//! - [`utils`] - Utility functions (XDG directories, etc.)

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod credential;
pub mod utils;

// Re-export commonly used types
pub use core::error::{Error, Result};
pub use core::nsg::{RuleSet, SecurityRule};
pub use core::rules::RuleRecord;

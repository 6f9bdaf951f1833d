//! Core rule handling and remote apply
//!
//! This module contains the linear pipeline that turns a rules file into a
//! network security group on Azure:
//!
//! - [`rules`]: Loading and parsing the input rules file
//! - [`nsg`]: Translation into the provider's security rule representation
//! - [`arm`]: Azure Resource Manager client and long-running operation polling
//! - [`apply`]: The apply entry point tying the steps together
//! - [`error`]: Error types and backend error translations

pub mod apply;
pub mod arm;
pub mod error;
pub mod nsg;
pub mod rules;

#[cfg(test)]
pub mod test_helpers;

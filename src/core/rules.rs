//! Rule file loading
//!
//! A rules file is a JSON object with a single `rules` array. Each element is a
//! [`RuleRecord`] holding the raw, untranslated field values exactly as the
//! author wrote them.
//!
//! # Example
//!
//! ```
//! use nsgpush::core::rules::parse_rules;
//!
//! let records = parse_rules(r#"{"rules": []}"#).unwrap();
//! assert!(records.is_empty());
//! ```

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// Prefix list as written in the rules file
///
/// Existing rules files store these as a plain string; arrays are
/// accepted too so a rule can list several prefixes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum PrefixList {
    Single(String),
    Many(Vec<String>),
}

impl PrefixList {
    /// Returns the prefixes, or `None` when nothing meaningful is set
    pub fn to_prefixes(&self) -> Option<Vec<String>> {
        match self {
            PrefixList::Single(s) if s.is_empty() => None,
            PrefixList::Single(s) => Some(vec![s.clone()]),
            PrefixList::Many(v) if v.is_empty() => None,
            PrefixList::Many(v) => Some(v.clone()),
        }
    }
}

impl From<&str> for PrefixList {
    fn from(value: &str) -> Self {
        PrefixList::Single(value.to_string())
    }
}

/// A single rule as read from the input file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleRecord {
    pub direction: String,
    pub priority: i32,
    pub name: String,
    pub description: String,
    pub source_address_prefix: String,
    pub source_address_prefixes: PrefixList,
    pub source_port_range: String,
    pub destination_address_prefix: String,
    pub destination_address_prefixes: PrefixList,
    pub destination_port_range: String,
    pub protocol: String,
    pub access: String,
}

/// Parses the contents of a rules file.
///
/// # Errors
///
/// - [`Error::Parse`] if `text` is not JSON at all
/// - [`Error::Schema`] if the top-level `rules` key is absent, is not an
///   array, or a record is missing a field or has the wrong type
pub fn parse_rules(text: &str) -> Result<Vec<RuleRecord>> {
    let document: Value = serde_json::from_str(text).map_err(Error::Parse)?;

    let rules = document
        .get("rules")
        .ok_or_else(|| Error::Schema("missing top-level \"rules\" key".to_string()))?;

    let entries = rules
        .as_array()
        .ok_or_else(|| Error::Schema("\"rules\" must be an array".to_string()))?;

    let mut records = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let record = RuleRecord::deserialize(entry)
            .map_err(|e| Error::Schema(format!("rule #{index}: {e}")))?;
        debug!(index, name = %record.name, "Parsed rule record");
        records.push(record);
    }

    Ok(records)
}

/// Reads and parses a rules file from disk.
///
/// # Async
/// Uses `tokio::fs` for the read; nothing else touches the filesystem.
pub async fn load_rules(path: impl AsRef<Path>) -> Result<Vec<RuleRecord>> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::io(path, e))?;

    let records = parse_rules(&text)?;
    info!("Loaded {} rule(s) from {}", records.len(), path.display());
    Ok(records)
}

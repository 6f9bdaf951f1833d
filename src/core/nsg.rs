//! Network security group request model and rule translation
//!
//! This module turns [`RuleRecord`]s from the input file into the shapes Azure
//! Resource Manager expects for `Microsoft.Network/networkSecurityGroups`.
//!
//! # Translation
//!
//! Each field is copied verbatim except that an empty string becomes `None`,
//! which is omitted from the wire body. The rule `name` is the rule's identity
//! and is always sent. Rule order is preserved; nothing is validated, merged,
//! or de-duplicated.
//!
//! # Example
//!
//! ```
//! use nsgpush::core::nsg::{RuleSet, translate_rules};
//! use nsgpush::core::rules::parse_rules;
//!
//! let records = parse_rules(r#"{"rules": []}"#).unwrap();
//! let ruleset = RuleSet::new("eastus2", translate_rules(&records));
//! let body = serde_json::to_value(ruleset.to_request()).unwrap();
//! assert_eq!(body["properties"]["securityRules"], serde_json::json!([]));
//! ```

use crate::core::rules::RuleRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Translated security rule, ready to be placed in a request body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityRule {
    pub name: String,
    pub properties: SecurityRuleProperties,
}

/// Rule properties in ARM's camelCase wire form
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRuleProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_port_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_port_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_address_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_address_prefixes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_address_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_address_prefixes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
}

/// Returns `None` for the empty string, otherwise a copy of the value
fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Translates one input record into a security rule.
pub fn translate_rule(record: &RuleRecord) -> SecurityRule {
    SecurityRule {
        name: record.name.clone(),
        properties: SecurityRuleProperties {
            description: non_empty(&record.description),
            protocol: non_empty(&record.protocol),
            source_port_range: non_empty(&record.source_port_range),
            destination_port_range: non_empty(&record.destination_port_range),
            source_address_prefix: non_empty(&record.source_address_prefix),
            source_address_prefixes: record.source_address_prefixes.to_prefixes(),
            destination_address_prefix: non_empty(&record.destination_address_prefix),
            destination_address_prefixes: record.destination_address_prefixes.to_prefixes(),
            access: non_empty(&record.access),
            priority: record.priority,
            direction: non_empty(&record.direction),
        },
    }
}

/// Translates records in order; output length always equals input length.
pub fn translate_rules(records: &[RuleRecord]) -> Vec<SecurityRule> {
    records.iter().map(translate_rule).collect()
}

fn or_unset<T: fmt::Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "-".to_string(), ToString::to_string)
}

fn join_or_unset(values: Option<&Vec<String>>) -> String {
    values.map_or_else(|| "-".to_string(), |v| v.join(","))
}

impl fmt::Display for SecurityRule {
    /// One-line summary, e.g. `allow-ssh [100 Inbound Allow Tcp] 10.0.0.0/8:* -> *:22`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.properties;
        let source = match (&p.source_address_prefix, &p.source_address_prefixes) {
            (Some(prefix), _) => prefix.clone(),
            (None, list) => join_or_unset(list.as_ref()),
        };
        let destination = match (&p.destination_address_prefix, &p.destination_address_prefixes) {
            (Some(prefix), _) => prefix.clone(),
            (None, list) => join_or_unset(list.as_ref()),
        };
        write!(
            f,
            "{} [{} {} {} {}] {}:{} -> {}:{}",
            self.name,
            p.priority,
            or_unset(p.direction.as_ref()),
            or_unset(p.access.as_ref()),
            or_unset(p.protocol.as_ref()),
            source,
            or_unset(p.source_port_range.as_ref()),
            destination,
            or_unset(p.destination_port_range.as_ref()),
        )?;
        if let Some(description) = &p.description {
            write!(f, " ({description})")?;
        }
        Ok(())
    }
}

/// Ordered rule sequence plus the target region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    pub location: String,
    pub rules: Vec<SecurityRule>,
}

impl RuleSet {
    pub fn new(location: impl Into<String>, rules: Vec<SecurityRule>) -> Self {
        Self {
            location: location.into(),
            rules,
        }
    }

    /// Builds the create-or-update request body
    pub fn to_request(&self) -> NetworkSecurityGroup {
        NetworkSecurityGroup {
            location: self.location.clone(),
            properties: NetworkSecurityGroupProperties {
                security_rules: self.rules.clone(),
            },
        }
    }
}

/// Request body for `PUT .../networkSecurityGroups/{name}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkSecurityGroup {
    pub location: String,
    pub properties: NetworkSecurityGroupProperties,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSecurityGroupProperties {
    /// Always serialized, an empty rule set sends `[]`
    #[serde(default)]
    pub security_rules: Vec<SecurityRule>,
}

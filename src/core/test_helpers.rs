//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use crate::config::ApplyConfig;
use crate::core::rules::{PrefixList, RuleRecord};
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// Mutex for tests that need exclusive access to environment variables.
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("NSGPUSH_ACCESS_TOKEN", "token");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("NSGPUSH_ACCESS_TOKEN");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// Runs `future` to completion on a fresh current-thread runtime.
///
/// Tests that hold [`ENV_VAR_MUTEX`] are plain `#[test]` functions and drive
/// async code through this, so the guard is never held across an `.await`.
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

/// Creates an inbound allow rule for port 22 from 10.0.0.0/8.
///
/// This is the canonical helper for creating test records.
pub fn create_test_record(name: &str, priority: i32) -> RuleRecord {
    RuleRecord {
        direction: "Inbound".to_string(),
        priority,
        name: name.to_string(),
        description: "SSH from office".to_string(),
        source_address_prefix: "10.0.0.0/8".to_string(),
        source_address_prefixes: PrefixList::from(""),
        source_port_range: "*".to_string(),
        destination_address_prefix: "*".to_string(),
        destination_address_prefixes: PrefixList::from(""),
        destination_port_range: "22".to_string(),
        protocol: "Tcp".to_string(),
        access: "Allow".to_string(),
    }
}

/// Rules file text with one record whose `priority` member is `priority_member`
/// verbatim (e.g. `"priority": 100`).
pub fn rules_json_with(priority_member: &str) -> String {
    format!(
        r#"{{"rules": [{{"direction": "Inbound", {priority_member}, "name": "r",
            "description": "", "source_address_prefix": "*",
            "source_address_prefixes": "", "source_port_range": "*",
            "destination_address_prefix": "*", "destination_address_prefixes": "",
            "destination_port_range": "22", "protocol": "Tcp", "access": "Allow"}}]}}"#
    )
}

/// Writes a rules file with one test record per `(name, priority)` pair.
pub fn write_rules_file(rules: &[(&str, i32)]) -> tempfile::NamedTempFile {
    let records: Vec<RuleRecord> = rules
        .iter()
        .map(|(name, priority)| create_test_record(name, *priority))
        .collect();
    let json = serde_json::json!({ "rules": records });

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.to_string().as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Complete apply config pointed at `endpoint` with fast polling.
pub fn test_apply_config(endpoint: &str) -> ApplyConfig {
    ApplyConfig {
        resource_group: "rg001".to_string(),
        nsg_name: "test-nsg".to_string(),
        location: "East US 2".to_string(),
        subscription_id: None,
        rules_file: PathBuf::from("rules_list.json"),
        endpoint: endpoint.to_string(),
        api_version: "2020-06-01".to_string(),
        poll_interval: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
    }
}

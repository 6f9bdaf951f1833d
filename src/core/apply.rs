//! Apply pipeline: load → translate → create-or-update
//!
//! The rules file is read and translated before credentials are looked up or
//! any connection is opened, so malformed input never reaches the network.

use crate::audit::{self, AuditLog};
use crate::config::ApplyConfig;
use crate::core::arm::{ArmClient, NsgTarget};
use crate::core::error::{Error, Result};
use crate::core::nsg::{NetworkSecurityGroup, RuleSet, SecurityRule, translate_rules};
use crate::core::rules::load_rules;
use crate::credential::{self, AccessToken};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{error, info};

/// Translated rules and the request body built from them
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub rules: Vec<SecurityRule>,
    pub request: NetworkSecurityGroup,
}

impl PreparedRequest {
    /// SHA-256 of the serialized request body, hex encoded
    pub fn checksum(&self) -> Result<String> {
        let json = serde_json::to_vec(&self.request)?;
        let mut hasher = Sha256::new();
        hasher.update(&json);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Result of a successful apply
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub target: NsgTarget,
    /// Remote object as materialized by the backend
    pub resource: Value,
}

/// Loads the rules file and builds the request body. No network access.
pub async fn prepare(rules_file: &Path, location: &str) -> Result<PreparedRequest> {
    let records = load_rules(rules_file).await?;
    let ruleset = RuleSet::new(location, translate_rules(&records));
    info!(
        "Translated {} rule(s) for location '{}'",
        ruleset.rules.len(),
        ruleset.location
    );
    Ok(PreparedRequest {
        request: ruleset.to_request(),
        rules: ruleset.rules,
    })
}

/// Picks the subscription and names the target group.
pub fn resolve_target(config: &ApplyConfig, token: &AccessToken) -> Result<NsgTarget> {
    let subscription = credential::resolve_subscription(
        config.subscription_id.as_deref(),
        token.subscription.as_deref(),
    )
    .ok_or_else(|| {
        Error::Config(
            "no subscription id: pass --subscription, set AZURE_SUBSCRIPTION_ID, or select one with 'az account set'"
                .to_string(),
        )
    })?;
    Ok(NsgTarget::new(
        subscription,
        &config.resource_group,
        &config.nsg_name,
    ))
}

/// Resource id recorded for an attempt that never got as far as a target.
///
/// Without a known subscription this is the id minus its subscription prefix.
fn attempted_resource_id(config: &ApplyConfig, session_subscription: Option<&str>) -> String {
    let configured = config.subscription_id.as_deref();
    match credential::resolve_subscription(configured, session_subscription) {
        Some(subscription) => {
            NsgTarget::new(subscription, &config.resource_group, &config.nsg_name).resource_id()
        }
        None => format!(
            "/resourceGroups/{}/providers/Microsoft.Network/networkSecurityGroups/{}",
            config.resource_group, config.nsg_name
        ),
    }
}

async fn record_attempt(
    history: &AuditLog,
    resource_id: &str,
    prepared: &PreparedRequest,
    error: Option<&Error>,
) {
    audit::log_apply(
        history,
        resource_id,
        prepared.rules.len(),
        &prepared.checksum().unwrap_or_default(),
        error.map(ToString::to_string),
    )
    .await;
}

/// Looks up ambient credentials for an apply.
///
/// A failed lookup is an apply attempt too and is recorded in `history`.
pub async fn authenticate(
    config: &ApplyConfig,
    prepared: &PreparedRequest,
    history: Option<&AuditLog>,
) -> Result<AccessToken> {
    match credential::acquire_token().await {
        Ok(token) => Ok(token),
        Err(e) => {
            let err = Error::from(e);
            error!("No usable credentials: {err}");
            if let Some(history) = history {
                let resource_id = attempted_resource_id(config, None);
                record_attempt(history, &resource_id, prepared, Some(&err)).await;
            }
            Err(err)
        }
    }
}

async fn send_prepared(
    config: &ApplyConfig,
    prepared: &PreparedRequest,
    token: &AccessToken,
) -> Result<ApplyOutcome> {
    let target = resolve_target(config, token)?;

    let client = ArmClient::builder(&config.endpoint)?
        .api_version(&config.api_version)
        .timeout(config.request_timeout)
        .poll_interval(config.poll_interval)
        .bearer_token(&token.token)
        .build()?;

    let resource = client
        .create_or_update_nsg(&target, &prepared.request)
        .await?;
    Ok(ApplyOutcome { target, resource })
}

/// Sends a prepared request and waits for the remote operation to finish.
///
/// When `history` is given, the attempt is recorded there whatever the
/// outcome, including failures before any request is sent.
pub async fn apply_prepared(
    config: &ApplyConfig,
    prepared: &PreparedRequest,
    token: &AccessToken,
    history: Option<&AuditLog>,
) -> Result<ApplyOutcome> {
    let result = send_prepared(config, prepared, token).await;

    match &result {
        Ok(_) => info!("Applied {} rule(s) to {}", prepared.rules.len(), config.nsg_name),
        Err(e) => error!("Apply to {} failed: {e}", config.nsg_name),
    }

    if let Some(history) = history {
        let resource_id = match &result {
            Ok(outcome) => outcome.target.resource_id(),
            Err(_) => attempted_resource_id(config, token.subscription.as_deref()),
        };
        record_attempt(history, &resource_id, prepared, result.as_ref().err()).await;
    }

    result
}

/// Runs the whole pipeline with credentials from the ambient session.
pub async fn apply(config: &ApplyConfig, history: Option<&AuditLog>) -> Result<ApplyOutcome> {
    let prepared = prepare(&config.rules_file, &config.location).await?;
    let token = authenticate(config, &prepared, history).await?;
    apply_prepared(config, &prepared, &token, history).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::{ENV_VAR_MUTEX, block_on, test_apply_config, write_rules_file};
    use crate::credential::{SUBSCRIPTION_ENV, TOKEN_ENV};

    #[tokio::test]
    async fn test_prepare_builds_request() {
        let file = write_rules_file(&[("allow-ssh", 100), ("allow-https", 110)]);
        let prepared = prepare(file.path(), "eastus2").await.unwrap();

        assert_eq!(prepared.rules.len(), 2);
        assert_eq!(prepared.request.location, "eastus2");
        assert_eq!(prepared.request.properties.security_rules[1].name, "allow-https");
    }

    #[tokio::test]
    async fn test_checksum_is_stable() {
        let file = write_rules_file(&[("allow-ssh", 100)]);
        let a = prepare(file.path(), "eastus2").await.unwrap();
        let b = prepare(file.path(), "eastus2").await.unwrap();
        let c = prepare(file.path(), "westeurope").await.unwrap();

        assert_eq!(a.checksum().unwrap(), b.checksum().unwrap());
        assert_ne!(a.checksum().unwrap(), c.checksum().unwrap());
        assert_eq!(a.checksum().unwrap().len(), 64);
    }

    #[test]
    fn test_resolve_target_uses_configured_subscription() {
        let mut config = test_apply_config("http://127.0.0.1:1");
        config.subscription_id = Some("sub-x".into());
        let token = AccessToken {
            token: "t".into(),
            subscription: Some("sub-cli".into()),
        };
        let target = resolve_target(&config, &token).unwrap();
        assert_eq!(target.subscription_id, "sub-x");
        assert_eq!(target.resource_group, "rg001");
        assert_eq!(target.name, "test-nsg");
    }

    #[tokio::test]
    async fn test_bad_rules_file_fails_before_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules_list.json");
        std::fs::write(&path, "{ not json").unwrap();

        let mut config = test_apply_config("http://127.0.0.1:1");
        config.rules_file = path;
        // No token source is configured; a parse error must still win
        let err = apply(&config, None).await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_missing_subscription_is_recorded() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::remove_var(SUBSCRIPTION_ENV);
        }

        let dir = tempfile::tempdir().unwrap();
        let history = AuditLog::at(dir.path().join("history.log"));
        let file = write_rules_file(&[("allow-ssh", 100)]);
        let config = test_apply_config("http://127.0.0.1:1");
        let token = AccessToken {
            token: "t".into(),
            subscription: None,
        };

        let entries = block_on(async {
            let prepared = prepare(file.path(), "eastus2").await.unwrap();
            let err = apply_prepared(&config, &prepared, &token, Some(&history))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Config(_)));
            history.read_recent(10).await.unwrap()
        });

        assert_eq!(entries.len(), 1);
        assert!(!entries[0].succeeded());
        assert_eq!(entries[0].rule_count, 1);
        assert_eq!(
            entries[0].resource_id,
            "/resourceGroups/rg001/providers/Microsoft.Network/networkSecurityGroups/test-nsg"
        );
        assert!(entries[0].error.as_deref().unwrap().contains("subscription"));
    }

    #[test]
    fn test_failed_credential_lookup_is_recorded() {
        let _guard = ENV_VAR_MUTEX.lock().unwrap();
        unsafe {
            std::env::set_var(TOKEN_ENV, "  ");
        }

        let dir = tempfile::tempdir().unwrap();
        let history = AuditLog::at(dir.path().join("history.log"));
        let file = write_rules_file(&[("allow-ssh", 100), ("allow-https", 110)]);
        let mut config = test_apply_config("http://127.0.0.1:1");
        config.subscription_id = Some("sub-x".into());

        let (result, entries) = block_on(async {
            let prepared = prepare(file.path(), "eastus2").await.unwrap();
            let result = authenticate(&config, &prepared, Some(&history)).await;
            (result, history.read_recent(10).await.unwrap())
        });
        unsafe {
            std::env::remove_var(TOKEN_ENV);
        }

        assert!(matches!(result, Err(Error::Auth(_))));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rule_count, 2);
        assert!(entries[0].resource_id.starts_with("/subscriptions/sub-x/"));
    }
}

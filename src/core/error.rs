use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Error body returned by Azure Resource Manager
///
/// ARM wraps this in `{"error": {...}}` for failed requests and places it
/// directly under `error` in failed long-running operation status documents.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ArmError {
    pub code: String,
    pub message: String,
    pub target: Option<String>,
    pub details: Vec<ArmError>,
}

impl fmt::Display for ArmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code.is_empty(), self.message.is_empty()) {
            (true, true) => write!(f, "unknown error"),
            (true, false) => write!(f, "{}", self.message),
            (false, true) => write!(f, "{}", self.code),
            (false, false) => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

/// Core error types for nsgpush
#[derive(Debug, Error)]
pub enum Error {
    /// Reading or writing a local file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Rules file content is not valid JSON
    #[error("Parse error: {0}")]
    Parse(#[source] serde_json::Error),

    /// Rules file is valid JSON but does not have the expected shape
    #[error("Schema error: {0}")]
    Schema(String),

    /// Required setting missing or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// No usable ambient credentials, or the backend rejected the token
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend rejected the request
    #[error("Azure API error (HTTP {status}): {error}")]
    Api { status: u16, error: ArmError },

    /// Long-running operation finished in a non-success state
    #[error("Operation {status}: {error}")]
    Operation { status: String, error: ArmError },

    /// Response or request body could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse reporting category for an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
pub enum ErrorCategory {
    #[strum(serialize = "io")]
    Io,
    #[strum(serialize = "parse")]
    Parse,
    #[strum(serialize = "schema")]
    Schema,
    #[strum(serialize = "config")]
    Config,
    #[strum(serialize = "auth")]
    Auth,
    #[strum(serialize = "transport")]
    Transport,
    #[strum(serialize = "remote-api")]
    RemoteApi,
    #[strum(serialize = "internal")]
    Internal,
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub const fn category(&self) -> ErrorCategory {
        match self {
            Error::Io { .. } => ErrorCategory::Io,
            Error::Parse(_) => ErrorCategory::Parse,
            Error::Schema(_) => ErrorCategory::Schema,
            Error::Config(_) => ErrorCategory::Config,
            Error::Auth(_) => ErrorCategory::Auth,
            Error::Http(_) => ErrorCategory::Transport,
            Error::Api { .. } | Error::Operation { .. } => ErrorCategory::RemoteApi,
            Error::Json(_) => ErrorCategory::Internal,
        }
    }

    /// Returns the backend error body, if this error came from ARM
    pub fn arm_error(&self) -> Option<&ArmError> {
        match self {
            Error::Api { error, .. } | Error::Operation { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Builds a user-facing translation for backend errors
    pub fn translation(&self) -> Option<ErrorTranslation> {
        match self {
            Error::Auth(msg) => Some(ArmErrorPattern::match_error("AuthenticationFailed", msg)),
            _ => self
                .arm_error()
                .map(|e| ArmErrorPattern::match_error(&e.code, &e.message)),
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
    pub help_url: Option<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
            help_url: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, url: impl Into<String>) -> Self {
        self.help_url = Some(url.into());
        self
    }
}

/// Database of ARM error codes and their translations
pub struct ArmErrorPattern;

impl ArmErrorPattern {
    /// Matches an ARM error code and message against known patterns.
    pub fn match_error(code: &str, msg: &str) -> ErrorTranslation {
        let code_lower = code.to_lowercase();
        let lower = msg.to_lowercase();

        // Token missing, expired, or issued for another audience
        if code_lower == "authenticationfailed"
            || code_lower.contains("invalidauthenticationtoken")
            || code_lower == "expiredauthenticationtoken"
        {
            return ErrorTranslation::new("Azure rejected or could not find credentials")
                .with_suggestion("Sign in with the Azure CLI: az login")
                .with_suggestion("Or export a management token in NSGPUSH_ACCESS_TOKEN")
                .with_suggestion("Tokens must be issued for https://management.azure.com/")
                .with_help("https://learn.microsoft.com/cli/azure/authenticate-azure-cli");
        }

        if code_lower == "authorizationfailed" || code_lower == "linkedauthorizationfailed" {
            return ErrorTranslation::new("Signed-in identity lacks permission on the target")
                .with_suggestion("Network Contributor on the resource group is sufficient")
                .with_suggestion("Check role assignments: az role assignment list --assignee <id>")
                .with_help("https://learn.microsoft.com/azure/role-based-access-control/troubleshooting");
        }

        if code_lower == "resourcegroupnotfound" {
            return ErrorTranslation::new("Resource group does not exist")
                .with_suggestion("Check the --resource-group value for typos")
                .with_suggestion("Create it first: az group create -n <name> -l <region>");
        }

        if code_lower == "subscriptionnotfound" || code_lower == "invalidsubscriptionid" {
            return ErrorTranslation::new("Subscription not found or not accessible")
                .with_suggestion("List available subscriptions: az account list -o table")
                .with_suggestion("Pass --subscription or set AZURE_SUBSCRIPTION_ID");
        }

        // Two rules share a priority/name in the same direction
        if code_lower == "securityruleconflict"
            || code_lower.contains("samepriority")
            || (lower.contains("priority") && lower.contains("same"))
        {
            return ErrorTranslation::new("Two security rules conflict")
                .with_suggestion("Rule names must be unique within the group")
                .with_suggestion("Priorities must be unique per direction")
                .with_help("https://learn.microsoft.com/azure/virtual-network/network-security-groups-overview#security-rules");
        }

        if code_lower == "invalidresourcename" {
            return ErrorTranslation::new("Invalid network security group or rule name")
                .with_suggestion("Names are 1-80 characters: letters, digits, '_', '.', '-'")
                .with_suggestion("Names must start with a letter or digit");
        }

        if code_lower.contains("quotaexceeded") || code_lower.contains("limitexceeded") {
            return ErrorTranslation::new("Subscription quota or per-group limit reached")
                .with_suggestion("An NSG holds at most 1000 rules")
                .with_suggestion("Check usage: az network list-usages -l <region>")
                .with_help("https://learn.microsoft.com/azure/azure-resource-manager/management/azure-subscription-service-limits");
        }

        if code_lower.contains("locationnotavailable") || code_lower == "invalidlocation" {
            return ErrorTranslation::new("Region is not valid for network security groups")
                .with_suggestion("List regions: az account list-locations -o table")
                .with_suggestion("Use the short name, e.g. eastus2");
        }

        // Field-level rejections carry the offending property in the message
        if code_lower.starts_with("securityrule")
            || code_lower.contains("invalidrequestformat")
            || code_lower.contains("invalidparameter")
        {
            return ErrorTranslation::new("A security rule was rejected as malformed")
                .with_suggestion("Port ranges are '*', a single port, or 'low-high'")
                .with_suggestion("Set either the single prefix or the prefix list, not both")
                .with_suggestion("Protocol is one of Tcp, Udp, Icmp, Esp, Ah, *");
        }

        // Generic fallback
        ErrorTranslation::new(format!("Azure error: {}", if msg.is_empty() { code } else { msg }))
            .with_suggestion("Check the detailed error message for more information")
            .with_help("https://learn.microsoft.com/azure/azure-resource-manager/troubleshooting/common-deployment-errors")
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_failed_translation() {
        let translation =
            ArmErrorPattern::match_error("AuthorizationFailed", "does not have authorization");
        assert!(translation.user_message.contains("permission"));
        assert!(translation.help_url.is_some());
    }

    #[test]
    fn test_conflict_translation_from_message() {
        let translation = ArmErrorPattern::match_error(
            "BadRequest",
            "Rules allow-ssh and allow-rdp have the same Priority 100",
        );
        assert!(translation.user_message.contains("conflict"));
        assert!(translation.suggestions.iter().any(|s| s.contains("unique")));
    }

    #[test]
    fn test_malformed_rule_translation() {
        let translation =
            ArmErrorPattern::match_error("SecurityRuleInvalidPortRange", "port 70000 invalid");
        assert!(translation.user_message.contains("malformed"));
    }

    #[test]
    fn test_fallback_translation_uses_message() {
        let translation = ArmErrorPattern::match_error("SomethingNew", "weird failure");
        assert!(translation.user_message.contains("weird failure"));
    }

    #[test]
    fn test_categories() {
        assert_eq!(Error::Schema("x".into()).category().to_string(), "schema");
        assert_eq!(Error::Auth("x".into()).category().to_string(), "auth");
        let api = Error::Api {
            status: 400,
            error: ArmError::default(),
        };
        assert_eq!(api.category(), ErrorCategory::RemoteApi);
    }

    #[test]
    fn test_arm_error_display() {
        let err = ArmError {
            code: "InvalidResourceName".into(),
            message: "bad name".into(),
            ..ArmError::default()
        };
        assert_eq!(err.to_string(), "InvalidResourceName: bad name");
        assert_eq!(ArmError::default().to_string(), "unknown error");
    }

    #[test]
    fn test_arm_error_deserializes_nested_details() {
        let json = r#"{"code":"BadRequest","message":"m","details":[{"code":"Inner","message":"i"}]}"#;
        let err: ArmError = serde_json::from_str(json).unwrap();
        assert_eq!(err.details.len(), 1);
        assert_eq!(err.details[0].code, "Inner");
        assert!(err.target.is_none());
    }
}

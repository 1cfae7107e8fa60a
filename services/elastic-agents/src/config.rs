//! Plugin settings.
//!
//! Settings arrive from the orchestration server as a flat map of snake_case
//! string values, or are read from the environment when running outside of
//! the server. Values are kept as given and interpreted by accessors, so
//! that [`Settings::validate`] can report every problem at once.

use chrono::TimeDelta;
use kea_reconcile::{grace_period_from_minutes, DEFAULT_AUTO_REGISTER_TIMEOUT_MINUTES};
use serde::Deserialize;

use crate::error::ValidationError;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Elastic agent plugin settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Orchestration server URL handed to workers for registration.
    pub go_server_url: Option<String>,

    /// Kubernetes API server URL.
    pub kubernetes_cluster_url: Option<String>,

    /// Namespace in which workers are created.
    pub namespace: Option<String>,

    /// Auto-register grace period in minutes.
    pub auto_register_timeout: Option<String>,

    /// Bearer token for the Kubernetes API.
    pub security_token: Option<String>,

    /// PEM encoded CA certificate of the Kubernetes API server.
    pub kubernetes_cluster_ca_cert: Option<String>,
}

impl Settings {
    /// Settings with the required values filled in.
    pub fn new(
        go_server_url: impl Into<String>,
        kubernetes_cluster_url: impl Into<String>,
        auto_register_timeout_minutes: u32,
    ) -> Self {
        Self {
            go_server_url: Some(go_server_url.into()),
            kubernetes_cluster_url: Some(kubernetes_cluster_url.into()),
            auto_register_timeout: Some(auto_register_timeout_minutes.to_string()),
            ..Self::default()
        }
    }

    /// Load settings from environment variables.
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        Self {
            go_server_url: var("KEA_GO_SERVER_URL"),
            kubernetes_cluster_url: var("KEA_CLUSTER_URL"),
            namespace: var("KEA_NAMESPACE"),
            auto_register_timeout: var("KEA_AUTO_REGISTER_TIMEOUT"),
            security_token: var("KEA_SECURITY_TOKEN"),
            kubernetes_cluster_ca_cert: var("KEA_CLUSTER_CA_CERT"),
        }
    }

    pub fn go_server_url(&self) -> &str {
        non_blank(&self.go_server_url).unwrap_or_default()
    }

    pub fn kubernetes_cluster_url(&self) -> &str {
        non_blank(&self.kubernetes_cluster_url).unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        non_blank(&self.namespace).unwrap_or(DEFAULT_NAMESPACE)
    }

    pub fn security_token(&self) -> Option<&str> {
        non_blank(&self.security_token)
    }

    pub fn cluster_ca_cert(&self) -> Option<&str> {
        non_blank(&self.kubernetes_cluster_ca_cert)
    }

    /// The configured timeout in minutes, if it is a positive integer.
    pub fn auto_register_timeout_minutes(&self) -> Option<u32> {
        non_blank(&self.auto_register_timeout)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|&minutes| minutes > 0)
    }

    /// Grace period a worker gets to register with the server.
    ///
    /// Falls back to the default when the configured value is invalid;
    /// [`Settings::validate`] reports that case.
    pub fn auto_register_period(&self) -> TimeDelta {
        grace_period_from_minutes(
            self.auto_register_timeout_minutes()
                .unwrap_or(DEFAULT_AUTO_REGISTER_TIMEOUT_MINUTES),
        )
    }

    /// Check the settings, returning every problem found.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if non_blank(&self.go_server_url).is_none() {
            errors.push(ValidationError::new(
                "go_server_url",
                "Go Server URL must not be blank.",
            ));
        }

        if self.auto_register_timeout_minutes().is_none() {
            errors.push(ValidationError::new(
                "auto_register_timeout",
                "Agent auto-register Timeout (in minutes) must be a positive integer.",
            ));
        }

        if non_blank(&self.kubernetes_cluster_url).is_none() {
            errors.push(ValidationError::new(
                "kubernetes_cluster_url",
                "Kubernetes Cluster URL must not be blank.",
            ));
        }

        errors
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

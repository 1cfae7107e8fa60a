//! Requests sent by the orchestration server.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::pod::PLUGIN_ID;

/// Request to provision one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CreateAgentRequest {
    /// Key the worker presents to the server to register itself.
    pub auto_register_key: Option<String>,

    /// Elastic profile properties (`Image`, `MaxMemory`, ...).
    pub properties: BTreeMap<String, String>,

    /// Server environment the worker should join.
    pub environment: Option<String>,
}

impl CreateAgentRequest {
    pub fn new(
        auto_register_key: impl Into<String>,
        properties: BTreeMap<String, String>,
        environment: Option<String>,
    ) -> Self {
        Self {
            auto_register_key: Some(auto_register_key.into()),
            properties,
            environment,
        }
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Returns the environment, if set and not blank.
    pub fn environment(&self) -> Option<&str> {
        self.environment
            .as_deref()
            .filter(|env| !env.trim().is_empty())
    }

    /// Returns the profile property `key`, if set and not blank.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Environment variables a worker needs to register itself as
    /// `elastic_agent_id`.
    pub fn autoregister_properties_as_env_vars(
        &self,
        elastic_agent_id: &str,
    ) -> Vec<(String, String)> {
        let mut vars = Vec::new();

        if let Some(key) = self
            .auto_register_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
        {
            vars.push(("GO_EA_AUTO_REGISTER_KEY".to_string(), key.to_string()));
        }
        if let Some(environment) = self.environment() {
            vars.push((
                "GO_EA_AUTO_REGISTER_ENVIRONMENT".to_string(),
                environment.to_string(),
            ));
        }
        vars.push((
            "GO_EA_AUTO_REGISTER_ELASTIC_AGENT_ID".to_string(),
            elastic_agent_id.to_string(),
        ));
        vars.push((
            "GO_EA_AUTO_REGISTER_ELASTIC_PLUGIN_ID".to_string(),
            PLUGIN_ID.to_string(),
        ));

        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_server_json() {
        let json = serde_json::json!({
            "auto_register_key": "secret-key",
            "properties": {"Image": "gocd/agent:v1"},
            "environment": "prod"
        });

        let request: CreateAgentRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.auto_register_key.as_deref(), Some("secret-key"));
        assert_eq!(request.property("Image"), Some("gocd/agent:v1"));
        assert_eq!(request.environment(), Some("prod"));
    }

    #[test]
    fn test_autoregister_env_vars() {
        let request = CreateAgentRequest::new("key", BTreeMap::new(), Some("prod".to_string()));

        let vars = request.autoregister_properties_as_env_vars("worker-1");
        assert_eq!(
            vars,
            vec![
                ("GO_EA_AUTO_REGISTER_KEY".to_string(), "key".to_string()),
                ("GO_EA_AUTO_REGISTER_ENVIRONMENT".to_string(), "prod".to_string()),
                ("GO_EA_AUTO_REGISTER_ELASTIC_AGENT_ID".to_string(), "worker-1".to_string()),
                ("GO_EA_AUTO_REGISTER_ELASTIC_PLUGIN_ID".to_string(), PLUGIN_ID.to_string()),
            ]
        );
    }

    #[test]
    fn test_autoregister_env_vars_skip_blank_values() {
        let request = CreateAgentRequest {
            auto_register_key: Some("  ".to_string()),
            properties: BTreeMap::new(),
            environment: Some(String::new()),
        };

        let names: Vec<_> = request
            .autoregister_properties_as_env_vars("worker-1")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(
            names,
            vec![
                "GO_EA_AUTO_REGISTER_ELASTIC_AGENT_ID",
                "GO_EA_AUTO_REGISTER_ELASTIC_PLUGIN_ID"
            ]
        );
    }
}

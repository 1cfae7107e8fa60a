//! Agents as the orchestration server sees them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An agent known to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Server-side agent uuid.
    pub agent_id: String,

    /// Name of the worker this agent runs in.
    pub elastic_agent_id: String,

    #[serde(default)]
    pub agent_state: Option<String>,

    #[serde(default)]
    pub build_state: Option<String>,

    #[serde(default)]
    pub config_state: Option<String>,
}

impl Agent {
    pub fn new(agent_id: impl Into<String>, elastic_agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            elastic_agent_id: elastic_agent_id.into(),
            agent_state: None,
            build_state: None,
            config_state: None,
        }
    }
}

/// Membership view over the server's registered agents.
///
/// The timeout scan asks this again right before each termination, so an
/// implementation backed by the server's live list narrows the window in
/// which a freshly registered worker could be reclaimed.
pub trait KnownAgents: Send + Sync {
    fn contains_agent_with_id(&self, elastic_agent_id: &str) -> bool;
}

/// Source of the server's current view of registered agents.
///
/// Every call should reflect the server at that moment.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn known_agents(&self) -> anyhow::Result<Agents>;
}

/// A snapshot of agents reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Agents(Vec<Agent>);

impl Agents {
    pub fn new(agents: Vec<Agent>) -> Self {
        Self(agents)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl KnownAgents for Agents {
    fn contains_agent_with_id(&self, elastic_agent_id: &str) -> bool {
        self.0.iter().any(|a| a.elastic_agent_id == elastic_agent_id)
    }
}

/// A directory that always answers with the same agents.
#[async_trait]
impl AgentDirectory for Agents {
    async fn known_agents(&self) -> anyhow::Result<Agents> {
        Ok(self.clone())
    }
}

impl FromIterator<Agent> for Agents {
    fn from_iter<T: IntoIterator<Item = Agent>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Agents {
    type Item = Agent;
    type IntoIter = std::vec::IntoIter<Agent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Agents {
    type Item = &'a Agent;
    type IntoIter = std::slice::Iter<'a, Agent>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

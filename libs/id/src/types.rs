//! Typed worker names.
//!
//! A worker name doubles as the pod name in the cluster and as the
//! elastic agent id the orchestration server reports once the worker
//! has registered.

use uuid::Uuid;

use crate::IdError;

/// Name of a worker provisioned by this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerName(Uuid);

impl WorkerName {
    /// The prefix shared by all worker names.
    pub const PREFIX: &'static str = "k8s-elastic-agent";

    /// Creates a new name with a fresh random UUID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a name from a raw UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.0
    }

    /// Returns true if `s` carries the worker name prefix.
    ///
    /// This is a cheap check that does not validate the UUID portion.
    #[must_use]
    pub fn has_prefix(s: &str) -> bool {
        s.strip_prefix(Self::PREFIX)
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Parses a name from a string.
    ///
    /// The string must be in the format `{prefix}-{uuid}` with the UUID in
    /// lowercase hyphenated form.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let Some(uuid_str) = s
            .strip_prefix(Self::PREFIX)
            .and_then(|rest| rest.strip_prefix('-'))
        else {
            return Err(IdError::InvalidPrefix {
                expected: Self::PREFIX,
                actual: s.to_string(),
            });
        };

        let uuid = Uuid::parse_str(uuid_str).map_err(|e| IdError::InvalidUuid(e.to_string()))?;

        // Pod names must be lowercase and Uuid::parse_str also accepts
        // simple, braced and uppercase forms.
        if uuid.hyphenated().to_string() != uuid_str {
            return Err(IdError::NonCanonical(uuid_str.to_string()));
        }

        Ok(Self(uuid))
    }
}

impl Default for WorkerName {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", Self::PREFIX, self.0.hyphenated())
    }
}

impl std::str::FromStr for WorkerName {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<WorkerName> for String {
    fn from(name: WorkerName) -> Self {
        name.to_string()
    }
}

impl serde::Serialize for WorkerName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for WorkerName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

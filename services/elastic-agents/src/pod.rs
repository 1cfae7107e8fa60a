//! Worker pod specification.
//!
//! Turns a [`CreateAgentRequest`] into the [`UnitSpec`] of the pod that
//! runs the worker. All validation happens here, before the cluster is
//! touched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::cluster::{ContainerSpec, LabelSelector, ResourceLimits, UnitSpec};
use crate::config::Settings;
use crate::error::ValidationError;
use crate::profile::{ENVIRONMENT, IMAGE, MAX_CPU, MAX_MEMORY};
use crate::request::CreateAgentRequest;

/// Identifier of this plugin, reported to the server by every worker.
pub const PLUGIN_ID: &str = "cd.go.contrib.elasticagent.kubernetes";

/// Label marking pods owned by this system.
pub const KIND_LABEL_KEY: &str = "kind";
pub const KIND_LABEL_VALUE: &str = "kubernetes-elastic-agent";

pub const CREATED_BY_LABEL_KEY: &str = "Elastic-Agent-Created-By";
pub const ENVIRONMENT_LABEL_KEY: &str = "Elastic-Agent-Environment-Name";

/// Creation time as epoch milliseconds, stamped when the pod is built.
pub const CREATED_AT_LABEL_KEY: &str = "Elastic-Agent-Created-At";

const IMAGE_PULL_POLICY: &str = "IfNotPresent";

/// Selector matching every pod owned by this system.
pub fn kind_selector() -> LabelSelector {
    LabelSelector::with(KIND_LABEL_KEY, KIND_LABEL_VALUE)
}

/// Build the pod spec for worker `name`, requested at `created_at`.
pub fn build_unit_spec(
    request: &CreateAgentRequest,
    settings: &Settings,
    name: &str,
    created_at: DateTime<Utc>,
) -> Result<UnitSpec, ValidationError> {
    let image = image(request)?;
    let limits = resource_limits(request)?;

    let mut env = vec![(
        "GO_EA_SERVER_URL".to_string(),
        settings.go_server_url().to_string(),
    )];
    if let Some(raw) = request.property(ENVIRONMENT) {
        env.extend(parse_environment(raw)?);
    }
    env.extend(request.autoregister_properties_as_env_vars(name));

    Ok(UnitSpec {
        name: name.to_string(),
        labels: labels(request, created_at),
        annotations: request.properties().clone(),
        container: ContainerSpec {
            name: name.to_string(),
            image,
            image_pull_policy: IMAGE_PULL_POLICY.to_string(),
            env,
            limits,
        },
    })
}

fn labels(request: &CreateAgentRequest, created_at: DateTime<Utc>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(CREATED_BY_LABEL_KEY.to_string(), PLUGIN_ID.to_string());
    if let Some(environment) = request.environment() {
        labels.insert(ENVIRONMENT_LABEL_KEY.to_string(), environment.to_string());
    }
    labels.insert(
        CREATED_AT_LABEL_KEY.to_string(),
        created_at.timestamp_millis().to_string(),
    );
    labels.insert(KIND_LABEL_KEY.to_string(), KIND_LABEL_VALUE.to_string());
    labels
}

/// The image to run, tagged `:latest` when no tag or digest is given.
fn image(request: &CreateAgentRequest) -> Result<String, ValidationError> {
    let Some(image) = request.property(IMAGE) else {
        return Err(ValidationError::new(IMAGE, "Must provide `Image` attribute."));
    };
    let image = image.trim();

    // A colon before the last slash belongs to a registry port, not a tag.
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') || image.contains('@') {
        Ok(image.to_string())
    } else {
        Ok(format!("{image}:latest"))
    }
}

fn resource_limits(request: &CreateAgentRequest) -> Result<ResourceLimits, ValidationError> {
    let memory_mib = request
        .property(MAX_MEMORY)
        .map(|raw| {
            parse_size(raw)
                .map(bytes_to_mebibytes)
                .ok_or_else(|| invalid_memory(raw))
        })
        .transpose()?;

    let cpu = request.property(MAX_CPU).map(|cpu| cpu.trim().to_string());

    Ok(ResourceLimits { memory_mib, cpu })
}

pub(crate) fn invalid_memory(raw: &str) -> ValidationError {
    ValidationError::new(
        MAX_MEMORY,
        format!("Invalid size `{}`. Use a value such as 512M or 2G.", raw.trim()),
    )
}

/// Parse a human readable size (`512M`, `2g`, `1.5GB`, `1024`) into bytes.
///
/// Units are binary (`1K` = 1024 bytes); a bare number is bytes.
pub fn parse_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);

    let value: f64 = number.parse().ok()?;
    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        "t" | "tb" => 1 << 40,
        _ => return None,
    };

    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return None;
    }
    Some(bytes.round() as u64)
}

/// Whole mebibytes, rounded up so a limit is never below what was asked.
fn bytes_to_mebibytes(bytes: u64) -> u64 {
    bytes.div_ceil(1 << 20)
}

/// Read the creation time stamped by [`CREATED_AT_LABEL_KEY`].
pub fn created_at_from_labels(labels: &BTreeMap<String, String>) -> Option<DateTime<Utc>> {
    let millis = labels.get(CREATED_AT_LABEL_KEY)?.trim().parse::<i64>().ok()?;
    DateTime::from_timestamp_millis(millis)
}

/// Parse `KEY=VALUE` lines. Blank lines are skipped.
pub fn parse_environment(raw: &str) -> Result<Vec<(String, String)>, ValidationError> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(ValidationError::new(
                ENVIRONMENT,
                format!("Invalid environment variable `{line}`. Expected KEY=VALUE."),
            )),
        })
        .collect()
}

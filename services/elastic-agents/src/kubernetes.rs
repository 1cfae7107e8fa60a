//! Kubernetes cluster client.
//!
//! Talks to the Kubernetes API server over its REST interface and maps the
//! pods of one namespace onto [`Unit`]s:
//! - `POST   /api/v1/namespaces/{ns}/pods`
//! - `GET    /api/v1/namespaces/{ns}/pods?labelSelector=...`
//! - `GET    /api/v1/namespaces/{ns}/pods/{name}`
//! - `DELETE /api/v1/namespaces/{ns}/pods/{name}`

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::cluster::{
    ClusterClient, ClusterClientFactory, ClusterError, Deletion, LabelSelector, Unit, UnitSpec,
};
use crate::config::Settings;

/// Kubernetes API client bound to one namespace.
pub struct KubernetesClient {
    client: reqwest::Client,
    base_url: String,
    namespace: String,
    token: Option<String>,
}

impl KubernetesClient {
    /// Build a client from plugin settings.
    pub fn new(settings: &Settings) -> Result<Self, ClusterError> {
        let base_url = settings
            .kubernetes_cluster_url()
            .trim_end_matches('/')
            .to_string();
        if base_url.is_empty() {
            return Err(ClusterError::Config(
                "Kubernetes Cluster URL must not be blank".to_string(),
            ));
        }

        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
        if let Some(pem) = settings.cluster_ca_cert() {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes()).map_err(|e| {
                ClusterError::Config(format!("invalid cluster CA certificate: {e}"))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        Ok(Self {
            client: builder.build()?,
            base_url,
            namespace: settings.namespace().to_string(),
            token: settings.security_token().map(str::to_string),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn pods_url(&self) -> String {
        format!("{}/api/v1/namespaces/{}/pods", self.base_url, self.namespace)
    }

    fn pod_url(&self, name: &str) -> String {
        format!("{}/{}", self.pods_url(), name)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

/// Turn a non-success response into an API error, preferring the message
/// from the Kubernetes `Status` body.
async fn api_error(response: Response) -> ClusterError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Status>(&body)
        .ok()
        .and_then(|s| s.message)
        .unwrap_or(body);

    error!(status = %status, message = %message, "Kubernetes API request failed");
    ClusterError::Api {
        status: status.as_u16(),
        message,
    }
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ClusterError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ClusterError::Decode(e.to_string()))
}

#[async_trait]
impl ClusterClient for KubernetesClient {
    async fn create_unit(&self, spec: &UnitSpec) -> Result<Unit, ClusterError> {
        let url = self.pods_url();
        debug!(url = %url, pod = %spec.name, "Creating pod");

        let pod = Pod::from_spec(spec);
        let response = self.request(Method::POST, &url).json(&pod).send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let created: Pod = decode(response).await?;
        info!(pod = %created.metadata.name, namespace = %self.namespace, "Created pod");
        Ok(created.into_unit())
    }

    async fn list_units(&self, selector: &LabelSelector) -> Result<Vec<Unit>, ClusterError> {
        let url = self.pods_url();
        let query = selector.to_query();
        debug!(url = %url, selector = %query, "Listing pods");

        let mut request = self.request(Method::GET, &url);
        if !query.is_empty() {
            request = request.query(&[("labelSelector", query.as_str())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let list: PodList = decode(response).await?;
        debug!(count = list.items.len(), "Listed pods");
        Ok(list.items.into_iter().map(Pod::into_unit).collect())
    }

    async fn get_unit(&self, name: &str) -> Result<Unit, ClusterError> {
        let response = self
            .request(Method::GET, &self.pod_url(name))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ClusterError::NotFound(name.to_string()));
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let pod: Pod = decode(response).await?;
        Ok(pod.into_unit())
    }

    async fn delete_unit(&self, name: &str) -> Result<Deletion, ClusterError> {
        let response = self
            .request(Method::DELETE, &self.pod_url(name))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(pod = %name, "Pod already gone");
            return Ok(Deletion::AlreadyGone);
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        info!(pod = %name, namespace = %self.namespace, "Deleted pod");
        Ok(Deletion::Deleted)
    }
}

/// Builds [`KubernetesClient`]s, reusing the last one while the settings
/// stay the same.
#[derive(Default)]
pub struct KubernetesClientFactory {
    cached: Mutex<Option<(Settings, Arc<KubernetesClient>)>>,
}

impl KubernetesClientFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClusterClientFactory for KubernetesClientFactory {
    fn client(&self, settings: &Settings) -> Result<Arc<dyn ClusterClient>, ClusterError> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());

        if let Some((cached_settings, client)) = cached.as_ref() {
            if cached_settings == settings {
                return Ok(Arc::clone(client) as Arc<dyn ClusterClient>);
            }
        }

        debug!(
            cluster_url = %settings.kubernetes_cluster_url(),
            namespace = %settings.namespace(),
            "Building Kubernetes client"
        );
        let client = Arc::new(KubernetesClient::new(settings)?);
        *cached = Some((settings.clone(), Arc::clone(&client)));
        Ok(client)
    }
}

// =============================================================================
// Wire types (the subset of the Pod API this client reads and writes)
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pod {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,

    #[serde(default)]
    metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    spec: Option<PodSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    #[serde(default)]
    name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    annotations: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    containers: Vec<Container>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Container {
    name: String,
    image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_pull_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    env: Vec<EnvVar>,

    #[serde(default)]
    resources: ResourceRequirements,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EnvVar {
    name: String,

    #[serde(default)]
    value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    limits: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Status {
    message: Option<String>,
}

impl Pod {
    fn from_spec(spec: &UnitSpec) -> Self {
        let container = &spec.container;

        let mut limits = BTreeMap::new();
        if let Some(memory_mib) = container.limits.memory_mib {
            limits.insert("memory".to_string(), format!("{memory_mib}Mi"));
        }
        if let Some(cpu) = &container.limits.cpu {
            limits.insert("cpu".to_string(), cpu.clone());
        }

        Self {
            api_version: Some("v1".to_string()),
            kind: Some("Pod".to_string()),
            metadata: ObjectMeta {
                name: spec.name.clone(),
                labels: Some(spec.labels.clone()),
                annotations: Some(spec.annotations.clone()),
                creation_timestamp: None,
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: container.name.clone(),
                    image: container.image.clone(),
                    image_pull_policy: Some(container.image_pull_policy.clone()),
                    env: container
                        .env
                        .iter()
                        .map(|(name, value)| EnvVar {
                            name: name.clone(),
                            value: value.clone(),
                        })
                        .collect(),
                    resources: ResourceRequirements { limits },
                }],
            }),
        }
    }

    fn into_unit(self) -> Unit {
        Unit {
            name: self.metadata.name,
            created_at: self.metadata.creation_timestamp,
            labels: self.metadata.labels.unwrap_or_default(),
            annotations: self.metadata.annotations.unwrap_or_default(),
        }
    }
}

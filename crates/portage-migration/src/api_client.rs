use crate::error::{MigrationError, Result};
use crate::traits::ClusterConnector;
use async_trait::async_trait;
use portage_core::error::PORT_ALLOCATED_MSG;
use portage_core::resources::{ClusterConnection, ClusterPair};
use portage_core::{ApiResource, ClusterApi, DynamicObject, PortageError};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Verb of a request, used to classify error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    Delete,
}

/// Dynamic cluster client speaking the Kubernetes REST API over HTTP
pub struct HttpClusterApi {
    base_url: String,
    client: Client,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<Value>,
}

impl HttpClusterApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            token: None,
        }
    }

    /// Build a client from the connection block of a ClusterPair
    pub fn from_connection(connection: &ClusterConnection) -> portage_core::Result<Self> {
        if connection.server.is_empty() {
            return Err(PortageError::invalid_resource(
                "cluster connection has no server URL",
                "Set spec.config.server on the ClusterPair",
            ));
        }

        let mut builder = Client::builder();
        if let Some(ca) = connection.certificate_authority.as_deref().filter(|c| !c.is_empty()) {
            let cert = reqwest::Certificate::from_pem(ca.as_bytes()).map_err(|e| {
                PortageError::invalid_resource(
                    format!("invalid certificate authority: {}", e),
                    "Provide a PEM encoded CA bundle",
                )
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if connection.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder
            .build()
            .map_err(|e| PortageError::internal_error(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: connection.server.trim_end_matches('/').to_string(),
            client,
            token: connection.token.clone().filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute(&self, verb: Verb, builder: RequestBuilder, key: &str) -> portage_core::Result<Value> {
        let resp = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| PortageError::internal_error(format!("HTTP request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(error_for_status(verb, status, key, &body));
        }

        if verb == Verb::Delete {
            return Ok(Value::Null);
        }

        resp.json::<Value>()
            .await
            .map_err(|e| PortageError::internal_error(format!("Failed to parse response for {}: {}", key, e)))
    }
}

/// Map a non-success response onto the core error classes
pub fn error_for_status(verb: Verb, status: StatusCode, key: &str, body: &str) -> PortageError {
    match status {
        StatusCode::NOT_FOUND => PortageError::resource_not_found(key),
        StatusCode::CONFLICT if verb == Verb::Create => PortageError::resource_already_exists(key),
        StatusCode::CONFLICT => PortageError::conflict(key),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortageError::unauthorized(body),
        StatusCode::UNPROCESSABLE_ENTITY if body.contains(PORT_ALLOCATED_MSG) => {
            PortageError::port_allocated(body)
        }
        other => PortageError::api_error(other.as_u16(), body),
    }
}

fn display_key(resource: &ApiResource, namespace: Option<&str>, name: &str) -> String {
    match namespace.filter(|ns| resource.namespaced && !ns.is_empty()) {
        Some(ns) => format!("{}/{}/{}", resource.gvk, ns, name),
        None => format!("{}/{}", resource.gvk, name),
    }
}

#[async_trait]
impl ClusterApi for HttpClusterApi {
    /// GET /api/v1/namespaces/{namespace}/{plural}/{name}
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> portage_core::Result<DynamicObject> {
        let url = format!("{}{}", self.base_url, resource.object_path(namespace, name));
        debug!("GET {}", url);

        let key = display_key(resource, namespace, name);
        let value = self.execute(Verb::Get, self.client.get(&url), &key).await?;
        DynamicObject::from_value(value)
    }

    /// GET /api/v1/namespaces/{namespace}/{plural}?labelSelector=...
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> portage_core::Result<Vec<DynamicObject>> {
        let url = format!("{}{}", self.base_url, resource.collection_path(namespace));
        debug!("GET {}", url);

        let mut builder = self.client.get(&url);
        if let Some(selector) = label_selector.filter(|s| !s.is_empty()) {
            builder = builder.query(&[("labelSelector", selector)]);
        }
        let key = display_key(resource, namespace, "");
        let value = self.execute(Verb::List, builder, &key).await?;
        let list: ObjectList = serde_json::from_value(value).map_err(|e| {
            PortageError::serialization_error(format!("Failed to parse list of {}: {}", key, e), Some(Box::new(e)))
        })?;

        // List items come back without their type information
        let api_version = resource.gvk.api_version();
        list.items
            .into_iter()
            .map(|mut item| {
                if let Some(map) = item.as_object_mut() {
                    map.entry("apiVersion")
                        .or_insert_with(|| Value::String(api_version.clone()));
                    map.entry("kind")
                        .or_insert_with(|| Value::String(resource.gvk.kind.clone()));
                }
                DynamicObject::from_value(item)
            })
            .collect()
    }

    /// POST /api/v1/namespaces/{namespace}/{plural}
    async fn create(&self, resource: &ApiResource, object: &DynamicObject) -> portage_core::Result<DynamicObject> {
        let namespace = Some(object.namespace()).filter(|ns| !ns.is_empty());
        let url = format!("{}{}", self.base_url, resource.collection_path(namespace));
        debug!("POST {}", url);

        let key = display_key(resource, namespace, object.name());
        let value = self
            .execute(Verb::Create, self.client.post(&url).json(object), &key)
            .await?;
        DynamicObject::from_value(value)
    }

    /// PUT /api/v1/namespaces/{namespace}/{plural}/{name}
    async fn update(&self, resource: &ApiResource, object: &DynamicObject) -> portage_core::Result<DynamicObject> {
        let namespace = Some(object.namespace()).filter(|ns| !ns.is_empty());
        let url = format!("{}{}", self.base_url, resource.object_path(namespace, object.name()));
        debug!("PUT {}", url);

        let key = display_key(resource, namespace, object.name());
        let value = self
            .execute(Verb::Update, self.client.put(&url).json(object), &key)
            .await?;
        DynamicObject::from_value(value)
    }

    /// DELETE /api/v1/namespaces/{namespace}/{plural}/{name}
    async fn delete(&self, resource: &ApiResource, namespace: Option<&str>, name: &str) -> portage_core::Result<()> {
        let url = format!("{}{}", self.base_url, resource.object_path(namespace, name));
        debug!("DELETE {}", url);

        let key = display_key(resource, namespace, name);
        self.execute(Verb::Delete, self.client.delete(&url), &key).await?;
        Ok(())
    }
}

/// Connects to the cluster described by a ClusterPair over HTTP
#[derive(Debug, Default)]
pub struct HttpConnector;

#[async_trait]
impl ClusterConnector for HttpConnector {
    async fn connect(&self, pair: &ClusterPair) -> Result<Arc<dyn ClusterApi>> {
        let name = pair.metadata.name.as_deref().unwrap_or_default();
        let api = HttpClusterApi::from_connection(&pair.spec.config)
            .map_err(|e| MigrationError::remote_connection_failed(name, e.to_string()))?;
        debug!("Connected cluster pair {} to {}", name, api.base_url());
        Ok(Arc::new(api))
    }
}

//! Worker node client.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;

use crate::config::Config;
use crate::models::{base_url, CopyRequest, NodeStatus};

/// A shared handle to a worker node client.
pub type DynNodeClient = Arc<dyn NodeClient>;

/// The set of calls the coordinator makes against worker nodes.
///
/// Every call takes the node's registered address, which is resolved via `base_url`.
#[async_trait]
pub trait NodeClient: Send + Sync + 'static {
    /// Fetch the status of the node at the given address.
    async fn status(&self, address: &str) -> Result<NodeStatus>;

    /// Write a document to the given collection on the node at the given address.
    async fn put_document(&self, address: &str, collection: &str, document: Bytes) -> Result<()>;

    /// Delete the given collection from the node at the given address.
    async fn delete_collection(&self, address: &str, collection: &str) -> Result<()>;

    /// Instruct the node at the given address to copy a collection from another node.
    async fn copy_collection(&self, address: &str, request: &CopyRequest) -> Result<()>;
}

/// A `NodeClient` speaking HTTP to worker nodes.
#[derive(Clone)]
pub struct HttpNodeClient {
    client: reqwest::Client,
}

impl HttpNodeClient {
    /// Create a new instance.
    ///
    /// Only connection setup is bounded here. Status probes carry their own deadline, while
    /// writes & copies are allowed to take as long as the node needs.
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .context("error building HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    #[tracing::instrument(level = "trace", skip(self))]
    async fn status(&self, address: &str) -> Result<NodeStatus> {
        let url = format!("{}/status", base_url(address));
        self.client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("error sending status request to {}", url))?
            .error_for_status()?
            .json::<NodeStatus>()
            .await
            .context("error decoding node status")
    }

    #[tracing::instrument(level = "trace", skip(self, document))]
    async fn put_document(&self, address: &str, collection: &str, document: Bytes) -> Result<()> {
        let url = format!("{}/collections/{}", base_url(address), collection);
        let res = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(document)
            .send()
            .await
            .with_context(|| format!("error sending document to {}", url))?;
        if res.status() != StatusCode::CREATED {
            bail!("node answered document write with status {}", res.status());
        }
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn delete_collection(&self, address: &str, collection: &str) -> Result<()> {
        let url = format!("{}/collections/{}", base_url(address), collection);
        self.client
            .delete(&url)
            .send()
            .await
            .with_context(|| format!("error sending collection delete to {}", url))?
            .error_for_status()?;
        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn copy_collection(&self, address: &str, request: &CopyRequest) -> Result<()> {
        let url = format!("{}/collections/{}/copy", base_url(address), request.collection_name);
        self.client
            .post(&url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("error sending copy request to {}", url))?
            .error_for_status()?;
        Ok(())
    }
}

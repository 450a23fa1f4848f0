mod prom;

pub use prom::spawn_prom_server;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::collections::CollectionsHandle;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{CollectionDescriptor, Node};
use crate::nodes::NodesHandle;

/// Application server.
pub struct AppServer {
    /// The application's runtime config.
    config: Arc<Config>,
    /// A handle to the node registry.
    nodes: NodesHandle,
    /// A handle to the replication controller.
    collections: CollectionsHandle,

    /// A channel used for triggering graceful shutdown.
    shutdown: broadcast::Sender<()>,
}

/// The state shared by all request handlers.
#[derive(Clone)]
pub struct ServerState {
    pub nodes: NodesHandle,
    pub collections: CollectionsHandle,
}

/// Query parameters of a document write.
#[derive(Debug, Deserialize)]
pub struct DocumentParams {
    pub replication: Option<u32>,
}

impl AppServer {
    /// Create a new instance.
    pub fn new(config: Arc<Config>, nodes: NodesHandle, collections: CollectionsHandle, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            config,
            nodes,
            collections,
            shutdown,
        }
    }

    /// Bind the client listener & spawn the client HTTP server.
    pub async fn spawn(self) -> Result<JoinHandle<()>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.client_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("error binding client listener to {}", addr))?;
        let (shutdown, mut shutdown_rx) = (self.shutdown.clone(), self.shutdown.subscribe());
        let app = router(ServerState {
            nodes: self.nodes,
            collections: self.collections,
        });
        tracing::info!("client server is listening at {}", addr);
        Ok(tokio::spawn(async move {
            let res = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _res = shutdown_rx.recv().await;
                })
                .await;
            if let Err(err) = res {
                tracing::error!(error = ?err, "error from client HTTP server");
            }
            let _res = shutdown.send(());
        }))
    }
}

/// Build the client HTTP router.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(heartbeat))
        .route("/nodes", get(list_nodes).post(register_node))
        .route("/nodes/:name", axum::routing::put(update_node).delete(forget_node))
        .route("/collections", get(list_collections))
        .route(
            "/collections/:name",
            get(get_collection).post(put_document).delete(delete_collection),
        )
        .with_state(state)
}

async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

async fn list_nodes(State(state): State<ServerState>) -> Json<Vec<Node>> {
    Json(state.nodes.list())
}

async fn register_node(State(state): State<ServerState>, body: Bytes) -> AppResult<StatusCode> {
    let registration = parse_registration(&body)?;
    state.nodes.register(registration.name, registration.address).await?;
    Ok(StatusCode::OK)
}

async fn update_node(State(state): State<ServerState>, Path(name): Path<String>, body: Bytes) -> AppResult<StatusCode> {
    let registration = parse_registration(&body)?;
    if registration.name != name {
        return Err(AppError::InvalidInput(format!(
            "node name `{}` in body does not match node name `{}` in path",
            registration.name, name
        )));
    }
    state.nodes.update(registration.name, registration.address).await?;
    Ok(StatusCode::OK)
}

async fn forget_node(State(state): State<ServerState>, Path(name): Path<String>) -> AppResult<StatusCode> {
    state.nodes.forget(name).await?;
    Ok(StatusCode::OK)
}

async fn list_collections(State(state): State<ServerState>) -> Json<Vec<CollectionDescriptor>> {
    Json(state.collections.list())
}

async fn put_document(
    State(state): State<ServerState>, Path(name): Path<String>, Query(params): Query<DocumentParams>, body: Bytes,
) -> AppResult<StatusCode> {
    state.collections.put_document(name, body, params.replication).await?;
    Ok(StatusCode::CREATED)
}

async fn get_collection(State(state): State<ServerState>, Path(name): Path<String>) -> AppResult<Redirect> {
    let address = state.collections.get_collection_address(&name).await.map_err(|err| {
        if let AppError::CollectionBlocked(_) = &err {
            tracing::warn!(collection = %name, "collection is being copied, asking client to retry");
        }
        err
    })?;
    Ok(Redirect::temporary(&address))
}

async fn delete_collection(State(state): State<ServerState>, Path(name): Path<String>) -> AppResult<Json<Vec<String>>> {
    let failed = state.collections.delete_collection(&name).await?;
    Ok(Json(failed))
}

fn parse_registration(body: &[u8]) -> AppResult<Node> {
    serde_json::from_slice(body).map_err(|err| AppError::InvalidInput(format!("invalid node registration: {}", err)))
}

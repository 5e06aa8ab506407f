use log::*;
use presence::Manager;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

use axum::http::{header::CONTENT_TYPE, HeaderValue, Method};
use tower_http::cors::CorsLayer;

mod controller;
mod error;
pub(crate) mod router;
mod ws;

pub use error::{Error, Result};

/// Web-level state: the service infrastructure plus the relay every
/// WebSocket connection is handed to.
#[derive(Clone)]
pub struct AppState {
    pub service_state: service::AppState,
    pub relay: Arc<Manager>,
}

impl AppState {
    pub fn new(service_state: service::AppState, relay: Arc<Manager>) -> Self {
        Self {
            service_state,
            relay,
        }
    }

    pub fn db_conn_ref(&self) -> &sea_orm::DatabaseConnection {
        self.service_state.db_conn_ref()
    }

    pub fn config(&self) -> &service::config::Config {
        &self.service_state.config
    }
}

/// Serve HTTP and WebSocket traffic until `shutdown` resolves.
pub async fn init_server<F>(app_state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = app_state.config();
    let server_url = format!("{}:{}", config.interface, config.port);

    let allowed_origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid allowed origin {origin:?}: {e}");
                None
            }
        })
        .collect();
    info!("CORS allowed origins: {:?}", config.allowed_origins);

    let cors_layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .allow_origin(allowed_origins);

    let listener = TcpListener::bind(&server_url).await?;

    info!(
        "Server starting... listening for connections on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, router::define_routes(app_state).layer(cors_layer))
        .with_graceful_shutdown(shutdown)
        .await
}

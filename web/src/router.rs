use crate::controller::{health_check_controller, message_controller};
use crate::ws::handler as ws_handler;
use crate::AppState;
use axum::{routing::get, Router};

use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

// This is the global definition of our OpenAPI document. To be a part
// of the rendered document, a path and schema must be listed here.
#[derive(OpenApi)]
#[openapi(
        info(
            title = "Chat Relay API"
        ),
        paths(
            health_check_controller::banner,
            health_check_controller::health_check,
            message_controller::index,
            ws_handler::ws_upgrade,
        ),
        components(
            schemas(
                entity_api::messages::Model,
                entity_api::delivery_mode::DeliveryMode,
            )
        ),
        tags(
            (name = "chat_relay", description = "Real-time chat relay API")
        )
    )]
struct ApiDoc;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(message_routes(app_state.clone()))
        .merge(relay_routes(app_state))
        .merge(RapiDoc::with_openapi("/api-docs/openapi2.json", ApiDoc::openapi()).path("/rapidoc"))
}

fn health_routes() -> Router {
    Router::new()
        .route("/", get(health_check_controller::banner))
        .route("/health", get(health_check_controller::health_check))
}

fn message_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/messages", get(message_controller::index))
        .with_state(app_state)
}

fn relay_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .with_state(app_state)
}

#[cfg(test)]
// We need to gate seaORM's mock feature behind conditional compilation because
// the feature removes the Clone trait implementation from seaORM's DatabaseConnection.
// see https://github.com/SeaQL/sea-orm/issues/830
#[cfg(feature = "mock")]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use clap::Parser;
    use entity_api::{delivery_mode::DeliveryMode, messages, Id};
    use presence::dead_letter::DeadLetterLog;
    use presence::sink::{MessageStore, PersistenceSink, SinkConfig};
    use presence::store::DatabaseMessageStore;
    use presence::Manager;
    use sea_orm::{DatabaseBackend, DatabaseConnection, DbErr, MockDatabase};
    use serde_json::{json, Value};
    use service::config::Config;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app_state(db: DatabaseConnection) -> AppState {
        let db = Arc::new(db);
        let config = Config::try_parse_from(["chat_relay_rs"]).unwrap();
        let store: Arc<dyn MessageStore> = Arc::new(DatabaseMessageStore::new(Arc::clone(&db)));
        let (sink, _worker) = PersistenceSink::spawn(
            store,
            SinkConfig::default(),
            DeadLetterLog::log_only(),
            events::EventPublisher::default(),
        );

        AppState::new(
            service::AppState::new(config, &db),
            Arc::new(Manager::new(sink, events::EventPublisher::default())),
        )
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_routes_respond() {
        let routes = define_routes(app_state(
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
        ));

        let response = routes
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = routes
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"healthy");
    }

    #[tokio::test]
    async fn messages_lists_recent_messages() {
        let message = messages::Model {
            id: Id::new_v4(),
            content: json!("hi"),
            delivery_mode: DeliveryMode::Broadcast,
            sender: "alice".to_string(),
            recipient_identity: None,
            created_at: Utc::now().into(),
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![message.clone()]])
            .into_connection();

        let response = define_routes(app_state(db))
            .oneshot(Request::get("/messages?limit=10").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status_code"], 200);
        assert_eq!(body["data"][0]["sender"], "alice");
        assert_eq!(body["data"][0]["content"], "hi");
    }

    #[tokio::test]
    async fn messages_reports_an_unavailable_store() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_errors([DbErr::Conn(sea_orm::RuntimeErr::Internal(
                "connection refused".to_string(),
            ))])
            .into_connection();

        let response = define_routes(app_state(db))
            .oneshot(Request::get("/messages").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ws_route_requires_an_upgrade() {
        let response = define_routes(app_state(
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
        ))
        .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();

        assert!(response.status().is_client_error());
    }
}

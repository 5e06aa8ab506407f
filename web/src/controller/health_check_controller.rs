use axum::http::StatusCode;
use axum::response::IntoResponse;

/// GET a plain-text banner confirming the relay is running
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Relay is running", body = String),
    )
)]
pub async fn banner() -> impl IntoResponse {
    (StatusCode::OK, "Chat relay server is running")
}

/// GET health status of the relay
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Relay router is up and responding to requests", body = String),
        (status = 500, description = "Internal Server Error")
    )
)]
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "healthy")
}

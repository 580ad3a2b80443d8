use crate::error::Result;
use crate::server::ProxyServer;
use axum::{
    Router,
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LimiterStats {
    username: String,
    available: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LimitersResponse {
    active_connections: usize,
    limiters: Vec<LimiterStats>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenericResponse {
    success: bool,
    message: String,
}

/// Admin routes over the running proxy.
pub fn router(server: ProxyServer) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/limiters", get(list_limiters))
        .route("/api/limiters/{username}", delete(remove_limiter))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

pub async fn serve(listener: TcpListener, server: ProxyServer) -> Result<()> {
    info!("Admin API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(server)).await?;
    Ok(())
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn list_limiters(State(server): State<ProxyServer>) -> impl IntoResponse {
    let limiters = server
        .registry()
        .stats()
        .into_iter()
        .map(|(username, available)| LimiterStats {
            username,
            available,
        })
        .collect();

    Json(LimitersResponse {
        active_connections: server.active_connections(),
        limiters,
    })
}

#[instrument(skip(server))]
async fn remove_limiter(
    State(server): State<ProxyServer>,
    Path(username): Path<String>,
) -> impl IntoResponse {
    info!("API: Remove limiter request for {}", username);

    if server.registry().remove_limiter(&username) {
        (
            StatusCode::OK,
            Json(GenericResponse {
                success: true,
                message: format!("Limiter of {} removed", username),
            }),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(GenericResponse {
                success: false,
                message: format!("No limiter for {}", username),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BandwidthConfig;
    use crate::limiter::RateLimiterRegistry;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn server() -> ProxyServer {
        let config = BandwidthConfig::from_yaml("default_bandwidth: 500\nusers:\n  alice: 1000\n")
            .unwrap();
        ProxyServer::new("127.0.0.1:4222", Arc::new(RateLimiterRegistry::new(Arc::new(config))))
    }

    async fn call(
        server: &ProxyServer,
        method: Method,
        uri: &str,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router(server.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let (status, body) = call(&server(), Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn limiters_lists_registry_contents() {
        let server = server();
        server.registry().get_limiter("alice").unwrap();
        server.registry().get_limiter("bob").unwrap();

        let (status, body) = call(&server, Method::GET, "/api/limiters").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active_connections"], 0);
        let limiters = body["limiters"].as_array().unwrap();
        assert_eq!(limiters.len(), 2);
        assert_eq!(limiters[0]["username"], "alice");
        assert_eq!(limiters[0]["available"], 1000);
        assert_eq!(limiters[1]["username"], "bob");
        assert_eq!(limiters[1]["available"], 500);
    }

    #[tokio::test]
    async fn delete_removes_existing_limiter() {
        let server = server();
        server.registry().get_limiter("alice").unwrap();

        let (status, body) = call(&server, Method::DELETE, "/api/limiters/alice").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(server.registry().is_empty());

        let (status, body) = call(&server, Method::DELETE, "/api/limiters/alice").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }
}

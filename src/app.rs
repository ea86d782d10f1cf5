//! Application routing.

use crate::app_state::SharedAppState;
use crate::auth;
use crate::databrowser;
use crate::metrics;
use crate::portal;
use crate::stac;

use axum::response::Json;
use axum::routing::get;
use axum::{middleware, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

/// Liveness probe.
async fn ping() -> Json<Value> {
    Json(json!({"ping": "pong"}))
}

/// Assemble the application router. The databrowser, STAC and data-portal
/// surfaces are only mounted when the corresponding service is enabled;
/// authentication and the operational endpoints are always present.
pub fn router(state: SharedAppState) -> Router {
    let mut router = Router::new()
        .route("/api/freva-nextgen/ping", get(ping))
        .route("/metrics", get(metrics::metrics_handler))
        .merge(auth::router());
    if state.config.service_enabled("databrowser") {
        router = router.merge(databrowser::router());
    }
    if state.config.service_enabled("stacapi") {
        router = router.merge(stac::router());
    }
    if state.config.service_enabled("zarr-stream") {
        router = router.merge(portal::router());
    }
    router
        .with_state(state)
        .layer(middleware::from_fn(metrics::track_metrics))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn ping_works_without_state() {
        let router = Router::new().route("/api/freva-nextgen/ping", get(ping));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/freva-nextgen/ping")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], br#"{"ping":"pong"}"#);
    }
}

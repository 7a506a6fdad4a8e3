use std::sync::Arc;

use axum::http::{HeaderValue, Request};
use axum::routing::{get, post};
use axum::Router;
use mule_broker::Broker;
use tokio::net::{TcpListener, ToSocketAddrs};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::routes;
use crate::state::AppState;

/// Request-id source for requests that arrive without an `x-request-id`.
#[derive(Clone, Copy, Default)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Build the broker's HTTP surface.
pub fn router(broker: Arc<Broker>) -> Router {
    let state = AppState::new(broker);

    Router::new()
        .route("/health", get(routes::health))
        .route("/enqueue", post(routes::enqueue))
        .route("/poll", post(routes::poll))
        .route("/ack", post(routes::ack))
        .route("/fail", post(routes::fail))
        .route("/jobs", get(routes::list_jobs))
        .route("/dead", get(routes::list_dead))
        // The set layer is added last so it runs first on the way in; every
        // request carries an id by the time tracing and the propagate layer
        // (which copies it onto the response) see it.
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(addr: impl ToSocketAddrs, broker: Arc<Broker>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "broker listening");
    axum::serve(listener, router(broker)).await?;
    Ok(())
}

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request};
use axum::http::{Method, Uri, Version};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::Extension;

#[derive(Clone)]
pub struct RequestId(Arc<AtomicU64>);

impl RequestId {
    pub fn new() -> RequestId {
        RequestId(Arc::new(0.into()))
    }

    pub fn next(&mut self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct TracingInfo {
    pub connect_info: ConnectInfo<SocketAddr>,
    pub method: Method,
    pub version: Version,
    pub uri: Uri,
}

pub async fn tracing_middleware(request: Request, next: Next) -> impl IntoResponse {
    let connect_info = *request
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .unwrap();

    let method = request.method().clone();
    let version = request.version();
    let uri = request.uri().clone();

    let tracing_info = TracingInfo {
        connect_info,
        method,
        version,
        uri,
    };

    let response = next.run(request).await;

    (Extension(tracing_info), response)
}

// Shared helpers for the integration tests
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{Router, extract::Request, http::header::HOST};
use config::FileFormat;
use http_body_util::{BodyExt, Empty};
use hyper::{HeaderMap, StatusCode, body::Bytes};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use portico::{
    ClientPool, GatewayService, GracefulShutdown, ServerLifecycle, config::load_config_from_str,
};
use tokio::net::TcpListener;

/// A real axum backend that answers every request with its name, the Host it
/// saw and the value of `x-gateway`.
pub struct TestBackend {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl TestBackend {
    pub async fn spawn(name: &'static str) -> Self {
        Self::spawn_with_delay(name, Duration::ZERO).await
    }

    pub async fn spawn_with_delay(name: &'static str, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let app = Router::new().fallback(move |req: Request| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let host = header_value(req.headers(), HOST.as_str());
                let injected = header_value(req.headers(), "x-gateway");
                (
                    [("x-backend", name)],
                    format!("{name} host={host} path={} x-gateway={injected}", req.uri().path()),
                )
            }
        });
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self { addr, hits }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn gateway_from_yaml(yaml: &str) -> Arc<GatewayService> {
    let config = load_config_from_str(yaml, FileFormat::Yaml).unwrap();
    Arc::new(GatewayService::from_config(Arc::new(config)).unwrap())
}

/// Start a gateway whose only listener is `127.0.0.1:0`.
pub async fn start_gateway(yaml: &str) -> (ServerLifecycle, SocketAddr) {
    let lifecycle = ServerLifecycle::with_client_pool(
        gateway_from_yaml(yaml),
        Arc::new(GracefulShutdown::new()),
        ClientPool::default().with_seed(42),
    );
    lifecycle.start().await.unwrap();
    let addr = lifecycle.local_addr("127.0.0.1:0").await.unwrap();
    (lifecycle, addr)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

pub async fn get(addr: SocketAddr, host: &str, path: &str) -> TestResponse {
    let client: Client<HttpConnector, Empty<Bytes>> =
        Client::builder(TokioExecutor::new()).build_http();
    let request = hyper::Request::builder()
        .uri(format!("http://{addr}{path}"))
        .header(HOST, host)
        .body(Empty::new())
        .unwrap();

    let response = client.request(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();

    TestResponse {
        status,
        headers,
        body: String::from_utf8(body.to_vec()).unwrap(),
    }
}

// Listener startup, interceptors and shutdown
mod common;

use std::{
    net::SocketAddr,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::body::Body as AxumBody;
use common::{TestBackend, gateway_from_yaml, get, start_gateway};
use hyper::{Request, Response, StatusCode};
use portico::{
    ClientPool, GracefulShutdown, ServerLifecycle, ShutdownReason,
    adapters::{HandlerInterceptor, RequestSummary},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

fn proxy_yaml(backend: SocketAddr, listens: &[&str]) -> String {
    let servers: String = listens
        .iter()
        .map(|listen| {
            format!(
                r#"
    - listen: "{listen}"
      hosts:
        - host: a.example
          locations:
            - pattern: "^/"
              upstream: svc
"#
            )
        })
        .collect();
    format!(
        r#"
upstreams:
  - id: svc
    servers: ["{backend}"]
http:
  servers:{servers}"#
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_closes_every_listener() {
    let backend = TestBackend::spawn("svc").await;
    let shutdown = Arc::new(GracefulShutdown::new());
    let lifecycle = ServerLifecycle::new(
        gateway_from_yaml(&proxy_yaml(backend.addr, &["127.0.0.1:0", "0.0.0.0:0"])),
        Arc::clone(&shutdown),
    );
    lifecycle.start().await.unwrap();
    assert_eq!(lifecycle.listeners().len(), 2);

    let first = lifecycle.local_addr("127.0.0.1:0").await.unwrap();
    let second = lifecycle.local_addr("0.0.0.0:0").await.unwrap();
    let second = SocketAddr::from(([127, 0, 0, 1], second.port()));

    assert_eq!(get(first, "a.example", "/").await.status, StatusCode::OK);
    assert_eq!(get(second, "a.example", "/").await.status, StatusCode::OK);

    // an external trigger (e.g. the signal handler) releases `wait`
    let waiter = tokio::spawn(async move {
        lifecycle.wait().await.unwrap();
        lifecycle
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(shutdown.trigger_shutdown(ShutdownReason::Terminate));

    let lifecycle = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("wait should return after shutdown")
        .unwrap();
    assert!(lifecycle.listeners().is_empty());

    assert!(TcpStream::connect(first).await.is_err());
    assert!(TcpStream::connect(second).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_same_listen_address_is_merged() {
    let backend = TestBackend::spawn("svc").await;
    let yaml = proxy_yaml(backend.addr, &["127.0.0.1:0", "127.0.0.1:0"]);
    let (lifecycle, addr) = start_gateway(&yaml).await;

    assert_eq!(lifecycle.listeners().len(), 1);
    assert_eq!(get(addr, "a.example", "/").await.status, StatusCode::OK);
    lifecycle.shutdown().await.unwrap();
}

/// Rejects requests without an `x-token` header and counts completions.
#[derive(Default)]
struct TokenGate {
    completed: AtomicUsize,
}

impl HandlerInterceptor for TokenGate {
    fn pre_handle(
        &self,
        _summary: &RequestSummary,
        request: &mut Request<AxumBody>,
        response: &mut Response<AxumBody>,
    ) -> bool {
        if request.headers().contains_key("x-token") {
            return true;
        }
        *response.status_mut() = StatusCode::UNAUTHORIZED;
        false
    }

    fn after_completion(&self, _summary: &RequestSummary, _response: &Response<AxumBody>) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_interceptor_can_short_circuit() {
    let backend = TestBackend::spawn("svc").await;
    let gate = Arc::new(TokenGate::default());
    let lifecycle = ServerLifecycle::with_client_pool(
        gateway_from_yaml(&proxy_yaml(backend.addr, &["127.0.0.1:0"])),
        Arc::new(GracefulShutdown::new()),
        ClientPool::default(),
    )
    .with_interceptor(gate.clone());
    lifecycle.start().await.unwrap();
    let addr = lifecycle.local_addr("127.0.0.1:0").await.unwrap();

    let response = get(addr, "a.example", "/").await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(backend.hits(), 0);
    assert_eq!(gate.completed.load(Ordering::SeqCst), 1);

    // unmatched requests never reach the chain
    assert_eq!(get(addr, "z.example", "/").await.status, StatusCode::NOT_FOUND);
    assert_eq!(gate.completed.load(Ordering::SeqCst), 1);

    lifecycle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bad_tls_material_fails_start() {
    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    std::fs::write(&cert, "not a certificate").unwrap();
    std::fs::write(&key, "not a key").unwrap();

    let yaml = format!(
        r#"
http:
  servers:
    - listen: "127.0.0.1:0"
      ssl: true
      cert: "{cert}"
      key: "{key}"
      hosts:
        - host: a.example
          locations:
            - pattern: "^/"
              root: "{root}"
"#,
        cert = cert.display(),
        key = key.display(),
        root = dir.path().display(),
    );

    let lifecycle = ServerLifecycle::new(gateway_from_yaml(&yaml), Arc::new(GracefulShutdown::new()));
    let err = lifecycle.start().await.err().expect("start must fail");
    assert!(format!("{err:#}").contains("TLS setup failed"));
    assert!(lifecycle.listeners().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tls_listener_serves_requests() {
    let backend = TestBackend::spawn("svc").await;
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let yaml = format!(
        r#"
upstreams:
  - id: svc
    servers: ["{backend}"]
http:
  servers:
    - listen: "127.0.0.1:0"
      ssl: true
      cert: "{cert}"
      key: "{key}"
      hosts:
        - host: a.example
          locations:
            - pattern: "^/"
              upstream: svc
"#,
        backend = backend.addr,
        cert = fixtures.join("cert.pem").display(),
        key = fixtures.join("key.pem").display(),
    );
    let (lifecycle, addr) = start_gateway(&yaml).await;
    assert_eq!(lifecycle.listeners().len(), 1);

    let mut roots = rustls::RootCertStore::empty();
    let pem = std::fs::read(fixtures.join("cert.pem")).unwrap();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        roots.add(cert.unwrap()).unwrap();
    }
    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

    let tcp = TcpStream::connect(addr).await.unwrap();
    let server_name = rustls::pki_types::ServerName::try_from("localhost").unwrap();
    let mut tls = connector.connect(server_name, tcp).await.unwrap();
    tls.write_all(b"GET /secure HTTP/1.1\r\nHost: a.example\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    // the peer may close without close_notify; whatever arrived is enough
    let mut raw = Vec::new();
    let _ = tls.read_to_end(&mut raw).await;
    let raw = String::from_utf8_lossy(&raw);

    assert!(raw.starts_with("HTTP/1.1 200"), "unexpected response: {raw}");
    assert!(raw.contains("svc host=a.example path=/secure"));
    assert_eq!(backend.hits(), 1);
    lifecycle.shutdown().await.unwrap();
}

// End-to-end routing through a running gateway
mod common;

use std::time::{Duration, Instant};

use common::{TestBackend, dead_addr, get, start_gateway};
use hyper::StatusCode;

#[tokio::test(flavor = "multi_thread")]
async fn test_virtual_hosts_proxy_and_static_files() {
    let backend = TestBackend::spawn("api").await;
    let site = tempfile::tempdir().unwrap();
    std::fs::write(site.path().join("index.html"), "<h1>home</h1>").unwrap();
    std::fs::write(site.path().join("about.txt"), "about us").unwrap();

    let yaml = format!(
        r#"
upstreams:
  - id: svc1
    servers: ["{backend}"]
http:
  servers:
    - listen: "127.0.0.1:0"
      hosts:
        - host: "a.example, www.a.example"
          locations:
            - pattern: "^/api/"
              upstream: svc1
              request: {{ x-gateway: portico }}
              response: {{ x-served-by: portico }}
            - pattern: "^/"
              root: "{root}"
              index: "index.html"
"#,
        backend = backend.addr,
        root = site.path().display(),
    );
    let (lifecycle, addr) = start_gateway(&yaml).await;

    let proxied = get(addr, "a.example", "/api/users").await;
    assert_eq!(proxied.status, StatusCode::OK);
    assert_eq!(
        proxied.body,
        "api host=a.example path=/api/users x-gateway=portico"
    );
    assert_eq!(proxied.headers["x-served-by"], "portico");
    assert_eq!(proxied.headers["x-backend"], "api");

    // second name of the same entry, with a port and mixed case
    let aliased = get(addr, "WWW.A.example:8080", "/api/x").await;
    assert_eq!(aliased.status, StatusCode::OK);
    assert!(aliased.body.starts_with("api host=WWW.A.example:8080"));

    let index = get(addr, "a.example", "/").await;
    assert_eq!(index.status, StatusCode::OK);
    assert_eq!(index.body, "<h1>home</h1>");

    let file = get(addr, "a.example", "/about.txt").await;
    assert_eq!(file.status, StatusCode::OK);
    assert_eq!(file.body, "about us");

    let missing = get(addr, "a.example", "/nope.txt").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let unknown_host = get(addr, "other.example", "/api/users").await;
    assert_eq!(unknown_host.status, StatusCode::NOT_FOUND);
    assert!(unknown_host.body.is_empty());

    assert_eq!(backend.hits(), 2);
    lifecycle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_first_matching_rule_wins() {
    let first = TestBackend::spawn("first").await;
    let second = TestBackend::spawn("second").await;

    let yaml = format!(
        r#"
upstreams:
  - id: one
    servers: ["{first}"]
  - id: two
    servers: ["{second}"]
http:
  servers:
    - listen: "127.0.0.1:0"
      hosts:
        - host: b.example
          locations:
            - pattern: "^/api/v1/"
              upstream: one
            - pattern: "^/api/"
              upstream: two
"#,
        first = first.addr,
        second = second.addr,
    );
    let (lifecycle, addr) = start_gateway(&yaml).await;

    assert!(get(addr, "b.example", "/api/v1/x").await.body.starts_with("first"));
    assert!(get(addr, "b.example", "/api/v2/x").await.body.starts_with("second"));
    assert_eq!(get(addr, "b.example", "/other").await.status, StatusCode::NOT_FOUND);

    assert_eq!(first.hits(), 1);
    assert_eq!(second.hits(), 1);
    lifecycle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_requests_spread_across_backends() {
    let left = TestBackend::spawn("left").await;
    let right = TestBackend::spawn("right").await;

    let yaml = format!(
        r#"
upstreams:
  - id: svc
    balance: random
    servers: ["{left}", "{right}"]
http:
  servers:
    - listen: "127.0.0.1:0"
      hosts:
        - host: c.example
          locations:
            - pattern: "^/"
              upstream: svc
"#,
        left = left.addr,
        right = right.addr,
    );
    let (lifecycle, addr) = start_gateway(&yaml).await;

    for _ in 0..100 {
        assert_eq!(get(addr, "c.example", "/").await.status, StatusCode::OK);
    }

    assert_eq!(left.hits() + right.hits(), 100);
    assert!(left.hits() > 0, "left backend never selected");
    assert!(right.hits() > 0, "right backend never selected");
    lifecycle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_backend_is_bad_gateway_and_demoted() {
    let dead = dead_addr().await;
    let live = TestBackend::spawn("live").await;

    let yaml = format!(
        r#"
health_check:
  demote_on_failure: true
upstreams:
  - id: svc
    servers: ["{dead}", "{live}"]
  - id: gone
    servers: ["{dead}"]
http:
  servers:
    - listen: "127.0.0.1:0"
      hosts:
        - host: d.example
          locations:
            - pattern: "^/gone"
              upstream: gone
              response: {{ x-served-by: portico }}
            - pattern: "^/"
              upstream: svc
"#,
        live = live.addr,
    );
    let (lifecycle, addr) = start_gateway(&yaml).await;

    let response = get(addr, "d.example", "/gone").await;
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.body, "Bad Gateway");
    assert_eq!(response.headers["x-served-by"], "portico");

    // keep going until the dead member of the pool has been tried and demoted
    let svc = lifecycle.registry().gateway().upstream("svc").unwrap();
    for _ in 0..50 {
        let _ = get(addr, "d.example", "/").await;
        if !svc.servers()[0].is_up() {
            break;
        }
    }
    assert!(!svc.servers()[0].is_up(), "dead backend should be marked down");

    // once demoted, every request reaches the live backend
    let before = live.hits();
    for _ in 0..10 {
        assert_eq!(get(addr, "d.example", "/").await.status, StatusCode::OK);
    }
    assert_eq!(live.hits(), before + 10);
    lifecycle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slow_backend_times_out_at_rule_deadline() {
    let slow = TestBackend::spawn_with_delay("slow", Duration::from_secs(2)).await;

    let yaml = format!(
        r#"
upstreams:
  - id: svc
    timeout: 5000
    servers: ["{slow}"]
http:
  servers:
    - listen: "127.0.0.1:0"
      hosts:
        - host: e.example
          locations:
            - pattern: "^/"
              upstream: svc
              timeout: 200
"#,
        slow = slow.addr,
    );
    let (lifecycle, addr) = start_gateway(&yaml).await;

    let started = Instant::now();
    let response = get(addr, "e.example", "/").await;
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert!(started.elapsed() < Duration::from_millis(1500));

    // a timeout is not a connect failure
    let svc = lifecycle.registry().gateway().upstream("svc").unwrap();
    assert!(svc.servers()[0].is_up());
    lifecycle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backends_stay_in_rotation_without_health_checks() {
    let dead = dead_addr().await;
    let live = TestBackend::spawn("live").await;

    let yaml = format!(
        r#"
health_check:
  enabled: false
  demote_on_failure: true
upstreams:
  - id: svc
    servers: ["{dead}", "{live}"]
http:
  servers:
    - listen: "127.0.0.1:0"
      hosts:
        - host: f.example
          locations:
            - pattern: "^/"
              upstream: svc
"#,
        live = live.addr,
    );
    let (lifecycle, addr) = start_gateway(&yaml).await;

    let mut failures = 0;
    for _ in 0..30 {
        if get(addr, "f.example", "/").await.status == StatusCode::BAD_GATEWAY {
            failures += 1;
        }
    }
    assert!(failures > 0, "dead backend should still be selected");

    let svc = lifecycle.registry().gateway().upstream("svc").unwrap();
    assert!(svc.servers()[0].is_up());
    lifecycle.shutdown().await.unwrap();
}

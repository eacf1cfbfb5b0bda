//! Integration tests for the Vault client handshake

use std::time::Duration;

use auth_bootstrap::{Artifact, Context, Error, ErrorKind, VaultClient};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::{
    matchers::{header, header_exists, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn testdata(name: &str) -> String {
    format!("{}/tests/testdata/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn health_body() -> serde_json::Value {
    json!({
        "initialized": true,
        "sealed": false,
        "standby": false,
        "performance_standby": false,
        "server_time_utc": 1700000000,
        "version": "1.15.2",
        "cluster_name": "vault-cluster-test",
        "cluster_id": "c0ffee"
    })
}

fn insecure_client(address: &str) -> VaultClient {
    VaultClient::builder()
        .address(address)
        .token("vault-token")
        .insecure_skip_tls(true)
        .timeout_ms(5000)
        .build()
        .expect("Failed to build client")
}

#[tokio::test]
async fn test_connect_checks_health() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/sys/health"))
        .and(query_param("standbyok", "true"))
        .and(query_param("sealedcode", "299"))
        .and(query_param("uninitcode", "299"))
        .and(header("x-vault-token", "vault-token"))
        .and(header_exists("x-request-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_body()))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = insecure_client(&server.uri());
    client.connect(&Context::background()).await.unwrap();

    assert!(client.is_connected());
    let health = client.last_health().unwrap();
    assert_eq!(health.version, "1.15.2");
    assert!(!health.sealed);
    assert_eq!(health.cluster_name.as_deref(), Some("vault-cluster-test"));
}

#[tokio::test]
async fn test_connect_accepts_299_for_sealed_node() {
    let server = MockServer::start().await;

    let mut body = health_body();
    body["sealed"] = json!(true);
    Mock::given(method("GET"))
        .and(path("/v1/sys/health"))
        .respond_with(ResponseTemplate::new(299).set_body_json(body))
        .mount(&server)
        .await;

    let mut client = insecure_client(&server.uri());
    client.connect(&Context::background()).await.unwrap();
    assert!(client.last_health().unwrap().sealed);
}

#[tokio::test]
async fn test_connect_with_full_tls_material() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/sys/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_body()))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = VaultClient::builder()
        .address(server.uri())
        .token("vault-token")
        .tls_config(testdata("ca.pem"), testdata("cert.pem"), testdata("key.pem"))
        .build()
        .unwrap();

    client.connect(&Context::background()).await.unwrap();

    let material = client.tls_material().unwrap();
    assert!(!material.insecure);
    assert!(material.ca_path.as_ref().unwrap().is_absolute());
    let identity = material.identity.as_ref().unwrap();
    assert!(identity.cert.ends_with("cert.pem"));
    assert!(identity.key.ends_with("key.pem"));
}

// rustls only accepts X.509 v3 leaf certificates and checks the identity when
// the client is built.
#[cfg(feature = "rustls-tls")]
#[tokio::test]
async fn test_rejected_client_certificate_is_tls_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_body()))
        .expect(0)
        .mount(&server)
        .await;

    let mut client = VaultClient::builder()
        .address(server.uri())
        .token("vault-token")
        .tls_config(testdata("ca.pem"), testdata("cert-v1.pem"), testdata("key.pem"))
        .build()
        .unwrap();

    let err = client.connect(&Context::background()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Tls);
    assert!(
        err.to_string().starts_with("vault: error configuring TLS"),
        "unexpected message: {}",
        err
    );
    assert!(!client.is_connected());
    assert!(client.tls_material().is_none());
}

#[tokio::test]
async fn test_missing_ca_fails_before_any_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_body()))
        .expect(0)
        .mount(&server)
        .await;

    let mut client = VaultClient::builder()
        .address(server.uri())
        .token("vault-token")
        .tls_config("/nonexistent/ca.pem", "", "")
        .build()
        .unwrap();

    let err = client.connect(&Context::background()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileNotFound);
    assert!(matches!(
        err,
        Error::FileNotFound {
            kind: Artifact::CaCertificate,
            ..
        }
    ));
    assert!(!client.is_connected());
    assert!(client.tls_material().is_none());
}

#[tokio::test]
async fn test_unhealthy_status_is_connection_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/sys/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut client = insecure_client(&server.uri());
    let err = client.connect(&Context::background()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    let message = err.to_string();
    assert!(message.starts_with("vault: failed to connect to vault at"));
    assert!(message.contains(&server.uri()));
    assert!(message.contains("503"));
    assert!(!client.is_connected());
    assert!(client.last_health().is_none());
}

#[tokio::test]
async fn test_undecodable_body_is_connection_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/sys/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let mut client = insecure_client(&server.uri());
    let err = client.connect(&Context::background()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_unreachable_server_is_connection_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let mut client = insecure_client(&address);
    let err = client.connect(&Context::background()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.to_string().contains(&address));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_cancelled_context_skips_handshake() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_body()))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = Context::background();
    ctx.cancel();

    let mut client = insecure_client(&server.uri());
    let err = client.connect(&ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_deadline_cuts_slow_handshake() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/sys/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(health_body())
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let ctx = Context::background().with_timeout(Duration::from_millis(50));
    let mut client = insecure_client(&server.uri());
    let err = client.connect(&ctx).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    assert_eq!(err.to_string(), "context deadline exceeded");
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_stop_after_connect_releases_handle() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/sys/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(health_body()))
        .mount(&server)
        .await;

    let mut client = insecure_client(&server.uri());
    client.connect(&Context::background()).await.unwrap();

    let ctx = Context::background();
    ctx.cancel();
    let err = client.stop(&ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!client.is_connected());

    client.stop(&Context::background()).unwrap();
}

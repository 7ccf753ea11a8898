use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use f5sdk::invocation::Invocation;
use f5sdk::transport::{AttemptResult, CommandOutput, Failure, FailureTag, HttpResponse, Payload, Transport};
use f5sdk::{ClientConfig, ErrorKind, ManagementClient, RequestOptions, RetryConfig, Scheme};
use mockito::Server;
use serde_json::json;

/// Transport that replays a fixed script of attempt results.
struct ScriptedTransport {
    script: Mutex<VecDeque<AttemptResult>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    fn new(script: Vec<AttemptResult>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, _invocation: &Invocation) -> AttemptResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .expect("transport called more often than scripted")
    }
}

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: 0.001,
        backoff_multiplier: 2.0,
        max_delay: 0.005,
        jitter: true,
    }
}

fn http_status(status: u16) -> AttemptResult {
    Err(Failure::new(
        FailureTag::HttpStatus {
            status,
            body: String::new(),
        },
        format!("HTTP {}", status),
    ))
}

fn http_ok(body: &str) -> AttemptResult {
    Ok(Payload::Http(HttpResponse {
        status: 200,
        body: body.as_bytes().to_vec(),
    }))
}

fn mock_server_config(server: &Server, max_attempts: u32) -> ClientConfig {
    let address = server.socket_address();
    ClientConfig::builder(address.ip().to_string())
        .port(address.port())
        .scheme(Scheme::Http)
        .token("token")
        .retry(fast_retry(max_attempts))
        .build()
        .unwrap()
}

#[test_log::test(tokio::test)]
async fn test_transient_failures_then_success() {
    let transport = ScriptedTransport::new(vec![
        http_status(503),
        http_status(503),
        http_ok(r#"{"kind": "tm:ltm:pool:poolcollectionstate"}"#),
    ]);
    let config = ClientConfig::builder("192.0.2.10")
        .token("token")
        .retry(fast_retry(3))
        .build()
        .unwrap();

    let client = ManagementClient::with_transport(config, transport.clone())
        .await
        .unwrap();
    let response = client
        .make_request("/mgmt/tm/ltm/pool", RequestOptions::get())
        .await
        .unwrap();

    assert_eq!(response["kind"], "tm:ltm:pool:poolcollectionstate");
    assert_eq!(transport.calls(), 3);
}

#[test_log::test(tokio::test)]
async fn test_unauthorized_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/mgmt/tm/sys/version")
        .with_status(401)
        .with_body(r#"{"code": 401, "message": "Authorization failed"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = ManagementClient::connect(mock_server_config(&server, 5))
        .await
        .unwrap();
    let err = client.get_info().await.unwrap_err();

    mock.assert_async().await;
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert!(err.message().contains("Authorization failed"));
}

#[test_log::test(tokio::test)]
async fn test_server_errors_exhaust_attempts() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/mgmt/tm/ltm/virtual")
        .with_status(500)
        .expect(4)
        .create_async()
        .await;

    let client = ManagementClient::connect(mock_server_config(&server, 4))
        .await
        .unwrap();
    let err = client
        .make_request("/mgmt/tm/ltm/virtual", RequestOptions::get())
        .await
        .unwrap_err();

    mock.assert_async().await;
    assert_eq!(err.kind(), ErrorKind::Transient);
}

#[test_log::test(tokio::test)]
async fn test_ssh_failure_is_fatal_with_stderr() {
    // Login with basic credentials takes the first scripted result
    let transport = ScriptedTransport::new(vec![
        http_ok(r#"{"token": {"token": "session"}}"#),
        Err(Failure::new(
            FailureTag::SshExit {
                code: 1,
                stderr: "01020036:3: The requested pool (/Common/missing) was not found."
                    .to_string(),
            },
            "`tmsh delete ltm pool missing` exited with status 1",
        )),
    ]);
    let config = ClientConfig::builder("192.0.2.10")
        .basic_auth("admin", "admin")
        .retry(fast_retry(3))
        .build()
        .unwrap();

    let client = ManagementClient::with_transport(config, transport.clone())
        .await
        .unwrap();
    let err = client
        .make_request_ssh("tmsh delete ltm pool missing")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert!(err.message().contains("was not found"));
    assert_eq!(transport.calls(), 2);
}

#[test_log::test(tokio::test)]
async fn test_ssh_success() {
    let transport = ScriptedTransport::new(vec![Ok(Payload::Ssh(CommandOutput {
        stdout: "active\n".to_string(),
        stderr: String::new(),
        exit_code: 0,
    }))]);
    let config = ClientConfig::builder("192.0.2.10")
        .private_key("admin", "/home/user/.ssh/id_ed25519", None)
        .build()
        .unwrap();

    let client = ManagementClient::with_transport(config, transport.clone())
        .await
        .unwrap();
    let output = client.make_request_ssh("tmsh show cm failover-status").await.unwrap();

    assert_eq!(output.stdout.trim(), "active");
    assert_eq!(transport.calls(), 1);
}

#[test_log::test(tokio::test)]
async fn test_zero_attempts_rejected_before_any_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", mockito::Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let address = server.socket_address();
    let err = ClientConfig::builder(address.ip().to_string())
        .port(address.port())
        .scheme(Scheme::Http)
        .basic_auth("admin", "admin")
        .retry(RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        })
        .build()
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Configuration);
    mock.assert_async().await;
}

#[test_log::test(tokio::test)]
async fn test_login_then_authenticated_request() {
    let mut server = Server::new_async().await;
    let login = server
        .mock("POST", "/mgmt/shared/authn/login")
        .match_body(mockito::Matcher::PartialJson(json!({"username": "admin"})))
        .with_status(200)
        .with_body(r#"{"token": {"token": "session-token", "timeout": 1200}}"#)
        .expect(1)
        .create_async()
        .await;
    let declare = server
        .mock("POST", "/mgmt/shared/declarative-onboarding")
        .match_header("x-f5-auth-token", "session-token")
        .match_header("content-type", "application/json")
        .match_body(mockito::Matcher::Json(json!({"schemaVersion": "1.0.0"})))
        .with_status(200)
        .with_body(r#"{"result": {"status": "OK"}}"#)
        .create_async()
        .await;

    let address = server.socket_address();
    let config = ClientConfig::builder(address.ip().to_string())
        .port(address.port())
        .scheme(Scheme::Http)
        .basic_auth("admin", "admin")
        .retry(fast_retry(2))
        .build()
        .unwrap();

    let client = ManagementClient::connect(config).await.unwrap();
    let (body, status) = client
        .make_request_advanced(
            "/mgmt/shared/declarative-onboarding",
            RequestOptions::post(json!({"schemaVersion": "1.0.0"})),
        )
        .await
        .unwrap();

    login.assert_async().await;
    declare.assert_async().await;
    assert_eq!(status, 200);
    assert_eq!(body["result"]["status"], "OK");
}

#[test_log::test(tokio::test)]
async fn test_connection_refused_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = ClientConfig::builder("127.0.0.1")
        .port(port)
        .scheme(Scheme::Http)
        .token("token")
        .retry(fast_retry(2))
        .build()
        .unwrap();
    let client = ManagementClient::connect(config).await.unwrap();

    let err = client
        .make_request("/mgmt/tm/sys/version", RequestOptions::get())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
}

//! HTTP adapter built on reqwest.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;

use super::{AttemptResult, Failure, FailureTag, HttpResponse, Payload, Transport};
use crate::invocation::{Body, HttpRequest, Invocation, Request};

/// Longest response body excerpt kept in a failure.
const MAX_ERROR_BODY: usize = 2048;

/// Single-attempt HTTP transport wrapping a reqwest [`Client`].
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    async fn send_once(&self, request: &HttpRequest) -> AttemptResult {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            Body::Empty => builder,
            Body::Json(value) => builder.json(value),
            Body::Raw(bytes) => builder.body(bytes.clone()),
        };

        let response = builder.send().await.map_err(failure_from_reqwest)?;
        let status = response.status();
        let body = response.bytes().await.map_err(failure_from_reqwest)?;

        debug!(
            "{} {} -> {} ({} bytes)",
            request.method,
            request.url,
            status.as_u16(),
            body.len()
        );

        if status.is_success() {
            return Ok(Payload::Http(HttpResponse {
                status: status.as_u16(),
                body: body.to_vec(),
            }));
        }

        let excerpt = &body[..body.len().min(MAX_ERROR_BODY)];
        Err(Failure::new(
            FailureTag::HttpStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(excerpt).into_owned(),
            },
            format!("HTTP {} from {} {}", status, request.method, request.url),
        ))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[tracing::instrument(skip(self, invocation), fields(target = %invocation))]
    async fn execute(&self, invocation: &Invocation) -> AttemptResult {
        let Request::Http(request) = invocation.request() else {
            return Err(Failure::new(
                FailureTag::InvalidRequest,
                format!("HTTP transport cannot execute {}", invocation),
            ));
        };

        match tokio::time::timeout(invocation.timeout(), self.send_once(request)).await {
            Ok(result) => result,
            Err(elapsed) => Err(Failure::new(
                FailureTag::Timeout,
                format!(
                    "{} timed out after {}ms",
                    invocation,
                    invocation.timeout().as_millis()
                ),
            )
            .with_cause(elapsed)),
        }
    }
}

/// Maps a reqwest error onto a failure tag.
fn failure_from_reqwest(error: reqwest::Error) -> Failure {
    let tag = if error.is_timeout() {
        FailureTag::Timeout
    } else if error.is_builder() {
        FailureTag::InvalidRequest
    } else if error.is_connect() || error.is_request() || error.is_body() {
        FailureTag::Connection
    } else {
        FailureTag::Other
    };
    Failure::new(tag, "Failed to send request").with_cause(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{SshAuth, SshCommand, SshTarget};
    use reqwest::Method;
    use std::time::Duration;

    fn invocation(method: Method, url: String) -> Invocation {
        Invocation::http(HttpRequest::new(method, url), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_execute_success() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let mock = server
            .mock("GET", "/mgmt/tm/sys/version")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"kind": "tm:sys:version:versionstats"}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(Client::new());
        let result = transport
            .execute(&invocation(
                Method::GET,
                format!("{}/mgmt/tm/sys/version", url),
            ))
            .await;

        mock.assert_async().await;
        match result {
            Ok(Payload::Http(response)) => {
                assert_eq!(response.status, 200);
                let value = response.json_value().unwrap();
                assert_eq!(value["kind"], "tm:sys:version:versionstats");
            }
            other => panic!("Expected HTTP payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_sends_headers_and_json_body() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let mock = server
            .mock("POST", "/mgmt/shared/authn/login")
            .match_header("x-f5-auth-token", "abc")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(serde_json::json!({"username": "admin"})))
            .with_status(200)
            .create_async()
            .await;

        let request = HttpRequest::new(Method::POST, format!("{}/mgmt/shared/authn/login", url))
            .header("X-F5-Auth-Token", "abc")
            .body(Body::Json(serde_json::json!({"username": "admin"})));
        let invocation = Invocation::http(request, Duration::from_secs(5)).unwrap();

        let transport = HttpTransport::new(Client::new());
        let result = transport.execute(&invocation).await;

        mock.assert_async().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_execute_non_success_status_is_failure() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body(r#"{"code":404,"message":"Object not found"}"#)
            .create_async()
            .await;

        let transport = HttpTransport::new(Client::new());
        let failure = transport
            .execute(&invocation(Method::GET, format!("{}/missing", url)))
            .await
            .unwrap_err();

        mock.assert_async().await;
        match failure.tag() {
            FailureTag::HttpStatus { status, body } => {
                assert_eq!(*status, 404);
                assert!(body.contains("Object not found"));
            }
            other => panic!("Expected HttpStatus, got {:?}", other),
        }
        assert!(!failure.is_transient());
    }

    #[tokio::test]
    async fn test_execute_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let _m = server
            .mock("GET", "/")
            .with_status(503)
            .create_async()
            .await;

        let transport = HttpTransport::new(Client::new());
        let failure = transport
            .execute(&invocation(Method::GET, format!("{}/", url)))
            .await
            .unwrap_err();

        assert!(failure.is_transient());
    }

    #[tokio::test]
    async fn test_execute_connection_refused_is_transient() {
        // Grab a free port, then close the listener so nothing accepts on it
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = HttpTransport::new(Client::new());
        let failure = transport
            .execute(&invocation(
                Method::GET,
                format!("http://127.0.0.1:{}/", port),
            ))
            .await
            .unwrap_err();

        assert_eq!(failure.tag(), &FailureTag::Connection);
        assert!(failure.is_transient());
    }

    #[tokio::test]
    async fn test_execute_timeout_is_transient() {
        // Accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _accept = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let request = HttpRequest::new(Method::GET, format!("http://127.0.0.1:{}/", port));
        let invocation = Invocation::http(request, Duration::from_millis(100)).unwrap();

        let transport = HttpTransport::new(Client::new());
        let failure = transport.execute(&invocation).await.unwrap_err();

        assert_eq!(failure.tag(), &FailureTag::Timeout);
        assert!(failure.is_transient());
    }

    #[tokio::test]
    async fn test_execute_rejects_ssh_invocation() {
        let command = SshCommand {
            target: SshTarget {
                host: "192.0.2.10".into(),
                port: 22,
                user: "admin".into(),
                auth: SshAuth::Password("admin".into()),
            },
            command: "uptime".into(),
        };
        let invocation = Invocation::ssh(command, Duration::from_secs(1)).unwrap();

        let transport = HttpTransport::new(Client::new());
        let failure = transport.execute(&invocation).await.unwrap_err();

        assert_eq!(failure.tag(), &FailureTag::InvalidRequest);
    }
}

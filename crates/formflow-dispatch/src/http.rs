use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use formflow_core::config::HttpConfig;
use formflow_core::error::{FormError, Result};
use formflow_core::types::{HttpMethod, HttpTarget};

/// Longest response body quoted back in an error message.
const MAX_ERROR_BODY: usize = 500;

/// Shared HTTP client for every HTTP-backed dispatcher.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FormError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Send `body` as JSON to `target`.
    ///
    /// Any non-2xx status is a failure. A JSON response body is returned as
    /// is, any other non-empty body as `{"body": text}`.
    pub async fn send(
        &self,
        action: &str,
        target: &HttpTarget,
        body: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let mut req = self
            .client
            .request(to_method(target.method), &target.url)
            .json(body);
        for (k, v) in &target.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if let Some(token) = &target.bearer_token {
            req = req.bearer_auth(token);
        }

        debug!(action, method = target.method.as_str(), url = %target.url, "Sending request");

        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FormError::Cancelled),
            r = req.send() => r.map_err(|e| FormError::dispatch(action, e.to_string()))?,
        };

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| FormError::dispatch(action, e.to_string()))?;

        if !status.is_success() {
            return Err(FormError::dispatch(
                action,
                format!("HTTP {}: {}", status.as_u16(), truncate(&text, MAX_ERROR_BODY)),
            ));
        }

        Ok(parse_response(&text))
    }
}

fn to_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
    }
}

/// JSON body as is, other text wrapped, empty as `null`.
pub(crate) fn parse_response(text: &str) -> serde_json::Value {
    if text.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::json!({ "body": text }))
}

/// Cut `text` to at most `max` bytes on a char boundary.
pub(crate) fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one request with a canned response; returns the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn test_send_injects_headers_and_auth() {
        let (url, server) = serve_once("200 OK", r#"{"ok":true}"#).await;
        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let mut target = HttpTarget::post(url);
        target.method = HttpMethod::Put;
        target.bearer_token = Some("s3cret".into());
        target.headers.insert("X-Source".into(), "formflow".into());

        let response = transport
            .send("crm", &target, &serde_json::json!({"a": 1}), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response, serde_json::json!({"ok": true}));

        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /hook"));
        let lower = request.to_lowercase();
        assert!(lower.contains("authorization: bearer s3cret"));
        assert!(lower.contains("x-source: formflow"));
        assert!(request.ends_with(r#"{"a":1}"#));
    }

    #[tokio::test]
    async fn test_non_success_status_is_failure() {
        let (url, server) = serve_once("503 Service Unavailable", "down for maintenance").await;
        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let err = transport
            .send("crm", &HttpTarget::post(url), &serde_json::json!({}), &CancellationToken::new())
            .await
            .unwrap_err();
        let _ = server.await;
        let message = err.to_string();
        assert!(message.contains("HTTP 503"), "{}", message);
        assert!(message.contains("down for maintenance"));
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let transport = HttpTransport::new(&HttpConfig::default()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = transport
            .send("crm", &HttpTarget::post("http://127.0.0.1:9/"), &serde_json::json!({}), &cancel)
            .await;
        assert!(matches!(result, Err(FormError::Cancelled)));
    }

    #[test]
    fn test_parse_response() {
        assert_eq!(parse_response(""), serde_json::Value::Null);
        assert_eq!(parse_response(r#"{"id":3}"#)["id"], 3);
        assert_eq!(parse_response("ok")["body"], "ok");
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abcdef", 3), "abc");
    }
}

use std::time::Duration;

use fcheck_core::error::{codes, AppError};
use serde::de::DeserializeOwned;
use serde::Serialize;

const LOOPBACK: &str = "http://127.0.0.1";
const HEALTH_TIMEOUT: Duration = Duration::from_millis(800);

/// HTTP access to a local Ollama server. Remote hosts are refused.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
}

/// `http://127.0.0.1` with an optional numeric port and nothing after it.
fn is_loopback(url: &str) -> bool {
    match url.strip_prefix(LOOPBACK) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix(':')
            .is_some_and(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())),
        None => false,
    }
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if !is_loopback(base_url) {
            return Err(AppError::new(
                codes::MODEL_REMOTE_NOT_ALLOWED,
                "Model server must run on 127.0.0.1",
            )
            .with_details(format!("base_url={base_url}")));
        }
        Ok(Self {
            base_url: base_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    pub fn health_check(&self) -> Result<(), AppError> {
        let endpoint = "/api/tags";
        let resp = ureq::get(&self.url(endpoint)).timeout(HEALTH_TIMEOUT).call();
        check_status(endpoint, resp).map(|_| ())
    }

    /// POST `body` to `endpoint` and decode the JSON reply.
    /// Transport failures are retryable, non-200 statuses are not.
    pub(crate) fn post_json<Req, Resp>(
        &self,
        endpoint: &str,
        body: &Req,
        timeout: Duration,
    ) -> Result<Resp, AppError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(body).map_err(|e| {
            AppError::new(codes::MODEL_CALL_FAILED, "Failed to encode model request")
                .with_details(format!("endpoint={endpoint}; err={e}"))
        })?;

        let resp = ureq::post(&self.url(endpoint)).timeout(timeout).send_json(payload);
        check_status(endpoint, resp)?.into_json().map_err(|e| {
            AppError::new(codes::MODEL_CALL_FAILED, "Failed to decode model response")
                .with_details(format!("endpoint={endpoint}; err={e}"))
        })
    }
}

fn check_status(
    endpoint: &str,
    resp: Result<ureq::Response, ureq::Error>,
) -> Result<ureq::Response, AppError> {
    let status = match resp {
        Ok(r) if r.status() == 200 => return Ok(r),
        Ok(r) => r.status(),
        Err(ureq::Error::Status(status, _)) => status,
        Err(e) => {
            return Err(
                AppError::new(codes::MODEL_CALL_FAILED, "Model server is unreachable")
                    .with_details(format!("endpoint={endpoint}; err={e}"))
                    .with_retryable(true),
            )
        }
    };
    Err(AppError::new(codes::MODEL_CALL_FAILED, "Model server rejected the request")
        .with_details(format!("endpoint={endpoint}; status={status}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_loopback_is_allowed() {
        let client = OllamaClient::new("http://127.0.0.1:11434/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:11434");
        assert!(OllamaClient::new(" http://127.0.0.1 ").is_ok());

        for url in [
            "http://localhost:11434",
            "https://example.com",
            "http://127.0.0.10:1",
            "http://127.0.0.1:",
            "http://127.0.0.1:11434/../x",
            "http://127.0.0.1@evil.example",
        ] {
            let err = OllamaClient::new(url).unwrap_err();
            assert_eq!(err.code, codes::MODEL_REMOTE_NOT_ALLOWED, "{url}");
        }
    }

    #[test]
    fn unreachable_server_is_retryable() {
        // Nothing listens on the discard port.
        let client = OllamaClient::new("http://127.0.0.1:9").unwrap();
        let err = client.health_check().unwrap_err();
        assert_eq!(err.code, codes::MODEL_CALL_FAILED);
        assert!(err.retryable);
    }
}

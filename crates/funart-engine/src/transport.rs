use std::thread;
use std::time::Duration;

use funart_contracts::TaskStatus;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::{ApiStage, GenerationError, Result};

const ASYNC_HEADER: &str = "X-DashScope-Async";

/// One POST to a synthesis endpoint.
#[derive(Debug, Clone)]
pub struct ApiCall {
    pub stage: ApiStage,
    /// Endpoint path relative to the base URL.
    pub endpoint: String,
    pub payload: Value,
    /// Ask the vendor to run the job as a task and answer with a task id.
    pub asynchronous: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResultItem {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub actual_prompt: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TaskOutput {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub task_status: Option<TaskStatus>,
    #[serde(default)]
    pub results: Vec<ResultItem>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub actual_prompt: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A vendor reply. Non-2xx replies are returned as values, not errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApiResponse {
    #[serde(skip_deserializing)]
    pub status: u16,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub output: Option<TaskOutput>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn task_id(&self) -> Option<&str> {
        self.output
            .as_ref()
            .and_then(|output| output.task_id.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn task_status(&self) -> Option<TaskStatus> {
        self.output.as_ref().and_then(|output| output.task_status)
    }
}

/// Blocking seam between the engine and the vendor. The credential travels with each call.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;
    fn call(&self, api_key: &str, call: &ApiCall) -> Result<ApiResponse>;
    fn query_task(&self, api_key: &str, task_id: &str) -> Result<ApiResponse>;
    fn download(&self, url: &str, timeout: Duration) -> Result<Vec<u8>>;
}

pub struct HttpTransport {
    http: HttpClient,
    config: ApiConfig,
}

impl HttpTransport {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("funart/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| {
                GenerationError::configuration(format!("HTTP client setup failed: {err}"))
            })?;
        Ok(Self {
            http,
            config: config.clone(),
        })
    }

    /// Connection failures are retried with linear backoff. Replies of any status are not.
    fn send_with_retries<F>(&self, stage: ApiStage, idempotent: bool, build: F) -> Result<HttpResponse>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_retries = self.config.transport_retries;
        let mut attempt = 0;
        loop {
            match build().send() {
                Ok(response) => return Ok(response),
                Err(source) => {
                    if !is_retryable_transport_error(&source, idempotent) || attempt >= max_retries {
                        return Err(GenerationError::Network { stage, source });
                    }
                    attempt += 1;
                    let delay = self.config.retry_backoff * attempt as u32;
                    warn!(
                        %stage,
                        attempt,
                        max_retries,
                        delay_s = delay.as_secs_f64(),
                        error = %source,
                        "transient transport failure, retrying"
                    );
                    thread::sleep(delay);
                }
            }
        }
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "dashscope"
    }

    fn call(&self, api_key: &str, call: &ApiCall) -> Result<ApiResponse> {
        let url = self.config.endpoint_url(&call.endpoint);
        debug!(stage = %call.stage, url = %url, asynchronous = call.asynchronous, "POST");
        let response = self.send_with_retries(call.stage, false, || {
            let request = self
                .http
                .post(&url)
                .bearer_auth(api_key)
                .json(&call.payload);
            if call.asynchronous {
                request.header(ASYNC_HEADER, "enable")
            } else {
                request
            }
        })?;
        read_api_response(call.stage, response)
    }

    fn query_task(&self, api_key: &str, task_id: &str) -> Result<ApiResponse> {
        let url = self.config.task_url(task_id);
        let response = self.send_with_retries(ApiStage::Poll, true, || {
            self.http.get(&url).bearer_auth(api_key)
        })?;
        read_api_response(ApiStage::Poll, response)
    }

    fn download(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        // Result URLs are pre-signed; the credential is not sent along.
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|source| GenerationError::Network {
                stage: ApiStage::Download,
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GenerationError::Api {
                stage: ApiStage::Download,
                status: status.as_u16(),
                code: status
                    .canonical_reason()
                    .unwrap_or("DownloadFailed")
                    .to_string(),
                message: truncate_text(&body, 512),
            });
        }
        let bytes = response.bytes().map_err(|source| GenerationError::Network {
            stage: ApiStage::Download,
            source,
        })?;
        debug!(url, bytes = bytes.len(), "downloaded result");
        Ok(bytes.to_vec())
    }
}

fn read_api_response(stage: ApiStage, response: HttpResponse) -> Result<ApiResponse> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .map_err(|source| GenerationError::Network { stage, source })?;
    parse_api_response(status, &body)
}

/// Parse a vendor body. A 2xx body that is not JSON is a decode error; any other
/// unparseable body becomes a reply carrying the raw text as its message.
pub fn parse_api_response(status: u16, body: &str) -> Result<ApiResponse> {
    match serde_json::from_str::<ApiResponse>(body) {
        Ok(mut parsed) => {
            parsed.status = status;
            Ok(parsed)
        }
        Err(err) if (200..300).contains(&status) => Err(err.into()),
        Err(_) => Ok(ApiResponse {
            status,
            message: Some(truncate_text(body.trim(), 512)),
            ..ApiResponse::default()
        }),
    }
}

fn is_retryable_transport_error(err: &reqwest::Error, idempotent: bool) -> bool {
    if err.is_connect() {
        return true;
    }
    idempotent && (err.is_timeout() || err.is_request())
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use funart_contracts::TaskStatus;
    use mockito::Matcher;
    use serde_json::json;

    use super::{parse_api_response, ApiCall, HttpTransport, Transport};
    use crate::config::ApiConfig;
    use crate::error::{ApiStage, ErrorKind, GenerationError};

    const T2I_PATH: &str = "/services/aigc/text2image/image-synthesis";
    const VIDEO_PATH: &str = "/services/aigc/video-generation/video-synthesis";

    fn transport_for(server: &mockito::ServerGuard) -> anyhow::Result<HttpTransport> {
        let config = ApiConfig::new("sk-test", "/tmp")
            .with_base_url(server.url())
            .with_transport_retries(0, 0.0);
        Ok(HttpTransport::new(&config)?)
    }

    #[test]
    fn sync_call_sends_bearer_and_parses_results() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", T2I_PATH)
            .match_header("authorization", "Bearer sk-test")
            .match_header("x-dashscope-async", Matcher::Missing)
            .match_body(Matcher::PartialJson(json!({
                "model": "wan2.5-t2i-preview",
                "input": {"prompt": "a red cube"}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "request_id": "req-1",
                    "output": {
                        "task_status": "SUCCEEDED",
                        "results": [{"url": "https://cdn.example/a.png", "actual_prompt": "a glossy red cube"}]
                    }
                })
                .to_string(),
            )
            .create();

        let transport = transport_for(&server)?;
        let response = transport.call("sk-test", &ApiCall {
            stage: ApiStage::Synthesis,
            endpoint: T2I_PATH.to_string(),
            payload: json!({"model": "wan2.5-t2i-preview", "input": {"prompt": "a red cube"}}),
            asynchronous: false,
        })?;

        mock.assert();
        assert!(response.is_success());
        assert_eq!(response.request_id.as_deref(), Some("req-1"));
        assert_eq!(response.task_status(), Some(TaskStatus::Succeeded));
        let output = response.output.unwrap_or_default();
        assert_eq!(output.results.len(), 1);
        assert_eq!(
            output.results[0].url.as_deref(),
            Some("https://cdn.example/a.png")
        );
        Ok(())
    }

    #[test]
    fn async_submit_sets_the_async_header() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", VIDEO_PATH)
            .match_header("x-dashscope-async", "enable")
            .with_status(200)
            .with_body(r#"{"request_id":"req-2","output":{"task_id":"abc123","task_status":"PENDING"}}"#)
            .create();

        let response = transport_for(&server)?.call("sk-test", &ApiCall {
            stage: ApiStage::Submit,
            endpoint: VIDEO_PATH.to_string(),
            payload: json!({}),
            asynchronous: true,
        })?;

        mock.assert();
        assert_eq!(response.task_id(), Some("abc123"));
        assert_eq!(response.task_status(), Some(TaskStatus::Pending));
        Ok(())
    }

    #[test]
    fn error_status_is_returned_with_vendor_code() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        server
            .mock("POST", T2I_PATH)
            .with_status(400)
            .with_body(r#"{"request_id":"req-3","code":"InvalidParameter","message":"size is invalid"}"#)
            .create();

        let response = transport_for(&server)?.call("sk-test", &ApiCall {
            stage: ApiStage::Synthesis,
            endpoint: T2I_PATH.to_string(),
            payload: json!({}),
            asynchronous: false,
        })?;

        assert!(!response.is_success());
        assert_eq!(response.status, 400);
        assert_eq!(response.code.as_deref(), Some("InvalidParameter"));
        assert_eq!(response.message.as_deref(), Some("size is invalid"));
        Ok(())
    }

    #[test]
    fn query_task_hits_the_task_endpoint() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/tasks/abc123")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_body(r#"{"output":{"task_id":"abc123","task_status":"RUNNING"}}"#)
            .create();

        let response = transport_for(&server)?.query_task("sk-test", "abc123")?;
        mock.assert();
        assert_eq!(response.task_status(), Some(TaskStatus::Running));
        Ok(())
    }

    #[test]
    fn download_failure_is_a_transport_error() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/result.mp4")
            .with_status(403)
            .with_body("AccessDenied")
            .create();
        let url = format!("{}/result.mp4", server.url());

        let err = transport_for(&server)?
            .download(&url, Duration::from_secs(5))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        match err {
            GenerationError::Api {
                stage,
                status,
                message,
                ..
            } => {
                assert_eq!(stage, ApiStage::Download);
                assert_eq!(status, 403);
                assert_eq!(message, "AccessDenied");
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[test]
    fn download_returns_body_bytes() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/result.mp4")
            .with_status(200)
            .with_body(b"\x00\x00\x00\x18ftypmp42".as_slice())
            .create();
        let url = format!("{}/result.mp4", server.url());

        let bytes = transport_for(&server)?.download(&url, Duration::from_secs(5))?;
        assert_eq!(&bytes[4..8], b"ftyp");
        Ok(())
    }

    #[test]
    fn unparseable_error_body_keeps_raw_text() -> anyhow::Result<()> {
        let response = parse_api_response(502, "<html>Bad Gateway</html>")?;
        assert_eq!(response.status, 502);
        assert_eq!(response.code, None);
        assert_eq!(response.message.as_deref(), Some("<html>Bad Gateway</html>"));

        let err = parse_api_response(200, "not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Local);
        Ok(())
    }
}

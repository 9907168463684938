//! In-memory transport for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{ApiStage, GenerationError, Result};
use crate::transport::{parse_api_response, ApiCall, ApiResponse, Transport};

pub(crate) fn ok_reply(output: Value) -> ApiResponse {
    let body = json!({"request_id": "req-test", "output": output}).to_string();
    parse_api_response(200, &body).unwrap_or_default()
}

pub(crate) fn status_reply(task_id: &str, status: &str) -> ApiResponse {
    ok_reply(json!({"task_id": task_id, "task_status": status}))
}

pub(crate) fn error_reply(status: u16, code: &str, message: &str) -> ApiResponse {
    let body = json!({"request_id": "req-test", "code": code, "message": message}).to_string();
    parse_api_response(status, &body).unwrap_or_default()
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    calls: Mutex<VecDeque<ApiResponse>>,
    polls: Mutex<VecDeque<ApiResponse>>,
    downloads: HashMap<String, Vec<u8>>,
    sent: Mutex<Vec<ApiCall>>,
    polled: Mutex<Vec<String>>,
    credentials: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_call(self, response: ApiResponse) -> Self {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
        self
    }

    pub(crate) fn with_poll(self, response: ApiResponse) -> Self {
        self.polls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
        self
    }

    pub(crate) fn with_download(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.downloads.insert(url.to_string(), bytes);
        self
    }

    pub(crate) fn sent(&self) -> Vec<ApiCall> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Credential of every call and poll, in order.
    pub(crate) fn credentials(&self) -> Vec<String> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record_credential(&self, api_key: &str) {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(api_key.to_string());
    }

    pub(crate) fn polled_ids(&self) -> Vec<String> {
        self.polled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn call(&self, api_key: &str, call: &ApiCall) -> Result<ApiResponse> {
        self.record_credential(api_key);
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.clone());
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| GenerationError::configuration("no scripted call reply left"))
    }

    fn query_task(&self, api_key: &str, task_id: &str) -> Result<ApiResponse> {
        self.record_credential(api_key);
        self.polled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task_id.to_string());
        self.polls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| GenerationError::configuration("no scripted poll reply left"))
    }

    fn download(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>> {
        self.downloads
            .get(url)
            .cloned()
            .ok_or_else(|| GenerationError::Api {
                stage: ApiStage::Download,
                status: 404,
                code: "NotFound".to_string(),
                message: url.to_string(),
            })
    }
}

use funart_contracts::{GenerationResult, TaskStatus};

use crate::error::{ApiStage, GenerationError, Result};
use crate::transport::ApiResponse;

/// Non-2xx replies become `Api` errors carrying the vendor's code and message.
pub fn ensure_success(stage: ApiStage, response: &ApiResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }
    Err(GenerationError::Api {
        stage,
        status: response.status,
        code: response
            .code
            .clone()
            .unwrap_or_else(|| "UnknownError".to_string()),
        message: response.message.clone().unwrap_or_default(),
    })
}

pub fn task_failed(task_id: &str, status: TaskStatus, response: &ApiResponse) -> GenerationError {
    let output = response.output.as_ref();
    let code = output
        .and_then(|output| output.code.clone())
        .or_else(|| response.code.clone())
        .unwrap_or_else(|| "TaskFailed".to_string());
    let message = output
        .and_then(|output| output.message.clone())
        .or_else(|| response.message.clone())
        .unwrap_or_default();
    GenerationError::TaskFailed {
        task_id: task_id.to_string(),
        status,
        code,
        message,
    }
}

/// Classify a synthesis reply: an error, an empty success, or at least one image URL.
pub fn image_result(response: &ApiResponse) -> Result<GenerationResult> {
    ensure_success(ApiStage::Synthesis, response)?;
    let Some(output) = response.output.as_ref() else {
        return Err(GenerationError::empty_result(
            "image synthesis succeeded but the reply has no output",
        ));
    };
    if let Some(status) = output.task_status.filter(|status| status.is_terminal() && !status.is_success()) {
        return Err(task_failed(
            output.task_id.as_deref().unwrap_or("-"),
            status,
            response,
        ));
    }
    let result_urls = output
        .results
        .iter()
        .filter_map(|item| item.url.as_deref())
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect::<Vec<String>>();
    if result_urls.is_empty() {
        let detail = output
            .results
            .iter()
            .find_map(|item| item.message.as_deref().or(item.code.as_deref()))
            .map(|reason| format!(" ({reason})"))
            .unwrap_or_default();
        return Err(GenerationError::empty_result(format!(
            "image synthesis succeeded but returned no images{detail}"
        )));
    }
    let expanded_prompt = output
        .results
        .iter()
        .find_map(|item| item.actual_prompt.clone())
        .or_else(|| output.actual_prompt.clone());
    Ok(GenerationResult {
        result_urls,
        expanded_prompt,
        request_id: response.request_id.clone(),
    })
}

/// Classify the final reply of a video task: exactly one video URL or an empty result.
pub fn video_result(task_id: &str, response: &ApiResponse) -> Result<GenerationResult> {
    ensure_success(ApiStage::Poll, response)?;
    let Some(output) = response.output.as_ref() else {
        return Err(GenerationError::empty_result(format!(
            "task {task_id} succeeded but the reply has no output"
        )));
    };
    let status = output.task_status.unwrap_or(TaskStatus::Unknown);
    if !status.is_success() {
        return Err(task_failed(task_id, status, response));
    }
    let video_url = output
        .video_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| {
            GenerationError::empty_result(format!("task {task_id} succeeded without a video_url"))
        })?;
    Ok(GenerationResult {
        result_urls: vec![video_url.to_string()],
        expanded_prompt: output.actual_prompt.clone(),
        request_id: response.request_id.clone(),
    })
}

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use funart_contracts::TaskStatus;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{ApiStage, GenerationError, Result};
use crate::transport::{ApiCall, ApiResponse, ResultItem, TaskOutput, Transport};

const IMAGE_SCHEME: &str = "dryrun://image/";
const VIDEO_SCHEME: &str = "dryrun://video/";
const DEFAULT_DIMS: (u32, u32) = (1024, 1024);

/// Bare `ftyp` box; enough for players to recognise the container.
const VIDEO_STUB: &[u8] = b"\x00\x00\x00\x18ftypisom\x00\x00\x02\x00isommp41";

struct DryrunTask {
    polls_remaining: u32,
}

/// Offline transport: images are prompt-coloured PNGs, video tasks finish after a few polls.
pub struct DryrunTransport {
    polls_before_success: u32,
    tasks: Mutex<HashMap<String, DryrunTask>>,
    counter: AtomicU64,
}

impl Default for DryrunTransport {
    fn default() -> Self {
        Self::new(2)
    }
}

impl DryrunTransport {
    pub fn new(polls_before_success: u32) -> Self {
        Self {
            polls_before_success,
            tasks: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    fn ok(output: TaskOutput) -> ApiResponse {
        ApiResponse {
            status: 200,
            request_id: Some(format!("dryrun-{}", short_id("request", 0))),
            output: Some(output),
            ..ApiResponse::default()
        }
    }
}

impl Transport for DryrunTransport {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn call(&self, _api_key: &str, call: &ApiCall) -> Result<ApiResponse> {
        let prompt = call
            .payload
            .pointer("/input/prompt")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let seed = call
            .payload
            .pointer("/parameters/seed")
            .and_then(Value::as_u64)
            .unwrap_or_default();
        let idx = self.counter.fetch_add(1, Ordering::Relaxed);

        if call.asynchronous {
            let task_id = short_id(prompt, idx);
            self.tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(
                    task_id.clone(),
                    DryrunTask {
                        polls_remaining: self.polls_before_success,
                    },
                );
            info!(task_id = %task_id, "dryrun task accepted");
            return Ok(Self::ok(TaskOutput {
                task_id: Some(task_id),
                task_status: Some(TaskStatus::Pending),
                ..TaskOutput::default()
            }));
        }

        let (width, height) = call
            .payload
            .pointer("/parameters/size")
            .and_then(Value::as_str)
            .and_then(parse_size)
            .unwrap_or(DEFAULT_DIMS);
        let (r, g, b) = color_from_prompt(prompt, seed);
        Ok(Self::ok(TaskOutput {
            task_status: Some(TaskStatus::Succeeded),
            results: vec![ResultItem {
                url: Some(format!(
                    "{IMAGE_SCHEME}{width}x{height}/{}",
                    hex::encode([r, g, b])
                )),
                actual_prompt: Some(prompt.to_string()),
                ..ResultItem::default()
            }],
            ..TaskOutput::default()
        }))
    }

    fn query_task(&self, _api_key: &str, task_id: &str) -> Result<ApiResponse> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(task) = tasks.get_mut(task_id) else {
            return Ok(Self::ok(TaskOutput {
                task_id: Some(task_id.to_string()),
                task_status: Some(TaskStatus::Unknown),
                ..TaskOutput::default()
            }));
        };
        if task.polls_remaining > 0 {
            task.polls_remaining -= 1;
            return Ok(Self::ok(TaskOutput {
                task_id: Some(task_id.to_string()),
                task_status: Some(TaskStatus::Running),
                ..TaskOutput::default()
            }));
        }
        Ok(Self::ok(TaskOutput {
            task_id: Some(task_id.to_string()),
            task_status: Some(TaskStatus::Succeeded),
            video_url: Some(format!("{VIDEO_SCHEME}{task_id}.mp4")),
            ..TaskOutput::default()
        }))
    }

    fn download(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>> {
        if url.starts_with(VIDEO_SCHEME) {
            return Ok(VIDEO_STUB.to_vec());
        }
        let parsed = url
            .strip_prefix(IMAGE_SCHEME)
            .and_then(|rest| rest.split_once('/'))
            .and_then(|(dims, color)| Some((parse_size(dims)?, hex::decode(color).ok()?)));
        let Some(((width, height), color)) = parsed.filter(|(_, color)| color.len() == 3) else {
            return Err(GenerationError::Api {
                stage: ApiStage::Download,
                status: 404,
                code: "NotFound".to_string(),
                message: format!("dryrun has no resource at {url}"),
            });
        };
        let image = RgbImage::from_pixel(width, height, Rgb([color[0], color[1], color[2]]));
        let mut cursor = Cursor::new(Vec::new());
        image.write_to(&mut cursor, ImageFormat::Png)?;
        Ok(cursor.into_inner())
    }
}

fn parse_size(raw: &str) -> Option<(u32, u32)> {
    let (width, height) = raw.split_once(['*', 'x'])?;
    let width = width.trim().parse::<u32>().ok().filter(|value| *value > 0)?;
    let height = height.trim().parse::<u32>().ok().filter(|value| *value > 0)?;
    Some((width, height))
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str, idx: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..4])
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use funart_contracts::TaskStatus;
    use serde_json::json;

    use super::DryrunTransport;
    use crate::error::ApiStage;
    use crate::transport::{ApiCall, Transport};

    #[test]
    fn image_call_is_deterministic_per_prompt() -> anyhow::Result<()> {
        let transport = DryrunTransport::default();
        let call = ApiCall {
            stage: ApiStage::Synthesis,
            endpoint: "/x".to_string(),
            payload: json!({"input": {"prompt": "boat"}, "parameters": {"size": "800*800"}}),
            asynchronous: false,
        };
        let first = transport.call("dryrun", &call)?;
        let second = transport.call("dryrun", &call)?;
        let url = |response: &crate::transport::ApiResponse| {
            response
                .output
                .as_ref()
                .and_then(|output| output.results.first())
                .and_then(|item| item.url.clone())
                .unwrap_or_default()
        };
        assert_eq!(url(&first), url(&second));
        assert!(url(&first).starts_with("dryrun://image/800x800/"));

        let png = transport.download(&url(&first), Duration::from_secs(1))?;
        let decoded = image::load_from_memory(&png)?;
        assert_eq!((decoded.width(), decoded.height()), (800, 800));
        Ok(())
    }

    #[test]
    fn video_task_runs_then_succeeds() -> anyhow::Result<()> {
        let transport = DryrunTransport::new(1);
        let submitted = transport.call("dryrun", &ApiCall {
            stage: ApiStage::Submit,
            endpoint: "/v".to_string(),
            payload: json!({"input": {"prompt": "waves"}}),
            asynchronous: true,
        })?;
        let task_id = submitted.task_id().unwrap_or_default().to_string();
        assert_eq!(task_id.len(), 8);

        assert_eq!(
            transport.query_task("dryrun", &task_id)?.task_status(),
            Some(TaskStatus::Running)
        );
        let done = transport.query_task("dryrun", &task_id)?;
        assert_eq!(done.task_status(), Some(TaskStatus::Succeeded));
        let video_url = done
            .output
            .and_then(|output| output.video_url)
            .unwrap_or_default();
        let bytes = transport.download(&video_url, Duration::from_secs(1))?;
        assert_eq!(&bytes[4..8], b"ftyp");

        assert_eq!(
            transport.query_task("dryrun", "missing")?.task_status(),
            Some(TaskStatus::Unknown)
        );
        Ok(())
    }
}

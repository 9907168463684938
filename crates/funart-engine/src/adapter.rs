use std::path::PathBuf;
use std::time::Instant;

use funart_contracts::{DispatchKind, GenerationRequest, GenerationResult, GenerationTask, Tensor};
use tracing::info;

use crate::config::{ApiConfig, API_KEY_ENV};
use crate::dispatch::{dispatch_sync, CancelToken, Clock, SystemClock, TaskPoller};
use crate::error::{GenerationError, Result};
use crate::materialize::{materialize_images, materialize_video};
use crate::payload::build_call;
use crate::transport::{HttpTransport, Transport};
use crate::validate::{image_result, video_result};

#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedMedia {
    /// One `[1, H, W, 3]` tensor per result image.
    Images(Vec<Tensor>),
    /// Where the downloaded video was written. Never decoded.
    Video(PathBuf),
}

#[derive(Debug, Clone)]
pub struct GenerationOutput {
    pub media: GeneratedMedia,
    pub result: GenerationResult,
    /// Set for task-based modalities.
    pub task: Option<GenerationTask>,
    pub warnings: Vec<String>,
}

/// Normalize, dispatch, validate and materialize one request.
pub struct GenerationAdapter {
    config: ApiConfig,
    transport: Box<dyn Transport>,
    clock: Box<dyn Clock>,
    cancel: CancelToken,
}

impl GenerationAdapter {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(
            config,
            Box::new(transport),
            Box::new(SystemClock),
        ))
    }

    /// Resolve the credential for this request (explicit key, then environment) and build an adapter.
    pub fn for_request(request: &GenerationRequest) -> Result<Self> {
        Self::new(ApiConfig::resolve(request.api_key.as_deref())?)
    }

    pub fn with_transport(
        config: ApiConfig,
        transport: Box<dyn Transport>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            config,
            transport,
            clock,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// The request's own credential, else the adapter's. Blank means none.
    pub fn credential_for<'a>(&'a self, request: &'a GenerationRequest) -> Result<&'a str> {
        request
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .or_else(|| Some(self.config.api_key().trim()).filter(|key| !key.is_empty()))
            .ok_or_else(|| {
                GenerationError::configuration(format!(
                    "no DashScope API key: pass one explicitly or set {API_KEY_ENV}"
                ))
            })
    }

    pub fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput> {
        let started = Instant::now();
        let profile = request.modality.profile();
        let api_key = self.credential_for(request)?;
        let prepared = build_call(request, self.config.batch_policy)?;
        let transport = self.transport.as_ref();

        let output = match profile.dispatch {
            DispatchKind::Sync => {
                let response = dispatch_sync(transport, api_key, &prepared.call)?;
                let result = image_result(&response)?;
                let frames = materialize_images(
                    transport,
                    &result.result_urls,
                    self.config.image_download_timeout,
                )?;
                GenerationOutput {
                    media: GeneratedMedia::Images(frames),
                    result,
                    task: None,
                    warnings: prepared.warnings,
                }
            }
            DispatchKind::Async => {
                let outcome = TaskPoller::new(transport, self.clock.as_ref(), &self.config)
                    .with_api_key(api_key)
                    .with_cancel(self.cancel.clone())
                    .run(&prepared.call)?;
                let result = video_result(&outcome.task.task_id, &outcome.response)?;
                let url = result.result_urls.first().ok_or_else(|| {
                    GenerationError::empty_result("video task returned no result URL")
                })?;
                let path = materialize_video(
                    transport,
                    url,
                    profile,
                    &self.config.output_dir,
                    self.config.video_download_timeout,
                )?;
                GenerationOutput {
                    media: GeneratedMedia::Video(path),
                    result,
                    task: Some(outcome.task),
                    warnings: prepared.warnings,
                }
            }
        };

        info!(
            modality = %request.modality,
            model = profile.model,
            request_id = output.result.request_id.as_deref().unwrap_or("-"),
            results = output.result.result_urls.len(),
            warnings = output.warnings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation finished"
        );
        Ok(output)
    }
}

use funart_contracts::{
    AudioInput, GenerationRequest, Modality, ModalityProfile, ReferenceImage,
};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::BatchPolicy;
use crate::error::{ApiStage, GenerationError, Result};
use crate::normalize::{
    encode_audio_data_uri, encode_image_data_uri, normalize_seed, require_prompt, resolve_duration,
    resolve_size,
};
use crate::transport::ApiCall;

/// A vendor call built from a request, plus the non-fatal adjustments made on the way.
#[derive(Debug, Clone)]
pub struct PreparedCall {
    pub call: ApiCall,
    pub warnings: Vec<String>,
}

/// Validate and encode a request. Nothing here touches the network.
pub fn build_call(request: &GenerationRequest, policy: BatchPolicy) -> Result<PreparedCall> {
    let profile = request.modality.profile();
    let mut warnings = Vec::new();

    let prompt = require_prompt(&request.prompt)?;
    check_reference_count(profile, request.reference_images.len())?;
    if request.audio.is_some() && !profile.accepts_audio {
        return Err(GenerationError::validation(format!(
            "{} does not take an audio track",
            request.modality
        )));
    }
    let size = resolve_size(profile, &request.size)?;
    let duration = resolve_duration(profile, request.duration_s)?;
    let seed = normalize_seed(request.seed);
    if let (Some(requested), Some(sent)) = (request.seed, seed) {
        if requested != sent {
            warnings.push(format!("seed {requested} folded to {sent}"));
        }
    }

    let mut input = Map::new();
    input.insert("prompt".to_string(), json!(prompt));
    if let Some(negative) = request
        .negative_prompt
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        input.insert("negative_prompt".to_string(), json!(negative));
    }

    let mut images = Vec::with_capacity(request.reference_images.len());
    for image in &request.reference_images {
        images.push(encode_reference(image, policy, &mut warnings)?);
    }
    match request.modality {
        Modality::ImageToImage => {
            input.insert("images".to_string(), json!(images));
        }
        Modality::ImageToVideo => {
            if let Some(first) = images.into_iter().next() {
                input.insert("img_url".to_string(), json!(first));
            }
        }
        Modality::TextToImage | Modality::TextToVideo => {}
    }
    if let Some(audio) = &request.audio {
        input.insert("audio_url".to_string(), json!(encode_audio(audio)?));
    }

    let mut parameters = Map::new();
    if let Some(field) = size {
        parameters.insert(field.key.to_string(), json!(field.value));
    }
    if !request.modality.is_video() {
        parameters.insert("n".to_string(), json!(1));
    }
    if request.modality != Modality::ImageToImage {
        parameters.insert("prompt_extend".to_string(), json!(request.extend_prompt));
    }
    parameters.insert("watermark".to_string(), json!(request.watermark));
    if let Some(seed) = seed {
        parameters.insert("seed".to_string(), json!(seed));
    }
    if let Some(duration) = duration {
        parameters.insert("duration".to_string(), json!(duration));
    }

    let parameters_json = Value::Object(parameters.clone());
    debug!(
        modality = %request.modality,
        model = profile.model,
        parameters = %parameters_json,
        reference_images = request.reference_images.len(),
        audio = request.audio.is_some(),
        "request built"
    );

    let asynchronous = request.modality.is_video();
    Ok(PreparedCall {
        call: ApiCall {
            stage: if asynchronous {
                ApiStage::Submit
            } else {
                ApiStage::Synthesis
            },
            endpoint: profile.endpoint.to_string(),
            payload: json!({
                "model": profile.model,
                "input": Value::Object(input),
                "parameters": Value::Object(parameters),
            }),
            asynchronous,
        },
        warnings,
    })
}

fn check_reference_count(profile: &ModalityProfile, count: usize) -> Result<()> {
    if (profile.min_reference_images..=profile.max_reference_images).contains(&count) {
        return Ok(());
    }
    let expected = match (profile.min_reference_images, profile.max_reference_images) {
        (0, 0) => "no reference images".to_string(),
        (min, max) if min == max => format!("exactly {min} reference image(s)"),
        (min, max) => format!("{min} to {max} reference images"),
    };
    Err(GenerationError::validation(format!(
        "{} takes {expected}, got {count}",
        profile.modality
    )))
}

fn encode_reference(
    image: &ReferenceImage,
    policy: BatchPolicy,
    warnings: &mut Vec<String>,
) -> Result<String> {
    match image {
        ReferenceImage::Pixels(tensor) => {
            if policy == BatchPolicy::FirstFrame && tensor.rank() == 4 && tensor.batch_len(3) > 1 {
                warnings.push(format!(
                    "reference image batch of {} truncated to its first frame",
                    tensor.batch_len(3)
                ));
            }
            encode_image_data_uri(tensor, policy)
        }
        ReferenceImage::Url(url) => passthrough_url(url, "reference image"),
    }
}

fn encode_audio(audio: &AudioInput) -> Result<String> {
    match audio {
        AudioInput::Waveform(clip) => encode_audio_data_uri(clip),
        AudioInput::Url(url) => passthrough_url(url, "audio"),
    }
}

fn passthrough_url(url: &str, what: &str) -> Result<String> {
    let trimmed = url.trim();
    let accepted = ["http://", "https://", "oss://", "data:"]
        .iter()
        .any(|scheme| trimmed.starts_with(scheme));
    if !accepted {
        return Err(GenerationError::validation(format!(
            "{what} URL must be http(s), oss or a data URI, got '{trimmed}'"
        )));
    }
    Ok(trimmed.to_string())
}

use std::io::Cursor;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use funart_contracts::modality::{MAX_ASPECT_RATIO, MIN_ASPECT_RATIO};
use funart_contracts::{AudioClip, ModalityProfile, SizeSpec, Tensor};
use hound::{SampleFormat, WavSpec, WavWriter};
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use tracing::{debug, warn};

use crate::config::BatchPolicy;
use crate::error::{GenerationError, Result};
use crate::materialize::decode_image_bytes;

/// Vendor seeds live in `[0, 2^31)`.
pub const SEED_MODULUS: i64 = 1 << 31;

/// A size value ready for the request body, keyed by the field the vendor expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeField {
    pub key: &'static str,
    pub value: String,
}

pub fn encode_image_data_uri(tensor: &Tensor, policy: BatchPolicy) -> Result<String> {
    let started = Instant::now();
    let frame = single_frame(tensor, policy)?;
    let png = encode_png(&frame)?;
    let encoded = BASE64.encode(&png);
    debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        size_kib = encoded.len() / 1024,
        "encoded reference image"
    );
    Ok(format!("data:image/png;base64,{encoded}"))
}

pub fn encode_audio_data_uri(clip: &AudioClip) -> Result<String> {
    let started = Instant::now();
    let wav = encode_wav(clip)?;
    let encoded = BASE64.encode(&wav);
    debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        size_kib = encoded.len() / 1024,
        "encoded audio clip"
    );
    Ok(format!("data:audio/wav;base64,{encoded}"))
}

/// Split a base64 data URI into its MIME type and decoded bytes.
pub fn split_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let rest = uri
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| GenerationError::Codec("not a data URI".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| GenerationError::Codec("data URI has no payload".to_string()))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| GenerationError::Codec("only base64 data URIs are supported".to_string()))?;
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|err| GenerationError::Codec(format!("data URI base64 decode failed: {err}")))?;
    Ok((mime.to_string(), bytes))
}

pub fn decode_image_data_uri(uri: &str) -> Result<Tensor> {
    let (_, bytes) = split_data_uri(uri)?;
    decode_image_bytes(&bytes)
}

pub fn encode_png(frame: &Tensor) -> Result<Vec<u8>> {
    let image = tensor_to_image(frame)?;
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, ImageFormat::Png)?;
    Ok(cursor.into_inner())
}

/// `[H, W, C]` tensor in `[0, 1]` to an 8-bit image. Alpha is dropped.
pub fn tensor_to_image(frame: &Tensor) -> Result<DynamicImage> {
    let &[height, width, channels] = frame.shape() else {
        return Err(GenerationError::validation(format!(
            "image frame must be [H, W, C], got {:?}",
            frame.shape()
        )));
    };
    if height == 0 || width == 0 {
        return Err(GenerationError::validation("image frame has zero area"));
    }
    let width = u32::try_from(width)
        .map_err(|_| GenerationError::validation("image width exceeds u32"))?;
    let height = u32::try_from(height)
        .map_err(|_| GenerationError::validation("image height exceeds u32"))?;
    let bytes = frame.data().iter().copied().map(quantize).collect::<Vec<u8>>();
    let image = match channels {
        1 => GrayImage::from_raw(width, height, bytes).map(DynamicImage::ImageLuma8),
        3 => RgbImage::from_raw(width, height, bytes).map(DynamicImage::ImageRgb8),
        4 => RgbaImage::from_raw(width, height, bytes)
            .map(|rgba| DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rgba).to_rgb8())),
        other => {
            return Err(GenerationError::validation(format!(
                "image frame must have 1, 3 or 4 channels, got {other}"
            )))
        }
    };
    image.ok_or_else(|| GenerationError::Codec("pixel buffer does not match its shape".to_string()))
}

pub fn encode_wav(clip: &AudioClip) -> Result<Vec<u8>> {
    if clip.sample_rate == 0 {
        return Err(GenerationError::validation("audio sample rate must be positive"));
    }
    let waveform = clip
        .waveform
        .first_of_batch(2)
        .ok_or_else(|| GenerationError::validation("audio batch is empty"))?;
    let &[rows, cols] = waveform.shape() else {
        return Err(GenerationError::validation(format!(
            "audio waveform must be [B, C, S], [C, S] or [S, C], got {:?}",
            clip.waveform.shape()
        )));
    };
    // A short leading axis is the channel axis.
    let channel_first = rows <= 2;
    let (channels, frames) = if channel_first { (rows, cols) } else { (cols, rows) };
    let channels_u16 = u16::try_from(channels)
        .ok()
        .filter(|value| *value > 0)
        .ok_or_else(|| {
            GenerationError::validation(format!("unsupported audio channel count {channels}"))
        })?;

    let spec = WavSpec {
        channels: channels_u16,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let data = waveform.data();
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for frame in 0..frames {
            for channel in 0..channels {
                let value = if channel_first {
                    data[channel * frames + frame]
                } else {
                    data[frame * channels + channel]
                };
                writer.write_sample(pcm16(value))?;
            }
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Map a caller's size request onto the field the vendor expects, or `None` to let the vendor pick.
pub fn resolve_size(profile: &ModalityProfile, size: &SizeSpec) -> Result<Option<SizeField>> {
    match size {
        SizeSpec::Auto => Ok(None),
        SizeSpec::Explicit { width, height } => {
            validate_explicit_size(profile, *width, *height).map(Some)
        }
        SizeSpec::Preset(raw) => {
            let preset = raw.trim();
            if let Some(field) = profile.preset_field {
                if profile.accepts_preset(preset) {
                    return Ok(Some(SizeField {
                        key: field.key(),
                        value: preset.to_string(),
                    }));
                }
                return Err(GenerationError::validation(format!(
                    "{} '{preset}' is not supported by {}; expected one of: {}",
                    field.key(),
                    profile.model,
                    profile.presets.join(", ")
                )));
            }
            let (width, height) = parse_dims(preset).ok_or_else(|| {
                GenerationError::validation(format!(
                    "size '{preset}' is not of the form <width>*<height>"
                ))
            })?;
            validate_explicit_size(profile, width, height).map(Some)
        }
    }
}

fn validate_explicit_size(profile: &ModalityProfile, width: i64, height: i64) -> Result<SizeField> {
    let Some(bounds) = profile.pixel_bounds else {
        return Err(GenerationError::validation(format!(
            "{} does not take explicit sizes; expected one of: {}",
            profile.model,
            profile.presets.join(", ")
        )));
    };
    if width <= 0 || height <= 0 {
        return Err(GenerationError::validation(format!(
            "width and height must be both -1 (auto) or both > 0, got width={width}, height={height}"
        )));
    }
    let total = (width as u64)
        .checked_mul(height as u64)
        .filter(|total| *total <= bounds.max_total)
        .ok_or_else(|| {
            GenerationError::validation(format!(
                "total pixels ({width}*{height}) out of range, must be between {} and {}",
                bounds.min_total, bounds.max_total
            ))
        })?;
    if total < bounds.min_total {
        return Err(GenerationError::validation(format!(
            "total pixels ({width}*{height}={total}) out of range, must be between {} and {}",
            bounds.min_total, bounds.max_total
        )));
    }
    let ratio = width as f64 / height as f64;
    if !(MIN_ASPECT_RATIO..=MAX_ASPECT_RATIO).contains(&ratio) {
        return Err(GenerationError::validation(format!(
            "aspect ratio ({width}:{height} = {ratio:.2}) out of range, must be between 1:4 (0.25) and 4:1 (4.0)"
        )));
    }
    debug!(width, height, total, ratio, "explicit size accepted");
    Ok(SizeField {
        key: "size",
        value: format!("{width}*{height}"),
    })
}

/// Negative means "unset". Anything else is folded into the vendor's range.
pub fn normalize_seed(seed: Option<i64>) -> Option<i64> {
    let seed = seed.filter(|value| *value >= 0)?;
    let folded = seed % SEED_MODULUS;
    if folded != seed {
        warn!(seed, folded, "seed out of vendor range, folded");
    }
    Some(folded)
}

pub fn resolve_duration(profile: &ModalityProfile, requested: Option<u32>) -> Result<Option<u32>> {
    if profile.durations.is_empty() {
        if let Some(seconds) = requested {
            return Err(GenerationError::validation(format!(
                "{} does not take a duration (got {seconds}s)",
                profile.model
            )));
        }
        return Ok(None);
    }
    let seconds = requested
        .or_else(|| profile.default_duration())
        .unwrap_or_default();
    if !profile.accepts_duration(seconds) {
        let allowed = profile
            .durations
            .iter()
            .map(u32::to_string)
            .collect::<Vec<String>>()
            .join(", ");
        return Err(GenerationError::validation(format!(
            "duration {seconds}s is not supported; expected one of: {allowed}"
        )));
    }
    Ok(Some(seconds))
}

pub fn require_prompt(prompt: &str) -> Result<&str> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(GenerationError::configuration("a non-empty prompt is required"));
    }
    Ok(trimmed)
}

fn single_frame(tensor: &Tensor, policy: BatchPolicy) -> Result<Tensor> {
    match tensor.rank() {
        3 => Ok(tensor.clone()),
        4 => {
            let batch = tensor.batch_len(3);
            if batch == 0 {
                return Err(GenerationError::validation("image batch is empty"));
            }
            if batch > 1 {
                match policy {
                    BatchPolicy::Reject => {
                        return Err(GenerationError::validation(format!(
                            "image batch has {batch} frames; only single images are accepted"
                        )))
                    }
                    BatchPolicy::FirstFrame => {
                        warn!(frames = batch, "image batch truncated to its first frame");
                    }
                }
            }
            tensor
                .first_of_batch(3)
                .ok_or_else(|| GenerationError::validation("image batch is empty"))
        }
        _ => Err(GenerationError::validation(format!(
            "image tensor must be [B, H, W, C] or [H, W, C], got {:?}",
            tensor.shape()
        ))),
    }
}

fn parse_dims(raw: &str) -> Option<(i64, i64)> {
    let (width, height) = raw.split_once(['*', 'x', 'X'])?;
    Some((width.trim().parse().ok()?, height.trim().parse().ok()?))
}

fn quantize(value: f32) -> u8 {
    (value * 255.0).clamp(0.0, 255.0) as u8
}

fn pcm16(value: f32) -> i16 {
    (value * 32767.0).clamp(-32768.0, 32767.0) as i16
}

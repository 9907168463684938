use crate::media::{AudioInput, ReferenceImage};
use crate::modality::Modality;

/// Output size requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeSpec {
    /// Let the vendor pick; no size field is sent.
    Auto,
    /// Explicit pixel dimensions, still subject to the modality's bounds table.
    Explicit { width: i64, height: i64 },
    /// One of the modality's enumerated presets (`1280*720`, `1080P`, ...).
    Preset(String),
}

impl SizeSpec {
    /// Host nodes use `-1/-1` as the "auto" sentinel.
    pub fn from_dims(width: i64, height: i64) -> Self {
        if width == -1 && height == -1 {
            return SizeSpec::Auto;
        }
        SizeSpec::Explicit { width, height }
    }

    pub fn preset(value: impl Into<String>) -> Self {
        SizeSpec::Preset(value.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub modality: Modality,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub reference_images: Vec<ReferenceImage>,
    pub audio: Option<AudioInput>,
    pub size: SizeSpec,
    pub duration_s: Option<u32>,
    /// Negative or missing means "let the vendor randomize".
    pub seed: Option<i64>,
    pub extend_prompt: bool,
    pub watermark: bool,
    /// Explicit credential; the environment fallback is applied by the engine.
    pub api_key: Option<String>,
}

impl GenerationRequest {
    pub fn new(modality: Modality, prompt: impl Into<String>) -> Self {
        let profile = modality.profile();
        let size = match (profile.default_preset, modality) {
            (Some(preset), _) => SizeSpec::Preset(preset.to_string()),
            (None, Modality::TextToImage) => SizeSpec::Explicit {
                width: 1280,
                height: 1280,
            },
            (None, _) => SizeSpec::Auto,
        };
        Self {
            modality,
            prompt: prompt.into(),
            negative_prompt: None,
            reference_images: Vec::new(),
            audio: None,
            size,
            duration_s: profile.default_duration(),
            seed: None,
            extend_prompt: true,
            watermark: false,
            api_key: None,
        }
    }

    pub fn text_to_image(prompt: impl Into<String>) -> Self {
        Self::new(Modality::TextToImage, prompt)
    }

    pub fn image_to_image(prompt: impl Into<String>, images: Vec<ReferenceImage>) -> Self {
        Self::new(Modality::ImageToImage, prompt).with_reference_images(images)
    }

    pub fn text_to_video(prompt: impl Into<String>) -> Self {
        Self::new(Modality::TextToVideo, prompt)
    }

    pub fn image_to_video(prompt: impl Into<String>, first_frame: ReferenceImage) -> Self {
        Self::new(Modality::ImageToVideo, prompt).with_reference_images(vec![first_frame])
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = Some(negative_prompt.into());
        self
    }

    pub fn with_reference_images(mut self, images: Vec<ReferenceImage>) -> Self {
        self.reference_images = images;
        self
    }

    pub fn with_audio(mut self, audio: AudioInput) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_size(mut self, size: SizeSpec) -> Self {
        self.size = size;
        self
    }

    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.duration_s = Some(seconds);
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_extend_prompt(mut self, extend_prompt: bool) -> Self {
        self.extend_prompt = extend_prompt;
        self
    }

    pub fn with_watermark(mut self, watermark: bool) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

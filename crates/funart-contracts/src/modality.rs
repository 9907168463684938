use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const MIN_TOTAL_PIXELS: u64 = 768 * 768;
pub const MIN_ASPECT_RATIO: f64 = 0.25;
pub const MAX_ASPECT_RATIO: f64 = 4.0;

const T2V_SIZES: &[&str] = &[
    "832*480",
    "480*832",
    "624*624",
    "1280*720",
    "720*1280",
    "960*960",
    "1088*832",
    "832*1088",
    "1920*1080",
    "1080*1920",
    "1440*1440",
    "1632*1248",
    "1248*1632",
];

const I2V_RESOLUTIONS: &[&str] = &["1080P", "720P", "480P"];

const VIDEO_DURATIONS: &[u32] = &[5, 10];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    TextToImage,
    ImageToImage,
    TextToVideo,
    ImageToVideo,
}

/// How a modality talks to the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    /// One call, result in the same response.
    Sync,
    /// Submit a task, then poll it until a terminal status.
    Async,
}

/// Which request field carries an enumerated preset, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetField {
    Size,
    Resolution,
}

impl PresetField {
    pub fn key(self) -> &'static str {
        match self {
            PresetField::Size => "size",
            PresetField::Resolution => "resolution",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBounds {
    pub min_total: u64,
    pub max_total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModalityProfile {
    pub modality: Modality,
    pub model: &'static str,
    pub endpoint: &'static str,
    pub dispatch: DispatchKind,
    /// Bounds for an explicit width/height pair. `None` means explicit sizes are not accepted.
    pub pixel_bounds: Option<PixelBounds>,
    pub preset_field: Option<PresetField>,
    pub presets: &'static [&'static str],
    pub default_preset: Option<&'static str>,
    pub durations: &'static [u32],
    pub min_reference_images: usize,
    pub max_reference_images: usize,
    pub accepts_audio: bool,
    pub filename_prefix: &'static str,
    pub output_subdir: Option<&'static str>,
}

const PROFILES: [ModalityProfile; 4] = [
    ModalityProfile {
        modality: Modality::TextToImage,
        model: "wan2.5-t2i-preview",
        endpoint: "/services/aigc/text2image/image-synthesis",
        dispatch: DispatchKind::Sync,
        pixel_bounds: Some(PixelBounds {
            min_total: MIN_TOTAL_PIXELS,
            max_total: 1440 * 1440,
        }),
        preset_field: None,
        presets: &[],
        default_preset: None,
        durations: &[],
        min_reference_images: 0,
        max_reference_images: 0,
        accepts_audio: false,
        filename_prefix: "wan_t2i",
        output_subdir: None,
    },
    ModalityProfile {
        modality: Modality::ImageToImage,
        model: "wan2.5-i2i-preview",
        endpoint: "/services/aigc/image2image/image-synthesis",
        dispatch: DispatchKind::Sync,
        pixel_bounds: Some(PixelBounds {
            min_total: MIN_TOTAL_PIXELS,
            max_total: 1280 * 1280,
        }),
        preset_field: None,
        presets: &[],
        default_preset: None,
        durations: &[],
        min_reference_images: 1,
        max_reference_images: 3,
        accepts_audio: false,
        filename_prefix: "wan_i2i",
        output_subdir: None,
    },
    ModalityProfile {
        modality: Modality::TextToVideo,
        model: "wan2.5-t2v-preview",
        endpoint: "/services/aigc/video-generation/video-synthesis",
        dispatch: DispatchKind::Async,
        pixel_bounds: None,
        preset_field: Some(PresetField::Size),
        presets: T2V_SIZES,
        default_preset: Some("1280*720"),
        durations: VIDEO_DURATIONS,
        min_reference_images: 0,
        max_reference_images: 0,
        accepts_audio: true,
        filename_prefix: "wan_t2v",
        output_subdir: Some("temp"),
    },
    ModalityProfile {
        modality: Modality::ImageToVideo,
        model: "wan2.5-i2v-preview",
        endpoint: "/services/aigc/video-generation/video-synthesis",
        dispatch: DispatchKind::Async,
        pixel_bounds: None,
        preset_field: Some(PresetField::Resolution),
        presets: I2V_RESOLUTIONS,
        default_preset: Some("1080P"),
        durations: VIDEO_DURATIONS,
        min_reference_images: 1,
        max_reference_images: 1,
        accepts_audio: true,
        filename_prefix: "wan_i2v",
        output_subdir: None,
    },
];

impl Modality {
    pub fn all() -> [Modality; 4] {
        [
            Modality::TextToImage,
            Modality::ImageToImage,
            Modality::TextToVideo,
            Modality::ImageToVideo,
        ]
    }

    pub fn profile(self) -> &'static ModalityProfile {
        let idx = match self {
            Modality::TextToImage => 0,
            Modality::ImageToImage => 1,
            Modality::TextToVideo => 2,
            Modality::ImageToVideo => 3,
        };
        &PROFILES[idx]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::TextToImage => "t2i",
            Modality::ImageToImage => "i2i",
            Modality::TextToVideo => "t2v",
            Modality::ImageToVideo => "i2v",
        }
    }

    pub fn is_video(self) -> bool {
        self.profile().dispatch == DispatchKind::Async
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "t2i" | "text_to_image" => Ok(Modality::TextToImage),
            "i2i" | "image_to_image" => Ok(Modality::ImageToImage),
            "t2v" | "text_to_video" => Ok(Modality::TextToVideo),
            "i2v" | "image_to_video" => Ok(Modality::ImageToVideo),
            other => Err(format!("Unknown modality '{other}'.")),
        }
    }
}

impl ModalityProfile {
    pub fn accepts_preset(&self, preset: &str) -> bool {
        self.presets.iter().any(|item| *item == preset)
    }

    pub fn accepts_duration(&self, seconds: u32) -> bool {
        self.durations.contains(&seconds)
    }

    pub fn default_duration(&self) -> Option<u32> {
        self.durations.first().copied()
    }
}

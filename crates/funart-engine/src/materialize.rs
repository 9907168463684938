use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use funart_contracts::{ModalityProfile, Tensor};
use image::RgbImage;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::transport::Transport;

/// Decode any supported image container to a `[1, H, W, 3]` tensor in `[0, 1]`.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<Tensor> {
    let decoded = image::load_from_memory(bytes)?;
    rgb_to_tensor(&decoded.to_rgb8())
}

pub fn rgb_to_tensor(image: &RgbImage) -> Result<Tensor> {
    let (width, height) = image.dimensions();
    let data = image
        .as_raw()
        .iter()
        .map(|value| f32::from(*value) / 255.0)
        .collect::<Vec<f32>>();
    Ok(Tensor::new(
        vec![1, height as usize, width as usize, 3],
        data,
    )?)
}

/// Download and decode every result image, in order.
pub fn materialize_images(
    transport: &dyn Transport,
    urls: &[String],
    timeout: Duration,
) -> Result<Vec<Tensor>> {
    let mut frames = Vec::with_capacity(urls.len());
    for url in urls {
        let started = Instant::now();
        let bytes = transport.download(url, timeout)?;
        let frame = decode_image_bytes(&bytes)?;
        debug!(
            url = %url,
            shape = ?frame.shape(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "result image decoded"
        );
        frames.push(frame);
    }
    Ok(frames)
}

/// Download a result video verbatim and return where it was written.
pub fn materialize_video(
    transport: &dyn Transport,
    url: &str,
    profile: &ModalityProfile,
    output_dir: &Path,
    timeout: Duration,
) -> Result<PathBuf> {
    let bytes = transport.download(url, timeout)?;
    let dir = match profile.output_subdir {
        Some(subdir) => output_dir.join(subdir),
        None => output_dir.to_path_buf(),
    };
    fs::create_dir_all(&dir)?;
    let path = dir.join(unique_file_name(profile.filename_prefix, "mp4"));
    fs::write(&path, &bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "video saved");
    Ok(path)
}

/// `<prefix>_<YYYYmmdd_HHMMSS>_<suffix>.<extension>`
pub fn output_file_name(prefix: &str, stamp: DateTime<Local>, suffix: &str, extension: &str) -> String {
    format!("{prefix}_{}_{suffix}.{extension}", stamp.format("%Y%m%d_%H%M%S"))
}

pub fn video_file_name(prefix: &str, stamp: DateTime<Local>, suffix: &str) -> String {
    output_file_name(prefix, stamp, suffix, "mp4")
}

/// A fresh name for this moment with a random 8-hex suffix, so runs never overwrite each other.
pub fn unique_file_name(prefix: &str, extension: &str) -> String {
    output_file_name(prefix, Local::now(), &random_suffix(), extension)
}

fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;
    use std::time::Duration;

    use chrono::{Local, TimeZone};
    use funart_contracts::Modality;
    use image::{ImageFormat, Rgb, RgbImage};

    use super::{
        materialize_images, materialize_video, output_file_name, random_suffix, unique_file_name,
        video_file_name,
    };
    use crate::error::ErrorKind;
    use crate::testing::ScriptedTransport;

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> anyhow::Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        RgbImage::from_pixel(width, height, Rgb(color)).write_to(&mut cursor, ImageFormat::Png)?;
        Ok(cursor.into_inner())
    }

    fn is_video_name(name: &str, prefix: &str) -> bool {
        let Some(rest) = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.strip_suffix(".mp4"))
        else {
            return false;
        };
        let parts = rest.split('_').collect::<Vec<&str>>();
        parts.len() == 3
            && parts[0].len() == 8
            && parts[1].len() == 6
            && parts[0].chars().chain(parts[1].chars()).all(|c| c.is_ascii_digit())
            && parts[2].len() == 8
            && parts[2].chars().all(|c| c.is_ascii_hexdigit())
    }

    #[test]
    fn image_urls_become_single_frame_tensors() -> anyhow::Result<()> {
        let transport = ScriptedTransport::new()
            .with_download("https://cdn.example/a.png", png_bytes(4, 2, [255, 0, 51])?);
        let frames = materialize_images(
            &transport,
            &["https://cdn.example/a.png".to_string()],
            Duration::from_secs(30),
        )?;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].shape(), &[1, 2, 4, 3]);
        assert_eq!(&frames[0].data()[..3], &[1.0, 0.0, 0.2]);
        Ok(())
    }

    #[test]
    fn garbage_image_bytes_are_a_local_error() {
        let transport =
            ScriptedTransport::new().with_download("https://cdn.example/x", b"nope".to_vec());
        let err = materialize_images(
            &transport,
            &["https://cdn.example/x".to_string()],
            Duration::from_secs(30),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Local);
    }

    #[test]
    fn videos_are_written_verbatim_under_the_profile_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let transport = ScriptedTransport::new()
            .with_download("https://cdn.example/v.mp4", b"\x00\x00\x00\x18ftypmp42".to_vec());

        let t2v = materialize_video(
            &transport,
            "https://cdn.example/v.mp4",
            Modality::TextToVideo.profile(),
            dir.path(),
            Duration::from_secs(120),
        )?;
        assert_eq!(t2v.parent(), Some(dir.path().join("temp").as_path()));
        let name = t2v.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        assert!(is_video_name(name, "wan_t2v"), "{name}");
        assert_eq!(fs::read(&t2v)?, b"\x00\x00\x00\x18ftypmp42");

        let i2v = materialize_video(
            &transport,
            "https://cdn.example/v.mp4",
            Modality::ImageToVideo.profile(),
            dir.path(),
            Duration::from_secs(120),
        )?;
        assert_eq!(i2v.parent(), Some(dir.path()));
        Ok(())
    }

    #[test]
    fn failed_download_leaves_no_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let err = materialize_video(
            &ScriptedTransport::new(),
            "https://cdn.example/missing.mp4",
            Modality::ImageToVideo.profile(),
            dir.path(),
            Duration::from_secs(120),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[test]
    fn file_name_layout() {
        let stamp = Local
            .with_ymd_and_hms(2025, 3, 9, 14, 5, 7)
            .single()
            .unwrap_or_else(Local::now);
        let name = video_file_name("wan_i2v", stamp, "0a1b2c3d");
        assert!(is_video_name(&name, "wan_i2v"), "{name}");
        assert_eq!(
            output_file_name("wan_t2i", stamp, "0a1b2c3d", "png"),
            "wan_t2i_20250309_140507_0a1b2c3d.png"
        );
        assert_ne!(random_suffix(), random_suffix());
        assert_ne!(unique_file_name("wan_t2i", "png"), unique_file_name("wan_t2i", "png"));
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use funart_contracts::{
    AudioClip, AudioInput, GenerationRequest, Modality, ReferenceImage, SizeSpec, Tensor,
};
use funart_engine::materialize::{rgb_to_tensor, unique_file_name};
use funart_engine::normalize::encode_png;
use funart_engine::{
    ApiConfig, DryrunTransport, GeneratedMedia, GenerationAdapter, GenerationOutput, SystemClock,
};
use hound::{SampleFormat, WavReader};
use serde_json::{json, Value};
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(name = "funart", version, about = "Wan 2.5 image and video generation on DashScope")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Text to image.
    T2i(TextToImageArgs),
    /// Edit one to three reference images.
    I2i(ImageToImageArgs),
    /// Text to video.
    T2v(TextToVideoArgs),
    /// Animate a first frame.
    I2v(ImageToVideoArgs),
}

#[derive(Debug, Args)]
struct CommonArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    negative_prompt: Option<String>,
    /// Falls back to DASHSCOPE_API_KEY.
    #[arg(long)]
    api_key: Option<String>,
    /// -1 lets the vendor pick.
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    seed: i64,
    #[arg(long)]
    no_prompt_extend: bool,
    #[arg(long)]
    watermark: bool,
    /// Falls back to FUNART_OUTPUT_DIR, then ./output.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Seconds to wait for a video task.
    #[arg(long)]
    poll_timeout: Option<f64>,
    /// Run offline against a deterministic fake vendor.
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Args)]
struct TextToImageArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, default_value_t = 1280, allow_negative_numbers = true)]
    width: i64,
    #[arg(long, default_value_t = 1280, allow_negative_numbers = true)]
    height: i64,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ImageToImageArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    #[arg(long = "image-url")]
    image_urls: Vec<String>,
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    width: i64,
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    height: i64,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct TextToVideoArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long, default_value = "1280*720")]
    size: String,
    #[arg(long, default_value_t = 5)]
    duration: u32,
    #[arg(long)]
    audio: Option<PathBuf>,
    #[arg(long)]
    audio_url: Option<String>,
}

#[derive(Debug, Args)]
struct ImageToVideoArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long)]
    image_url: Option<String>,
    #[arg(long, default_value = "1080P")]
    resolution: String,
    #[arg(long, default_value_t = 5)]
    duration: u32,
    #[arg(long)]
    audio: Option<PathBuf>,
    #[arg(long)]
    audio_url: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("funart error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let summary = execute(cli.command)?;
    println!("{summary}");
    Ok(0)
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn execute(command: Command) -> Result<Value> {
    let (common, request, out) = match command {
        Command::T2i(args) => {
            let request = base_request(Modality::TextToImage, &args.common)
                .with_size(SizeSpec::from_dims(args.width, args.height));
            (args.common, request, args.out)
        }
        Command::I2i(args) => {
            let images = reference_images(&args.images, &args.image_urls)?;
            let request = base_request(Modality::ImageToImage, &args.common)
                .with_reference_images(images)
                .with_size(SizeSpec::from_dims(args.width, args.height));
            (args.common, request, args.out)
        }
        Command::T2v(args) => {
            let mut request = base_request(Modality::TextToVideo, &args.common)
                .with_size(SizeSpec::preset(args.size))
                .with_duration(args.duration);
            if let Some(audio) = audio_input(args.audio.as_deref(), args.audio_url.as_deref())? {
                request = request.with_audio(audio);
            }
            (args.common, request, None)
        }
        Command::I2v(args) => {
            let images = reference_images(
                args.image.as_slice(),
                args.image_url.as_slice(),
            )?;
            let mut request = base_request(Modality::ImageToVideo, &args.common)
                .with_reference_images(images)
                .with_size(SizeSpec::preset(args.resolution))
                .with_duration(args.duration);
            if let Some(audio) = audio_input(args.audio.as_deref(), args.audio_url.as_deref())? {
                request = request.with_audio(audio);
            }
            (args.common, request, None)
        }
    };

    let adapter = build_adapter(&common, &request)?;
    info!(
        modality = %request.modality,
        transport = adapter.transport_name(),
        "starting generation"
    );
    let output = adapter.generate(&request)?;
    let files = write_outputs(&output, request.modality, out.as_deref(), &adapter.config().output_dir)?;
    Ok(summary(request.modality, adapter.transport_name(), &output, &files))
}

fn base_request(modality: Modality, common: &CommonArgs) -> GenerationRequest {
    let mut request = GenerationRequest::new(modality, common.prompt.clone())
        .with_seed(common.seed)
        .with_extend_prompt(!common.no_prompt_extend)
        .with_watermark(common.watermark);
    if let Some(negative) = common.negative_prompt.as_deref() {
        request = request.with_negative_prompt(negative);
    }
    if let Some(api_key) = common.api_key.as_deref() {
        request = request.with_api_key(api_key);
    }
    request
}

fn build_adapter(common: &CommonArgs, request: &GenerationRequest) -> Result<GenerationAdapter> {
    let api_key = if common.dryrun {
        Some(request.api_key.as_deref().unwrap_or("dryrun"))
    } else {
        request.api_key.as_deref()
    };
    let mut config = ApiConfig::resolve(api_key)?;
    if let Some(dir) = &common.output_dir {
        config = config.with_output_dir(dir);
    }
    if let Some(seconds) = common.poll_timeout {
        config = config.with_poll_timeout(seconds);
    }
    debug!(?config, "resolved configuration");
    if common.dryrun {
        return Ok(GenerationAdapter::with_transport(
            config,
            Box::new(DryrunTransport::default()),
            Box::new(SystemClock),
        ));
    }
    Ok(GenerationAdapter::new(config)?)
}

fn reference_images(paths: &[PathBuf], urls: &[String]) -> Result<Vec<ReferenceImage>> {
    let mut images = Vec::with_capacity(paths.len() + urls.len());
    for path in paths {
        images.push(ReferenceImage::Pixels(read_image(path)?));
    }
    images.extend(urls.iter().map(|url| ReferenceImage::Url(url.clone())));
    Ok(images)
}

fn read_image(path: &Path) -> Result<Tensor> {
    let decoded = image::open(path)
        .with_context(|| format!("failed to read image {}", path.display()))?;
    Ok(rgb_to_tensor(&decoded.to_rgb8())?)
}

fn audio_input(path: Option<&Path>, url: Option<&str>) -> Result<Option<AudioInput>> {
    match (path, url) {
        (Some(_), Some(_)) => bail!("pass either --audio or --audio-url, not both"),
        (Some(path), None) => Ok(Some(AudioInput::Waveform(read_wav(path)?))),
        (None, Some(url)) => Ok(Some(AudioInput::Url(url.to_string()))),
        (None, None) => Ok(None),
    }
}

/// Read a WAV file as a channel-first `[C, S]` waveform in `[-1, 1]`.
fn read_wav(path: &Path) -> Result<AudioClip> {
    let mut reader =
        WavReader::open(path).with_context(|| format!("failed to open WAV {}", path.display()))?;
    let spec = reader.spec();
    let interleaved = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()?,
        SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|value| value as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, _>>()?
        }
    };
    let channels = usize::from(spec.channels.max(1));
    let frames = interleaved.len() / channels;
    let mut planar = vec![0.0_f32; channels * frames];
    for (idx, value) in interleaved.iter().take(channels * frames).enumerate() {
        planar[(idx % channels) * frames + idx / channels] = *value;
    }
    Ok(AudioClip {
        waveform: Tensor::new(vec![channels, frames], planar)?,
        sample_rate: spec.sample_rate,
    })
}

fn write_outputs(
    output: &GenerationOutput,
    modality: Modality,
    out: Option<&Path>,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let frames = match &output.media {
        GeneratedMedia::Video(path) => return Ok(vec![path.clone()]),
        GeneratedMedia::Images(frames) => frames,
    };
    let base = match out {
        Some(path) => path.to_path_buf(),
        None => output_dir.join(unique_file_name(modality.profile().filename_prefix, "png")),
    };
    let mut written = Vec::with_capacity(frames.len());
    for (idx, frame) in frames.iter().enumerate() {
        let path = if idx == 0 {
            base.clone()
        } else {
            numbered_path(&base, idx)
        };
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let frame = frame.first_of_batch(3).context("result image batch is empty")?;
        let png = encode_png(&frame)?;
        fs::write(&path, png).with_context(|| format!("failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

fn numbered_path(base: &Path, idx: usize) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("result");
    base.with_file_name(format!("{stem}-{idx:02}.png"))
}

fn summary(modality: Modality, transport: &str, output: &GenerationOutput, files: &[PathBuf]) -> Value {
    json!({
        "modality": modality.as_str(),
        "model": modality.profile().model,
        "transport": transport,
        "request_id": output.result.request_id,
        "task_id": output.task.as_ref().map(|task| task.task_id.clone()),
        "expanded_prompt": output.result.expanded_prompt,
        "result_urls": output.result.result_urls,
        "outputs": files.iter().map(|path| path.display().to_string()).collect::<Vec<String>>(),
        "warnings": output.warnings,
    })
}

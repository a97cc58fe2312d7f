use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use frame_bus::{ChannelId, PipelineConfig, PixelLayout, Rational, StreamGeometry};
use serde::{Deserialize, Serialize};

/// Reads raw planar video from a pipe and turns it into timed frames.
#[derive(Parser, Debug)]
#[command(name = "camfeed", version)]
pub struct Args {
    /// JSON config file; command line flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub width: Option<u32>,
    #[arg(long)]
    pub height: Option<u32>,
    /// nv12, nv21, i420 or gray8
    #[arg(long)]
    pub layout: Option<PixelLayout>,
    /// Nominal frame rate, e.g. 30 or 30000/1001
    #[arg(long)]
    pub fps: Option<Rational>,
    /// fifo:PATH, file:PATH, follow:PATH, tcp://HOST:PORT, unix:PATH or -
    #[arg(long)]
    pub channel: Option<ChannelId>,
    /// Launch ffmpeg to transcode this input into the fifo channel
    #[arg(long, value_name = "URL")]
    pub transcode: Option<String>,
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,
    /// Write a JPEG snapshot every N frames
    #[arg(long, value_name = "N")]
    pub snapshot_every: Option<u64>,
    /// -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_pipeline")]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub transcode: Option<TranscodeConfig>,
    #[serde(default)]
    pub preview: PreviewConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: default_pipeline(),
            transcode: None,
            preview: PreviewConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Anything ffmpeg accepts after `-i`, e.g. `udp://@:8554`.
    pub input: String,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Log throughput every N frames.
    pub stats_every: u64,
    pub snapshot_dir: Option<PathBuf>,
    /// 0 disables snapshots.
    pub snapshot_every: u64,
    pub jpeg_quality: u8,
    /// Frames buffered between the pipeline and the preview task.
    pub queue: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            stats_every: 150,
            snapshot_dir: None,
            snapshot_every: 300,
            jpeg_quality: 85,
            queue: 4,
        }
    }
}

fn default_pipeline() -> PipelineConfig {
    PipelineConfig::new(
        StreamGeometry::default(),
        Rational::from_integer(30),
        ChannelId::Fifo(std::env::temp_dir().join("ffmpeg_pipe")),
    )
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

impl AppConfig {
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(args)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    fn apply(&mut self, args: &Args) -> anyhow::Result<()> {
        let pipeline = &mut self.pipeline;
        if args.width.is_some() || args.height.is_some() || args.layout.is_some() {
            let current = pipeline.geometry;
            pipeline.geometry = StreamGeometry::new(
                args.width.unwrap_or(current.width()),
                args.height.unwrap_or(current.height()),
                args.layout.unwrap_or(current.layout()),
            )?;
        }
        if let Some(fps) = args.fps {
            anyhow::ensure!(fps.is_positive(), "frame rate must be positive, got {}", fps);
            pipeline.frame_rate = fps;
        }
        if let Some(channel) = &args.channel {
            pipeline.channel = channel.clone();
        }
        if let Some(input) = &args.transcode {
            let ffmpeg = self
                .transcode
                .take()
                .map(|t| t.ffmpeg)
                .unwrap_or_else(default_ffmpeg);
            self.transcode = Some(TranscodeConfig {
                input: input.clone(),
                ffmpeg,
            });
        }
        if let Some(dir) = &args.snapshot_dir {
            self.preview.snapshot_dir = Some(dir.clone());
        }
        if let Some(every) = args.snapshot_every {
            self.preview.snapshot_every = every;
        }

        if self.transcode.is_some() {
            anyhow::ensure!(
                self.fifo_path().is_some(),
                "transcoding writes into a named pipe, channel must be fifo:PATH, got {}",
                self.pipeline.channel
            );
        }
        Ok(())
    }

    pub fn fifo_path(&self) -> Option<&Path> {
        match &self.pipeline.channel {
            ChannelId::Fifo(path) => Some(path),
            _ => None,
        }
    }
}

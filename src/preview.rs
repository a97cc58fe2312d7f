use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::Context;
use frame_bus::{FrameStream, PlanarBuffer, TimedFrame};
use futures::StreamExt;
use jpeg_encoder::{ColorType, Encoder};

use crate::config::PreviewConfig;

/// Stand-in renderer: logs throughput and drops a JPEG snapshot now and then.
pub struct Preview {
    config: PreviewConfig,
    window_start: Instant,
    window_frames: u64,
    snapshots: u64,
}

impl Preview {
    pub fn new(config: PreviewConfig) -> Self {
        Self {
            config,
            window_start: Instant::now(),
            window_frames: 0,
            snapshots: 0,
        }
    }

    /// Consumes frames until the run ends. Returns the number of frames seen.
    pub async fn run(mut self, mut frames: FrameStream) -> anyhow::Result<u64> {
        if let Some(dir) = &self.config.snapshot_dir {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }

        let mut seen = 0;
        while let Some(frame) = frames.next().await {
            seen += 1;
            self.log_stats(&frame);
            if let Some(path) = self.snapshot_path(&frame) {
                let quality = self.config.jpeg_quality;
                let buffer = frame.buffer;
                let written = tokio::task::spawn_blocking(move || {
                    write_jpeg(&buffer, &path, quality).map(|_| path)
                })
                .await?;
                match written {
                    Ok(path) => log::info!("preview: snapshot {}", path.display()),
                    Err(e) => log::warn!("preview: snapshot failed: {:#}", e),
                }
            }
        }

        log::info!(
            "preview: stream ended after {} frames, {} snapshots",
            seen,
            self.snapshots
        );
        Ok(seen)
    }

    fn log_stats(&mut self, frame: &TimedFrame) {
        self.window_frames += 1;
        if self.config.stats_every == 0 || self.window_frames < self.config.stats_every {
            return;
        }
        let elapsed = self.window_start.elapsed().as_secs_f64();
        let fps = if elapsed > 0.0 {
            self.window_frames as f64 / elapsed
        } else {
            0.0
        };
        log::info!(
            "preview: {} pts={:.3}s {:.1} fps",
            frame.sequence,
            frame.pts.as_f64(),
            fps
        );
        self.window_start = Instant::now();
        self.window_frames = 0;
    }

    fn snapshot_path(&mut self, frame: &TimedFrame) -> Option<PathBuf> {
        let dir = self.config.snapshot_dir.as_ref()?;
        let every = self.config.snapshot_every;
        if every == 0 || frame.sequence % every != 0 {
            return None;
        }
        self.snapshots += 1;
        Some(dir.join(format!("frame-{:08}.jpg", frame.sequence)))
    }
}

/// Encodes the frame as a baseline JPEG at `path`.
pub fn write_jpeg(buffer: &PlanarBuffer, path: &Path, quality: u8) -> anyhow::Result<()> {
    let width = u16::try_from(buffer.width()).context("frame too wide for JPEG")?;
    let height = u16::try_from(buffer.height()).context("frame too tall for JPEG")?;
    let rgb = buffer.to_rgb();

    let encoder = Encoder::new_file(path, quality)
        .with_context(|| format!("creating {}", path.display()))?;
    encoder
        .encode(&rgb, width, height, ColorType::Rgb)
        .with_context(|| format!("encoding {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_bus::{
        ByteChannel, ChannelId, FrameSink, Pipeline, PipelineConfig, PixelLayout, Rational,
        StreamGeometry, channel::ChannelKind,
    };

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_preview_writes_snapshots() {
        let dir = std::env::temp_dir().join(format!("camfeed-preview-{}", std::process::id()));
        let geometry = StreamGeometry::new(16, 8, PixelLayout::Nv12).unwrap();
        let frame_size = geometry.frame_size();
        let pipeline = Pipeline::new(PipelineConfig::new(
            geometry,
            Rational::from_integer(30),
            ChannelId::Stdin,
        ))
        .unwrap();

        let raw: &'static [u8] = Box::leak(vec![128u8; frame_size * 3].into_boxed_slice());
        let (sink, stream) = FrameSink::channel(2);
        pipeline
            .start_with_channel(ByteChannel::from_reader(raw, ChannelKind::Stream), sink)
            .await
            .unwrap();

        let preview = Preview::new(PreviewConfig {
            stats_every: 1,
            snapshot_dir: Some(dir.clone()),
            snapshot_every: 2,
            ..Default::default()
        });
        let seen = preview.run(stream).await.unwrap();
        pipeline.wait().await.unwrap();

        assert_eq!(seen, 3);
        assert!(dir.join("frame-00000000.jpg").exists());
        assert!(!dir.join("frame-00000001.jpg").exists());
        assert!(dir.join("frame-00000002.jpg").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}

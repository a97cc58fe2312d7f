use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use anyhow::{Context, anyhow};
use frame_bus::PipelineConfig;
use tokio::process::{Child, Command};

use crate::config::TranscodeConfig;

/// Creates a fresh named pipe at `path`, replacing whatever was there.
pub async fn create_fifo(path: &Path) -> anyhow::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("transcoder: removed stale {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("removing {}", path.display())),
    }

    let status = Command::new("mkfifo")
        .arg("-m")
        .arg("644")
        .arg(path)
        .status()
        .await
        .context("running mkfifo")?;
    if !status.success() {
        return Err(anyhow!("mkfifo {} failed: {}", path.display(), status));
    }
    log::info!("transcoder: created fifo {}", path.display());
    Ok(())
}

/// ffmpeg arguments that decode `input` and write raw frames matching `pipeline`
/// into `fifo`.
pub fn ffmpeg_args(input: &str, pipeline: &PipelineConfig, fifo: &Path) -> Vec<String> {
    let geometry = pipeline.geometry;
    let filter = format!(
        "scale={}:{},fps={}",
        geometry.width(),
        geometry.height(),
        pipeline.frame_rate
    );
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.into(),
        "-an".into(),
        "-vf".into(),
        filter,
        "-pix_fmt".into(),
        geometry.layout().ffmpeg_name().into(),
        "-f".into(),
        "rawvideo".into(),
        "-y".into(),
        fifo.display().to_string(),
    ]
}

/// The external ffmpeg process feeding the pipe. Killed, and the pipe
/// removed, when dropped.
pub struct Transcoder {
    child: Child,
    fifo: PathBuf,
}

impl Transcoder {
    pub fn spawn(
        config: &TranscodeConfig,
        pipeline: &PipelineConfig,
        fifo: &Path,
    ) -> anyhow::Result<Self> {
        let args = ffmpeg_args(&config.input, pipeline, fifo);
        log::info!("transcoder: {} {}", config.ffmpeg, args.join(" "));

        let child = Command::new(&config.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", config.ffmpeg))?;

        Ok(Self {
            child,
            fifo: fifo.to_path_buf(),
        })
    }

    pub async fn wait(&mut self) -> anyhow::Result<ExitStatus> {
        self.child.wait().await.context("waiting for ffmpeg")
    }

    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        if self.child.try_wait()?.is_none() {
            log::info!("transcoder: stopping ffmpeg");
            self.child.kill().await.context("killing ffmpeg")?;
        }
        Ok(())
    }
}

impl Drop for Transcoder {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
        if let Err(e) = std::fs::remove_file(&self.fifo) {
            log::warn!("transcoder: could not remove {}: {}", self.fifo.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_bus::{ChannelId, PixelLayout, Rational, StreamGeometry};

    #[test]
    fn test_ffmpeg_args_match_pipeline() {
        let geometry = StreamGeometry::new(640, 360, PixelLayout::I420).unwrap();
        let fifo = Path::new("/tmp/ffmpeg_pipe");
        let pipeline = PipelineConfig::new(
            geometry,
            Rational::new(30000, 1001).unwrap(),
            ChannelId::Fifo(fifo.into()),
        );

        let args = ffmpeg_args("udp://@:8554", &pipeline, fifo);
        let joined = args.join(" ");
        assert!(joined.contains("-i udp://@:8554"));
        assert!(joined.contains("-vf scale=640:360,fps=30000/1001"));
        assert!(joined.contains("-pix_fmt yuv420p -f rawvideo"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/ffmpeg_pipe"));
    }
}

use std::{process::ExitStatus, time::Duration};

use anyhow::Context;
use clap::Parser;
use frame_bus::{FrameSink, Pipeline, RunOutcome};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{AppConfig, Args},
    preview::Preview,
    transcoder::Transcoder,
};

mod config;
mod preview;
mod transcoder;

/// How long a run may keep going after ffmpeg has exited before it is stopped.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .filter_module("camfeed", level)
        .filter_module("frame_bus", level)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    let config = AppConfig::load(&args)?;

    let pipeline = Pipeline::new(config.pipeline.clone()).context("creating pipeline")?;
    if let Some(fifo) = config.fifo_path() {
        // a transcode of our own always gets a fresh pipe
        if config.transcode.is_some() || !fifo.exists() {
            transcoder::create_fifo(fifo).await?;
        }
    }

    let (sink, frames) = FrameSink::channel(config.preview.queue);
    let preview = tokio::spawn(Preview::new(config.preview.clone()).run(frames));
    pipeline.start(sink).await.context("starting pipeline")?;

    let mut transcoder = match (&config.transcode, config.fifo_path()) {
        (Some(transcode), Some(fifo)) => Some(Transcoder::spawn(transcode, &config.pipeline, fifo)?),
        _ => None,
    };

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupted, shutting down");
        }
        cancel_clone.cancel();
    });

    let outcome = tokio::select! {
        _ = cancel.cancelled() => stop_or_collect(&pipeline).await,
        outcome = pipeline.wait() => outcome,
        status = transcoder_exit(&mut transcoder) => {
            match status {
                Ok(status) => log::info!("ffmpeg exited: {}", status),
                Err(e) => log::error!("ffmpeg: {:#}", e),
            }
            match tokio::time::timeout(DRAIN_TIMEOUT, pipeline.wait()).await {
                Ok(outcome) => outcome,
                Err(_) => stop_or_collect(&pipeline).await,
            }
        }
    };

    if let Some(transcoder) = transcoder {
        transcoder.shutdown().await?;
    }
    let frames = preview.await.context("preview task")??;
    log::info!("camfeed: {} frames previewed", frames);

    match outcome {
        Some(RunOutcome::Failed { error, .. }) => Err(error).context("pipeline failed"),
        Some(outcome) => {
            log::info!("camfeed: {}", outcome);
            Ok(())
        }
        None => Ok(()),
    }
}

/// Stops the run, or collects its outcome if it already ended on its own.
async fn stop_or_collect(pipeline: &Pipeline) -> Option<RunOutcome> {
    match pipeline.stop().await {
        Ok(outcome) => Some(outcome),
        Err(_) => pipeline.wait().await,
    }
}

async fn transcoder_exit(transcoder: &mut Option<Transcoder>) -> anyhow::Result<ExitStatus> {
    match transcoder {
        Some(transcoder) => transcoder.wait().await,
        None => std::future::pending().await,
    }
}

use std::sync::Arc;

use ffmpeg_vdec::{
    backend::FfmpegBackend, config::ChannelConfig, orchestrator::PipelineOrchestrator,
    sink::ChannelSink,
};
use tokio_util::sync::CancellationToken;

mod config;
mod consumer;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_vdec", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    ffmpeg_vdec::init()?;
    let app = config::config();

    let options = config::channel_options(std::env::args().skip(1), app)?;
    let channels = ChannelConfig::from_options(&options)?;

    let cancel = CancellationToken::new();
    let (sink, rx) = ChannelSink::new(app.sink_capacity());
    let consumer = tokio::spawn(consumer::consume(
        rx,
        app.output_dir().map(|dir| dir.to_path_buf()),
        cancel.clone(),
    ));

    let orchestrator =
        PipelineOrchestrator::new(channels, Arc::new(FfmpegBackend::new()), Arc::new(sink));
    let run = tokio::task::spawn_blocking(move || orchestrator.run());

    let summary = tokio::select! {
        summary = run => summary?,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            log::warn!("interrupted, exit");
            std::process::exit(130);
        },
    };

    let handled = consumer.await??;
    log::info!("consumer handled {} image(s)", handled);

    if let Some(error) = summary.verification_error {
        return Err(error.into());
    }
    Ok(())
}

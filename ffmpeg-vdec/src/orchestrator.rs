//! Runs every configured channel and emits the finished sentinel.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::{
    backend::Backend,
    callback::{ChannelContext, DecodeCallbackHandler},
    config::{ChannelConfig, ChannelId},
    error::{Error, Result},
    keyframe::KeyFrameSelector,
    pipeline::{ChannelPipeline, PipelineReport, PipelineState, verify_source},
    policy::DecodePolicy,
    queue::FrameQueue,
    sink::{Dispatcher, ImageSink},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Set when the pre-flight check failed and no pipeline was started.
    pub verification_error: Option<Error>,
    pub reports: Vec<PipelineReport>,
    pub sentinel_delivered: bool,
}

impl RunSummary {
    pub fn report(&self, channel: ChannelId) -> Option<&PipelineReport> {
        self.reports.iter().find(|report| report.channel == channel)
    }

    pub fn images_dispatched(&self) -> u64 {
        self.reports.iter().map(|report| report.images_dispatched).sum()
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.verification_error {
            Some(error) => write!(f, "verification failed: {}", error)?,
            None => write!(
                f,
                "{} channel(s), {} image(s) dispatched",
                self.reports.len(),
                self.images_dispatched()
            )?,
        }
        write!(f, ", finished sent: {}", self.sentinel_delivered)
    }
}

pub struct PipelineOrchestrator {
    config: ChannelConfig,
    backend: Arc<dyn Backend>,
    handler: Arc<DecodeCallbackHandler>,
    dispatcher: Dispatcher,
    contexts: Vec<Arc<ChannelContext>>,
}

impl PipelineOrchestrator {
    pub fn new(config: ChannelConfig, backend: Arc<dyn Backend>, sink: Arc<dyn ImageSink>) -> Self {
        Self::with_policy(config, backend, sink, DecodePolicy::default())
    }

    pub fn with_policy(
        config: ChannelConfig,
        backend: Arc<dyn Backend>,
        sink: Arc<dyn ImageSink>,
        policy: DecodePolicy,
    ) -> Self {
        // frame counters live here so they keep counting across runs
        let contexts = config
            .channels()
            .map(|(channel, address)| {
                Arc::new(ChannelContext::new(
                    channel,
                    address,
                    KeyFrameSelector::new(policy.key_frame_interval),
                    FrameQueue::new(policy.queue_capacity),
                ))
            })
            .collect();
        let handler = Arc::new(DecodeCallbackHandler::new(
            backend.post_processor(),
            policy.push_retry,
        ));
        Self {
            dispatcher: Dispatcher::new(sink, policy.sink_retry_pause),
            config,
            backend,
            handler,
            contexts,
        }
    }

    pub fn context(&self, channel: ChannelId) -> Option<&ChannelContext> {
        self.contexts
            .iter()
            .find(|context| context.channel() == channel)
            .map(Arc::as_ref)
    }

    /// Checks every configured source. Fails on the first channel that
    /// cannot be opened or has no supported video stream.
    pub fn verify(&self) -> Result<()> {
        for (channel, address) in self.config.channels() {
            verify_source(self.backend.as_ref(), address).inspect_err(|e| {
                log::error!("{} verification failed: {}", channel, e);
            })?;
        }
        Ok(())
    }

    /// Runs all channels to completion. The finished sentinel is sent exactly
    /// once, whatever happened to the channels.
    pub fn run(&self) -> RunSummary {
        let (verification_error, reports) = match self.verify() {
            Ok(()) => (None, self.run_pipelines()),
            Err(e) => (Some(e), Vec::new()),
        };

        let sentinel_delivered = self.dispatcher.send_finished();
        let summary = RunSummary {
            verification_error,
            reports,
            sentinel_delivered,
        };
        log::info!("decode run finished: {}", summary);
        summary
    }

    fn pipeline(&self, context: &Arc<ChannelContext>) -> Option<ChannelPipeline> {
        let channel = context.channel();
        let address = self.config.source(channel)?.clone();
        Some(ChannelPipeline::new(
            channel,
            address,
            Arc::clone(&self.backend),
            Arc::clone(context),
            Arc::clone(&self.handler),
            self.dispatcher.clone(),
        ))
    }

    fn run_pipelines(&self) -> Vec<PipelineReport> {
        let mut pipelines: Vec<ChannelPipeline> =
            self.contexts.iter().filter_map(|c| self.pipeline(c)).collect();

        if pipelines.len() == 1 {
            return pipelines.drain(..).map(ChannelPipeline::run).collect();
        }

        std::thread::scope(|s| {
            let handles: Vec<_> = pipelines
                .into_iter()
                .map(|pipeline| {
                    let channel = pipeline.channel();
                    let handle = std::thread::Builder::new()
                        .name(format!("handle_channel{}", channel.number()))
                        .spawn_scoped(s, move || pipeline.run());
                    (channel, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(channel, handle)| {
                    let failed = |reason: String| {
                        log::error!("{} {}", channel, reason);
                        let mut report = PipelineReport::new(channel);
                        report.state = PipelineState::Closed;
                        report.states.push(PipelineState::Closed);
                        report.error = Some(Error::Thread(reason));
                        report
                    };
                    match handle {
                        Ok(handle) => handle
                            .join()
                            .unwrap_or_else(|_| failed("pipeline thread panicked".to_string())),
                        Err(e) => failed(format!("create pipeline thread failed: {}", e)),
                    }
                })
                .collect()
        })
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod orchestrator_test;

//! Response orchestration
//!
//! Tokens are echoed as they arrive and cut into segments. Segments go to a
//! render task, which hands artifacts to a playback task through a bounded
//! queue: the next segment renders while the current one plays, and playback
//! stays strictly in segment order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::display::DisplaySink;
use crate::generation::TokenSource;
use crate::playback::Player;
use crate::render::{AudioArtifact, Renderer};
use crate::segmenter::{Segment, TextSegmenter};
use crate::utterance::Utterance;
use crate::Error;

/// Rendered artifacts allowed to wait for playback
const RENDER_AHEAD: usize = 1;

/// What happened while answering one utterance
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResponseReport {
    /// Segments produced by the segmenter
    pub segments: usize,

    /// Segments that produced audio
    pub rendered: usize,

    /// Artifacts played without error
    pub played: usize,

    /// Whether the generation stream ended in an error
    pub stream_failed: bool,
}

/// Drives one response from prompt to played audio
pub struct ResponseOrchestrator {
    source: Arc<dyn TokenSource>,
    renderer: Arc<dyn Renderer>,
    player: Arc<dyn Player>,
    display: Arc<dyn DisplaySink>,
    bot_name: String,
    max_chars: Option<usize>,
}

impl ResponseOrchestrator {
    /// Create an orchestrator over its collaborators
    #[must_use]
    pub fn new(
        source: Arc<dyn TokenSource>,
        renderer: Arc<dyn Renderer>,
        player: Arc<dyn Player>,
        display: Arc<dyn DisplaySink>,
        bot_name: impl Into<String>,
    ) -> Self {
        Self {
            source,
            renderer,
            player,
            display,
            bot_name: bot_name.into(),
            max_chars: None,
        }
    }

    /// Close long unterminated segments at the next word boundary
    #[must_use]
    pub const fn with_max_chars(mut self, max_chars: Option<usize>) -> Self {
        self.max_chars = max_chars;
        self
    }

    /// Answer one utterance, returning once the last segment has played
    ///
    /// Stream errors are reported to the display and end the response early;
    /// segments already queued still render and play.
    pub async fn handle(&self, utterance: &Utterance) -> ResponseReport {
        tracing::info!(origin = ?utterance.origin, prompt = %utterance.text, "handling utterance");

        let mut pipeline = Pipeline::start(Arc::clone(&self.renderer), Arc::clone(&self.player));
        let mut segmenter = TextSegmenter::with_max_chars(self.max_chars);

        self.display.begin(&self.bot_name);
        let stream_failed = self
            .stream_into(&utterance.text, &mut segmenter, &mut pipeline)
            .await;
        self.display.end();

        let mut report = pipeline.finish().await;
        report.stream_failed = stream_failed;

        tracing::info!(
            segments = report.segments,
            rendered = report.rendered,
            played = report.played,
            stream_failed,
            "response complete"
        );

        report
    }

    /// Speak fixed text without the generation service
    pub async fn speak(&self, text: &str) -> ResponseReport {
        let mut pipeline = Pipeline::start(Arc::clone(&self.renderer), Arc::clone(&self.player));
        let mut segmenter = TextSegmenter::with_max_chars(self.max_chars);

        for word in text.split_inclusive(char::is_whitespace) {
            for segment in segmenter.feed(word) {
                pipeline.queue(segment);
            }
        }
        if let Some(segment) = segmenter.flush() {
            pipeline.queue(segment);
        }

        pipeline.finish().await
    }

    /// Stream tokens into the pipeline, returning whether the stream failed
    async fn stream_into(
        &self,
        prompt: &str,
        segmenter: &mut TextSegmenter,
        pipeline: &mut Pipeline,
    ) -> bool {
        let mut stream = match self.source.stream(prompt).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "failed to start generation");
                self.display.error(&e);
                return true;
            }
        };

        let mut failed = false;

        while let Some(event) = stream.next_event().await {
            match event {
                Ok(event) => {
                    if !event.text.is_empty() {
                        self.display.token(&event.text);
                        for segment in segmenter.feed(&event.text) {
                            pipeline.queue(segment);
                        }
                    }
                    if event.done {
                        break;
                    }
                }
                Err(e @ Error::TruncatedStream) => {
                    // Every token received was whole, so the residual is kept
                    tracing::warn!(error = %e, "generation stream truncated");
                    self.display.error(&e);
                    failed = true;
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, pending = segmenter.pending().len(), "generation stream failed, dropping residual");
                    self.display.error(&e);
                    return true;
                }
            }
        }

        if let Some(segment) = segmenter.flush() {
            pipeline.queue(segment);
        }

        failed
    }
}

/// Render and playback tasks for one response
struct Pipeline {
    segments: mpsc::UnboundedSender<Segment>,
    render: JoinHandle<usize>,
    playback: JoinHandle<usize>,
    queued: usize,
}

impl Pipeline {
    fn start(renderer: Arc<dyn Renderer>, player: Arc<dyn Player>) -> Self {
        let (segments, segment_rx) = mpsc::unbounded_channel();
        let (artifact_tx, artifact_rx) = mpsc::channel(RENDER_AHEAD);

        Self {
            segments,
            render: tokio::spawn(run_render_stage(renderer, segment_rx, artifact_tx)),
            playback: tokio::spawn(run_playback_stage(player, artifact_rx)),
            queued: 0,
        }
    }

    fn queue(&mut self, segment: Segment) {
        tracing::debug!(segment = segment.index, text = %segment.text, "segment queued");

        if self.segments.send(segment).is_err() {
            tracing::error!("render stage stopped, segment dropped");
            return;
        }
        self.queued += 1;
    }

    /// Wait for every queued segment to play
    async fn finish(self) -> ResponseReport {
        drop(self.segments);

        let rendered = self.render.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "render stage panicked");
            0
        });
        let played = self.playback.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "playback stage panicked");
            0
        });

        ResponseReport {
            segments: self.queued,
            rendered,
            played,
            stream_failed: false,
        }
    }
}

async fn run_render_stage(
    renderer: Arc<dyn Renderer>,
    mut rx: mpsc::UnboundedReceiver<Segment>,
    tx: mpsc::Sender<AudioArtifact>,
) -> usize {
    let mut rendered = 0;

    while let Some(segment) = rx.recv().await {
        match renderer.render(&segment).await {
            Ok(artifact) => {
                rendered += 1;
                if let Err(mpsc::error::SendError(artifact)) = tx.send(artifact).await {
                    tracing::error!("playback stage stopped");
                    artifact.discard();
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(segment = segment.index, error = %e, "segment skipped");
            }
        }
    }

    rendered
}

async fn run_playback_stage(
    player: Arc<dyn Player>,
    mut rx: mpsc::Receiver<AudioArtifact>,
) -> usize {
    let mut played = 0;

    while let Some(artifact) = rx.recv().await {
        match player.play(&artifact).await {
            Ok(()) => played += 1,
            Err(e) => {
                tracing::warn!(path = %artifact.path.display(), error = %e, "playback failed");
            }
        }
        artifact.discard();
    }

    played
}

//! Strictly sequential narration driver.
//!
//! One synthesis request is in flight at a time. Segment *n+1* is requested
//! only after segment *n*'s audio has drained from the render sink.
//!
//! Synthesis and drain callbacks never touch the pipeline directly: they post
//! a [`PipelineEvent`] tagged with the run and segment they belong to, and the
//! owner of the pipeline feeds those back through [`NarrationPipeline::handle_event`]
//! on its control sequence. Events from a stopped run are ignored.

use crate::audio::render::RenderSink;
use crate::config::{NarrationConfig, SegmentFailurePolicy};
use crate::error::Result;
use crate::narration::segmenter::split_segments;
use crate::tts::client::SpeechSynthesizer;
use crate::tts::session::SynthesisHandle;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// What happened to a segment.
#[derive(Debug)]
pub enum SegmentSignal {
    Audio(Vec<u8>),
    Synthesized(Result<()>),
    Drained,
}

/// Signal posted back to the control sequence.
#[derive(Debug)]
pub struct PipelineEvent {
    pub run: u64,
    pub segment: usize,
    pub signal: SegmentSignal,
}

/// Counts reported when a narration finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NarrationSummary {
    pub segments: usize,
    pub completed: usize,
    pub failed: usize,
    pub aborted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Synthesizing,
    Draining,
}

struct ActiveRun {
    queue: VecDeque<String>,
    segment: usize,
    phase: Phase,
    request: Option<SynthesisHandle>,
    sink_ready: bool,
    abort_after_drain: bool,
    summary: NarrationSummary,
}

pub struct NarrationPipeline {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Box<dyn RenderSink>,
    events: mpsc::UnboundedSender<PipelineEvent>,
    max_segment_chars: usize,
    on_failure: SegmentFailurePolicy,
    run: u64,
    active: Option<ActiveRun>,
}

impl NarrationPipeline {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Box<dyn RenderSink>,
        events: mpsc::UnboundedSender<PipelineEvent>,
        config: &NarrationConfig,
    ) -> Self {
        Self {
            synthesizer,
            sink,
            events,
            max_segment_chars: config.max_segment_chars,
            on_failure: config.on_segment_failure,
            run: 0,
            active: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Id of the current run. Events carrying another id are stale.
    pub fn run_id(&self) -> u64 {
        self.run
    }

    /// Zero-based index of the segment being processed.
    pub fn current_segment(&self) -> Option<usize> {
        self.active.as_ref().map(|run| run.segment)
    }

    /// Begin narrating `text`, replacing any narration in progress.
    ///
    /// Returns the summary right away when the text yields no segments.
    pub fn start(&mut self, text: &str) -> Option<NarrationSummary> {
        self.stop();

        let segments = split_segments(text, self.max_segment_chars);
        if segments.is_empty() {
            debug!("narration text produced no segments");
            return Some(NarrationSummary::default());
        }
        info!(segments = segments.len(), run = self.run, "narration started");

        let sink_ready = self.start_sink();
        let total = segments.len();
        self.active = Some(ActiveRun {
            queue: segments.into(),
            segment: 0,
            phase: Phase::Synthesizing,
            request: None,
            sink_ready,
            abort_after_drain: false,
            summary: NarrationSummary {
                segments: total,
                ..NarrationSummary::default()
            },
        });
        self.request_next_segment(true)
    }

    /// Close the in-flight request, drop remaining segments, silence the sink.
    /// Idempotent.
    pub fn stop(&mut self) {
        if let Some(run) = self.active.take() {
            if let Some(request) = run.request {
                request.close();
            }
            info!(
                segment = run.segment + 1,
                of = run.summary.segments,
                "narration stopped"
            );
        }
        self.sink.stop();
        self.run += 1;
    }

    /// Apply one posted event. Returns the summary when the narration finished.
    pub fn handle_event(&mut self, event: PipelineEvent) -> Option<NarrationSummary> {
        let run_id = self.run;
        let on_failure = self.on_failure;
        let active = self.active.as_mut()?;
        if event.run != run_id || event.segment != active.segment {
            debug!(run = event.run, segment = event.segment, "ignoring stale pipeline event");
            return None;
        }

        match event.signal {
            SegmentSignal::Audio(chunk) => {
                if active.phase == Phase::Synthesizing && active.sink_ready {
                    self.sink.schedule_audio(chunk, None);
                }
                None
            }
            SegmentSignal::Synthesized(result) => {
                if active.phase != Phase::Synthesizing {
                    return None;
                }
                active.request = None;
                active.phase = Phase::Draining;
                match result {
                    Ok(()) => active.summary.completed += 1,
                    Err(e) => {
                        active.summary.failed += 1;
                        warn!(segment = active.segment + 1, error = %e, "segment synthesis failed");
                        if on_failure == SegmentFailurePolicy::Abort {
                            active.abort_after_drain = true;
                        }
                    }
                }

                if active.sink_ready {
                    let events = self.events.clone();
                    let segment = active.segment;
                    self.sink.schedule_audio(
                        Vec::new(),
                        Some(Box::new(move || {
                            post(&events, run_id, segment, SegmentSignal::Drained);
                        })),
                    );
                    None
                } else {
                    self.segment_drained()
                }
            }
            SegmentSignal::Drained => {
                if active.phase != Phase::Draining {
                    return None;
                }
                self.segment_drained()
            }
        }
    }

    fn segment_drained(&mut self) -> Option<NarrationSummary> {
        let active = self.active.as_mut()?;
        debug!(segment = active.segment + 1, "segment drained");
        if active.abort_after_drain {
            active.summary.aborted = true;
            return self.finish();
        }
        active.segment += 1;
        self.request_next_segment(false)
    }

    fn request_next_segment(&mut self, first: bool) -> Option<NarrationSummary> {
        let needs_sink = self
            .active
            .as_ref()
            .is_some_and(|run| !run.sink_ready && !first);
        let retried = needs_sink && self.start_sink();

        let run_id = self.run;
        let active = self.active.as_mut()?;
        if retried {
            active.sink_ready = true;
        }
        let Some(text) = active.queue.pop_front() else {
            return self.finish();
        };

        let segment = active.segment;
        info!(
            segment = segment + 1,
            of = active.summary.segments,
            chars = text.chars().count(),
            "synthesizing segment"
        );
        active.phase = Phase::Synthesizing;

        let audio_events = self.events.clone();
        let done_events = self.events.clone();
        let request = self.synthesizer.synthesize(
            text,
            Box::new(move |chunk| {
                post(&audio_events, run_id, segment, SegmentSignal::Audio(chunk));
            }),
            Box::new(move |result| {
                post(&done_events, run_id, segment, SegmentSignal::Synthesized(result));
            }),
        );
        if let Some(active) = self.active.as_mut() {
            active.request = Some(request);
        }
        None
    }

    fn finish(&mut self) -> Option<NarrationSummary> {
        let run = self.active.take()?;
        self.sink.stop();
        self.run += 1;
        info!(
            completed = run.summary.completed,
            failed = run.summary.failed,
            aborted = run.summary.aborted,
            "narration finished"
        );
        Some(run.summary)
    }

    fn start_sink(&mut self) -> bool {
        match self.sink.start() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "audio output unavailable, segment playback skipped");
                false
            }
        }
    }

    /// Narrate `text` and wait for it to finish, pumping `events` in place
    /// of an outer control loop.
    pub async fn run_to_completion(
        &mut self,
        text: &str,
        events: &mut mpsc::UnboundedReceiver<PipelineEvent>,
    ) -> NarrationSummary {
        if let Some(summary) = self.start(text) {
            return summary;
        }
        while let Some(event) = events.recv().await {
            if let Some(summary) = self.handle_event(event) {
                return summary;
            }
        }
        self.stop();
        NarrationSummary::default()
    }
}

fn post(
    events: &mpsc::UnboundedSender<PipelineEvent>,
    run: u64,
    segment: usize,
    signal: SegmentSignal,
) {
    if events
        .send(PipelineEvent {
            run,
            segment,
            signal,
        })
        .is_err()
    {
        debug!(run, segment, "pipeline event dropped, control loop gone");
    }
}

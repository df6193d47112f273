//! Control sequence for one listening session.
//!
//! A single tokio task owns the state machine, the narration pipeline and
//! every collaborator. Host commands, activity events, pipeline signals and
//! story results all arrive as messages on that task, so no two of them can
//! interleave while state is being changed.

use crate::activity::{ActivityEvent, ActivityEventSource};
use crate::audio::ambient::AmbientSoundController;
use crate::audio::render::RenderSink;
use crate::config::NarrationConfig;
use crate::error::Result;
use crate::narration::pipeline::{NarrationPipeline, NarrationSummary, PipelineEvent};
use crate::session::routing::{AudioRoute, RouteController};
use crate::session::state::{SessionEffects, SessionStateMachine, SleepEvent, SleepState};
use crate::story::StoryTextProvider;
use crate::tts::client::SpeechSynthesizer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Snapshot published after every change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SleepState,
    pub listening: bool,
    pub running: bool,
    /// Summary of the most recently finished narration.
    pub last_narration: Option<NarrationSummary>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SleepState::Guiding,
            listening: false,
            running: false,
            last_narration: None,
        }
    }
}

/// Components the session drives.
pub struct SessionParts {
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub sink: Box<dyn RenderSink>,
    pub ambient: AmbientSoundController,
    pub routes: Box<dyn RouteController>,
    pub story: Arc<dyn StoryTextProvider>,
    pub activity: Box<dyn ActivityEventSource>,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub narration: NarrationConfig,
    /// Delay before ambient sound resumes after the activity engine starts.
    pub ambient_restart_delay: Duration,
    /// Hint used until the listener has said something.
    pub initial_hint: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            narration: NarrationConfig::default(),
            ambient_restart_delay: Duration::from_millis(
                crate::defaults::AMBIENT_RESTART_DELAY_MS,
            ),
            initial_hint: String::new(),
        }
    }
}

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    Activity(ActivityEvent),
    Shutdown(oneshot::Sender<()>),
}

enum Internal {
    StoryReady { generation: u64, result: Result<String> },
    AmbientRestart { epoch: u64 },
}

/// Host-facing handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    /// Activate routing, resume ambient sound, start listening for activity.
    pub fn start(&self) {
        self.send(Command::Start);
    }

    /// Stop listening, narration and ambient sound.
    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// Map a host activation change onto `start` / `stop`.
    pub fn handle_activation(&self, active: bool) {
        if active { self.start() } else { self.stop() }
    }

    /// Inject an activity event as if the activity source produced it.
    pub fn send_activity(&self, event: ActivityEvent) {
        self.send(Command::Activity(event));
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Stop everything and wait for the control task to exit.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() && rx.await.is_err() {
            debug!("session task ended before acknowledging shutdown");
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("session task is gone, command dropped");
        }
    }
}

/// Spawn the control task.
pub fn spawn_session(
    parts: SessionParts,
    options: SessionOptions,
) -> (SessionHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (activity_tx, activity_rx) = mpsc::unbounded_channel();
    let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(SessionStatus::default());

    let pipeline = NarrationPipeline::new(
        parts.synthesizer,
        parts.sink,
        pipeline_tx,
        &options.narration,
    );
    let actor = SessionActor {
        machine: SessionStateMachine::new(),
        effects: Collaborators {
            pipeline,
            ambient: parts.ambient,
            routes: parts.routes,
            story: parts.story,
            internal: internal_tx,
            hint: options.initial_hint,
            story_generation: 0,
        },
        activity: parts.activity,
        activity_tx,
        status: status_tx,
        listening: false,
        running: false,
        last_narration: None,
        ambient_epoch: 0,
        restart_delay: options.ambient_restart_delay,
    };

    let task = tokio::spawn(actor.run(command_rx, activity_rx, pipeline_rx, internal_rx));
    (
        SessionHandle {
            commands: command_tx,
            status: status_rx,
        },
        task,
    )
}

/// Everything the state machine's effects reach.
struct Collaborators {
    pipeline: NarrationPipeline,
    ambient: AmbientSoundController,
    routes: Box<dyn RouteController>,
    story: Arc<dyn StoryTextProvider>,
    internal: mpsc::UnboundedSender<Internal>,
    hint: String,
    story_generation: u64,
}

impl SessionEffects for Collaborators {
    fn activate_route(&mut self, route: AudioRoute) {
        if let Err(e) = self.routes.activate(route) {
            warn!(%route, error = %e, "audio route change failed");
        }
    }

    fn resume_ambient(&mut self) {
        self.ambient.resume_baseline();
    }

    fn start_narration(&mut self) {
        // PlaybackEnded from the activity source leaves the previous pipeline
        // running; its completion must not end this narration.
        self.pipeline.stop();
        self.story_generation += 1;
        let generation = self.story_generation;
        let story = Arc::clone(&self.story);
        let hint = self.hint.clone();
        let internal = self.internal.clone();
        debug!(generation, %hint, "requesting story");

        tokio::spawn(async move {
            let result = story.generate(&hint).await;
            if internal
                .send(Internal::StoryReady { generation, result })
                .is_err()
            {
                debug!(generation, "story finished after session ended");
            }
        });
    }

    fn stop_narration(&mut self) {
        self.story_generation += 1;
        self.pipeline.stop();
    }
}

struct SessionActor {
    machine: SessionStateMachine,
    effects: Collaborators,
    activity: Box<dyn ActivityEventSource>,
    activity_tx: mpsc::UnboundedSender<ActivityEvent>,
    status: watch::Sender<SessionStatus>,
    listening: bool,
    running: bool,
    last_narration: Option<NarrationSummary>,
    ambient_epoch: u64,
    restart_delay: Duration,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut activity: mpsc::UnboundedReceiver<ActivityEvent>,
        mut pipeline: mpsc::UnboundedReceiver<PipelineEvent>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start) => self.start(),
                    Some(Command::Stop) => self.stop(),
                    Some(Command::Activity(event)) => self.on_activity(event),
                    Some(Command::Shutdown(reply)) => {
                        self.stop();
                        if reply.send(()).is_err() {
                            debug!("shutdown requester went away");
                        }
                        break;
                    }
                    None => {
                        self.stop();
                        break;
                    }
                },
                Some(event) = activity.recv() => self.on_activity(event),
                Some(event) = pipeline.recv() => {
                    if let Some(summary) = self.effects.pipeline.handle_event(event) {
                        self.narration_finished(summary);
                    }
                }
                Some(message) = internal.recv() => self.on_internal(message),
            }
        }
        debug!("session task exiting");
    }

    fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        info!("session started");
        self.effects.activate_route(AudioRoute::Interactive);
        self.effects.resume_ambient();
        if let Err(e) = self.activity.start(self.activity_tx.clone()) {
            warn!(error = %e, "activity source failed to start");
        }
        self.publish();
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.activity.stop();
        self.effects.stop_narration();
        self.effects.ambient.stop();
        self.ambient_epoch += 1;
        self.listening = false;
        self.machine = SessionStateMachine::new();
        info!("session stopped");
        self.publish();
    }

    fn on_activity(&mut self, event: ActivityEvent) {
        if !self.running {
            debug!(?event, "activity ignored while stopped");
            return;
        }
        match event {
            ActivityEvent::Sleep(event) => self.dispatch(event),
            ActivityEvent::Transcript(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    self.effects.hint = text.to_string();
                }
            }
            ActivityEvent::Listening(listening) => {
                self.listening = listening;
                self.publish();
            }
            ActivityEvent::EngineStarted => self.schedule_ambient_restart(),
            ActivityEvent::InterruptionEnded => self.effects.resume_ambient(),
        }
    }

    fn on_internal(&mut self, message: Internal) {
        match message {
            Internal::StoryReady { generation, result } => {
                if generation != self.effects.story_generation
                    || self.machine.state() != SleepState::Narrating
                {
                    debug!(generation, "discarding story for an abandoned narration");
                    return;
                }
                match result {
                    Ok(text) => {
                        info!(chars = text.chars().count(), "story ready");
                        if let Some(summary) = self.effects.pipeline.start(&text) {
                            self.narration_finished(summary);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "story generation failed");
                        self.dispatch(SleepEvent::PlaybackEnded);
                    }
                }
            }
            Internal::AmbientRestart { epoch } => {
                if epoch == self.ambient_epoch && self.running {
                    self.effects.resume_ambient();
                }
            }
        }
    }

    fn narration_finished(&mut self, summary: NarrationSummary) {
        self.last_narration = Some(summary);
        self.dispatch(SleepEvent::PlaybackEnded);
    }

    fn schedule_ambient_restart(&mut self) {
        let epoch = self.ambient_epoch;
        let delay = self.restart_delay;
        let internal = self.effects.internal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if internal.send(Internal::AmbientRestart { epoch }).is_err() {
                debug!("ambient restart after session ended");
            }
        });
    }

    fn dispatch(&mut self, event: SleepEvent) {
        match self.machine.handle(event, &mut self.effects) {
            Some(t) => info!(from = %t.from, to = %t.to, event = ?t.event, "session transition"),
            None => debug!(state = %self.machine.state(), ?event, "event ignored"),
        }
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(SessionStatus {
            state: self.machine.state(),
            listening: self.listening,
            running: self.running,
            last_narration: self.last_narration,
        });
    }
}

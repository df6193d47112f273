//! Activity event sources.
//!
//! The speech-activity engine itself lives outside this crate. A source
//! only has to push [`ActivityEvent`]s into the channel it is started with.

use crate::error::Result;
use crate::session::state::SleepEvent;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    /// Drives the session state machine.
    Sleep(SleepEvent),
    /// Latest recognised listener speech, used as the story hint.
    Transcript(String),
    /// The listener started or stopped speaking.
    Listening(bool),
    /// The activity engine finished starting up.
    EngineStarted,
    /// A platform audio interruption ended.
    InterruptionEnded,
}

/// Producer of activity events.
pub trait ActivityEventSource: Send {
    fn start(&mut self, events: mpsc::UnboundedSender<ActivityEvent>) -> Result<()>;

    /// Stop producing events. Idempotent.
    fn stop(&mut self);
}

/// Parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Events(Vec<ActivityEvent>),
    Help,
    Quit,
}

pub const CONSOLE_HELP: &str = "\
Type what the listener says, or a command:
  /topic      topic ready, start a story
  /end        playback ended
  /interrupt  listener interrupts the story
  /speech     listener speech detected
  /listen     listening indicator on
  /idle       listening indicator off
  /engine     activity engine started
  /resume     audio interruption ended
  /help       show this help
  /quit       leave";

/// Parse one console line. Blank lines and unknown commands yield `None`.
pub fn parse_console_command(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Some(ConsoleCommand::Events(vec![
            ActivityEvent::Transcript(line.to_string()),
            ActivityEvent::Sleep(SleepEvent::UserSpeechDetected),
        ]));
    };

    let event = match command.trim().to_lowercase().as_str() {
        "topic" => ActivityEvent::Sleep(SleepEvent::TopicReady),
        "end" => ActivityEvent::Sleep(SleepEvent::PlaybackEnded),
        "interrupt" | "stop" => ActivityEvent::Sleep(SleepEvent::UserInterrupt),
        "speech" => ActivityEvent::Sleep(SleepEvent::UserSpeechDetected),
        "listen" => ActivityEvent::Listening(true),
        "idle" => ActivityEvent::Listening(false),
        "engine" => ActivityEvent::EngineStarted,
        "resume" => ActivityEvent::InterruptionEnded,
        "help" | "?" => return Some(ConsoleCommand::Help),
        "quit" | "exit" | "q" => return Some(ConsoleCommand::Quit),
        _ => return None,
    };
    Some(ConsoleCommand::Events(vec![event]))
}

/// Reads activity from stdin, one line per utterance or command.
pub struct ConsoleActivitySource {
    quit: CancellationToken,
    reader: Option<CancellationToken>,
}

impl ConsoleActivitySource {
    /// `quit` is cancelled when the user types `/quit` or stdin closes.
    pub fn new(quit: CancellationToken) -> Self {
        Self { quit, reader: None }
    }
}

impl ActivityEventSource for ConsoleActivitySource {
    fn start(&mut self, events: mpsc::UnboundedSender<ActivityEvent>) -> Result<()> {
        if self.reader.is_some() {
            return Ok(());
        }
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let quit = self.quit.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = tokio::select! {
                    _ = stop.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => match parse_console_command(&line) {
                        Some(ConsoleCommand::Events(batch)) => {
                            for event in batch {
                                if events.send(event).is_err() {
                                    return;
                                }
                            }
                        }
                        Some(ConsoleCommand::Help) => eprintln!("{CONSOLE_HELP}"),
                        Some(ConsoleCommand::Quit) => {
                            quit.cancel();
                            break;
                        }
                        None => debug!(%line, "ignored console input"),
                    },
                    Ok(None) => {
                        debug!("console input closed");
                        quit.cancel();
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "console read failed");
                        quit.cancel();
                        break;
                    }
                }
            }
        });

        self.reader = Some(cancel);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.cancel();
        }
    }
}

/// Source fed through an in-process channel.
///
/// Events sent while the source is stopped stay queued until the next start.
pub struct ChannelActivitySource {
    incoming: Arc<Mutex<mpsc::UnboundedReceiver<ActivityEvent>>>,
    forwarder: Option<CancellationToken>,
}

impl ChannelActivitySource {
    pub fn new() -> (Self, mpsc::UnboundedSender<ActivityEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                incoming: Arc::new(Mutex::new(rx)),
                forwarder: None,
            },
            tx,
        )
    }

    pub fn is_started(&self) -> bool {
        self.forwarder.is_some()
    }
}

impl ActivityEventSource for ChannelActivitySource {
    fn start(&mut self, events: mpsc::UnboundedSender<ActivityEvent>) -> Result<()> {
        if self.forwarder.is_some() {
            return Ok(());
        }
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let incoming = Arc::clone(&self.incoming);

        tokio::spawn(async move {
            let mut incoming = incoming.lock().await;
            loop {
                let event = tokio::select! {
                    _ = stop.cancelled() => break,
                    event = incoming.recv() => event,
                };
                match event {
                    Some(event) => {
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        });

        self.forwarder = Some(cancel);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.cancel();
        }
    }
}

//! Audio routing requests issued on state transitions.

use crate::error::Result;
use std::fmt;
use tracing::info;

/// Audio session configuration the platform should switch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioRoute {
    /// Microphone open, playback ducked for conversation.
    Interactive,
    /// Playback only, tuned for spoken narration.
    Narration,
    /// Background playback with nothing else active.
    Passive,
}

impl fmt::Display for AudioRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioRoute::Interactive => "interactive",
            AudioRoute::Narration => "narration",
            AudioRoute::Passive => "passive",
        };
        f.write_str(name)
    }
}

/// Platform hook that applies an [`AudioRoute`].
pub trait RouteController: Send {
    fn activate(&mut self, route: AudioRoute) -> Result<()>;
}

/// Route controller for hosts without audio-session management.
/// Records the active route and logs each change.
#[derive(Debug, Default)]
pub struct LoggingRouteController {
    current: Option<AudioRoute>,
}

impl LoggingRouteController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<AudioRoute> {
        self.current
    }
}

impl RouteController for LoggingRouteController {
    fn activate(&mut self, route: AudioRoute) -> Result<()> {
        if self.current != Some(route) {
            info!(%route, "audio route activated");
        }
        self.current = Some(route);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_controller_tracks_current_route() {
        let mut routes = LoggingRouteController::new();
        assert_eq!(routes.current(), None);

        routes.activate(AudioRoute::Narration).unwrap();
        routes.activate(AudioRoute::Passive).unwrap();

        assert_eq!(routes.current(), Some(AudioRoute::Passive));
    }

    #[test]
    fn route_display_names() {
        assert_eq!(AudioRoute::Interactive.to_string(), "interactive");
        assert_eq!(AudioRoute::Narration.to_string(), "narration");
        assert_eq!(AudioRoute::Passive.to_string(), "passive");
    }
}

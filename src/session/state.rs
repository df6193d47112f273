//! The Guiding / Narrating / Quiet session state machine.
//!
//! Transitions are synchronous. Side effects go through a [`SessionEffects`]
//! passed into each call, so the machine holds no references to the
//! components it drives.

use crate::session::routing::AudioRoute;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepState {
    /// Talking with the listener, waiting for a topic.
    Guiding,
    /// A story is being narrated.
    Narrating,
    /// Narration ended; ambient sound only.
    Quiet,
}

impl fmt::Display for SleepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SleepState::Guiding => "guiding",
            SleepState::Narrating => "narrating",
            SleepState::Quiet => "quiet",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepEvent {
    UserSpeechDetected,
    TopicReady,
    PlaybackEnded,
    UserInterrupt,
}

/// Actions the state machine asks its owner to perform.
pub trait SessionEffects {
    fn activate_route(&mut self, route: AudioRoute);
    /// Resume ambient sound at the baseline volume.
    fn resume_ambient(&mut self);
    fn start_narration(&mut self);
    fn stop_narration(&mut self);
}

/// A state change that took place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SleepState,
    pub event: SleepEvent,
    pub to: SleepState,
}

#[derive(Debug)]
pub struct SessionStateMachine {
    state: SleepState,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::with_state(SleepState::Guiding)
    }

    pub fn with_state(state: SleepState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> SleepState {
        self.state
    }

    /// Apply `event`. Pairs without a transition leave the state unchanged
    /// and perform no effects.
    pub fn handle(
        &mut self,
        event: SleepEvent,
        effects: &mut impl SessionEffects,
    ) -> Option<Transition> {
        let from = self.state;
        let to = match (from, event) {
            (SleepState::Guiding, SleepEvent::TopicReady) => {
                self.state = SleepState::Narrating;
                effects.activate_route(AudioRoute::Narration);
                effects.resume_ambient();
                effects.start_narration();
                SleepState::Narrating
            }
            (SleepState::Narrating, SleepEvent::PlaybackEnded) => {
                self.state = SleepState::Quiet;
                effects.activate_route(AudioRoute::Passive);
                effects.resume_ambient();
                SleepState::Quiet
            }
            (SleepState::Narrating, SleepEvent::UserInterrupt) => {
                effects.stop_narration();
                self.state = SleepState::Guiding;
                effects.activate_route(AudioRoute::Interactive);
                effects.resume_ambient();
                SleepState::Guiding
            }
            (SleepState::Quiet, SleepEvent::UserSpeechDetected) => {
                self.state = SleepState::Guiding;
                effects.activate_route(AudioRoute::Interactive);
                effects.resume_ambient();
                SleepState::Guiding
            }
            _ => return None,
        };
        Some(Transition { from, event, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Effect {
        Route(AudioRoute),
        Ambient,
        Start,
        Stop,
    }

    #[derive(Default)]
    struct Recorder {
        effects: Vec<Effect>,
    }

    impl SessionEffects for Recorder {
        fn activate_route(&mut self, route: AudioRoute) {
            self.effects.push(Effect::Route(route));
        }
        fn resume_ambient(&mut self) {
            self.effects.push(Effect::Ambient);
        }
        fn start_narration(&mut self) {
            self.effects.push(Effect::Start);
        }
        fn stop_narration(&mut self) {
            self.effects.push(Effect::Stop);
        }
    }

    const STATES: [SleepState; 3] = [SleepState::Guiding, SleepState::Narrating, SleepState::Quiet];
    const EVENTS: [SleepEvent; 4] = [
        SleepEvent::UserSpeechDetected,
        SleepEvent::TopicReady,
        SleepEvent::PlaybackEnded,
        SleepEvent::UserInterrupt,
    ];

    #[test]
    fn starts_in_guiding() {
        assert_eq!(SessionStateMachine::new().state(), SleepState::Guiding);
    }

    #[test]
    fn topic_ready_starts_narration_once() {
        let mut machine = SessionStateMachine::new();
        let mut rec = Recorder::default();

        let t = machine.handle(SleepEvent::TopicReady, &mut rec);

        assert_eq!(machine.state(), SleepState::Narrating);
        assert_eq!(t.map(|t| t.to), Some(SleepState::Narrating));
        assert_eq!(
            rec.effects,
            vec![Effect::Route(AudioRoute::Narration), Effect::Ambient, Effect::Start]
        );
    }

    #[test]
    fn interrupt_stops_narration_before_returning_to_guiding() {
        let mut machine = SessionStateMachine::with_state(SleepState::Narrating);
        let mut rec = Recorder::default();

        machine.handle(SleepEvent::UserInterrupt, &mut rec);

        assert_eq!(machine.state(), SleepState::Guiding);
        assert_eq!(
            rec.effects,
            vec![Effect::Stop, Effect::Route(AudioRoute::Interactive), Effect::Ambient]
        );
    }

    #[test]
    fn playback_ended_goes_quiet() {
        let mut machine = SessionStateMachine::with_state(SleepState::Narrating);
        let mut rec = Recorder::default();

        machine.handle(SleepEvent::PlaybackEnded, &mut rec);

        assert_eq!(machine.state(), SleepState::Quiet);
        assert_eq!(
            rec.effects,
            vec![Effect::Route(AudioRoute::Passive), Effect::Ambient]
        );
    }

    #[test]
    fn speech_in_quiet_returns_to_guiding() {
        let mut machine = SessionStateMachine::with_state(SleepState::Quiet);
        let mut rec = Recorder::default();

        machine.handle(SleepEvent::UserSpeechDetected, &mut rec);

        assert_eq!(machine.state(), SleepState::Guiding);
        assert_eq!(
            rec.effects,
            vec![Effect::Route(AudioRoute::Interactive), Effect::Ambient]
        );
    }

    #[test]
    fn unlisted_pairs_are_no_ops() {
        let listed = [
            (SleepState::Guiding, SleepEvent::TopicReady),
            (SleepState::Narrating, SleepEvent::PlaybackEnded),
            (SleepState::Narrating, SleepEvent::UserInterrupt),
            (SleepState::Quiet, SleepEvent::UserSpeechDetected),
        ];
        for state in STATES {
            for event in EVENTS {
                if listed.contains(&(state, event)) {
                    continue;
                }
                let mut machine = SessionStateMachine::with_state(state);
                let mut rec = Recorder::default();

                assert_eq!(machine.handle(event, &mut rec), None);
                assert_eq!(machine.state(), state, "{state} + {event:?} changed state");
                assert!(rec.effects.is_empty(), "{state} + {event:?} caused effects");
            }
        }
    }

    #[test]
    fn full_cycle() {
        let mut machine = SessionStateMachine::new();
        let mut rec = Recorder::default();
        for event in [
            SleepEvent::TopicReady,
            SleepEvent::PlaybackEnded,
            SleepEvent::UserSpeechDetected,
        ] {
            assert!(machine.handle(event, &mut rec).is_some());
        }
        assert_eq!(machine.state(), SleepState::Guiding);
    }
}

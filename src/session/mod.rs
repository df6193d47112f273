//! Session control: state machine, audio routing and the control task.

pub mod controller;
pub mod routing;
pub mod state;

pub use controller::{SessionHandle, SessionOptions, SessionParts, SessionStatus, spawn_session};
pub use routing::{AudioRoute, LoggingRouteController, RouteController};
pub use state::{SessionEffects, SessionStateMachine, SleepEvent, SleepState, Transition};

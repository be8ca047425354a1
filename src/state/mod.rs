//! Player state: the queue state machine and the shared application state
//! that mirrors it for observers.

pub mod app_state;
pub mod queue;

pub use {
    app_state::{AppState, AppStateEvent, BufferProgressForwarder},
    queue::{Directive, PlaybackQueue, PlayerState, QueueStateMachine},
};

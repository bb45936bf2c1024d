//! Domain models for Stride

mod operation;
mod session;

pub use operation::{
    CancelPayload, EndPayload, OpState, OperationId, PausePayload, QueuedOperation, ResumePayload,
    SessionAction, StartPayload, UpdateSpeedPayload, WALK_SESSION_ENTITY,
};
pub use session::{NewWalkSession, SessionState};

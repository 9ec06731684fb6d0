//! Recording system module
//!
//! This module implements the pause-aware recording core:
//! - WriterEngine: state machine and timestamp reconciliation for one recording
//! - SampleRouter: lazy engine construction and sample forwarding
//! - RecordingEvent: time and finish notifications for the owner

pub mod engine;
pub mod events;
pub mod router;
pub mod state;

pub use engine::{DiscardReason, ProcessOutcome, WriterEngine};
pub use events::{Completion, EngineNotice, RecordingEvent};
pub use router::{EngineSlot, RouterHandle, SampleRouter};
pub use state::{EngineStatus, RecorderConfig};

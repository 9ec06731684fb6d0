//! Recorder notifications
//!
//! `RecordingEvent` is what owners observe. `EngineNotice` is the internal
//! message that carries finalization results and releases back onto the
//! router's serial context.

use crate::media::MediaTime;
use crate::utils::error::{ErrorResponse, RecordingResult};
use parking_lot::Mutex;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Events emitted to the owner of a recorder
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Recorded duration after an accepted sample
    TimeChanged {
        elapsed: MediaTime,
        /// `elapsed / limit`, clamped to `0.0..=1.0`
        progress: f64,
    },
    /// The container was finalized (or failed to finalize). Fires once per
    /// recording. The owner must call `completion.complete()` when it no
    /// longer needs the file.
    Finished {
        location: PathBuf,
        error: Option<ErrorResponse>,
        completion: Completion,
    },
}

/// Messages from a writer engine (or an owner's completion) to the router
#[derive(Debug)]
pub enum EngineNotice {
    /// Finalization ran to completion
    Finished {
        location: PathBuf,
        result: RecordingResult<PathBuf>,
    },
    /// The owner is done with the finished file
    Released,
}

struct CompletionInner {
    tx: Mutex<Option<mpsc::UnboundedSender<EngineNotice>>>,
}

impl Drop for CompletionInner {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.get_mut().take() {
            tracing::warn!("Finish completion dropped without being called; releasing engine");
            let _ = tx.send(EngineNotice::Released);
        }
    }
}

/// One-shot handle the owner calls after it is done with a finished file.
///
/// Clones share state; only the first `complete()` has an effect. Dropping
/// every clone without calling it releases the engine as well. Clones held
/// in a subscriber's unread events count, so a subscriber that stops
/// receiving keeps the engine alive until it is dropped.
#[derive(Clone)]
pub struct Completion {
    inner: Arc<CompletionInner>,
}

impl Completion {
    pub(crate) fn new(tx: mpsc::UnboundedSender<EngineNotice>) -> Self {
        Self {
            inner: Arc::new(CompletionInner {
                tx: Mutex::new(Some(tx)),
            }),
        }
    }

    /// Signal that the finished file is no longer in use.
    ///
    /// Returns false if this completion was already used.
    pub fn complete(&self) -> bool {
        match self.inner.tx.lock().take() {
            Some(tx) => {
                let _ = tx.send(EngineNotice::Released);
                true
            }
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.inner.tx.lock().is_none()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("completed", &self.is_completed())
            .finish()
    }
}

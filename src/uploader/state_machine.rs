use crate::uploader::error::{UploaderError, UploaderResult};
use crate::uploader::types::{BatchEvent, BatchState};
use parking_lot::RwLock;

/// `Idle → Uploading ⇄ Paused → {Complete | Error}`, with `Cancel` back to `Idle`
pub struct BatchStateMachine {
    state: RwLock<BatchState>,
}

impl Default for BatchStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchStateMachine {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(BatchState::Idle),
        }
    }

    pub fn current_state(&self) -> BatchState {
        self.state.read().clone()
    }

    /// Transition state based on event
    pub fn transition(&self, event: BatchEvent) -> UploaderResult<BatchState> {
        let mut state = self.state.write();

        let new_state = match (&*state, &event) {
            // A finished or fresh batch can be (re)started
            (
                BatchState::Idle | BatchState::Complete | BatchState::Error { .. },
                BatchEvent::Start,
            ) => BatchState::Uploading,

            (BatchState::Uploading, BatchEvent::Pause) => BatchState::Paused,
            (BatchState::Paused, BatchEvent::Resume) => BatchState::Uploading,

            (BatchState::Uploading, BatchEvent::Reconcile) => BatchState::Processing,

            // Uploading → Complete when nothing was left to send
            (BatchState::Uploading | BatchState::Processing, BatchEvent::Finish) => {
                BatchState::Complete
            }

            (
                BatchState::Uploading | BatchState::Processing | BatchState::Paused,
                BatchEvent::Fail { message },
            ) => BatchState::Error {
                message: message.clone(),
            },

            (_, BatchEvent::Cancel) => BatchState::Idle,

            _ => {
                return Err(UploaderError::InvalidStateTransition(format!(
                    "Cannot handle {:?} in state {:?}",
                    event, *state
                )));
            }
        };

        *state = new_state.clone();
        Ok(new_state)
    }
}

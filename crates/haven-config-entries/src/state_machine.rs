//! Config entry lifecycle transitions
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError  → SetupInProgress | UnloadInProgress
//!                            ↘ SetupRetry  → SetupInProgress | UnloadInProgress
//!                            ↘ MigrationError (terminal)
//!
//! Loaded → UnloadInProgress → NotLoaded
//!                           ↘ FailedUnload (terminal)
//! ```

use crate::entry::ConfigEntryState;
use thiserror::Error;

/// Rejected state transition
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid state transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
    pub reason: &'static str,
}

impl ConfigEntryState {
    /// Validate a transition, returning the new state when allowed.
    pub fn try_transition(
        self,
        to: ConfigEntryState,
    ) -> Result<ConfigEntryState, InvalidTransition> {
        use ConfigEntryState::*;

        let valid = match self {
            NotLoaded => matches!(to, SetupInProgress),
            SetupInProgress => matches!(to, Loaded | SetupError | SetupRetry | MigrationError),
            Loaded => matches!(to, UnloadInProgress),
            SetupError | SetupRetry => matches!(to, SetupInProgress | UnloadInProgress),
            UnloadInProgress => matches!(to, NotLoaded | FailedUnload),
            // Terminal states reject everything.
            MigrationError | FailedUnload => false,
        };

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                reason: rejection_reason(self, to),
            })
        }
    }

    /// Check a transition without performing it.
    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.try_transition(to).is_ok()
    }
}

fn rejection_reason(from: ConfigEntryState, to: ConfigEntryState) -> &'static str {
    use ConfigEntryState::*;

    match (from, to) {
        (MigrationError | FailedUnload, _) => "terminal state, entry cannot recover",
        (Loaded, SetupInProgress) => "already loaded, unload first",
        (_, Loaded) => "must go through SetupInProgress",
        (_, NotLoaded) => "must go through UnloadInProgress",
        _ => "not in the lifecycle table",
    }
}

/// Retry delay with exponential backoff, in seconds.
///
/// 2^min(tries, 4) * 5 gives 5s, 10s, 20s, 40s, then 80s for every later
/// attempt, plus up to 100ms of jitter so retries spread out.
pub fn calculate_retry_delay(tries: u32) -> f64 {
    let base = 2_u32.pow(tries.min(4)) * 5;
    base as f64 + rand::random::<f64>() * 0.1
}

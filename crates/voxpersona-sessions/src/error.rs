use thiserror::Error;

use crate::types::Step;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session for user {user_id}")]
    NotFound { user_id: u64 },

    #[error("cannot {event} while in step {from:?}")]
    InvalidTransition { from: Step, event: &'static str },

    /// A required context field is still missing at confirmation time.
    #[error("context field missing: {field}")]
    IncompleteContext { field: &'static str },
}

pub type Result<T> = std::result::Result<T, SessionError>;

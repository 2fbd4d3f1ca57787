use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlagError {
    #[error("invalid flag: {}", .0.join(", "))]
    InvalidFlag(Vec<String>),

    #[error("'{field}' cannot be changed after creation")]
    ImmutableFieldChanged { field: &'static str },

    #[error("invalid expiry '{input}': {reason}")]
    InvalidExpiry { input: String, reason: String },

    #[error("rejected by flag store: {0}")]
    ValidationRejected(String),

    #[error("flag not found: {0}")]
    NotFound(String),

    #[error("flag {0} was modified by another writer, reload before retrying")]
    Conflict(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response from flag store: status={status}, body={body}")]
    Unexpected { status: u16, body: String },

    #[error("a submission is already in flight for this flag")]
    SubmissionInFlight,

    #[error("session is {state}, not ready for this action")]
    NotReady { state: &'static str },

    #[error("session saw a conflict, reload the flag before retrying")]
    ReloadRequired,

    #[error("flag is archived")]
    Archived,
}

impl FlagError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        FlagError::InvalidFlag(vec![reason.into()])
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, FlagError::Conflict(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, FlagError::Transport(_))
    }

    /// Local validation failures never reach the network.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            FlagError::InvalidFlag(_)
                | FlagError::ImmutableFieldChanged { .. }
                | FlagError::InvalidExpiry { .. }
        )
    }
}

impl From<reqwest::Error> for FlagError {
    fn from(e: reqwest::Error) -> Self {
        FlagError::Transport(e.to_string())
    }
}

pub type FlagResult<T> = Result<T, FlagError>;

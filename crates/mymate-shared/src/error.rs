use thiserror::Error;

/// A frame or identifier sent by a client could not be understood.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    #[error("Invalid user id '{value}': {source}")]
    InvalidUserId {
        value: String,
        #[source]
        source: uuid::Error,
    },

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

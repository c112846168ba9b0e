use thiserror::Error;

/// Failure handing a frame to a live connection. Never reported to the
/// sender of a message; it only demotes the target connection.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("socket write failed")]
    WriteFailed,

    #[error("write not confirmed within timeout")]
    Timeout,
}

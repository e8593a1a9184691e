//! Error types for the command protocol and the camera backend

use thiserror::Error;

/// Rejections of a client command. Every variant is answered with `ERROR`
/// and leaves the camera untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("'{0}' is not an acceptable size")]
    MalformedSize(String),

    #[error("command is not valid UTF-8")]
    InvalidEncoding,

    #[error("'{0}' cannot be used as a file name prefix")]
    InvalidPrefix(String),

    #[error("received {0} command words, expected 4")]
    WrongArity(usize),

    #[error("'{0}' is not a valid exposure")]
    InvalidExposure(String),

    #[error("'{0}' is not a valid count")]
    InvalidCount(String),
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("v4l2-ctl failed: {0}")]
    Command(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("camera does not expose control '{0}'")]
    UnknownProperty(String),

    #[error("control '{name}' has unsupported type '{kind}'")]
    UnsupportedKind { name: String, kind: String },
}

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameStepError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to read {}: {reason}", path.display())]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("no video track found in {}", .0.display())]
    NoVideoTrack(PathBuf),

    #[error("decoder init failure: {0}")]
    DecoderInit(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("player is not executing, call execute() first")]
    NotExecuting,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, FrameStepError>;

use std::io;

use tch::TchError;
use thiserror::Error;

/// Main library error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Config(String),

    /// The loss stopped being a finite number.
    #[error("loss diverged at step {step}")]
    Diverged { step: usize },

    /// Image decoding or encoding error.
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Config file parse error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Invalid shape.
    #[error("invalid shape: {0}")]
    Shape(String),

    /// Errors returned by the Torch C++ API.
    #[error(transparent)]
    Torch(#[from] TchError),

    /// Error raised while handling a specific file.
    #[error("{path}: {source}")]
    WithPath {
        path: String,
        #[source]
        source: Box<Error>,
    },

    /// Layer name that the backbone does not define.
    #[error("unknown layer {name} for {backbone}")]
    UnknownLayer { name: String, backbone: String },
}

impl Error {
    /// Attaches the file that was being read or written to this error.
    pub fn path_context(self, path_name: &str) -> Self {
        Error::WithPath { path: path_name.to_string(), source: Box::new(self) }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

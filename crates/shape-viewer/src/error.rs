use shapeio::FormatError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("no viewport labelled '{0}'")]
    UnknownViewport(String),

    #[error("landmark {0} does not exist")]
    UnknownLandmark(usize),

    #[error("constraint {0} does not exist")]
    UnknownConstraint(usize),

    #[error("no pickable shape for subject '{subject}' in domain '{domain}'")]
    NoPickableActor { subject: String, domain: String },

    #[error("geometry error: {0}")]
    Geometry(String),

    #[error("unknown slice axis '{0}'")]
    InvalidAxis(String),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ViewerError>;

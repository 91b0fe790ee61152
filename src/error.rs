use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Construction-time and control-plane failures.
///
/// Nothing on the `pull`/`composite` path returns this type; stalls and
/// exhaustion travel as sentinel frames instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid channel layout: {0}")]
    InvalidLayout(String),

    #[error("unknown channel layout '{0}'")]
    UnknownLayout(String),

    #[error("invalid mix expression '{expression}': {reason}")]
    InvalidMixExpression { expression: String, reason: String },

    #[error("unknown video format '{0}'")]
    UnknownVideoFormat(String),

    #[error("index {index} out of range for playlist of {len}")]
    OutOfRange { index: usize, len: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("executor '{0}' is not running")]
    ExecutorStopped(String),

    #[error("deferred value was abandoned before completion")]
    Abandoned,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl Error {
    pub(crate) fn mix_expression(expression: &str, reason: impl Into<String>) -> Self {
        Self::InvalidMixExpression {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

// src/error.rs
use crate::vhd::VhdError;

/// Failure raised by the provisioning pipeline.
///
/// Errors are never recovered locally; each one names the offending parameter or
/// resource and propagates to the command boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("invalid argument '{param}': {message}")]
    InvalidArgument { param: String, message: String },

    #[error("argument '{param}' out of range: {message}")]
    OutOfRange { param: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to read disk file '{path}'")]
    DiskFile {
        path: String,
        #[source]
        source: VhdError,
    },

    #[error(transparent)]
    Remote(#[from] anyhow::Error),
}

impl ProvisionError {
    pub fn invalid_argument(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            param: param.into(),
            message: message.into(),
        }
    }

    pub fn out_of_range(param: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OutOfRange {
            param: param.into(),
            message: message.into(),
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::OutOfRange { .. })
    }
}

pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;

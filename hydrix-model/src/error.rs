use std::fmt::{self, Display};

use crate::record::ScanTaskStatus;

/// Errors produced by model constructors and validation routines.
#[derive(Debug)]
pub enum ModelError {
    InvalidTransition {
        from: ScanTaskStatus,
        to: ScanTaskStatus,
    },
    UnknownPluginKind(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidTransition { from, to } => {
                write!(f, "invalid task status transition: {from} -> {to}")
            }
            ModelError::UnknownPluginKind(kind) => {
                write!(f, "unknown plugin kind: {kind}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;

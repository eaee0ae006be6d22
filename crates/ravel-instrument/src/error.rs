//! Instrumentation errors

use ravel_bytecode::{DescriptorError, MethodDef};
use thiserror::Error;

/// Errors raised while classifying or transforming a class
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrumentError {
    /// A construct that cannot be made suspendable
    #[error("Unable to instrument class {class}#{method}{desc} because of {reason}")]
    Unable {
        /// What was rejected
        reason: String,
        /// Declaring class
        class: String,
        /// Method name
        method: String,
        /// Method descriptor
        desc: String,
    },

    /// The method body could not be analysed
    #[error("Analysis of {class}#{method}{desc} failed at instruction {index}: {message}")]
    Analysis {
        /// Declaring class
        class: String,
        /// Method name
        method: String,
        /// Method descriptor
        desc: String,
        /// Instruction index in the original body
        index: usize,
        /// Failure description
        message: String,
    },

    /// Malformed descriptor in the input
    #[error("Invalid descriptor: {0}")]
    Descriptor(#[from] DescriptorError),
}

impl InstrumentError {
    /// Rejection of `method` in `class`
    pub fn unable(reason: impl Into<String>, class: &str, method: &MethodDef) -> Self {
        InstrumentError::Unable {
            reason: reason.into(),
            class: class.to_string(),
            method: method.name.clone(),
            desc: method.desc.clone(),
        }
    }

    pub(crate) fn analysis(
        class: &str,
        method: &MethodDef,
        index: usize,
        message: impl Into<String>,
    ) -> Self {
        InstrumentError::Analysis {
            class: class.to_string(),
            method: method.name.clone(),
            desc: method.desc.clone(),
            index,
            message: message.into(),
        }
    }
}

/// Instrumentation result
pub type InstrumentResult<T> = Result<T, InstrumentError>;

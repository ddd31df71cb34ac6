//! Error types for the `xtrace` host runtime.
//!
//! Runtime operations (class creation, method registration, message sends,
//! dispatch-table swaps) report failures through [`Error`]. None of these are
//! raised from inside an intercepted call; they surface only to the code that
//! builds or mutates the object model.

use thiserror::Error;

/// Errors that can occur in the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Class name already exists in registry.
    #[error("Class name already exists in registry: {name}")]
    ClassAlreadyExists {
        /// The duplicate class name.
        name: String,
    },

    /// Every class index is taken.
    #[error("Class registry is full, cannot register {name}")]
    ClassRegistryFull {
        /// The class that could not be registered.
        name: String,
    },

    /// Invalid type encoding string.
    #[error("Invalid type encoding string: {encoding:?}")]
    InvalidEncoding {
        /// The rejected encoding.
        encoding: String,
    },

    /// Selector names must be non-empty.
    #[error("Invalid selector name: {name:?}")]
    InvalidSelector {
        /// The rejected name.
        name: String,
    },

    /// Selector not found in class or inheritance chain.
    #[error("Selector not found: {selector} on {class}")]
    SelectorNotFound {
        /// Class the lookup started from.
        class: String,
        /// The selector that was not found.
        selector: String,
    },

    /// Argument count mismatch for method signature.
    ///
    /// Counts include the receiver and selector slots, so a method taking
    /// one argument expects 3.
    #[error("Argument count mismatch: expected {expected}, got {got}")]
    ArgumentCountMismatch {
        /// Expected number of arguments
        expected: usize,
        /// Actual number of arguments provided
        got: usize,
    },
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

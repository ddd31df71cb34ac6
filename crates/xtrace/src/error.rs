//! Error types for the interception engine.
//!
//! Only the policy surface (install, hook registration, configuration)
//! reports errors. Nothing here is ever raised from inside a traced call:
//! the trampoline degrades to forwarding and a log line instead.

use thiserror::Error;

/// Errors that can occur while configuring or installing interception.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The class does not declare the message at its own level.
    #[error("Selector not found: {selector} on {class}")]
    SelectorNotFound {
        /// Class the install targeted.
        class: String,
        /// The message that is not declared there.
        selector: String,
    },

    /// The delegate does not implement the requested callback.
    #[error("Callback {selector} not implemented by delegate {class}")]
    CallbackNotFound {
        /// Delegate class.
        class: String,
        /// Callback selector.
        selector: String,
    },

    /// A hook was requested by name but no delegate is registered.
    #[error("No delegate registered for callback {selector}")]
    NoDelegate {
        /// Callback selector.
        selector: String,
    },

    /// A callback was passed with [`HookKind::Log`](crate::HookKind::Log),
    /// which has no hook slot.
    #[error("Log install of {selector} on {class} takes no callback")]
    UnexpectedCallback {
        /// Class the install targeted.
        class: String,
        /// The message being installed.
        selector: String,
    },

    /// The dispatch table kept changing under the install.
    #[error("Implementation of {selector} on {class} changed during install")]
    InstallRaced {
        /// Class the install targeted.
        class: String,
        /// The contested message.
        selector: String,
    },

    /// A filter pattern failed to compile.
    #[error("Invalid {filter} pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// Which filter the pattern was for.
        filter: &'static str,
        /// The rejected pattern.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// An environment variable held a value that is not a boolean.
    #[error("Invalid value {value:?} for {var}")]
    InvalidConfig {
        /// Variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
    },

    /// Error from the host runtime.
    #[error(transparent)]
    Runtime(#[from] xtrace_runtime::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

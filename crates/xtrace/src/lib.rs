//! `xtrace`: dynamic message interception and call tracing.
//!
//! The engine swaps a trampoline into a class's dispatch table for each
//! traced message. Every call through the trampoline can be logged (entry
//! line with decoded arguments, return line with value and time), hooked by
//! a delegate before, instead of, or after the original, and counted.
//!
//! Tracing is selected per class ([`Xtrace::trace_class`]), per instance
//! ([`Xtrace::trace_instance`]) or per message ([`Xtrace::install`]) and is
//! fully reversible: uninstalling puts the original implementation back.
//!
//! # Example
//!
//! ```rust
//! use std::str::FromStr;
//! use std::sync::Arc;
//! use xtrace::{Depth, MemorySink, TraceConfig, Xtrace};
//! use xtrace_runtime::{Class, Frame, Imp, Method, Object, Selector};
//!
//! let class = Class::new_root("DocAccount").unwrap();
//! let deposit = Selector::from_str("deposit:").unwrap();
//! let imp = Imp::new(|_, _, args| Frame::returning(args.read::<i32>(0).unwrap_or(0) * 2));
//! class.add_method(Method::new(deposit, "i@:i", imp).unwrap()).unwrap();
//!
//! let sink = Arc::new(MemorySink::new());
//! let config = TraceConfig::default().with_show_arguments(true);
//! let xtrace = Xtrace::with_sink(config, sink.clone());
//! xtrace.trace_class(&class, Depth::All);
//!
//! let account = Object::new(&class);
//! let ret = account.send(&deposit, &Frame::new().with(21_i32)).unwrap();
//! assert_eq!(ret.read::<i32>(0), Some(42));
//!
//! let lines = sink.lines();
//! assert_eq!(lines[0], format!("[<DocAccount#{}> deposit:21]", account.id()));
//! assert!(lines[1].starts_with("-> 42 ("));
//! ```
//!
//! # Crate layout
//!
//! - [`engine`]: install/uninstall and the trampoline call path
//! - [`target`]: class, instance and exclusion selection
//! - [`callback`]: delegate hooks
//! - [`decoder`] and [`value`]: type encodings and argument extraction
//! - [`config`]: options, filters and `XTRACE_*` environment parsing
//! - [`sink`]: where trace lines go
//! - [`record`]: per-message interception state and statistics

pub mod callback;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
mod format;
mod guard;
pub mod record;
pub mod sink;
pub mod target;
pub mod value;

pub use callback::{Callback, HookKind};
pub use config::{Filters, InstanceOptions, TraceConfig};
pub use decoder::{ARGS_SUPPORTED, ArgDescriptor, Signature, TypeDescriptor, TypeKind};
pub use engine::{InstallOutcome, Xtrace};
pub use error::{Error, Result};
pub use record::{RecordInfo, RecordKey, StatsSnapshot};
pub use sink::{EventKind, LogSink, MemorySink, TraceEvent, TraceSink};
pub use target::Depth;
pub use value::ArgValue;

use std::sync::OnceLock;

/// The process-wide engine.
///
/// Created on first use from the `XTRACE_*` environment; a malformed
/// variable is logged and the defaults are used instead.
pub fn global() -> &'static Xtrace {
    static GLOBAL: OnceLock<Xtrace> = OnceLock::new();
    GLOBAL.get_or_init(|| {
        let config = TraceConfig::from_env().unwrap_or_else(|e| {
            log::warn!("ignoring XTRACE_* environment: {e}");
            TraceConfig::default()
        });
        Xtrace::new(config)
    })
}

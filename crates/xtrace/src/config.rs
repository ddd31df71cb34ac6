//! Trace configuration.
//!
//! A [`TraceConfig`] is an immutable snapshot: the engine holds it behind an
//! `Arc` and [`Xtrace::configure`](crate::Xtrace::configure) swaps the whole
//! snapshot, so a call in flight always sees one consistent set of options.
//!
//! # Environment
//!
//! [`TraceConfig::from_env`] reads:
//!
//! | variable                     | meaning                                  |
//! |------------------------------|------------------------------------------|
//! | `XTRACE_HIDE_RETURNS`        | suppress return-value lines              |
//! | `XTRACE_SHOW_ARGUMENTS`      | render argument values in entry lines    |
//! | `XTRACE_DESCRIBE_VALUES`     | render objects through `description`     |
//! | `XTRACE_INCLUDE_PROPERTIES`  | trace property accessors too             |
//! | `XTRACE_INCLUDE_METHODS`     | only trace messages matching this regex  |
//! | `XTRACE_EXCLUDE_METHODS`     | skip messages matching this regex        |
//! | `XTRACE_EXCLUDE_TYPES`       | skip messages with a matching type       |
//!
//! Booleans accept `1`/`true`/`yes`/`on` and `0`/`false`/`no`/`off`
//! (case-insensitive). Empty values count as unset.

use crate::decoder::{Signature, TypeDescriptor};
use crate::error::{Error, Result};
use regex::Regex;

/// Message and type filters applied when a class is traced.
///
/// Filters are consulted only while enumerating messages to install; they
/// never run on the call path.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    include_methods: Option<Regex>,
    exclude_methods: Option<Regex>,
    exclude_types: Option<Regex>,
}

fn compile(filter: &'static str, pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|e| Error::InvalidPattern {
            filter,
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

impl Filters {
    /// Only messages whose name matches `pattern` are traced. An empty
    /// pattern clears the filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if `pattern` is not a valid regex.
    pub fn set_include_methods(&mut self, pattern: &str) -> Result<()> {
        self.include_methods = compile("include-methods", pattern)?;
        Ok(())
    }

    /// Messages whose name matches `pattern` are not traced. An empty
    /// pattern clears the filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if `pattern` is not a valid regex.
    pub fn set_exclude_methods(&mut self, pattern: &str) -> Result<()> {
        self.exclude_methods = compile("exclude-methods", pattern)?;
        Ok(())
    }

    /// Messages with an argument or return type whose name or encoding
    /// matches `pattern` are not traced. An empty pattern clears the filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if `pattern` is not a valid regex.
    pub fn set_exclude_types(&mut self, pattern: &str) -> Result<()> {
        self.exclude_types = compile("exclude-types", pattern)?;
        Ok(())
    }

    /// Returns true if the include/exclude method patterns admit `name`.
    #[must_use]
    pub fn allows_method(&self, name: &str) -> bool {
        let included = self
            .include_methods
            .as_ref()
            .is_none_or(|re| re.is_match(name));
        let excluded = self
            .exclude_methods
            .as_ref()
            .is_some_and(|re| re.is_match(name));
        included && !excluded
    }

    /// Returns true if `ty` matches the exclude-types pattern.
    #[must_use]
    pub fn excludes_type(&self, ty: &TypeDescriptor) -> bool {
        self.exclude_types
            .as_ref()
            .is_some_and(|re| re.is_match(&ty.type_name) || re.is_match(&ty.encoding))
    }

    /// Returns true if the return type or any argument type is excluded.
    #[must_use]
    pub fn excludes_signature(&self, signature: &Signature) -> bool {
        self.excludes_type(&signature.ret)
            || signature.args.iter().any(|arg| self.excludes_type(&arg.ty))
    }

    /// Returns true if no filter is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include_methods.is_none()
            && self.exclude_methods.is_none()
            && self.exclude_types.is_none()
    }
}

/// Engine-wide trace options.
///
/// # Example
///
/// ```rust
/// use xtrace::TraceConfig;
///
/// let config = TraceConfig::default()
///     .with_show_arguments(true)
///     .with_include_methods("^set")
///     .unwrap();
///
/// assert!(config.show_arguments);
/// assert!(!config.hide_returns);
/// assert!(config.filters.allows_method("setValue:"));
/// assert!(!config.filters.allows_method("value"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TraceConfig {
    /// Suppress return-value lines
    pub hide_returns: bool,
    /// Render argument values in entry lines (off by default)
    pub show_arguments: bool,
    /// Render objects through their `description` method
    pub describe_values: bool,
    /// Trace property getters and setters (off by default)
    pub include_properties: bool,
    /// Message and type filters
    pub filters: Filters,
}

impl TraceConfig {
    /// Returns a config with every option off and no filters.
    #[must_use]
    pub fn new() -> Self {
        TraceConfig::default()
    }

    /// Sets [`TraceConfig::hide_returns`].
    #[must_use]
    pub fn with_hide_returns(mut self, hide: bool) -> Self {
        self.hide_returns = hide;
        self
    }

    /// Sets [`TraceConfig::show_arguments`].
    #[must_use]
    pub fn with_show_arguments(mut self, show: bool) -> Self {
        self.show_arguments = show;
        self
    }

    /// Sets [`TraceConfig::describe_values`].
    #[must_use]
    pub fn with_describe_values(mut self, describe: bool) -> Self {
        self.describe_values = describe;
        self
    }

    /// Sets [`TraceConfig::include_properties`].
    #[must_use]
    pub fn with_include_properties(mut self, include: bool) -> Self {
        self.include_properties = include;
        self
    }

    /// Sets the include-methods filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if `pattern` is not a valid regex.
    pub fn with_include_methods(mut self, pattern: &str) -> Result<Self> {
        self.filters.set_include_methods(pattern)?;
        Ok(self)
    }

    /// Sets the exclude-methods filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if `pattern` is not a valid regex.
    pub fn with_exclude_methods(mut self, pattern: &str) -> Result<Self> {
        self.filters.set_exclude_methods(pattern)?;
        Ok(self)
    }

    /// Sets the exclude-types filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] if `pattern` is not a valid regex.
    pub fn with_exclude_types(mut self, pattern: &str) -> Result<Self> {
        self.filters.set_exclude_types(pattern)?;
        Ok(self)
    }

    /// Builds a config from the `XTRACE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a malformed boolean and
    /// [`Error::InvalidPattern`] for a malformed filter.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`TraceConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |var: &'static str| -> Result<bool> {
            match lookup(var) {
                Some(value) => parse_bool(var, &value),
                None => Ok(false),
            }
        };

        let mut config = TraceConfig {
            hide_returns: flag("XTRACE_HIDE_RETURNS")?,
            show_arguments: flag("XTRACE_SHOW_ARGUMENTS")?,
            describe_values: flag("XTRACE_DESCRIBE_VALUES")?,
            include_properties: flag("XTRACE_INCLUDE_PROPERTIES")?,
            filters: Filters::default(),
        };
        if let Some(pattern) = lookup("XTRACE_INCLUDE_METHODS") {
            config.filters.set_include_methods(&pattern)?;
        }
        if let Some(pattern) = lookup("XTRACE_EXCLUDE_METHODS") {
            config.filters.set_exclude_methods(&pattern)?;
        }
        if let Some(pattern) = lookup("XTRACE_EXCLUDE_TYPES") {
            config.filters.set_exclude_types(&pattern)?;
        }
        Ok(config)
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig {
            var,
            value: value.to_string(),
        }),
    }
}

/// Per-instance overrides of the formatting options.
///
/// Set through [`Xtrace::trace_instance_with`](crate::Xtrace::trace_instance_with);
/// `None` fields fall back to the engine's [`TraceConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceOptions {
    /// Overrides [`TraceConfig::hide_returns`]
    pub hide_returns: Option<bool>,
    /// Overrides [`TraceConfig::show_arguments`]
    pub show_arguments: Option<bool>,
    /// Overrides [`TraceConfig::describe_values`]
    pub describe_values: Option<bool>,
}

impl InstanceOptions {
    /// Sets the `hide_returns` override.
    #[must_use]
    pub fn with_hide_returns(mut self, hide: bool) -> Self {
        self.hide_returns = Some(hide);
        self
    }

    /// Sets the `show_arguments` override.
    #[must_use]
    pub fn with_show_arguments(mut self, show: bool) -> Self {
        self.show_arguments = Some(show);
        self
    }

    /// Sets the `describe_values` override.
    #[must_use]
    pub fn with_describe_values(mut self, describe: bool) -> Self {
        self.describe_values = Some(describe);
        self
    }
}

/// Formatting options in effect for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineOptions {
    pub hide_returns: bool,
    pub show_arguments: bool,
    pub describe_values: bool,
}

impl LineOptions {
    /// Resolves the options for a call, letting instance overrides win.
    pub(crate) fn resolve(config: &TraceConfig, instance: Option<&InstanceOptions>) -> Self {
        let instance = instance.copied().unwrap_or_default();
        LineOptions {
            hide_returns: instance.hide_returns.unwrap_or(config.hide_returns),
            show_arguments: instance.show_arguments.unwrap_or(config.show_arguments),
            describe_values: instance.describe_values.unwrap_or(config.describe_values),
        }
    }
}

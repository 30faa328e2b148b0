// Structured logging for the mux
//
// Sits on top of the `log` facade. A Logger pins a mux instance id and a
// component tag; routers and actors derive children from the App's root
// logger so every line can be traced back to its instance, namespace, and
// method. The log_* macros gate on the target level before building the
// message, so disabled levels cost nothing.

use log::{debug, error, info, warn};
use std::fmt::{self, Arguments, Display, Formatter};

/// Predefined components for logging categorization
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Component {
    App,
    Router,
    Service,
    RemoteService,
    Mq,
    Actor,
    System,
    Custom(&'static str),
}

impl Component {
    /// Get the string representation of the component
    pub fn as_str(&self) -> &str {
        match self {
            Component::App => "App",
            Component::Router => "Router",
            Component::Service => "Service",
            Component::RemoteService => "Remote",
            Component::Mq => "MQ",
            Component::Actor => "Actor",
            Component::System => "System",
            Component::Custom(name) => name,
        }
    }
}

// Lightweight Display helpers to avoid prefix String allocations
struct ComponentPrefixDisplay {
    parent: Option<Component>,
    component: Component,
}

impl Display for ComponentPrefixDisplay {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.parent {
            Some(parent) if parent != Component::App => {
                write!(f, "{}.{}", parent.as_str(), self.component.as_str())
            }
            _ => write!(f, "{}", self.component.as_str()),
        }
    }
}

struct MaybeNamespaceDisplay<'a>(Option<&'a str>);

impl Display for MaybeNamespaceDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(ns) = self.0 {
            write!(f, "|ns={ns}")
        } else {
            Ok(())
        }
    }
}

struct MaybeMethodDisplay<'a>(Option<&'a str>);

impl Display for MaybeMethodDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(method) = self.0 {
            write!(f, "|method={method}")
        } else {
            Ok(())
        }
    }
}

/// A helper for creating component-specific loggers with mux ID tracking
#[derive(Clone)]
pub struct Logger {
    /// Component this logger is for
    component: Component,
    /// Mux instance ID for distributed tracing (usually the advertise URL,
    /// or a short random tag when no advertise URL is configured)
    mux_id: String,
    /// Parent component for hierarchical logging (if any)
    parent_component: Option<Component>,
    /// Namespace for per-tenant tracing
    namespace: Option<String>,
    /// Method name for request tracing
    method: Option<String>,
}

impl Logger {
    /// Create a new root logger for a specific component and mux ID.
    /// This should only be called by the App root component.
    pub fn new_root(component: Component, mux_id: &str) -> Self {
        Self {
            component,
            mux_id: mux_id.to_string(),
            parent_component: None,
            namespace: None,
            method: None,
        }
    }

    /// Create a child logger with the same mux ID but different component.
    /// This is the preferred way to create loggers in routers and actors.
    pub fn with_component(&self, component: Component) -> Self {
        Self {
            component,
            mux_id: self.mux_id.clone(),
            parent_component: Some(self.component),
            namespace: self.namespace.clone(),
            method: self.method.clone(),
        }
    }

    /// Create a logger bound to a namespace
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            component: self.component,
            mux_id: self.mux_id.clone(),
            parent_component: self.parent_component,
            namespace: Some(namespace.into()),
            method: self.method.clone(),
        }
    }

    /// Create a logger bound to a method name, used to trace one request
    pub fn with_method(&self, method: impl Into<String>) -> Self {
        Self {
            component: self.component,
            mux_id: self.mux_id.clone(),
            parent_component: self.parent_component,
            namespace: self.namespace.clone(),
            method: Some(method.into()),
        }
    }

    /// Get a reference to the mux ID
    pub fn mux_id(&self) -> &str {
        &self.mux_id
    }

    /// Get a reference to the namespace if available
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Get a reference to the method if available
    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    /// Log a debug message using fmt::Arguments (avoids allocating a String)
    pub fn debug_args(&self, args: Arguments) {
        if log::log_enabled!(log::Level::Debug) {
            if self.component == Component::App && self.parent_component.is_none() {
                debug!("[{}] {}", self.mux_id, args);
            } else {
                debug!(
                    "[{}][{}{}{}] {}",
                    self.mux_id,
                    ComponentPrefixDisplay {
                        parent: self.parent_component,
                        component: self.component
                    },
                    MaybeNamespaceDisplay(self.namespace()),
                    MaybeMethodDisplay(self.method()),
                    args
                );
            }
        }
    }

    /// Log an info message using fmt::Arguments
    pub fn info_args(&self, args: Arguments) {
        if log::log_enabled!(log::Level::Info) {
            if self.component == Component::App && self.parent_component.is_none() {
                info!("[{}] {}", self.mux_id, args);
            } else {
                info!(
                    "[{}][{}{}{}] {}",
                    self.mux_id,
                    ComponentPrefixDisplay {
                        parent: self.parent_component,
                        component: self.component
                    },
                    MaybeNamespaceDisplay(self.namespace()),
                    MaybeMethodDisplay(self.method()),
                    args
                );
            }
        }
    }

    /// Log a warning using fmt::Arguments
    pub fn warn_args(&self, args: Arguments) {
        if log::log_enabled!(log::Level::Warn) {
            if self.component == Component::App && self.parent_component.is_none() {
                warn!("[{}] {}", self.mux_id, args);
            } else {
                warn!(
                    "[{}][{}{}{}] {}",
                    self.mux_id,
                    ComponentPrefixDisplay {
                        parent: self.parent_component,
                        component: self.component
                    },
                    MaybeNamespaceDisplay(self.namespace()),
                    MaybeMethodDisplay(self.method()),
                    args
                );
            }
        }
    }

    /// Log an error using fmt::Arguments
    pub fn error_args(&self, args: Arguments) {
        if log::log_enabled!(log::Level::Error) {
            if self.component == Component::App && self.parent_component.is_none() {
                error!("[{}] {}", self.mux_id, args);
            } else {
                error!(
                    "[{}][{}{}{}] {}",
                    self.mux_id,
                    ComponentPrefixDisplay {
                        parent: self.parent_component,
                        component: self.component
                    },
                    MaybeNamespaceDisplay(self.namespace()),
                    MaybeMethodDisplay(self.method()),
                    args
                );
            }
        }
    }
}

/// Log levels supported by `LoggingConfig`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Process-wide logging configuration applied through env_logger
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    default_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self {
            default_level: LogLevel::Info,
        }
    }

    pub fn with_default_level(mut self, level: LogLevel) -> Self {
        self.default_level = level;
        self
    }

    /// Install the logger. Safe to call more than once; subsequent calls are
    /// no-ops (env_logger refuses double initialization), which keeps test
    /// suites that each call apply() working.
    pub fn apply(&self) {
        let _ = env_logger::Builder::from_default_env()
            .filter_level(self.default_level.to_filter())
            .try_init();
    }
}

/// Log through a [`Logger`] at debug level.
///
/// Takes the logger followed by `format!`-style arguments. The level gate
/// sits in the macro itself, in front of `format_args!`, so a disabled
/// level never evaluates the arguments at all. The same applies to
/// [`log_info!`], [`log_warn!`], and [`log_error!`].
#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {{
        if ::log::log_enabled!(::log::Level::Debug) {
            ($logger).debug_args(format_args!($($arg)*));
        }
    }};
}

/// Log through a [`Logger`] at info level; see [`log_debug!`].
#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {{
        if ::log::log_enabled!(::log::Level::Info) {
            ($logger).info_args(format_args!($($arg)*));
        }
    }};
}

/// Log through a [`Logger`] at warn level; see [`log_debug!`].
#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {{
        if ::log::log_enabled!(::log::Level::Warn) {
            ($logger).warn_args(format_args!($($arg)*));
        }
    }};
}

/// Log through a [`Logger`] at error level; see [`log_debug!`].
#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {{
        if ::log::log_enabled!(::log::Level::Error) {
            ($logger).error_args(format_args!($($arg)*));
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_prefix_hides_app_parent() {
        let root = Logger::new_root(Component::App, "mux-1");
        let child = root.with_component(Component::Router);
        assert_eq!(child.mux_id(), "mux-1");
        // prefix of a child of App is just the child component
        let display = ComponentPrefixDisplay {
            parent: Some(Component::App),
            component: Component::Router,
        };
        assert_eq!(format!("{display}"), "Router");

        let nested = ComponentPrefixDisplay {
            parent: Some(Component::Router),
            component: Component::Mq,
        };
        assert_eq!(format!("{nested}"), "Router.MQ");
    }

    #[test]
    fn namespace_and_method_context_propagate() {
        let root = Logger::new_root(Component::App, "mux-1");
        let logger = root
            .with_component(Component::Router)
            .with_namespace("default")
            .with_method("echo");
        assert_eq!(logger.namespace(), Some("default"));
        assert_eq!(logger.method(), Some("echo"));

        let child = logger.with_component(Component::Service);
        assert_eq!(child.namespace(), Some("default"));
    }
}

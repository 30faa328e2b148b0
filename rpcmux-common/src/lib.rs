// Shared utilities for the rpcmux workspace.
//
// Currently this is the structured logging layer: component-scoped loggers
// carrying a mux instance id plus namespace/method request context, and the
// log_* macros that skip disabled levels without building the message.

pub mod logging;

pub use logging::{Component, LogLevel, Logger, LoggingConfig};

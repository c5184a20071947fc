//! Process-wide error reporting
//!
//! Background ticks never propagate failures out of their loop; every
//! failure is handed to an [`ErrorHandler`] and the tick is retried on the
//! next interval.

use tracing::error;

use crate::error::EngineError;

pub trait ErrorHandler: Send + Sync {
    fn handle(&self, context: &'static str, error: &EngineError);

    /// Report a broken internal invariant, such as a verified count that
    /// disagrees with the number of records written
    fn invariant_violation(&self, context: &'static str, error: &EngineError) {
        error!(invariant = true, context, error = %error, "Internal invariant violated");
    }
}

/// Logs every error through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorHandler;

impl ErrorHandler for TracingErrorHandler {
    fn handle(&self, context: &'static str, error: &EngineError) {
        error!(context, error = %error, "Engine operation failed");
    }
}

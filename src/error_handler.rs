use crate::{DecisionError, Error, Result};

/// Policy applied to abnormal decision errors after they have been logged.
///
/// Returning `Ok(())` lets the decision fall back to "no variation". Returning an error makes the
/// public call fail with it.
pub trait ErrorHandler {
    fn handle_error(&self, error: DecisionError) -> Result<()>;
}

/// Swallows errors. This is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopErrorHandler;

impl ErrorHandler for NoopErrorHandler {
    fn handle_error(&self, _error: DecisionError) -> Result<()> {
        Ok(())
    }
}

/// Surfaces every error to the caller. Useful in development and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct RaiseErrorHandler;

impl ErrorHandler for RaiseErrorHandler {
    fn handle_error(&self, error: DecisionError) -> Result<()> {
        Err(Error::Decision(error))
    }
}

impl<T: Fn(DecisionError) -> Result<()>> ErrorHandler for T {
    fn handle_error(&self, error: DecisionError) -> Result<()> {
        self(error)
    }
}

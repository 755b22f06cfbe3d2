//! Error types for worker service setup.

/// Errors that can occur while setting up a worker before its main loop.
///
/// All initialization errors are fatal and prevent the worker from starting.
/// Once the loop runs, nothing that happens during job execution terminates
/// it: claim, sweep, update and result-recording failures are logged and
/// retried or absorbed, with stale reclaim as the backstop for any job whose
/// outcome went unreported.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// No handlers registered, so the worker could never complete a job.
    #[error("handler registry is empty")]
    NoHandlers,
}

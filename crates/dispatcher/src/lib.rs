pub mod dispatcher;
pub mod failure_detector;
pub mod retry;

#[cfg(test)]
pub(crate) mod test_utils;

pub use dispatcher::{CancelOutcome, Dispatcher, InFlight, InFlightMap};
pub use failure_detector::WorkerFailureDetector;
pub use retry::{RetryCoordinator, RetryDecision};

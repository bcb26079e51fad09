//! Clock abstraction and telemetry helpers.

pub mod clock;
pub mod telemetry;

pub use clock::{MockTimeSource, SystemTimeSource, TimeSource};
pub use telemetry::init_tracing;

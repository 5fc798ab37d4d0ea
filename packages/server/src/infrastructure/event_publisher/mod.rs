//! Implementations of the `EventPublisher` collaborator.
//!
//! - `logging`: writes events to the tracing log (default)
//! - `inmemory`: records events, for tests and local inspection

pub mod inmemory;
pub mod logging;

pub use inmemory::InMemoryEventPublisher;
pub use logging::TracingEventPublisher;

//! Domain layer: identities, envelopes, events and errors.

pub mod envelope;
pub mod error;
pub mod event;
pub mod value_object;

pub use envelope::{Envelope, EnvelopeKind, Identity, LeaveReason, Notice, OutboundFrame};
pub use error::{ConnectError, RouteError, ValueObjectError};
pub use event::{EventPublisher, MembershipEvent};
pub use value_object::{DisplayName, RoomId, RoomName, SessionId, UserId};

#[cfg(test)]
pub use event::MockEventPublisher;

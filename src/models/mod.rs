// Models module - pass domain types and the outbox table

pub mod outbox;
pub mod pass_metadata;
pub mod platform;
pub mod progress;

pub use outbox::{OutboxStatus, UpdateKind, UpdateOutboxRecord};
pub use pass_metadata::{IssuedCardSnapshot, PassMetadata};
pub use platform::Platform;
pub use progress::{CardKind, ProgressModel};

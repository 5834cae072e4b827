// Background jobs - outbox draining and its schedule

pub mod outbox_store;
pub mod pass_update_processor;
pub mod scheduler;

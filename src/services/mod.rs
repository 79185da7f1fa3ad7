pub mod notifier;
pub mod recurrence;
pub mod schedule_service;

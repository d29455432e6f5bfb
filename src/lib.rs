pub mod config;
pub mod engine;
pub mod limits;
pub mod mailer;
pub mod model;
pub mod observability;
pub mod outbox;
pub mod scheduler;
pub mod wal;

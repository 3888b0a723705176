pub mod bootstrap;
pub mod client;
pub mod cultivation;
pub mod error;
pub mod notifications;
pub mod scheduler;
pub mod session;

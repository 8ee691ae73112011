pub mod capture_session;
mod consumer;
pub mod producer;

//! API route handlers

pub mod health;
pub mod interop;
pub mod otlp_collector;

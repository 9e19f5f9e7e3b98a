//! Resilience patterns for provider calls.
//!
//! - Circuit breaker per provider key
//! - Token usage and cost accounting

mod budget;
mod circuit_breaker;

pub use budget::LlmUsage;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub mod approval;
pub mod circuit_breaker;
pub mod exceptions;
pub mod rate_limit;
pub mod validation;
pub mod whitelist;

pub use approval::{ApprovalManager, ApprovalPolicy};
pub use circuit_breaker::CircuitBreaker;
pub use exceptions::{ExceptionAction, ExceptionManager, ExceptionScope};
pub use rate_limit::{LocalRateLimiter, RateLimitBackend};
pub use validation::InputValidator;
pub use whitelist::ParameterWhitelist;

use dashmap::DashMap;

/// Every component of the safety envelope, wired together with one
/// circuit breaker per remediation action (lazily created).
pub struct SafetyEnvelope {
    pub validator: InputValidator,
    pub rate_limiter: Box<dyn RateLimitBackend>,
    pub whitelist: ParameterWhitelist,
    pub approval_policy: ApprovalPolicy,
    pub approval_manager: ApprovalManager,
    pub exceptions: ExceptionManager,
    circuit_breakers: DashMap<String, CircuitBreaker>,
    circuit_failure_threshold: u32,
    circuit_timeout_seconds: u64,
}

impl SafetyEnvelope {
    pub fn new(rate_limiter: Box<dyn RateLimitBackend>, circuit_failure_threshold: u32, circuit_timeout_seconds: u64) -> Self {
        Self {
            validator: InputValidator::new(),
            rate_limiter,
            whitelist: ParameterWhitelist::new(),
            approval_policy: ApprovalPolicy::default(),
            approval_manager: ApprovalManager::new(),
            exceptions: ExceptionManager::new(),
            circuit_breakers: DashMap::new(),
            circuit_failure_threshold,
            circuit_timeout_seconds,
        }
    }

    pub fn circuit_for(&self, action: &str) -> dashmap::mapref::one::RefMut<'_, String, CircuitBreaker> {
        self.circuit_breakers
            .entry(action.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.circuit_failure_threshold, self.circuit_timeout_seconds, 2))
    }
}

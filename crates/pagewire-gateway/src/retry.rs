//! Attempt budget per request, with mutating methods held to one attempt.

use pagewire_protocol::{MethodMatcher, RequestType};

/// Decides how many attempts a correlated request gets.
pub struct RetryPolicy {
    attempts: u32,
    retry_mutating: bool,
    mutations: MethodMatcher,
}

impl RetryPolicy {
    /// `attempts` is clamped to at least one.
    pub fn new(attempts: u32, retry_mutating: bool, mutations: MethodMatcher) -> Self {
        Self {
            attempts: attempts.max(1),
            retry_mutating,
            mutations,
        }
    }

    /// Whether `method` is classified as mutating.
    pub fn is_mutating(&self, method: &str) -> bool {
        self.mutations.matches(method)
    }

    /// Total attempts (first try included) for a request.
    pub fn attempts_for(&self, request_type: RequestType, method: Option<&str>) -> u32 {
        let mutating = request_type == RequestType::InvokeMethod
            && method.is_some_and(|m| self.is_mutating(m));
        if mutating && !self.retry_mutating {
            1
        } else {
            self.attempts
        }
    }
}

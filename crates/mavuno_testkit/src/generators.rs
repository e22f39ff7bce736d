//! Property-based test generators using proptest.
//!
//! Provides strategies for generating request plans against the engine.

use mavuno_sync_engine::Method;
use proptest::prelude::*;
use serde_json::{Map, Value};

/// A request to issue against the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRequest {
    /// Target endpoint.
    pub endpoint: String,
    /// Request method.
    pub method: Method,
    /// Request body.
    pub payload: Option<Value>,
}

/// Strategy for generating endpoint paths such as `/orders` or `/weather/Arusha`.
pub fn endpoint_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("/[a-z]{1,8}(/[A-Za-z0-9]{1,8})?").expect("Invalid regex")
}

/// Strategy for generating mutating methods.
pub fn mutation_method_strategy() -> impl Strategy<Value = Method> {
    prop_oneof![Just(Method::Post), Just(Method::Put), Just(Method::Delete)]
}

/// Strategy for generating any method.
pub fn method_strategy() -> impl Strategy<Value = Method> {
    prop_oneof![Just(Method::Get), mutation_method_strategy()]
}

/// Strategy for generating small JSON object bodies, or none.
pub fn payload_strategy() -> impl Strategy<Value = Option<Value>> {
    prop::option::of(
        prop::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..4).prop_map(|fields| {
            Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<Map<String, Value>>(),
            )
        }),
    )
}

/// Strategy for generating mutating requests.
pub fn mutation_strategy() -> impl Strategy<Value = PlannedRequest> {
    (endpoint_strategy(), mutation_method_strategy(), payload_strategy()).prop_map(
        |(endpoint, method, payload)| PlannedRequest {
            endpoint,
            method,
            payload,
        },
    )
}

/// Strategy for generating requests of any method. GET requests carry no body.
pub fn request_strategy() -> impl Strategy<Value = PlannedRequest> {
    (endpoint_strategy(), method_strategy(), payload_strategy()).prop_map(
        |(endpoint, method, payload)| PlannedRequest {
            endpoint,
            payload: if method.is_mutation() { payload } else { None },
            method,
        },
    )
}

/// Strategy for generating a sequence of requests.
pub fn request_plan_strategy(max_len: usize) -> impl Strategy<Value = Vec<PlannedRequest>> {
    prop::collection::vec(request_strategy(), 0..=max_len)
}

/// Strategy for generating cache TTLs in milliseconds (1 ms to about 3 hours).
pub fn ttl_millis_strategy() -> impl Strategy<Value = u64> {
    1u64..10_000_000
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

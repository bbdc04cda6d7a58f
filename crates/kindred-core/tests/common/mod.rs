//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use kindred_core::{
    EngineConfig, GenerationRequest, InMemoryActivityRepository, KindredError, KindredResult,
    ManualClock, ResponseGenerator, ResponseRuntime,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap()
}

/// Always answers with a canned line naming the persona.
#[derive(Default)]
pub struct EchoGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ResponseGenerator for EchoGenerator {
    async fn generate(&self, request: &GenerationRequest) -> KindredResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} says hi", request.persona.name))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// Fails until switched on.
#[derive(Default)]
pub struct SwitchGenerator {
    pub healthy: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl ResponseGenerator for SwitchGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> KindredResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok("back online".to_string())
        } else {
            Err(KindredError::generation("upstream unavailable"))
        }
    }
}

pub struct Harness {
    pub runtime: ResponseRuntime,
    pub clock: Arc<ManualClock>,
    pub repository: Arc<InMemoryActivityRepository>,
}

pub fn harness(generator: Arc<dyn ResponseGenerator>, seed: u64) -> Harness {
    harness_with(EngineConfig::default(), generator, seed)
}

pub fn harness_with(
    config: EngineConfig,
    generator: Arc<dyn ResponseGenerator>,
    seed: u64,
) -> Harness {
    let clock = Arc::new(ManualClock::new(t0()));
    let repository = Arc::new(InMemoryActivityRepository::new());
    let runtime = ResponseRuntime::with_parts(
        config,
        repository.clone(),
        generator,
        clock.clone(),
        Some(seed),
    )
    .unwrap();
    Harness {
        runtime,
        clock,
        repository,
    }
}

//! End-to-end checks of the emission invariants.
//!
//! Each test drives a runtime on a manual clock through a simulated day and
//! inspects the persisted emissions afterwards.

mod common;

use chrono::Duration;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{harness, t0, EchoGenerator, Harness, SwitchGenerator};
use kindred_core::{
    ActivityRepository, DropReason, EmissionRecord, EngineConfig, EngineEvent, InteractionLevel,
    JournalEntry, NewEntry, PolicyTable, ProbabilityEngine, ResponseKind, Tier, UserSettings,
    UserTierProfile,
};

/// Submit `entries` entries a few minutes apart, then tick every five
/// minutes until everything has either been emitted or expired.
async fn simulate_day(h: &Harness, user_id: &str, entries: usize) {
    h.runtime.start().await.unwrap();
    for i in 0..entries {
        h.runtime
            .submit_entry(NewEntry::new(user_id, format!("entry number {}", i + 1)))
            .await
            .unwrap();
        h.clock.advance(Duration::minutes(7));
        h.runtime.trigger_cycle_now().await.unwrap();
    }
    for _ in 0..200 {
        h.clock.advance(Duration::minutes(5));
        h.runtime.trigger_cycle_now().await.unwrap();
    }
    h.runtime.stop().await.unwrap();
}

fn by_day(emissions: &[EmissionRecord]) -> HashMap<chrono::NaiveDate, Vec<&EmissionRecord>> {
    let mut days: HashMap<_, Vec<_>> = HashMap::new();
    for e in emissions {
        days.entry(e.emitted_at.date_naive()).or_default().push(e);
    }
    for list in days.values_mut() {
        list.sort_by_key(|e| e.emitted_at);
    }
    days
}

fn assert_spacing(emissions: &[EmissionRecord]) {
    for (day, list) in by_day(emissions) {
        for pair in list.windows(2) {
            let gap = pair[1].emitted_at - pair[0].emitted_at;
            assert!(
                gap >= Duration::minutes(30),
                "emissions on {} only {} minutes apart",
                day,
                gap.num_minutes()
            );
        }
    }
}

fn assert_single_reply(emissions: &[EmissionRecord]) {
    let mut replies: HashMap<&str, usize> = HashMap::new();
    for e in emissions.iter().filter(|e| e.response_kind == ResponseKind::Reply) {
        *replies.entry(e.entry_id.as_str()).or_default() += 1;
    }
    for (entry_id, count) in replies {
        assert!(count <= 1, "entry {} got {} replies", entry_id, count);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spacing_cap_and_single_reply_for_free_user() {
    let h = harness(Arc::new(EchoGenerator::default()), 17);
    simulate_day(&h, "free-user", 10).await;

    let emissions = h.runtime.list_emissions("free-user").await.unwrap();
    assert!(!emissions.is_empty());
    assert_spacing(&emissions);
    assert_single_reply(&emissions);

    let cap = PolicyTable::default().daily_cap(Tier::Free, InteractionLevel::Normal) as usize;
    for (day, list) in by_day(&emissions) {
        assert!(list.len() <= cap, "{} emissions on {}", list.len(), day);
    }
    // Free users only ever hear from non-premium personas
    assert!(emissions.iter().all(|e| e.persona_id.as_str() == "pulse"));
    assert!(h.runtime.queue().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spacing_cap_and_single_reply_for_premium_user() {
    let h = harness(Arc::new(EchoGenerator::default()), 99);
    h.runtime
        .save_user_settings(&UserSettings::new("vip", Tier::Premium, InteractionLevel::High))
        .await
        .unwrap();
    simulate_day(&h, "vip", 12).await;

    let emissions = h.runtime.list_emissions("vip").await.unwrap();
    assert_spacing(&emissions);
    assert_single_reply(&emissions);

    let cap = PolicyTable::default().daily_cap(Tier::Premium, InteractionLevel::High) as usize;
    for (_, list) in by_day(&emissions) {
        assert!(list.len() <= cap);
    }

    let counters = h
        .repository
        .get_daily_counter("vip", t0().date_naive())
        .await
        .unwrap();
    assert_eq!(counters.emission_count as usize, by_day(&emissions)[&t0().date_naive()].len());
}

#[tokio::test]
async fn test_inactive_profiles_never_get_candidates() {
    let engine = ProbabilityEngine::from_config(&EngineConfig::default());
    let now = t0();
    let entry = JournalEntry {
        entry_id: "e1".to_string(),
        user_id: "ghost".to_string(),
        created_at: now,
        entry_date: now.date_naive(),
        daily_sequence_number: 1,
    };

    for tier in [Tier::Free, Tier::Premium] {
        for level in [InteractionLevel::Low, InteractionLevel::Normal, InteractionLevel::High] {
            let profile = UserTierProfile::active("ghost", tier, level).inactive();
            for seed in 0..200 {
                let mut rng = StdRng::seed_from_u64(seed);
                let candidates = engine
                    .compute_candidates(&profile, &entry, false, now, &mut rng)
                    .unwrap();
                assert!(candidates.is_empty());
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_expired_candidates_are_never_emitted() {
    let generator = Arc::new(SwitchGenerator::default());
    let h = harness(generator.clone(), 3);
    let mut events = h.runtime.subscribe();

    h.runtime.start().await.unwrap();
    let report = h
        .runtime
        .submit_entry(NewEntry::new("u1", "nobody answers"))
        .await
        .unwrap();
    assert!(!report.candidates.is_empty());

    // Generation keeps failing past the horizon
    for _ in 0..30 {
        h.clock.advance(Duration::minutes(30));
        h.runtime.trigger_cycle_now().await.unwrap();
    }
    assert!(generator.calls.load(Ordering::SeqCst) > 0);
    assert!(h.runtime.queue().is_empty());

    generator.healthy.store(true, Ordering::SeqCst);
    h.clock.advance(Duration::minutes(30));
    h.runtime.trigger_cycle_now().await.unwrap();
    h.runtime.stop().await.unwrap();

    assert!(h.runtime.list_emissions("u1").await.unwrap().is_empty());

    let status = h.runtime.status();
    assert_eq!(status.emitted_total, 0);
    assert_eq!(status.dropped_total as usize, report.candidates.len());
    assert!(status.failed_attempts_total > 0);

    let expired = events
        .drain()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                EngineEvent::CandidateDropped {
                    reason: DropReason::Expired,
                    ..
                }
            )
        })
        .count();
    assert_eq!(expired, report.candidates.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_due_candidate_past_horizon_is_dropped_not_sent() {
    let generator = Arc::new(EchoGenerator::default());
    let h = harness(generator.clone(), 8);
    h.runtime.start().await.unwrap();
    h.runtime
        .submit_entry(NewEntry::new("u1", "late night"))
        .await
        .unwrap();

    // First tick happens long after every candidate expired
    h.clock.advance(Duration::hours(14));
    let tick = h.runtime.trigger_cycle_now().await.unwrap();
    h.runtime.stop().await.unwrap();

    assert_eq!(tick.emitted, 0);
    assert!(tick.dropped > 0);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    assert!(h.runtime.list_emissions("u1").await.unwrap().is_empty());
}

//! Corpus invariants over seeds and sizes.

use chrono::{TimeZone, Timelike, Utc};
use eventsynth_gen::{assemble, AnomalyPattern, GenerateConfig};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

fn config(total: usize, ratio: f64) -> GenerateConfig {
    GenerateConfig::new(total, ratio).with_anchor(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn corpus_invariants_hold(seed in any::<u64>(), total in 200usize..3000, ratio_pct in 0u32..=20) {
        let ratio = f64::from(ratio_pct) / 100.0;
        let cfg = config(total, ratio);
        let corpus = assemble(&mut StdRng::seed_from_u64(seed), &cfg).unwrap();
        let events = corpus.events();

        prop_assert_eq!(events.len(), total);

        let ids: HashSet<_> = events.iter().map(|e| e.event_id.clone()).collect();
        prop_assert_eq!(ids.len(), events.len());

        prop_assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let marked = events.iter().filter(|e| e.is_anomaly()).count();
        prop_assert_eq!(marked, corpus.anomaly_events());
        prop_assert!(marked >= cfg.target_anomaly_events());
        prop_assert!(marked < cfg.target_anomaly_events() + 15 || cfg.target_anomaly_events() == 0);
        prop_assert!(events.iter().all(|e| cfg.population.contains(&e.user_id)));
    }
}

#[test]
fn same_seed_same_corpus() {
    let cfg = config(2000, 0.05);
    let a = assemble(&mut StdRng::seed_from_u64(42), &cfg).unwrap();
    let b = assemble(&mut StdRng::seed_from_u64(42), &cfg).unwrap();
    assert_eq!(a.events(), b.events());
    assert_eq!(a.bursts(), b.bursts());

    let c = assemble(&mut StdRng::seed_from_u64(43), &cfg).unwrap();
    assert_ne!(a.events(), c.events());
}

#[test]
fn thousand_events_five_percent() {
    let cfg = config(1000, 0.05);
    let corpus = assemble(&mut StdRng::seed_from_u64(7), &cfg).unwrap();
    assert_eq!(corpus.len(), 1000);
    let marked = corpus.events().iter().filter(|e| e.is_anomaly()).count();
    // One burst of slack: 10..=15 events per burst.
    assert!((50..65).contains(&marked), "marked = {marked}");
    assert!(corpus
        .events()
        .windows(2)
        .all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn large_sample_contains_every_pattern() {
    let cfg = config(20_000, 0.05);
    let corpus = assemble(&mut StdRng::seed_from_u64(2024), &cfg).unwrap();
    let seen: HashSet<_> = corpus.bursts().iter().map(|b| b.pattern).collect();
    for pattern in AnomalyPattern::ALL {
        assert!(seen.contains(&pattern), "missing {pattern}");
    }

    // Late-night bursts are recognisable in the sorted corpus.
    for burst in corpus
        .bursts()
        .iter()
        .filter(|b| b.pattern == AnomalyPattern::LateNightHighValue)
    {
        let hits = corpus
            .events()
            .iter()
            .filter(|e| e.user_id == burst.user_id && e.is_anomaly())
            .count();
        assert_eq!(hits, burst.len);
    }
    assert!(corpus
        .events()
        .iter()
        .filter(|e| matches!(
            e.anomaly_marker(),
            Some(eventsynth_model::AnomalyMarker::UnusualHour)
        ))
        .all(|e| e.timestamp.hour() == 3));
}

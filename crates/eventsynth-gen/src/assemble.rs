//! Corpus assembly: anomaly bursts first, then normal events, then one sort.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rand::seq::index;
use rand::Rng;
use serde::Serialize;

use eventsynth_model::Event;

use crate::synth::{normal_event, AnomalyPattern};
use crate::AssembleError;

pub const DEFAULT_POPULATION: usize = 500;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;
pub const DEFAULT_ANOMALY_RATIO: f64 = 0.05;

/// Users hosting one burst each, per anomaly event wanted.
const EVENTS_PER_ANOMALY_USER: usize = 10;

const PROGRESS_EVERY: usize = 10_000;

/// Stable user ids `user_1 ..= user_N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Population {
    size: usize,
}

impl Population {
    pub fn new(size: usize) -> Result<Self, AssembleError> {
        if size == 0 {
            return Err(AssembleError::EmptyPopulation);
        }
        Ok(Self { size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn user_id(&self, index: usize) -> String {
        format!("user_{}", index + 1)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        user_id
            .strip_prefix("user_")
            .and_then(|n| n.parse::<usize>().ok())
            .map_or(false, |n| (1..=self.size).contains(&n))
    }
}

impl Default for Population {
    fn default() -> Self {
        Self {
            size: DEFAULT_POPULATION,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateConfig {
    pub total_events: usize,
    pub anomaly_ratio: f64,
    pub population: Population,
    /// Events fall in `[anchor - lookback, anchor]` (late-night bursts may shift within the same day).
    pub lookback: Duration,
    pub anchor: DateTime<Utc>,
}

impl GenerateConfig {
    pub fn new(total_events: usize, anomaly_ratio: f64) -> Self {
        Self {
            total_events,
            anomaly_ratio,
            population: Population::default(),
            lookback: Duration::days(DEFAULT_LOOKBACK_DAYS),
            anchor: Utc::now().trunc_subsecs(0),
        }
    }

    pub fn with_population(mut self, population: Population) -> Self {
        self.population = population;
        self
    }

    pub fn with_anchor(mut self, anchor: DateTime<Utc>) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// `floor(total_events * anomaly_ratio)`.
    pub fn target_anomaly_events(&self) -> usize {
        (self.total_events as f64 * self.anomaly_ratio).floor() as usize
    }

    fn validate(&self) -> Result<(), AssembleError> {
        if !self.anomaly_ratio.is_finite() || !(0.0..=1.0).contains(&self.anomaly_ratio) {
            return Err(AssembleError::InvalidRatio(self.anomaly_ratio));
        }
        if self.lookback < Duration::zero() {
            return Err(AssembleError::NegativeLookback);
        }
        Ok(())
    }
}

/// Where one burst landed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BurstSummary {
    pub pattern: AnomalyPattern,
    pub user_id: String,
    pub start: DateTime<Utc>,
    pub len: usize,
}

/// The time-ordered events of one generation run.
#[derive(Debug, Clone)]
pub struct Corpus {
    events: Vec<Event>,
    bursts: Vec<BurstSummary>,
    anomaly_events: usize,
    target_anomaly_events: usize,
}

impl Corpus {
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn bursts(&self) -> &[BurstSummary] {
        &self.bursts
    }

    /// Events contributed by bursts.
    pub fn anomaly_events(&self) -> usize {
        self.anomaly_events
    }

    pub fn target_anomaly_events(&self) -> usize {
        self.target_anomaly_events
    }
}

/// Build one corpus.
///
/// Bursts are admitted whole until the anomaly count reaches the target, so the
/// count may overshoot by up to one burst (at most 14 events). Hosts are drawn
/// without replacement: first `target / 10` users, then further users only if
/// the target is still unmet. Normal events fill up to `total_events`; if the
/// bursts alone exceed it the corpus is longer than `total_events`.
pub fn assemble<R: Rng + ?Sized>(rng: &mut R, config: &GenerateConfig) -> Result<Corpus, AssembleError> {
    config.validate()?;

    let population = config.population;
    let base = config.anchor - config.lookback;
    let window_minutes = config.lookback.num_minutes();
    let target = config.target_anomaly_events();
    let planned_hosts = (target / EVENTS_PER_ANOMALY_USER).min(population.size());

    let mut events: Vec<Event> = Vec::with_capacity(config.total_events);
    let mut bursts = Vec::new();
    let mut anomaly_events = 0usize;

    if target > 0 {
        let hosts = index::sample(rng, population.size(), population.size());
        for (slot, user_index) in hosts.into_iter().enumerate() {
            if anomaly_events >= target {
                break;
            }
            if slot == planned_hosts {
                tracing::debug!(
                    planned_hosts,
                    anomaly_events,
                    target,
                    "anomaly target not reached by planned hosts; drawing more users"
                );
            }
            let user_id = population.user_id(user_index);
            let pattern = AnomalyPattern::random(rng);
            let start = base + Duration::minutes(rng.gen_range(0..=window_minutes));
            let burst = pattern.generate(rng, &user_id, start);

            bursts.push(BurstSummary {
                pattern,
                user_id,
                start,
                len: burst.len(),
            });
            anomaly_events += burst.len();
            events.extend(burst.into_events());
        }
        if anomaly_events < target {
            tracing::warn!(
                anomaly_events,
                target,
                population = population.size(),
                "population exhausted before anomaly target"
            );
        }
    }
    tracing::info!(anomaly_events, bursts = bursts.len(), "generated anomaly events");

    let normal_needed = config.total_events.saturating_sub(events.len());
    tracing::info!(normal_needed, "generating normal events");
    for i in 0..normal_needed {
        let user_id = population.user_id(rng.gen_range(0..population.size()));
        let ts = base + Duration::minutes(rng.gen_range(0..=window_minutes));
        events.push(normal_event(rng, &user_id, ts));
        if (i + 1) % PROGRESS_EVERY == 0 {
            tracing::debug!(done = i + 1, normal_needed, "normal event progress");
        }
    }

    // Stable: equal timestamps keep insertion order.
    events.sort_by_key(|e| e.timestamp);

    tracing::info!(total = events.len(), "corpus assembled");
    Ok(Corpus {
        events,
        bursts,
        anomaly_events,
        target_anomaly_events: target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(total: usize, ratio: f64) -> GenerateConfig {
        GenerateConfig::new(total, ratio)
            .with_anchor(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn zero_ratio_yields_only_normal_events() {
        let mut rng = StdRng::seed_from_u64(1);
        let corpus = assemble(&mut rng, &config(300, 0.0)).unwrap();
        assert_eq!(corpus.len(), 300);
        assert!(corpus.bursts().is_empty());
        assert!(corpus.events().iter().all(|e| !e.is_anomaly()));
    }

    #[test]
    fn small_targets_still_get_a_burst() {
        // target 5 -> 0 planned hosts; top-up must still reach it.
        let mut rng = StdRng::seed_from_u64(2);
        let corpus = assemble(&mut rng, &config(1000, 0.005)).unwrap();
        assert!(corpus.anomaly_events() >= 5);
        assert_eq!(corpus.len(), 1000);
    }

    #[test]
    fn burst_hosts_are_distinct_users_from_population() {
        let mut rng = StdRng::seed_from_u64(3);
        let cfg = config(5000, 0.2).with_population(Population::new(50).unwrap());
        let corpus = assemble(&mut rng, &cfg).unwrap();
        let mut hosts: Vec<_> = corpus.bursts().iter().map(|b| b.user_id.clone()).collect();
        let n = hosts.len();
        hosts.sort();
        hosts.dedup();
        assert_eq!(hosts.len(), n);
        assert!(corpus
            .events()
            .iter()
            .all(|e| cfg.population.contains(&e.user_id)));
    }

    #[test]
    fn exhausted_population_caps_anomalies() {
        let mut rng = StdRng::seed_from_u64(4);
        let cfg = config(1000, 1.0).with_population(Population::new(2).unwrap());
        let corpus = assemble(&mut rng, &cfg).unwrap();
        assert_eq!(corpus.bursts().len(), 2);
        assert!(corpus.anomaly_events() < corpus.target_anomaly_events());
        assert_eq!(corpus.len(), 1000);
    }

    #[test]
    fn rejects_bad_ratio_and_population() {
        let mut rng = StdRng::seed_from_u64(5);
        assert!(matches!(
            assemble(&mut rng, &config(10, 1.5)),
            Err(AssembleError::InvalidRatio(_))
        ));
        assert!(matches!(
            assemble(&mut rng, &config(10, f64::NAN)),
            Err(AssembleError::InvalidRatio(_))
        ));
        assert!(matches!(Population::new(0), Err(AssembleError::EmptyPopulation)));
    }

    #[test]
    fn population_membership() {
        let p = Population::new(500).unwrap();
        assert!(p.contains("user_1"));
        assert!(p.contains("user_500"));
        assert!(!p.contains("user_0"));
        assert!(!p.contains("user_501"));
        assert!(!p.contains("admin"));
    }
}

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::info;

/// What a single [`SuggestionScheduler::update`] call did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Picked(String),
    Cleared,
    Unchanged,
}

/// Picks a random label every `display_duration` while a face is in view and
/// drops it after `2 * display_duration` without one.
pub struct SuggestionScheduler {
    labels: Vec<String>,
    display_duration: Duration,
    current_label: Option<String>,
    last_face_seen_at: Option<Instant>,
    last_switch_at: Option<Instant>,
}

impl SuggestionScheduler {
    pub fn new(labels: Vec<String>, display_duration: Duration) -> Self {
        Self {
            labels,
            display_duration,
            current_label: None,
            last_face_seen_at: None,
            last_switch_at: None,
        }
    }

    pub fn current_label(&self) -> Option<&str> {
        self.current_label.as_deref()
    }

    pub fn update<R: Rng>(
        &mut self,
        now: Instant,
        face_detected: bool,
        rng: &mut R,
    ) -> Transition {
        if face_detected {
            self.last_face_seen_at = Some(now);
            if !elapsed_more_than(self.last_switch_at, now, self.display_duration) {
                return Transition::Unchanged;
            }
            if self.labels.is_empty() {
                return Transition::Unchanged;
            }
            let label = self.labels[rng.gen_range(0..self.labels.len())].clone();
            info!(label = %label, "new suggestion");
            self.current_label = Some(label.clone());
            self.last_switch_at = Some(now);
            Transition::Picked(label)
        } else {
            if !elapsed_more_than(self.last_face_seen_at, now, self.display_duration.saturating_mul(2)) {
                return Transition::Unchanged;
            }
            // a returning face waits a full duration before the next pick
            self.last_switch_at = Some(now);
            match self.current_label.take() {
                Some(label) => {
                    info!(label = %label, "no face for a while, clearing suggestion");
                    Transition::Cleared
                }
                None => Transition::Unchanged,
            }
        }
    }
}

/// `None` means the event never happened, which counts as long ago.
fn elapsed_more_than(since: Option<Instant>, now: Instant, limit: Duration) -> bool {
    match since {
        Some(at) => now.saturating_duration_since(at) > limit,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    const DURATION: Duration = Duration::from_secs(3);

    fn labels() -> Vec<String> {
        ["Sassy Sloth", "Goofy Goat", "Grumpy Cat"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn at(start: Instant, millis: u64) -> Instant {
        start + Duration::from_millis(millis)
    }

    #[test]
    fn first_face_picks_immediately() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut scheduler = SuggestionScheduler::new(labels(), DURATION);
        let start = Instant::now();

        match scheduler.update(start, true, &mut rng) {
            Transition::Picked(label) => assert!(labels().contains(&label)),
            other => panic!("expected a pick, got {other:?}"),
        }
        assert!(scheduler.current_label().is_some());
    }

    #[test]
    fn rerolls_once_per_duration_with_face_present() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut scheduler = SuggestionScheduler::new(labels(), DURATION);
        let start = Instant::now();

        // 30 fps for 20 seconds
        let mut picks = Vec::new();
        for frame in 0..600u64 {
            let now = at(start, frame * 1000 / 30);
            if let Transition::Picked(label) = scheduler.update(now, true, &mut rng) {
                assert!(labels().contains(&label));
                picks.push(now);
            }
        }

        assert!(picks.len() >= 6, "only {} picks", picks.len());
        for pair in picks.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap > DURATION, "re-rolled after {gap:?}");
            assert!(gap <= DURATION + Duration::from_millis(34), "waited {gap:?}");
        }
    }

    #[test]
    fn clears_after_double_duration_without_face() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut scheduler = SuggestionScheduler::new(labels(), DURATION);
        let start = Instant::now();

        scheduler.update(start, true, &mut rng);
        assert!(scheduler.current_label().is_some());

        assert_eq!(scheduler.update(at(start, 5_000), false, &mut rng), Transition::Unchanged);
        assert_eq!(scheduler.update(at(start, 6_000), false, &mut rng), Transition::Unchanged);
        assert!(scheduler.current_label().is_some());

        assert_eq!(scheduler.update(at(start, 6_001), false, &mut rng), Transition::Cleared);
        assert_eq!(scheduler.current_label(), None);
        assert_eq!(scheduler.update(at(start, 9_000), false, &mut rng), Transition::Unchanged);
    }

    #[test]
    fn short_gaps_keep_the_suggestion() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut scheduler = SuggestionScheduler::new(labels(), DURATION);
        let start = Instant::now();

        scheduler.update(start, true, &mut rng);
        let first = scheduler.current_label().map(str::to_owned);
        scheduler.update(at(start, 1_000), false, &mut rng);
        scheduler.update(at(start, 2_000), true, &mut rng);
        scheduler.update(at(start, 7_000), false, &mut rng);
        assert_eq!(scheduler.current_label().map(str::to_owned), first);
    }

    #[test]
    fn returning_face_waits_one_duration() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut scheduler = SuggestionScheduler::new(labels(), DURATION);
        let start = Instant::now();

        scheduler.update(start, true, &mut rng);
        assert_eq!(scheduler.update(at(start, 10_000), false, &mut rng), Transition::Cleared);

        assert_eq!(scheduler.update(at(start, 10_100), true, &mut rng), Transition::Unchanged);
        assert_eq!(scheduler.current_label(), None);
        assert!(matches!(
            scheduler.update(at(start, 13_001), true, &mut rng),
            Transition::Picked(_)
        ));
    }

    #[test]
    fn startup_without_face_stays_idle() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut scheduler = SuggestionScheduler::new(labels(), DURATION);
        let start = Instant::now();

        assert_eq!(scheduler.update(start, false, &mut rng), Transition::Unchanged);
        assert_eq!(scheduler.current_label(), None);
    }

    #[test]
    fn empty_label_set_never_picks() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut scheduler = SuggestionScheduler::new(Vec::new(), DURATION);
        let start = Instant::now();

        assert_eq!(scheduler.update(start, true, &mut rng), Transition::Unchanged);
        assert_eq!(scheduler.current_label(), None);
    }

    #[test]
    fn huge_duration_does_not_overflow() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut scheduler = SuggestionScheduler::new(labels(), Duration::from_secs_f64(1e19));
        let start = Instant::now();

        assert!(matches!(scheduler.update(start, true, &mut rng), Transition::Picked(_)));
        assert_eq!(scheduler.update(at(start, 1_000), false, &mut rng), Transition::Unchanged);
        assert_eq!(scheduler.update(at(start, 2_000), true, &mut rng), Transition::Unchanged);
        assert!(scheduler.current_label().is_some());

        let mut scheduler = SuggestionScheduler::new(labels(), Duration::MAX);
        scheduler.update(start, true, &mut rng);
        assert_eq!(scheduler.update(at(start, 1_000), false, &mut rng), Transition::Unchanged);
    }

    #[test]
    fn seeded_runs_repeat() {
        let run = || {
            let mut rng = StdRng::seed_from_u64(1234);
            let mut scheduler = SuggestionScheduler::new(labels(), DURATION);
            let start = Instant::now();
            (0..10u64)
                .filter_map(|step| match scheduler.update(at(start, step * 3_100), true, &mut rng) {
                    Transition::Picked(label) => Some(label),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        let first = run();
        assert_eq!(first.len(), 10);
        assert_eq!(first, run());
    }
}

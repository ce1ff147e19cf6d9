//! Session telemetry
//!
//! Accumulates per-attempt grading into a running score, combo, and a
//! per-pitch-class heatmap. Everything here is a pure function of the
//! attempt sequence since the last reset, so replaying the same events
//! yields identical statistics.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::pitch::note;

/// Grading thresholds and score weights
///
/// All values are product tuning, exposed so the apps can rebalance
/// difficulty without an engine change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Timing windows (absolute error, milliseconds)
    pub perfect_ms: f32,
    pub great_ms: f32,
    pub good_ms: f32,
    /// Pitch windows (absolute deviation, cents)
    pub perfect_cents: f32,
    pub great_cents: f32,
    pub good_cents: f32,
    /// Base points per grade
    pub perfect_points: u64,
    pub great_points: u64,
    pub good_points: u64,
    /// Extra score fraction per combo step, applied up to `combo_cap`
    pub combo_bonus: f32,
    pub combo_cap: u32,
    /// Cents spread at which a note's stability score halves
    pub stability_cents: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            perfect_ms: 40.0,
            great_ms: 90.0,
            good_ms: 150.0,
            perfect_cents: 10.0,
            great_cents: 25.0,
            good_cents: 45.0,
            perfect_points: 100,
            great_points: 60,
            good_points: 30,
            combo_bonus: 0.1,
            combo_cap: 10,
            stability_cents: 15.0,
        }
    }
}

/// Outcome of a single note attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Grade {
    Perfect,
    Great,
    Good,
    Miss,
}

impl Grade {
    fn base_points(self, config: &ScoringConfig) -> u64 {
        match self {
            Grade::Perfect => config.perfect_points,
            Grade::Great => config.great_points,
            Grade::Good => config.good_points,
            Grade::Miss => 0,
        }
    }
}

/// One performance event, as supplied by the calling tool
///
/// Timing and pitch deviation are measured by the caller against its
/// own exercise material; the engine only grades and aggregates.
#[derive(Debug, Clone, Copy)]
pub struct NoteAttempt {
    pub note_index: i32,
    /// Deviation from the target pitch, cents
    pub cents_offset: f32,
    /// Signed distance from the target beat, milliseconds
    pub timing_error_ms: f32,
    /// Hardware-clock onset, used for inter-onset jitter
    pub onset_ms: f64,
}

/// Snapshot of one pitch class's running aggregate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteStat {
    pub hits: u32,
    pub misses: u32,
    pub avg_cents_diff: f32,
    /// 0..1, higher when the cents spread is tight
    pub stability: f32,
    /// Mean absolute change between successive inter-onset gaps
    pub jitter_ms: f32,
}

/// Running accumulator behind a [`NoteStat`]
#[derive(Debug, Clone, Default)]
struct NoteAccum {
    hits: u32,
    misses: u32,
    cents_sum: f64,
    cents_sq_sum: f64,
    last_onset_ms: Option<f64>,
    last_gap_ms: Option<f64>,
    jitter_sum: f64,
    jitter_count: u32,
}

impl NoteAccum {
    fn observe(&mut self, attempt: &NoteAttempt, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }

        let cents = attempt.cents_offset as f64;
        self.cents_sum += cents;
        self.cents_sq_sum += cents * cents;

        if let Some(last) = self.last_onset_ms {
            let gap = attempt.onset_ms - last;
            if let Some(prev_gap) = self.last_gap_ms {
                self.jitter_sum += (gap - prev_gap).abs();
                self.jitter_count += 1;
            }
            self.last_gap_ms = Some(gap);
        }
        self.last_onset_ms = Some(attempt.onset_ms);
    }

    fn snapshot(&self, config: &ScoringConfig) -> NoteStat {
        let n = (self.hits + self.misses).max(1) as f64;
        let mean = self.cents_sum / n;
        let variance = (self.cents_sq_sum / n - mean * mean).max(0.0);
        let spread = variance.sqrt();

        NoteStat {
            hits: self.hits,
            misses: self.misses,
            avg_cents_diff: mean as f32,
            stability: (1.0 / (1.0 + spread / config.stability_cents as f64)) as f32,
            jitter_ms: if self.jitter_count > 0 {
                (self.jitter_sum / self.jitter_count as f64) as f32
            } else {
                0.0
            },
        }
    }
}

/// Point-in-time session summary
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionStats {
    pub total_beats: u32,
    pub on_target_beats: u32,
    pub score: u64,
    pub max_combo: u32,
    /// Mean resonance observed over the session, 0..1
    pub resonance: f32,
}

/// Running session state, owned by one graph instance
pub struct SessionTracker {
    config: ScoringConfig,
    notes: HashMap<usize, NoteAccum>,
    total_beats: u32,
    on_target_beats: u32,
    score: u64,
    combo: u32,
    max_combo: u32,
    resonance_sum: f64,
    resonance_count: u64,
}

impl SessionTracker {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config,
            notes: HashMap::new(),
            total_beats: 0,
            on_target_beats: 0,
            score: 0,
            combo: 0,
            max_combo: 0,
            resonance_sum: 0.0,
            resonance_count: 0,
        }
    }

    /// Grade an attempt and fold it into the running aggregates
    pub fn record_attempt(&mut self, attempt: &NoteAttempt) -> Grade {
        let grade = self.grade(attempt);

        self.total_beats += 1;
        if grade == Grade::Miss {
            self.combo = 0;
        } else {
            self.on_target_beats += 1;
            self.combo += 1;
            self.max_combo = self.max_combo.max(self.combo);

            let bonus_steps = self.combo.min(self.config.combo_cap) as f32;
            let multiplier = 1.0 + self.config.combo_bonus * bonus_steps;
            self.score += (grade.base_points(&self.config) as f32 * multiplier).round() as u64;
        }

        self.notes
            .entry(note::pitch_class(attempt.note_index))
            .or_default()
            .observe(attempt, grade != Grade::Miss);

        grade
    }

    /// The worse of the timing and pitch classifications
    fn grade(&self, attempt: &NoteAttempt) -> Grade {
        let c = &self.config;
        let timing = attempt.timing_error_ms.abs();
        let cents = attempt.cents_offset.abs();

        let timing_grade = if timing <= c.perfect_ms {
            Grade::Perfect
        } else if timing <= c.great_ms {
            Grade::Great
        } else if timing <= c.good_ms {
            Grade::Good
        } else {
            Grade::Miss
        };
        let pitch_grade = if cents <= c.perfect_cents {
            Grade::Perfect
        } else if cents <= c.great_cents {
            Grade::Great
        } else if cents <= c.good_cents {
            Grade::Good
        } else {
            Grade::Miss
        };

        timing_grade.max(pitch_grade)
    }

    /// Fold one resonance reading into the session average
    pub fn observe_resonance(&mut self, resonance: f32) {
        self.resonance_sum += resonance as f64;
        self.resonance_count += 1;
    }

    /// Current combo streak
    pub fn combo(&self) -> u32 {
        self.combo
    }

    /// Heatmap entry for one pitch class (0..12, C = 0)
    pub fn note_stat(&self, pitch_class: usize) -> Option<NoteStat> {
        self.notes.get(&pitch_class).map(|a| a.snapshot(&self.config))
    }

    /// All observed pitch classes, ascending
    pub fn heatmap(&self) -> Vec<(usize, NoteStat)> {
        let mut entries: Vec<_> = self
            .notes
            .iter()
            .map(|(&class, accum)| (class, accum.snapshot(&self.config)))
            .collect();
        entries.sort_by_key(|(class, _)| *class);
        entries
    }

    /// Snapshot the session totals
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            total_beats: self.total_beats,
            on_target_beats: self.on_target_beats,
            score: self.score,
            max_combo: self.max_combo,
            resonance: if self.resonance_count > 0 {
                (self.resonance_sum / self.resonance_count as f64) as f32
            } else {
                0.0
            },
        }
    }

    /// Discard everything accumulated since construction or last reset
    pub fn reset(&mut self) {
        let config = self.config;
        *self = Self::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(note_index: i32, cents: f32, timing_ms: f32, onset_ms: f64) -> NoteAttempt {
        NoteAttempt {
            note_index,
            cents_offset: cents,
            timing_error_ms: timing_ms,
            onset_ms,
        }
    }

    #[test]
    fn test_grading_takes_the_worse_axis() {
        let tracker = SessionTracker::new(ScoringConfig::default());
        assert_eq!(tracker.grade(&attempt(69, 5.0, 10.0, 0.0)), Grade::Perfect);
        assert_eq!(tracker.grade(&attempt(69, 5.0, 120.0, 0.0)), Grade::Good);
        assert_eq!(tracker.grade(&attempt(69, 40.0, 10.0, 0.0)), Grade::Good);
        assert_eq!(tracker.grade(&attempt(69, 5.0, 300.0, 0.0)), Grade::Miss);
    }

    #[test]
    fn test_combo_grows_and_resets() {
        let mut tracker = SessionTracker::new(ScoringConfig::default());
        for i in 0..3 {
            tracker.record_attempt(&attempt(60, 2.0, 5.0, i as f64 * 500.0));
        }
        assert_eq!(tracker.combo(), 3);

        tracker.record_attempt(&attempt(60, 2.0, 500.0, 1500.0));
        assert_eq!(tracker.combo(), 0);

        let stats = tracker.stats();
        assert_eq!(stats.total_beats, 4);
        assert_eq!(stats.on_target_beats, 3);
        assert_eq!(stats.max_combo, 3);
    }

    #[test]
    fn test_combo_multiplies_score() {
        let mut tracker = SessionTracker::new(ScoringConfig::default());
        tracker.record_attempt(&attempt(60, 0.0, 0.0, 0.0));
        let first = tracker.stats().score;
        tracker.record_attempt(&attempt(60, 0.0, 0.0, 500.0));
        let second = tracker.stats().score - first;
        assert!(second > first);
    }

    #[test]
    fn test_heatmap_keyed_by_pitch_class() {
        let mut tracker = SessionTracker::new(ScoringConfig::default());
        // A4 and A5 land in the same class
        tracker.record_attempt(&attempt(69, 5.0, 5.0, 0.0));
        tracker.record_attempt(&attempt(81, -5.0, 5.0, 500.0));
        tracker.record_attempt(&attempt(60, 80.0, 5.0, 1000.0));

        let a = tracker.note_stat(9).unwrap();
        assert_eq!(a.hits, 2);
        assert_eq!(a.misses, 0);
        assert!(a.avg_cents_diff.abs() < 1e-6);

        let c = tracker.note_stat(0).unwrap();
        assert_eq!(c.hits, 0);
        assert_eq!(c.misses, 1);

        assert_eq!(tracker.heatmap().len(), 2);
    }

    #[test]
    fn test_jitter_measures_gap_variation() {
        let mut tracker = SessionTracker::new(ScoringConfig::default());
        // Steady half-second gaps: no jitter
        for i in 0..4 {
            tracker.record_attempt(&attempt(69, 0.0, 0.0, i as f64 * 500.0));
        }
        assert_eq!(tracker.note_stat(9).unwrap().jitter_ms, 0.0);

        // An uneven fourth onset shows up
        let mut uneven = SessionTracker::new(ScoringConfig::default());
        for onset in [0.0, 500.0, 1000.0, 1650.0] {
            uneven.record_attempt(&attempt(69, 0.0, 0.0, onset));
        }
        assert!(uneven.note_stat(9).unwrap().jitter_ms > 100.0);
    }

    #[test]
    fn test_stability_falls_with_spread() {
        let mut tight = SessionTracker::new(ScoringConfig::default());
        let mut loose = SessionTracker::new(ScoringConfig::default());
        for (i, sign) in [1.0f32, -1.0, 1.0, -1.0].iter().enumerate() {
            tight.record_attempt(&attempt(69, 2.0 * sign, 0.0, i as f64 * 500.0));
            loose.record_attempt(&attempt(69, 40.0 * sign, 0.0, i as f64 * 500.0));
        }
        assert!(
            tight.note_stat(9).unwrap().stability > loose.note_stat(9).unwrap().stability
        );
    }

    #[test]
    fn test_replay_after_reset_is_identical() {
        let events: Vec<NoteAttempt> = (0..12)
            .map(|i| attempt(60 + i, (i as f32 - 6.0) * 7.0, (i as f32 - 6.0) * 20.0, i as f64 * 400.0))
            .collect();

        let mut tracker = SessionTracker::new(ScoringConfig::default());
        for e in &events {
            tracker.record_attempt(e);
        }
        tracker.observe_resonance(0.8);
        let first = tracker.stats();
        let first_heatmap = tracker.heatmap();

        tracker.reset();
        assert_eq!(tracker.stats().total_beats, 0);

        for e in &events {
            tracker.record_attempt(e);
        }
        tracker.observe_resonance(0.8);
        assert_eq!(tracker.stats(), first);
        assert_eq!(tracker.heatmap(), first_heatmap);
    }
}

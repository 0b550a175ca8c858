use crate::model::config::EvaluatorConfig;
use crate::timeline::NoteSpan;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A key press or release from whatever keyboard the player uses.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub note: u8,
    pub down: bool,
    /// Wall-clock stamp on the same clock that drives [`crate::Transport::advance`].
    pub wall_us: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Perfect,
    Good,
    Missed,
    /// A key that matched nothing while some other note was due.
    Wrong,
    /// A key that matched nothing while no note was due at all.
    Extra,
}

/// What to do with presses that match no due note.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StrayPolicy {
    /// Wrong when another note was due, Extra otherwise.
    #[default]
    Classify,

    /// Always Wrong.
    AlwaysWrong,

    /// Not judged at all.
    Ignore,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Judgment {
    /// Index into [`Evaluator::spans`]; `None` for stray presses.
    pub span: Option<usize>,
    pub note: u8,
    pub outcome: Outcome,
    /// Press time minus span start. Positive is late.
    pub offset_us: i64,
    /// Song position at which the judgment was made.
    pub at_us: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreAccumulator {
    pub perfect: u32,
    pub good: u32,
    pub missed: u32,
    pub wrong: u32,
    pub extra: u32,
    pub streak: u32,
    pub best_streak: u32,
}

impl ScoreAccumulator {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Perfect => self.perfect += 1,
            Outcome::Good => self.good += 1,
            Outcome::Missed => self.missed += 1,
            Outcome::Wrong => self.wrong += 1,
            Outcome::Extra => self.extra += 1,
        }

        match outcome {
            Outcome::Perfect | Outcome::Good => {
                self.streak += 1;
                self.best_streak = self.best_streak.max(self.streak);
            }
            Outcome::Missed | Outcome::Wrong => self.streak = 0,
            Outcome::Extra => {}
        }
    }

    pub fn correct(&self) -> u32 {
        self.perfect + self.good
    }

    /// Share of correct presses among notes and wrong presses, from 0.0 to 1.0.
    pub fn accuracy(&self) -> f64 {
        let attempts = self.correct() + self.missed + self.wrong;
        if attempts == 0 {
            return 0.0;
        }
        self.correct() as f64 / attempts as f64
    }
}

/// Judges key presses against the notes the player is expected to hit.
#[derive(Debug, Clone)]
pub struct Evaluator {
    config: EvaluatorConfig,
    spans: Vec<NoteSpan>,
    outcomes: Vec<Option<Outcome>>,
    /// Every span before this index has been judged.
    first_open: usize,
    /// Spans before this index have entered their window at the last update.
    due_end: usize,
    held: BTreeSet<u8>,
    log: Vec<Judgment>,
    score: ScoreAccumulator,
}

impl Evaluator {
    pub fn new(spans: Vec<NoteSpan>, config: EvaluatorConfig) -> Self {
        let mut spans: Vec<NoteSpan> = spans
            .into_iter()
            .map(|mut span| {
                if span.start_us > span.end_us {
                    warn!(
                        "Note {} starts after it ends ({}us > {}us), clamping..!",
                        span.note, span.start_us, span.end_us
                    );
                    span.end_us = span.start_us;
                }
                span
            })
            .collect();
        spans.sort_by_key(|span| span.start_us);

        let outcomes = vec![None; spans.len()];

        Self {
            config,
            spans,
            outcomes,
            first_open: 0,
            due_end: 0,
            held: BTreeSet::new(),
            log: Vec::new(),
            score: ScoreAccumulator::default(),
        }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn spans(&self) -> &[NoteSpan] {
        &self.spans
    }

    pub fn outcome(&self, span: usize) -> Option<Outcome> {
        self.outcomes.get(span).copied().flatten()
    }

    pub fn judgments(&self) -> &[Judgment] {
        &self.log
    }

    /// The last `n` judgments, oldest first.
    pub fn recent(&self, n: usize) -> &[Judgment] {
        &self.log[self.log.len().saturating_sub(n)..]
    }

    pub fn score(&self) -> &ScoreAccumulator {
        &self.score
    }

    pub fn held_notes(&self) -> impl Iterator<Item = u8> + '_ {
        self.held.iter().copied()
    }

    pub fn is_complete(&self) -> bool {
        self.first_open >= self.spans.len()
    }

    /// Start time of the earliest note still waiting for a judgment.
    pub fn next_pending_start(&self) -> Option<u64> {
        self.spans[self.first_open..]
            .iter()
            .zip(&self.outcomes[self.first_open..])
            .find(|(_, outcome)| outcome.is_none())
            .map(|(span, _)| span.start_us)
    }

    /// Feeds one key event, stamped with the song time at which it happened.
    pub fn handle_key(&mut self, note: u8, down: bool, song_us: u64) -> Option<Judgment> {
        if !down {
            self.held.remove(&note);
            return None;
        }

        if !self.held.insert(note) {
            // Auto-repeat of a key that is already down.
            return None;
        }

        let lead = self.config.lead_us;
        let lag = self.config.lag_us;
        let lo = self
            .spans
            .partition_point(|s| s.start_us.saturating_add(lag) < song_us);
        let hi = self
            .spans
            .partition_point(|s| s.start_us.saturating_sub(lead) <= song_us)
            .max(lo);

        let matched = (lo..hi).find(|&i| self.outcomes[i].is_none() && self.spans[i].note == note);

        if let Some(i) = matched {
            let offset_us = song_us as i64 - self.spans[i].start_us as i64;
            let outcome = if offset_us.unsigned_abs() <= self.config.tight_us {
                Outcome::Perfect
            } else {
                Outcome::Good
            };

            return Some(self.judge(Judgment {
                span: Some(i),
                note,
                outcome,
                offset_us,
                at_us: song_us,
            }));
        }

        let anything_due = (lo..hi).any(|i| self.outcomes[i].is_none());
        let outcome = match self.config.stray_policy {
            StrayPolicy::Ignore => return None,
            StrayPolicy::AlwaysWrong => Outcome::Wrong,
            StrayPolicy::Classify if anything_due => Outcome::Wrong,
            StrayPolicy::Classify => Outcome::Extra,
        };

        Some(self.judge(Judgment {
            span: None,
            note,
            outcome,
            offset_us: 0,
            at_us: song_us,
        }))
    }

    /// Closes the window of every note whose last acceptable moment is before `position_us`.
    pub fn update(&mut self, position_us: u64) -> usize {
        let lead = self.config.lead_us;
        let lag = self.config.lag_us;

        while self.due_end < self.spans.len()
            && self.spans[self.due_end].start_us.saturating_sub(lead) <= position_us
        {
            self.due_end += 1;
        }

        let mut missed = 0;
        for i in self.first_open..self.due_end {
            let span = self.spans[i];
            if span.start_us.saturating_add(lag) >= position_us {
                break;
            }
            if self.outcomes[i].is_some() {
                continue;
            }

            self.judge(Judgment {
                span: Some(i),
                note: span.note,
                outcome: Outcome::Missed,
                offset_us: position_us as i64 - span.start_us as i64,
                at_us: position_us,
            });
            missed += 1;
        }

        missed
    }

    /// Ends the session: every span still waiting is Missed at `position_us`, in span order.
    pub fn finish(&mut self, position_us: u64) -> usize {
        let mut missed = 0;
        for i in self.first_open..self.spans.len() {
            if self.outcomes[i].is_some() {
                continue;
            }

            let span = self.spans[i];
            self.judge(Judgment {
                span: Some(i),
                note: span.note,
                outcome: Outcome::Missed,
                offset_us: position_us as i64 - span.start_us as i64,
                at_us: position_us,
            });
            missed += 1;
        }
        self.due_end = self.spans.len();

        missed
    }

    fn judge(&mut self, judgment: Judgment) -> Judgment {
        if let Some(i) = judgment.span {
            self.outcomes[i] = Some(judgment.outcome);
            while self.first_open < self.outcomes.len() && self.outcomes[self.first_open].is_some() {
                self.first_open += 1;
            }
        }

        debug!(
            "{:?} on note {} at {}us (offset {}us)",
            judgment.outcome, judgment.note, judgment.at_us, judgment.offset_us
        );

        self.score.record(judgment.outcome);
        self.log.push(judgment);
        judgment
    }
}

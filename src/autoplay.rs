//! A simulated player for headless sessions and demos.
//!
//! Presses are scheduled in song time up front, with seeded timing jitter and
//! occasional skipped notes, then handed out frame by frame as wall-clock
//! stamped [`KeyEvent`]s.

use crate::evaluator::KeyEvent;
use crate::timeline::NoteSpan;
use crate::transport::{PlaybackState, TransportState};
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduledKey {
    song_us: u64,
    /// Releases sort before presses at the same instant.
    down: bool,
    note: u8,
}

#[derive(Debug, Clone)]
pub struct AutoPlayer {
    schedule: Vec<ScheduledKey>,
    next: usize,
}

impl AutoPlayer {
    pub fn new(spans: &[NoteSpan], humanize_us: u64, skip_chance: f64, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let skip_chance = if skip_chance.is_nan() { 0.0 } else { skip_chance.clamp(0.0, 1.0) };
        let spread = humanize_us as i64;

        let mut schedule = Vec::with_capacity(spans.len() * 2);
        let mut skipped = 0;

        for span in spans {
            if rng.gen_bool(skip_chance) {
                skipped += 1;
                continue;
            }

            let jitter = if spread > 0 {
                rng.gen_range(-spread..=spread)
            } else {
                0
            };
            let press = (span.start_us as i64 + jitter).max(0) as u64;
            let release = span.end_us.max(press + 1);

            schedule.push(ScheduledKey {
                song_us: press,
                down: true,
                note: span.note,
            });
            schedule.push(ScheduledKey {
                song_us: release,
                down: false,
                note: span.note,
            });
        }

        schedule.sort();
        debug!(
            "Scheduled {} key events, skipping {} note(s)",
            schedule.len(),
            skipped
        );

        Self { schedule, next: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.schedule.len() - self.next
    }

    /// Keys that fall inside the coming frame of `frame_us` wall time starting at `now_wall_us`.
    ///
    /// While the transport is parked on a hold point the player goes ahead and plays the next
    /// press, so practice sessions keep moving.
    pub fn due_keys(&mut self, state: &TransportState, now_wall_us: u64, frame_us: u64) -> Vec<KeyEvent> {
        if state.state != PlaybackState::Playing {
            return Vec::new();
        }

        let position = state.position_us;
        let mut horizon = position.saturating_add((frame_us as f64 * state.speed).round() as u64);

        if state.hold_us.is_some_and(|hold| position >= hold)
            && let Some(press) = self.schedule[self.next..].iter().find(|k| k.down)
        {
            horizon = horizon.max(press.song_us);
        }

        let mut keys = Vec::new();
        while let Some(key) = self.schedule.get(self.next) {
            if key.song_us > horizon {
                break;
            }

            let ahead_us = key.song_us.saturating_sub(position) as f64 / state.speed;
            let wall_us = now_wall_us + (ahead_us.round() as u64).min(frame_us);
            keys.push(KeyEvent {
                note: key.note,
                down: key.down,
                wall_us,
            });
            self.next += 1;
        }

        keys
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn span(start_us: u64, end_us: u64, note: u8) -> NoteSpan {
        NoteSpan {
            start_us,
            end_us,
            channel: 0,
            note,
            velocity: 100,
            track: 0,
        }
    }

    fn playing_at(position_us: u64, speed: f64) -> TransportState {
        TransportState {
            position_us,
            duration_us: 10_000_000,
            speed,
            paused: false,
            state: PlaybackState::Playing,
            loop_bounds: None,
            hold_us: None,
        }
    }

    #[test]
    fn exact_player_hits_every_start() {
        env_logger::try_init().unwrap_or(());

        let spans = [span(500_000, 1_000_000, 60), span(1_000_000, 1_500_000, 60)];
        let mut player = AutoPlayer::new(&spans, 0, 0.0, 7);
        assert_eq!(player.remaining(), 4);

        assert!(player.due_keys(&playing_at(0, 1.0), 0, 100_000).is_empty());

        let keys = player.due_keys(&playing_at(450_000, 2.0), 9_000, 50_000);
        assert_eq!(
            keys,
            vec![KeyEvent {
                note: 60,
                down: true,
                wall_us: 34_000,
            }]
        );

        // The release of the first note comes before the second press.
        let keys = player.due_keys(&playing_at(990_000, 1.0), 0, 20_000);
        assert_eq!(keys.iter().map(|k| k.down).collect::<Vec<_>>(), vec![false, true]);
    }

    #[test]
    fn same_seed_same_schedule() {
        env_logger::try_init().unwrap_or(());

        let spans: Vec<NoteSpan> = (0..50)
            .map(|i| span(i * 250_000 + 100_000, i * 250_000 + 300_000, 60 + (i % 12) as u8))
            .collect();

        let a = AutoPlayer::new(&spans, 40_000, 0.2, 99);
        let b = AutoPlayer::new(&spans, 40_000, 0.2, 99);
        let c = AutoPlayer::new(&spans, 40_000, 0.2, 100);

        assert_eq!(a.schedule, b.schedule);
        assert_ne!(a.schedule, c.schedule);
        assert!(a.remaining() < 100);
        assert!(a.schedule.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn skips_everything_at_full_chance() {
        let spans = [span(0, 10, 60)];
        assert_eq!(AutoPlayer::new(&spans, 0, 1.0, 0).remaining(), 0);
        assert_eq!(AutoPlayer::new(&spans, 0, 7.5, 0).remaining(), 0);
    }

    #[test]
    fn presses_ahead_while_held() {
        env_logger::try_init().unwrap_or(());

        let spans = [span(500_000, 900_000, 64)];
        let mut player = AutoPlayer::new(&spans, 0, 0.0, 1);

        // Parked on some other note's start, a little before this one.
        let mut state = playing_at(400_000, 1.0);
        state.hold_us = Some(480_000);
        assert!(player.due_keys(&state, 0, 15_000).is_empty());

        state.position_us = 480_000;
        let keys = player.due_keys(&state, 100_000, 15_000);
        assert_eq!(
            keys,
            vec![KeyEvent {
                note: 64,
                down: true,
                wall_us: 115_000,
            }]
        );

        let mut paused = state;
        paused.state = PlaybackState::Paused;
        assert!(player.due_keys(&paused, 0, 1_000_000).is_empty());
    }
}

use crate::evaluator::StrayPolicy;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_LEAD_MS: u64 = 200;
pub const DEFAULT_LAG_MS: u64 = 200;
pub const DEFAULT_TIGHT_MS: u64 = 50;

#[derive(Parser, Debug)]
#[command(
    name = "FALLING_NOTES",
    about = "Practice the piano against a MIDI file with falling notes!"
)]
pub struct Args {
    /// Path to the MIDI file to practice. Falls back to the last opened file.
    pub midi: Option<String>,

    /// Settings file to use instead of the one in the user's config directory.
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Dry run (print the first dry_run_max notes and exit).
    #[arg(short, long, default_value_t = false)]
    pub dry_run: bool,

    /// Maximum notes to print in dry run.
    #[arg(long, default_value_t = 80)]
    pub dry_run_max: usize,

    /// Session mode: play|practice. Practice waits for each note to be hit.
    #[arg(short, long, default_value = "play")]
    pub mode: String,

    /// Playback speed multiplier.
    #[arg(short, long, default_value_t = 1.0)]
    pub speed: f64,

    /// How early a key may be pressed before a note starts, in milliseconds.
    #[arg(long = "lead-ms", default_value_t = DEFAULT_LEAD_MS)]
    pub lead_ms: u64,

    /// How late a key may be pressed after a note starts, in milliseconds.
    #[arg(long = "lag-ms", default_value_t = DEFAULT_LAG_MS)]
    pub lag_ms: u64,

    /// Presses within this many milliseconds of the start count as perfect.
    #[arg(long = "tight-ms", default_value_t = DEFAULT_TIGHT_MS)]
    pub tight_ms: u64,

    /// How to judge presses that match no note: classify|always-wrong|ignore.
    #[arg(long = "stray", default_value = "classify")]
    pub stray_policy: String,

    /// Standard deviation-ish spread of the simulated player's timing, in milliseconds.
    #[arg(long = "humanize-ms", default_value_t = 40)]
    pub humanize_ms: u64,

    /// Chance (0.0..=1.0) that the simulated player skips a note.
    #[arg(long = "skip-chance", default_value_t = 0.05)]
    pub skip_chance: f64,

    /// Seed for the simulated player.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Run the session as fast as possible instead of in real time.
    #[arg(short, long, default_value_t = false)]
    pub fast: bool,

    /// Prints every judgment to the terminal.
    #[arg(short, long)]
    pub verbose: bool,

    /// Keep the display awake during a session by running this command periodically.
    #[arg(long = "keep-awake-cmd")]
    pub keep_awake_cmd: Option<String>,
}

/// Timing windows for matching key presses to notes, in microseconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluatorConfig {
    pub lead_us: u64,
    pub lag_us: u64,
    pub tight_us: u64,
    pub stray_policy: StrayPolicy,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            lead_us: DEFAULT_LEAD_MS * 1_000,
            lag_us: DEFAULT_LAG_MS * 1_000,
            tight_us: DEFAULT_TIGHT_MS * 1_000,
            stray_policy: StrayPolicy::Classify,
        }
    }
}

impl EvaluatorConfig {
    pub fn from_millis(lead_ms: u64, lag_ms: u64, tight_ms: u64, stray_policy: StrayPolicy) -> Self {
        let lag_us = lag_ms * 1_000;
        Self {
            lead_us: lead_ms * 1_000,
            lag_us,
            // Perfect never exceeds the acceptance window.
            tight_us: (tight_ms * 1_000).min(lag_us.max(lead_ms * 1_000)),
            stray_policy,
        }
    }
}

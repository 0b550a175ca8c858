use crate::midi_importer::{MidiFile, MidiFormat};
use crate::timeline::Timeline;
use crate::util::trim_filename;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Lowercased file name without directory or extension.
    pub title: String,
    pub tempo_bpm: f64,
    pub format: MidiFormat,
    pub track_count: usize,
    pub ticks_per_quarter: u16,
}

#[derive(Debug, Clone)]
pub struct Song {
    pub metadata: Metadata,
    pub timeline: Timeline,
}

impl Song {
    pub fn new(source_path: &Path, midi: &MidiFile, timeline: Timeline) -> Self {
        let title = trim_filename(&source_path.to_string_lossy());

        Self {
            metadata: Metadata {
                title,
                tempo_bpm: timeline.tempo_map().initial_bpm(),
                format: midi.format,
                track_count: midi.tracks.len(),
                ticks_per_quarter: midi.ticks_per_quarter,
            },
            timeline,
        }
    }
}

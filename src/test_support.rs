//! Fixture builders shared by the unit tests.

use crate::midi_importer::parse_midi;
use crate::model::song::Song;
use crate::timeline::Timeline;
use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::path::Path;

/// Hand-assembles an SMF from raw track chunk bodies.
pub fn raw_smf(format: u16, division: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"MThd");
    bytes.extend_from_slice(&6u32.to_be_bytes());
    bytes.extend_from_slice(&format.to_be_bytes());
    bytes.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    bytes.extend_from_slice(&division.to_be_bytes());

    for track in tracks {
        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&(track.len() as u32).to_be_bytes());
        bytes.extend_from_slice(track);
    }

    bytes
}

/// Encodes tracks with midly's writer, so fixtures do not depend on our own parser's assumptions.
pub fn write_smf(ticks_per_quarter: u16, tracks: Vec<Vec<TrackEvent<'static>>>) -> Vec<u8> {
    let format = if tracks.len() == 1 {
        Format::SingleTrack
    } else {
        Format::Parallel
    };
    let mut smf = Smf::new(Header::new(
        format,
        Timing::Metrical(u15::new(ticks_per_quarter)),
    ));
    smf.tracks = tracks;

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes).expect("midly should encode the fixture");
    bytes
}

pub fn timeline_from(ticks_per_quarter: u16, tracks: Vec<Vec<TrackEvent<'static>>>) -> Timeline {
    let bytes = write_smf(ticks_per_quarter, tracks);
    Timeline::build(&parse_midi(&bytes).expect("fixture should parse"))
}

pub fn song_from(path: &str, ticks_per_quarter: u16, tracks: Vec<Vec<TrackEvent<'static>>>) -> Song {
    let bytes = write_smf(ticks_per_quarter, tracks);
    let midi = parse_midi(&bytes).expect("fixture should parse");
    let timeline = Timeline::build(&midi);
    Song::new(Path::new(path), &midi, timeline)
}

pub fn note_on(delta: u32, channel: u8, key: u8, vel: u8) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Midi {
            channel: u4::new(channel),
            message: MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(vel),
            },
        },
    }
}

pub fn note_off(delta: u32, channel: u8, key: u8) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Midi {
            channel: u4::new(channel),
            message: MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(0),
            },
        },
    }
}

pub fn tempo(delta: u32, us_per_quarter: u32) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(us_per_quarter))),
    }
}

pub fn end_of_track(delta: u32) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    }
}

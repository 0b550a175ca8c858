use crate::error::{FormatError, LoadError};
use crate::model::settings::UserSettings;
use crate::model::song::Song;
use crate::timeline::Timeline;
use crate::util::strip_quotes;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const HEADER_MAGIC: &[u8; 4] = b"MThd";
const TRACK_MAGIC: &[u8; 4] = b"MTrk";
const MIN_HEADER_LEN: usize = 6;
const MAX_VLQ_BYTES: usize = 4;

const META_EVENT: u8 = 0xFF;
const SYSEX_START: u8 = 0xF0;
const SYSEX_ESCAPE: u8 = 0xF7;

const META_TRACK_NAME: u8 = 0x03;
const META_END_OF_TRACK: u8 = 0x2F;
const META_TEMPO: u8 = 0x51;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiFormat {
    /// Format 0: one multi-channel track.
    SingleTrack,

    /// Format 1: tracks that play simultaneously.
    Simultaneous,

    /// Format 2: independent single-track patterns.
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    /// Microseconds per quarter note.
    Tempo(u32),
    EndOfTrack,
    /// Any other meta event, by type byte. The payload is skipped.
    Meta(u8),
    SysEx,
    /// Channel messages the trainer has no use for (controllers, pitch bend, ...).
    Other { status: u8 },
}

/// A single event exactly as it appeared in its track chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMidiEvent {
    pub track: usize,
    pub delta: u32,
    pub kind: RawEventKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTrack {
    pub name: Option<String>,
    pub events: Vec<RawMidiEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiFile {
    pub format: MidiFormat,
    pub ticks_per_quarter: u16,
    pub tracks: Vec<RawTrack>,
}

/// Reads a MIDI file from disk and builds a playable [`Song`] out of it.
pub fn load_midi_file<P: AsRef<Path>>(path: P) -> Result<Song, LoadError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let midi = parse_midi(&bytes).map_err(|source| LoadError::Format {
        path: path.to_path_buf(),
        source,
    })?;

    let timeline = Timeline::build(&midi);
    let song = Song::new(path, &midi, timeline);

    info!(
        "Loaded '{}': {} track(s), {} note(s), {:.1}s long..!",
        song.metadata.title,
        song.metadata.track_count,
        song.timeline.note_spans().len(),
        song.timeline.duration_us() as f64 / 1_000_000.0
    );

    Ok(song)
}

/// Opens the first song that loads: the given path, then the last opened file.
///
/// A file that cannot be read or parsed is skipped with a warning. `None` means nothing usable
/// was offered, the same as the player cancelling the file choice.
pub fn open_song(given: Option<&str>, settings: &UserSettings) -> Option<(PathBuf, Song)> {
    let mut candidates = Vec::with_capacity(2);
    if let Some(given) = given {
        candidates.push(resolve_path(given, settings));
    }
    if let Some(last) = settings.last_file()
        && !candidates.contains(&last)
    {
        candidates.push(last);
    }

    for path in candidates {
        info!("Loading MIDI file: '{}'...", path.display());
        match load_midi_file(&path) {
            Ok(song) => return Some((path, song)),
            Err(e) => warn!("{}, trying the next file..!", e),
        }
    }

    None
}

/// A relative path that does not exist is looked up in the music directory.
fn resolve_path(given: &str, settings: &UserSettings) -> PathBuf {
    let path = PathBuf::from(strip_quotes(given));
    if path.is_relative()
        && !path.exists()
        && let Some(music) = settings.default_music_directory()
    {
        let candidate = music.join(&path);
        if candidate.exists() {
            debug!("Found '{}' in the music directory", given);
            return candidate;
        }
    }

    path
}

/// Decodes a complete Standard MIDI File held in memory.
pub fn parse_midi(bytes: &[u8]) -> Result<MidiFile, FormatError> {
    if bytes.len() < 8 || &bytes[0..4] != HEADER_MAGIC {
        return Err(FormatError::BadHeader);
    }

    let mut c = Cursor::new(bytes, 4, bytes.len());
    let header_len = c.read_u32()? as usize;
    if header_len < MIN_HEADER_LEN {
        return Err(FormatError::BadHeader);
    }
    let header_end = c.pos + header_len;

    let format = match c.read_u16()? {
        0 => MidiFormat::SingleTrack,
        1 => MidiFormat::Simultaneous,
        2 => MidiFormat::Sequential,
        other => {
            debug!("Unknown SMF format {}..!", other);
            return Err(FormatError::BadHeader);
        }
    };
    let declared_tracks = c.read_u16()? as usize;
    let division = c.read_u16()?;

    if division & 0x8000 != 0 || division == 0 {
        return Err(FormatError::UnsupportedDivision(division));
    }
    c.skip_to(header_end)?;

    debug!(
        "MIDI format: {:?}, declared tracks: {}, ticks per quarter note: {}",
        format, declared_tracks, division
    );

    if format == MidiFormat::Sequential {
        warn!("Format 2 MIDI patterns will be merged and played simultaneously..!");
    }

    let mut tracks: Vec<RawTrack> = Vec::with_capacity(declared_tracks);
    while tracks.len() < declared_tracks {
        let id = c.read_bytes(4)?;
        let len = c.read_u32()? as usize;
        let start = c.pos;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= bytes.len())
            .ok_or(FormatError::Truncated(bytes.len()))?;

        if id != TRACK_MAGIC {
            warn!(
                "Skipping unknown '{}' chunk of {} bytes..!",
                String::from_utf8_lossy(id),
                len
            );
            c.skip_to(end)?;
            continue;
        }

        let track = parse_track(bytes, start, end, tracks.len())?;
        debug!(
            "Track {} ({}): {} events",
            tracks.len(),
            track.name.as_deref().unwrap_or("unnamed"),
            track.events.len()
        );
        tracks.push(track);
        c.skip_to(end)?;
    }

    if c.remaining() > 0 {
        debug!("Ignoring {} trailing bytes after the last track", c.remaining());
    }

    Ok(MidiFile {
        format,
        ticks_per_quarter: division,
        tracks,
    })
}

fn parse_track(
    bytes: &[u8],
    start: usize,
    end: usize,
    track: usize,
) -> Result<RawTrack, FormatError> {
    let mut c = Cursor::new(bytes, start, end);
    let mut running_status: Option<u8> = None;
    let mut name: Option<String> = None;
    let mut events: Vec<RawMidiEvent> = Vec::new();
    let mut terminated = false;

    while c.remaining() > 0 {
        let delta = c.read_vlq()?;
        let offset = c.pos;
        let first = c.read_u8()?;

        // A data byte in status position reuses the previous channel status.
        let (status, pending_data) = if first & 0x80 != 0 {
            (first, None)
        } else {
            match running_status {
                Some(status) => (status, Some(first)),
                None => return Err(FormatError::UnknownEventByte { byte: first, offset }),
            }
        };

        let kind = match status {
            0x80..=0xEF => {
                running_status = Some(status);
                let channel = status & 0x0F;
                let d1 = match pending_data {
                    Some(data) => data,
                    None => c.read_data()?,
                };

                match status & 0xF0 {
                    0x80 => RawEventKind::NoteOff {
                        channel,
                        note: d1,
                        velocity: c.read_data()?,
                    },
                    0x90 => RawEventKind::NoteOn {
                        channel,
                        note: d1,
                        velocity: c.read_data()?,
                    },
                    0xC0 | 0xD0 => RawEventKind::Other { status },
                    _ => {
                        c.read_data()?;
                        RawEventKind::Other { status }
                    }
                }
            }
            META_EVENT => {
                running_status = None;
                let meta_type = c.read_u8()?;
                let len = c.read_vlq()? as usize;
                let payload = c.read_bytes(len)?;

                match meta_type {
                    META_TEMPO if len == 3 => {
                        let mpqn = u32::from_be_bytes([0, payload[0], payload[1], payload[2]]);
                        if mpqn == 0 {
                            warn!("Ignoring zero tempo in track {}..!", track);
                            RawEventKind::Meta(meta_type)
                        } else {
                            RawEventKind::Tempo(mpqn)
                        }
                    }
                    META_TEMPO => {
                        warn!(
                            "Ignoring tempo event with {} byte payload in track {}..!",
                            len, track
                        );
                        RawEventKind::Meta(meta_type)
                    }
                    META_END_OF_TRACK => RawEventKind::EndOfTrack,
                    META_TRACK_NAME => {
                        if name.is_none() {
                            let text = String::from_utf8_lossy(payload).trim().to_string();
                            if !text.is_empty() {
                                name = Some(text);
                            }
                        }
                        RawEventKind::Meta(meta_type)
                    }
                    _ => RawEventKind::Meta(meta_type),
                }
            }
            SYSEX_START | SYSEX_ESCAPE => {
                running_status = None;
                let len = c.read_vlq()? as usize;
                c.read_bytes(len)?;
                RawEventKind::SysEx
            }
            _ => return Err(FormatError::UnknownEventByte { byte: status, offset }),
        };

        events.push(RawMidiEvent { track, delta, kind });

        if kind == RawEventKind::EndOfTrack {
            terminated = true;
            break;
        }
    }

    if !terminated {
        warn!("Track {} has no end-of-track event..!", track);
    } else if c.remaining() > 0 {
        debug!(
            "Ignoring {} bytes after end-of-track in track {}",
            c.remaining(),
            track
        );
    }

    Ok(RawTrack { name, events })
}

/// Big-endian reader over one chunk of the file. Offsets stay absolute so errors point into the file.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8], pos: usize, end: usize) -> Self {
        Self { bytes, pos, end }
    }

    fn remaining(&self) -> usize {
        self.end.saturating_sub(self.pos)
    }

    fn skip_to(&mut self, pos: usize) -> Result<(), FormatError> {
        if pos > self.end {
            return Err(FormatError::Truncated(self.end));
        }
        self.pos = pos;
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8, FormatError> {
        if self.pos >= self.end {
            return Err(FormatError::Truncated(self.pos));
        }
        let b = self.bytes[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// A channel message data byte, which never has its high bit set.
    fn read_data(&mut self) -> Result<u8, FormatError> {
        let offset = self.pos;
        let b = self.read_u8()?;
        if b & 0x80 != 0 {
            return Err(FormatError::UnknownEventByte { byte: b, offset });
        }
        Ok(b)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        let stop = self
            .pos
            .checked_add(len)
            .filter(|stop| *stop <= self.end)
            .ok_or(FormatError::Truncated(self.end))?;
        let slice = &self.bytes[self.pos..stop];
        self.pos = stop;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, FormatError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, FormatError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// 7 bits per byte, most significant first, high bit set on every byte but the last.
    fn read_vlq(&mut self) -> Result<u32, FormatError> {
        let start = self.pos;
        let mut value = 0u32;
        for _ in 0..MAX_VLQ_BYTES {
            let b = self.read_u8()?;
            value = (value << 7) | (b & 0x7F) as u32;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(FormatError::VarLenTooLong(start))
    }
}

use crate::error::FormatError;
use crate::midi_importer::{MidiFile, RawEventKind, parse_midi};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

pub const DEFAULT_MPQN: u32 = 500_000;
const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoSegment {
    pub tick: u64,
    pub us_per_quarter: u32,
    /// Absolute time at which this segment begins.
    pub us_at_start: u64,
}

/// Piecewise-constant tempo over the whole file, with strictly increasing segment ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempoMap {
    ticks_per_quarter: u16,
    segments: Vec<TempoSegment>,
}

impl TempoMap {
    /// Builds the map from `(tick, µs per quarter)` changes in file order.
    /// When two changes share a tick the later one wins.
    pub fn new(ticks_per_quarter: u16, changes: impl IntoIterator<Item = (u64, u32)>) -> Self {
        let ticks_per_quarter = ticks_per_quarter.max(1);

        let mut by_tick: BTreeMap<u64, u32> = BTreeMap::new();
        for (tick, mpqn) in changes {
            by_tick.insert(tick, mpqn);
        }
        by_tick.entry(0).or_insert(DEFAULT_MPQN);

        let mut segments: Vec<TempoSegment> = Vec::with_capacity(by_tick.len());
        let mut us_accum: u64 = 0;
        let mut last: Option<(u64, u32)> = None;

        for (tick, mpqn) in by_tick {
            if let Some((last_tick, last_mpqn)) = last {
                us_accum = us_accum.saturating_add(ticks_to_us(
                    tick - last_tick,
                    last_mpqn,
                    ticks_per_quarter,
                ));
            }

            segments.push(TempoSegment {
                tick,
                us_per_quarter: mpqn,
                us_at_start: us_accum,
            });
            last = Some((tick, mpqn));
        }

        Self {
            ticks_per_quarter,
            segments,
        }
    }

    pub fn ticks_per_quarter(&self) -> u16 {
        self.ticks_per_quarter
    }

    pub fn segments(&self) -> &[TempoSegment] {
        &self.segments
    }

    /// Absolute microseconds for any tick, in any order.
    pub fn to_micros(&self, tick: u64) -> u64 {
        // The first segment always starts at tick 0, so the partition point is at least 1.
        let idx = self.segments.partition_point(|seg| seg.tick <= tick) - 1;
        self.micros_in(idx, tick)
    }

    /// A converter for non-decreasing ticks that walks the segments instead of searching them.
    pub fn cursor(&self) -> TempoCursor<'_> {
        TempoCursor { map: self, idx: 0 }
    }

    /// Tempo of the first audible segment, for display.
    pub fn initial_bpm(&self) -> f64 {
        MICROSECONDS_PER_MINUTE / self.segments[0].us_per_quarter as f64
    }

    fn micros_in(&self, idx: usize, tick: u64) -> u64 {
        let seg = &self.segments[idx];
        seg.us_at_start
            .saturating_add(ticks_to_us(tick - seg.tick, seg.us_per_quarter, self.ticks_per_quarter))
    }
}

pub struct TempoCursor<'a> {
    map: &'a TempoMap,
    idx: usize,
}

impl TempoCursor<'_> {
    pub fn to_micros(&mut self, tick: u64) -> u64 {
        let segments = &self.map.segments;

        if tick < segments[self.idx].tick {
            // Went backwards; start the walk over.
            self.idx = 0;
        }

        while self.idx + 1 < segments.len() && segments[self.idx + 1].tick <= tick {
            self.idx += 1;
        }

        self.map.micros_in(self.idx, tick)
    }
}

/// Saturates at `u64::MAX` for files long enough to overflow.
fn ticks_to_us(ticks: u64, us_per_quarter: u32, ticks_per_quarter: u16) -> u64 {
    let us = ticks as u128 * us_per_quarter as u128 / ticks_per_quarter as u128;
    u64::try_from(us).unwrap_or(u64::MAX)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEvent {
    pub time_us: u64,
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub on: bool,
    pub track: usize,
}

/// One playable note: a NoteOn paired with the NoteOff that ends it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteSpan {
    pub start_us: u64,
    pub end_us: u64,
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub track: usize,
}

impl NoteSpan {
    pub fn duration_us(&self) -> u64 {
        self.end_us.saturating_sub(self.start_us)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TrackSummary {
    pub index: usize,
    pub name: Option<String>,
    pub note_count: usize,
    pub channels: Vec<u8>,
}

/// Every note event of a file on one absolute clock, plus the note spans derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    tempo_map: TempoMap,
    events: Vec<TimelineEvent>,
    spans: Vec<NoteSpan>,
    tracks: Vec<TrackSummary>,
    duration_us: u64,
    longest_span_us: u64,
}

impl Timeline {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        Ok(Self::build(&parse_midi(bytes)?))
    }

    pub fn build(midi: &MidiFile) -> Self {
        let mut tempo_changes: Vec<(u64, u32)> = Vec::new();
        let mut ticked: Vec<Vec<(u64, RawEventKind)>> = Vec::with_capacity(midi.tracks.len());

        for (track_idx, track) in midi.tracks.iter().enumerate() {
            let mut abs_tick: u64 = 0;
            let mut events = Vec::with_capacity(track.events.len());

            for event in track.events.iter() {
                abs_tick = abs_tick.saturating_add(event.delta as u64);

                if let RawEventKind::Tempo(mpqn) = event.kind {
                    tempo_changes.push((abs_tick, mpqn));
                    debug!(
                        "Tempo change at tick {} -> {} us/qn (track {})",
                        abs_tick, mpqn, track_idx
                    );
                }
                events.push((abs_tick, event.kind));
            }
            ticked.push(events);
        }

        let tempo_map = TempoMap::new(midi.ticks_per_quarter, tempo_changes);

        let mut events: Vec<TimelineEvent> = Vec::new();
        let mut track_end_us: Vec<u64> = Vec::with_capacity(ticked.len());

        for (track, track_events) in ticked.iter().enumerate() {
            let mut cursor = tempo_map.cursor();
            let mut last_us: u64 = 0;

            for &(tick, kind) in track_events.iter() {
                let time_us = cursor.to_micros(tick);
                last_us = time_us;

                match kind {
                    RawEventKind::NoteOn {
                        channel,
                        note,
                        velocity,
                    } => events.push(TimelineEvent {
                        time_us,
                        channel,
                        note,
                        velocity,
                        on: velocity > 0,
                        track,
                    }),
                    RawEventKind::NoteOff {
                        channel,
                        note,
                        velocity,
                    } => events.push(TimelineEvent {
                        time_us,
                        channel,
                        note,
                        velocity,
                        on: false,
                        track,
                    }),
                    _ => {}
                }
            }
            track_end_us.push(last_us);
        }

        // Stable, so ties keep track order and then in-track order.
        events.sort_by_key(|event| event.time_us);

        let spans = pair_note_spans(&events, &track_end_us);
        let tracks = summarize_tracks(midi, &spans);

        let duration_us = spans
            .iter()
            .map(|span| span.end_us)
            .chain(track_end_us.iter().copied())
            .max()
            .unwrap_or(0);
        let longest_span_us = spans.iter().map(NoteSpan::duration_us).max().unwrap_or(0);

        debug!(
            "Timeline: {} events, {} note spans, {}us long",
            events.len(),
            spans.len(),
            duration_us
        );

        Self {
            tempo_map,
            events,
            spans,
            tracks,
            duration_us,
            longest_span_us,
        }
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo_map
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Events with `t0 <= time < t1`. The iterator is cheap to clone and can be restarted by calling again.
    pub fn events_in_range(&self, t0: u64, t1: u64) -> std::slice::Iter<'_, TimelineEvent> {
        let lo = self.events.partition_point(|e| e.time_us < t0);
        let hi = self.events.partition_point(|e| e.time_us < t1).max(lo);
        self.events[lo..hi].iter()
    }

    /// All note spans, ascending by start time.
    pub fn note_spans(&self) -> &[NoteSpan] {
        &self.spans
    }

    /// Spans sounding at any point of `[t0, t1)`, with their index into [`Self::note_spans`].
    pub fn spans_in_range(&self, t0: u64, t1: u64) -> impl Iterator<Item = (usize, &NoteSpan)> + '_ {
        let earliest = t0.saturating_sub(self.longest_span_us);
        let lo = self.spans.partition_point(|s| s.start_us < earliest);
        let hi = self.spans.partition_point(|s| s.start_us < t1).max(lo);

        self.spans[lo..hi]
            .iter()
            .enumerate()
            .map(move |(i, span)| (lo + i, span))
            .filter(move |(_, span)| span.end_us >= t0)
    }

    pub fn tracks(&self) -> &[TrackSummary] {
        &self.tracks
    }

    pub fn duration_us(&self) -> u64 {
        self.duration_us
    }
}

/// Pairs each off with the oldest still-open on for the same channel, note and track.
fn pair_note_spans(events: &[TimelineEvent], track_end_us: &[u64]) -> Vec<NoteSpan> {
    let mut open: HashMap<(u8, u8, usize), VecDeque<(usize, u64, u8)>> = HashMap::new();
    let mut paired: Vec<(usize, NoteSpan)> = Vec::new();

    for (order, event) in events.iter().enumerate() {
        let key = (event.channel, event.note, event.track);

        if event.on {
            open.entry(key)
                .or_default()
                .push_back((order, event.time_us, event.velocity));
            continue;
        }

        match open.get_mut(&key).and_then(|queue| queue.pop_front()) {
            Some((on_order, start_us, velocity)) => paired.push((
                on_order,
                NoteSpan {
                    start_us,
                    end_us: event.time_us,
                    channel: event.channel,
                    note: event.note,
                    velocity,
                    track: event.track,
                },
            )),
            None => debug!(
                "Orphaned NoteOff for {} ch{} at {}us (track {})..!",
                event.note, event.channel, event.time_us, event.track
            ),
        }
    }

    for ((channel, note, track), queue) in open.into_iter() {
        for (on_order, start_us, velocity) in queue {
            let end_us = track_end_us.get(track).copied().unwrap_or(start_us).max(start_us);
            warn!(
                "Unclosed NoteOn for {}, channel: {} at {}us auto-closing at: {}us..!",
                note, channel, start_us, end_us
            );
            paired.push((
                on_order,
                NoteSpan {
                    start_us,
                    end_us,
                    channel,
                    note,
                    velocity,
                    track,
                },
            ));
        }
    }

    // The NoteOn's position in the merged sequence breaks ties, which also undoes HashMap ordering.
    paired.sort_by_key(|(order, span)| (span.start_us, *order));
    paired.into_iter().map(|(_, span)| span).collect()
}

fn summarize_tracks(midi: &MidiFile, spans: &[NoteSpan]) -> Vec<TrackSummary> {
    let mut counts = vec![0usize; midi.tracks.len()];
    let mut channels = vec![BTreeSet::new(); midi.tracks.len()];

    for span in spans {
        counts[span.track] += 1;
        channels[span.track].insert(span.channel);
    }

    midi.tracks
        .iter()
        .enumerate()
        .map(|(index, track)| TrackSummary {
            index,
            name: track.name.clone(),
            note_count: counts[index],
            channels: channels[index].iter().copied().collect(),
        })
        .collect()
}

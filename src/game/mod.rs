use crate::engine::{IdleInhibitor, NoteOutput};
use crate::evaluator::{KeyEvent, Outcome, ScoreAccumulator};
use crate::model::config::EvaluatorConfig;
use crate::model::song::Song;
use crate::transport::{LoopBounds, TransportState};
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub mod playing;
pub mod results;
pub mod selection;
pub mod title;

pub use playing::Playing;
pub use results::Results;
pub use selection::Selection;
pub use title::Title;

/// Abstract input, already translated from whatever device produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Enter,
    Back,
    Up,
    Down,
    Left,
    Right,
    Toggle,
    /// Jump to an absolute song position in microseconds.
    Seek(i64),
    /// Jump by a relative amount of song time in microseconds.
    Skip(i64),
    SetSpeed(f64),
    Pause,
    Resume,
    SetLoop(Option<LoopBounds>),
    ToggleFps,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlayMode {
    /// The song runs on its own; late notes are missed.
    #[default]
    Play,

    /// The song waits at each note until it is played.
    Practice,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackMode {
    /// Played back by the trainer.
    Auto,
    /// Judged, and the player's keys are heard.
    YouPlay,
    /// Judged, but nothing sounds.
    YouPlaySilent,
    /// Neither shown nor heard.
    Hidden,
}

impl TrackMode {
    const ORDER: [TrackMode; 4] = [
        TrackMode::Auto,
        TrackMode::YouPlay,
        TrackMode::YouPlaySilent,
        TrackMode::Hidden,
    ];

    fn position(self) -> usize {
        Self::ORDER.iter().position(|m| *m == self).unwrap_or(0)
    }

    pub fn next(self) -> Self {
        Self::ORDER[(self.position() + 1) % Self::ORDER.len()]
    }

    pub fn prev(self) -> Self {
        Self::ORDER[(self.position() + Self::ORDER.len() - 1) % Self::ORDER.len()]
    }

    pub fn is_played_by_user(self) -> bool {
        matches!(self, TrackMode::YouPlay | TrackMode::YouPlaySilent)
    }

    pub fn is_audible(self) -> bool {
        matches!(self, TrackMode::Auto | TrackMode::YouPlay)
    }
}

/// Everything the states share across transitions.
pub struct SharedState {
    pub song: Song,
    /// One entry per track of the song.
    pub track_modes: Vec<TrackMode>,
    pub play_mode: PlayMode,
    pub evaluator_config: EvaluatorConfig,
    pub initial_speed: f64,
    pub output: Box<dyn NoteOutput>,
    pub inhibitor: Box<dyn IdleInhibitor>,
    pub show_fps: bool,
    /// Score of the last finished session.
    pub last_score: Option<ScoreAccumulator>,
}

impl SharedState {
    pub fn new(
        song: Song,
        evaluator_config: EvaluatorConfig,
        output: Box<dyn NoteOutput>,
        inhibitor: Box<dyn IdleInhibitor>,
    ) -> Self {
        let track_modes = song
            .timeline
            .tracks()
            .iter()
            .map(|track| {
                if track.note_count > 0 {
                    TrackMode::YouPlay
                } else {
                    TrackMode::Hidden
                }
            })
            .collect();

        Self {
            song,
            track_modes,
            play_mode: PlayMode::default(),
            evaluator_config,
            initial_speed: 1.0,
            output,
            inhibitor,
            show_fps: false,
            last_score: None,
        }
    }

    pub fn track_mode(&self, track: usize) -> TrackMode {
        self.track_modes.get(track).copied().unwrap_or(TrackMode::Hidden)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TitleView {
    pub title: String,
    pub track_count: usize,
    pub tempo_bpm: f64,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TrackRow {
    pub index: usize,
    pub name: String,
    pub note_count: usize,
    pub mode: TrackMode,
    pub focused: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SelectionView {
    pub rows: Vec<TrackRow>,
    pub play_mode: PlayMode,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct VisibleNote {
    pub start_us: u64,
    pub end_us: u64,
    pub note: u8,
    pub track: usize,
    pub user: bool,
    pub outcome: Option<Outcome>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PlayingView {
    pub transport: TransportState,
    pub play_mode: PlayMode,
    /// Span of song time shown ahead of the playhead.
    pub window_us: u64,
    pub notes: Vec<VisibleNote>,
    pub held: Vec<u8>,
    pub score: ScoreAccumulator,
    pub fps: Option<f64>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ResultsView {
    pub title: String,
    pub score: ScoreAccumulator,
    pub accuracy: f64,
}

/// What a state hands to the renderer for one frame.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub enum Frame {
    Title(TitleView),
    Selection(SelectionView),
    Playing(PlayingView),
    Results(ResultsView),
}

pub enum Transition {
    Stay,
    Switch(Box<dyn GameState>),
}

pub trait GameState {
    fn name(&self) -> &'static str;

    fn on_enter(&mut self, _ctx: &mut SharedState) {}

    fn on_command(&mut self, ctx: &mut SharedState, command: Command) -> Transition;

    fn on_key(&mut self, _ctx: &mut SharedState, _key: KeyEvent) -> Transition {
        Transition::Stay
    }

    fn on_frame(&mut self, _ctx: &mut SharedState, _dt_us: u64) -> Transition {
        Transition::Stay
    }

    fn render(&self, ctx: &SharedState) -> Frame;

    /// True for the state that owns a running song.
    fn plays_song(&self) -> bool {
        false
    }

    fn on_exit(&mut self, _ctx: &mut SharedState) {}
}

/// Tracks whether the window is active, and whether it became active since the last frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdgeTracker {
    active: bool,
    just_active: bool,
}

impl EdgeTracker {
    pub fn set_active(&mut self, active: bool) {
        if active && !self.active {
            self.just_active = true;
        }
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// True once after each activation.
    pub fn take_just_active(&mut self) -> bool {
        std::mem::take(&mut self.just_active)
    }
}

/// Owns the current state and routes input, frames and transitions through it.
pub struct StateManager {
    current: Box<dyn GameState>,
    ctx: SharedState,
    window: EdgeTracker,
}

impl StateManager {
    pub fn new(mut ctx: SharedState) -> Self {
        let mut current: Box<dyn GameState> = Box::new(Title);
        current.on_enter(&mut ctx);

        let mut window = EdgeTracker::default();
        window.set_active(true);
        window.take_just_active();

        Self { current, ctx, window }
    }

    pub fn state_name(&self) -> &'static str {
        self.current.name()
    }

    pub fn is_playing(&self) -> bool {
        self.current.plays_song()
    }

    pub fn context(&self) -> &SharedState {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SharedState {
        &mut self.ctx
    }

    pub fn command(&mut self, command: Command) {
        debug!("Command {:?} in {}", command, self.current.name());
        let transition = self.current.on_command(&mut self.ctx, command);
        self.apply(transition);
    }

    pub fn key(&mut self, key: KeyEvent) {
        let transition = self.current.on_key(&mut self.ctx, key);
        self.apply(transition);
    }

    pub fn set_window_active(&mut self, active: bool) {
        self.window.set_active(active);
    }

    /// Runs one frame. The first frame after the window regains focus does not move the song.
    pub fn frame(&mut self, dt_us: u64) {
        let dt_us = if self.window.take_just_active() { 0 } else { dt_us };
        let transition = self.current.on_frame(&mut self.ctx, dt_us);
        self.apply(transition);
    }

    pub fn render(&self) -> Frame {
        self.current.render(&self.ctx)
    }

    fn apply(&mut self, transition: Transition) {
        if let Transition::Switch(mut next) = transition {
            info!("{} -> {}..!", self.current.name(), next.name());
            self.current.on_exit(&mut self.ctx);
            next.on_enter(&mut self.ctx);
            self.current = next;
        }
    }
}

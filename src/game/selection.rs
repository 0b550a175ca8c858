use crate::game::{
    Command, Frame, GameState, PlayMode, Playing, SelectionView, SharedState, Title, TrackRow,
    Transition,
};
use log::{debug, info, warn};

/// Lets the player decide which tracks they play and which the trainer plays.
pub struct Selection {
    /// Indices of tracks that have at least one note.
    choices: Vec<usize>,
    cursor: usize,
}

impl Selection {
    pub fn new(ctx: &SharedState) -> Self {
        let choices = ctx
            .song
            .timeline
            .tracks()
            .iter()
            .filter(|track| track.note_count > 0)
            .map(|track| track.index)
            .collect();

        Self { choices, cursor: 0 }
    }

    pub fn focused_track(&self) -> Option<usize> {
        self.choices.get(self.cursor).copied()
    }

    fn cycle_focused(&self, ctx: &mut SharedState, forward: bool) {
        let Some(track) = self.focused_track() else {
            return;
        };
        if let Some(mode) = ctx.track_modes.get_mut(track) {
            *mode = if forward { mode.next() } else { mode.prev() };
            debug!("Track {} is now {:?}", track, mode);
        }
    }
}

impl GameState for Selection {
    fn name(&self) -> &'static str {
        "Selection"
    }

    fn on_command(&mut self, ctx: &mut SharedState, command: Command) -> Transition {
        match command {
            Command::Up => self.cursor = self.cursor.saturating_sub(1),
            Command::Down => {
                if self.cursor + 1 < self.choices.len() {
                    self.cursor += 1;
                }
            }
            Command::Left => self.cycle_focused(ctx, false),
            Command::Right => self.cycle_focused(ctx, true),
            Command::Toggle => {
                ctx.play_mode = match ctx.play_mode {
                    PlayMode::Play => PlayMode::Practice,
                    PlayMode::Practice => PlayMode::Play,
                };
                info!("Play mode set to {:?}..!", ctx.play_mode);
            }
            Command::Enter => {
                if self.choices.is_empty() {
                    warn!("Song has no notes to play..!");
                    return Transition::Stay;
                }
                return Transition::Switch(Box::new(Playing::new(ctx)));
            }
            Command::Back => return Transition::Switch(Box::new(Title)),
            _ => {}
        }

        Transition::Stay
    }

    fn render(&self, ctx: &SharedState) -> Frame {
        let tracks = ctx.song.timeline.tracks();
        let rows = self
            .choices
            .iter()
            .enumerate()
            .map(|(row, &index)| TrackRow {
                index,
                name: tracks[index]
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Track {}", index + 1)),
                note_count: tracks[index].note_count,
                mode: ctx.track_mode(index),
                focused: row == self.cursor,
            })
            .collect();

        Frame::Selection(SelectionView {
            rows,
            play_mode: ctx.play_mode,
        })
    }
}

use crate::game::{Command, Frame, GameState, Selection, SharedState, TitleView, Transition};

pub struct Title;

impl GameState for Title {
    fn name(&self) -> &'static str {
        "Title"
    }

    fn on_command(&mut self, ctx: &mut SharedState, command: Command) -> Transition {
        match command {
            Command::Enter => Transition::Switch(Box::new(Selection::new(ctx))),
            _ => Transition::Stay,
        }
    }

    fn render(&self, ctx: &SharedState) -> Frame {
        Frame::Title(TitleView {
            title: ctx.song.metadata.title.clone(),
            track_count: ctx.song.metadata.track_count,
            tempo_bpm: ctx.song.metadata.tempo_bpm,
        })
    }
}

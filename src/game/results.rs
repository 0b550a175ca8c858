use crate::evaluator::ScoreAccumulator;
use crate::game::{Command, Frame, GameState, ResultsView, Selection, SharedState, Title, Transition};

pub struct Results {
    score: ScoreAccumulator,
}

impl Results {
    pub fn new(score: ScoreAccumulator) -> Self {
        Self { score }
    }

    pub fn score(&self) -> &ScoreAccumulator {
        &self.score
    }
}

impl GameState for Results {
    fn name(&self) -> &'static str {
        "Results"
    }

    fn on_command(&mut self, ctx: &mut SharedState, command: Command) -> Transition {
        match command {
            Command::Enter => Transition::Switch(Box::new(Title)),
            // Retry with the same track choices.
            Command::Back => Transition::Switch(Box::new(Selection::new(ctx))),
            _ => Transition::Stay,
        }
    }

    fn render(&self, ctx: &SharedState) -> Frame {
        Frame::Results(ResultsView {
            title: ctx.song.metadata.title.clone(),
            score: self.score,
            accuracy: self.score.accuracy(),
        })
    }
}

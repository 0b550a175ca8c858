use crate::evaluator::{Evaluator, KeyEvent};
use crate::game::{
    Command, Frame, GameState, PlayMode, PlayingView, Results, Selection, SharedState, TrackMode,
    Transition, VisibleNote,
};
use crate::transport::Transport;
use log::{debug, info, warn};
use std::collections::BTreeMap;

pub const DEFAULT_WINDOW_US: u64 = 3_000_000;
pub const MIN_WINDOW_US: u64 = 500_000;
pub const MAX_WINDOW_US: u64 = 10_000_000;
pub const SKIP_US: i64 = 5_000_000;
const SPEED_STEP: f64 = 0.1;
/// Velocity used when echoing the player's own keys.
const ECHO_VELOCITY: u8 = 100;

#[derive(Debug, Clone, Copy, Default)]
struct FpsMeter {
    frames: u32,
    elapsed_us: u64,
    fps: f64,
}

impl FpsMeter {
    fn tick(&mut self, dt_us: u64) {
        self.frames += 1;
        self.elapsed_us += dt_us;
        if self.elapsed_us >= 1_000_000 {
            self.fps = self.frames as f64 * 1_000_000.0 / self.elapsed_us as f64;
            self.frames = 0;
            self.elapsed_us = 0;
        }
    }
}

/// A running session: the song plays, the player's keys are judged.
pub struct Playing {
    transport: Transport,
    evaluator: Evaluator,
    /// Timeline span index to evaluator span index, for spans the player is responsible for.
    eval_index: Vec<Option<usize>>,
    /// Channel each echoed key was sounded on.
    echoing: BTreeMap<u8, u8>,
    window_us: u64,
    fps: FpsMeter,
}

impl Playing {
    pub fn new(ctx: &SharedState) -> Self {
        let timeline = &ctx.song.timeline;
        let mut eval_index = Vec::with_capacity(timeline.note_spans().len());
        let mut user_spans = Vec::new();

        for span in timeline.note_spans() {
            if ctx.track_mode(span.track).is_played_by_user() {
                eval_index.push(Some(user_spans.len()));
                user_spans.push(*span);
            } else {
                eval_index.push(None);
            }
        }

        let mut transport = Transport::new(timeline.duration_us());
        if let Err(e) = transport.set_speed(ctx.initial_speed) {
            warn!("{}, playing at normal speed..!", e);
        }

        debug!(
            "Session with {} of {} notes for the player",
            user_spans.len(),
            eval_index.len()
        );

        Self {
            transport,
            evaluator: Evaluator::new(user_spans, ctx.evaluator_config),
            eval_index,
            echoing: BTreeMap::new(),
            window_us: DEFAULT_WINDOW_US,
            fps: FpsMeter::default(),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn window_us(&self) -> u64 {
        self.window_us
    }

    fn jump(&mut self, ctx: &mut SharedState, target_us: i64) {
        self.transport.set_hold(None);
        self.transport.seek(target_us);
        let missed = self.evaluator.update(self.transport.position_us());
        if missed > 0 {
            info!("Skipped past {} note(s)..!", missed);
        }
        silence(ctx);
    }

    fn change_speed(&mut self, speed: f64) {
        match self.transport.set_speed(speed) {
            Ok(()) => info!("Speed set to {:.2}x..!", speed),
            Err(e) => warn!("{}, keeping {:.2}x..!", e, self.transport.speed()),
        }
    }

    fn echo(&mut self, ctx: &mut SharedState, key: KeyEvent, span: Option<usize>) {
        if !key.down {
            if let Some(channel) = self.echoing.remove(&key.note)
                && let Err(e) = ctx.output.note_off(channel, key.note)
            {
                warn!("Failed to release echoed note {}: {}", key.note, e);
            }
            return;
        }

        let (audible, channel) = match span.map(|i| self.evaluator.spans()[i]) {
            Some(span) => (ctx.track_mode(span.track).is_audible(), span.channel),
            None => (ctx.track_modes.contains(&TrackMode::YouPlay), 0),
        };
        if !audible {
            return;
        }

        match ctx.output.note_on(channel, key.note, ECHO_VELOCITY) {
            Ok(()) => {
                self.echoing.insert(key.note, channel);
            }
            Err(e) => warn!("Failed to echo note {}: {}", key.note, e),
        }
    }
}

fn silence(ctx: &mut SharedState) {
    if let Err(e) = ctx.output.all_notes_off() {
        warn!("Failed to silence output: {}", e);
    }
}

/// Sends the auto-played events with `from_us <= time < to_us`.
fn dispatch(ctx: &mut SharedState, from_us: u64, to_us: u64) {
    let SharedState {
        song,
        track_modes,
        output,
        ..
    } = ctx;

    for event in song.timeline.events_in_range(from_us, to_us) {
        if track_modes.get(event.track) != Some(&TrackMode::Auto) {
            continue;
        }

        let sent = if event.on {
            output.note_on(event.channel, event.note, event.velocity)
        } else {
            output.note_off(event.channel, event.note)
        };
        if let Err(e) = sent {
            warn!("Dropped event for note {}: {}", event.note, e);
        }
    }
}

impl GameState for Playing {
    fn name(&self) -> &'static str {
        "Playing"
    }

    fn on_enter(&mut self, ctx: &mut SharedState) {
        info!(
            "Playing '{}' in {:?} mode at {:.2}x..!",
            ctx.song.metadata.title,
            ctx.play_mode,
            self.transport.speed()
        );
        if let Err(e) = ctx.inhibitor.start() {
            warn!("Could not keep the display awake: {}", e);
        }
        self.transport.play();
    }

    fn on_command(&mut self, ctx: &mut SharedState, command: Command) -> Transition {
        match command {
            Command::Toggle => {
                self.transport.toggle_pause();
                if !self.transport.is_playing() {
                    silence(ctx);
                }
            }
            Command::Pause => {
                self.transport.pause();
                silence(ctx);
            }
            Command::Resume => self.transport.resume(),
            Command::Up => {
                let speed = ((self.transport.speed() + SPEED_STEP) * 10.0).round() / 10.0;
                self.change_speed(speed);
            }
            Command::Down => {
                let speed = ((self.transport.speed() - SPEED_STEP) * 10.0).round() / 10.0;
                self.change_speed(speed);
            }
            Command::SetSpeed(speed) => self.change_speed(speed),
            Command::Left => self.window_us = (self.window_us * 5 / 4).min(MAX_WINDOW_US),
            Command::Right => self.window_us = (self.window_us * 4 / 5).max(MIN_WINDOW_US),
            Command::Seek(target_us) => self.jump(ctx, target_us),
            Command::Skip(delta_us) => {
                let target = self.transport.position_us() as i64 + delta_us;
                self.jump(ctx, target);
            }
            Command::SetLoop(bounds) => {
                if ctx.play_mode != PlayMode::Practice {
                    warn!("Loops are only available in practice mode..!");
                } else if let Err(e) = self.transport.set_loop(bounds) {
                    warn!("{}", e);
                }
            }
            Command::ToggleFps => ctx.show_fps = !ctx.show_fps,
            Command::Back => return Transition::Switch(Box::new(Selection::new(ctx))),
            Command::Enter => {}
        }

        Transition::Stay
    }

    fn on_key(&mut self, ctx: &mut SharedState, key: KeyEvent) -> Transition {
        let song_us = self.transport.song_time_at(key.wall_us);

        if key.down && !self.transport.is_playing() {
            debug!("Ignoring note {} while not playing", key.note);
            return Transition::Stay;
        }

        let judgment = self.evaluator.handle_key(key.note, key.down, song_us);
        self.echo(ctx, key, judgment.and_then(|j| j.span));

        Transition::Stay
    }

    fn on_frame(&mut self, ctx: &mut SharedState, dt_us: u64) -> Transition {
        self.fps.tick(dt_us);

        if ctx.play_mode == PlayMode::Practice {
            let position = self.transport.position_us();
            let hold = self
                .evaluator
                .next_pending_start()
                .filter(|start| *start >= position);
            self.transport.set_hold(hold);
        }

        let before = self.transport.position_us();
        let step = self.transport.advance(dt_us);
        let after = self.transport.position_us();

        if step.looped || after < before {
            silence(ctx);
        } else if step.finished {
            dispatch(ctx, before, after.saturating_add(1));
        } else {
            dispatch(ctx, before, after);
        }

        self.evaluator.update(after);

        if step.finished {
            let unplayed = self.evaluator.finish(after);
            if unplayed > 0 {
                debug!("{} note(s) still open at the end, missed", unplayed);
            }
            let score = *self.evaluator.score();
            info!(
                "Finished '{}' with {} of {} notes..!",
                ctx.song.metadata.title,
                score.correct(),
                self.evaluator.spans().len()
            );
            return Transition::Switch(Box::new(Results::new(score)));
        }

        Transition::Stay
    }

    fn render(&self, ctx: &SharedState) -> Frame {
        let position = self.transport.position_us();
        let from = position.saturating_sub(self.window_us / 4);
        let to = position.saturating_add(self.window_us);

        let notes = ctx
            .song
            .timeline
            .spans_in_range(from, to)
            .filter(|(_, span)| ctx.track_mode(span.track) != TrackMode::Hidden)
            .map(|(i, span)| {
                let eval = self.eval_index.get(i).copied().flatten();
                VisibleNote {
                    start_us: span.start_us,
                    end_us: span.end_us,
                    note: span.note,
                    track: span.track,
                    user: eval.is_some(),
                    outcome: eval.and_then(|k| self.evaluator.outcome(k)),
                }
            })
            .collect();

        Frame::Playing(PlayingView {
            transport: self.transport.snapshot(),
            play_mode: ctx.play_mode,
            window_us: self.window_us,
            notes,
            held: self.evaluator.held_notes().collect(),
            score: *self.evaluator.score(),
            fps: ctx.show_fps.then_some(self.fps.fps),
        })
    }

    fn plays_song(&self) -> bool {
        true
    }

    fn on_exit(&mut self, ctx: &mut SharedState) {
        self.transport.stop();
        silence(ctx);
        self.echoing.clear();
        if let Err(e) = ctx.inhibitor.stop() {
            warn!("Could not release the display: {}", e);
        }
        ctx.last_score = Some(*self.evaluator.score());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::NoInhibitor;
    use crate::engine::log_output::LogOutput;
    use crate::evaluator::Outcome;
    use crate::model::config::EvaluatorConfig;
    use crate::test_support::{end_of_track, note_off, note_on, song_from};

    // Two quarter notes at 120 bpm: C4 at 0.5s on track 0, E4 at 1.0s on track 1.
    fn context() -> SharedState {
        let song = song_from(
            "duet.mid",
            480,
            vec![
                vec![note_on(480, 0, 60, 90), note_off(480, 0, 60), end_of_track(0)],
                vec![note_on(960, 1, 64, 80), note_off(480, 1, 64), end_of_track(0)],
            ],
        );
        SharedState::new(
            song,
            EvaluatorConfig::default(),
            Box::new(LogOutput::new()),
            Box::new(NoInhibitor),
        )
    }

    fn key(note: u8, down: bool, wall_us: u64) -> KeyEvent {
        KeyEvent { note, down, wall_us }
    }

    #[test]
    fn judges_user_tracks_and_misses_late_notes() {
        env_logger::try_init().unwrap_or(());

        let mut ctx = context();
        ctx.track_modes[1] = TrackMode::Auto;
        let mut playing = Playing::new(&ctx);
        playing.on_enter(&mut ctx);
        assert_eq!(playing.evaluator().spans().len(), 1);

        playing.on_frame(&mut ctx, 480_000);
        playing.on_key(&mut ctx, key(60, true, 500_000));
        assert_eq!(playing.evaluator().outcome(0), Some(Outcome::Perfect));

        let mut transition = Transition::Stay;
        for _ in 0..20 {
            transition = playing.on_frame(&mut ctx, 100_000);
            if matches!(transition, Transition::Switch(_)) {
                break;
            }
        }
        assert!(matches!(transition, Transition::Switch(next) if next.name() == "Results"));
        assert_eq!(playing.evaluator().score().perfect, 1);
    }

    #[test]
    fn short_last_note_is_judged_before_results() {
        env_logger::try_init().unwrap_or(());

        // A single 100ms note; the song ends well inside its lag window.
        let song = song_from(
            "blip.mid",
            480,
            vec![vec![note_on(0, 0, 72, 90), note_off(96, 0, 72), end_of_track(0)]],
        );
        let mut ctx = SharedState::new(
            song,
            EvaluatorConfig::default(),
            Box::new(LogOutput::new()),
            Box::new(NoInhibitor),
        );
        let mut playing = Playing::new(&ctx);
        playing.on_enter(&mut ctx);

        let mut finished = false;
        for _ in 0..20 {
            if matches!(playing.on_frame(&mut ctx, 16_667), Transition::Switch(_)) {
                finished = true;
                break;
            }
        }

        assert!(finished);
        let evaluator = playing.evaluator();
        assert_eq!(evaluator.judgments().len(), evaluator.spans().len());
        assert_eq!(evaluator.outcome(0), Some(Outcome::Missed));
        assert_eq!(evaluator.score().missed, 1);
        assert!(evaluator.is_complete());
    }

    #[test]
    fn practice_waits_for_the_next_note() {
        env_logger::try_init().unwrap_or(());

        let mut ctx = context();
        ctx.play_mode = PlayMode::Practice;
        let mut playing = Playing::new(&ctx);
        playing.on_enter(&mut ctx);

        for _ in 0..10 {
            playing.on_frame(&mut ctx, 200_000);
        }
        assert_eq!(playing.transport().position_us(), 500_000);
        assert_eq!(playing.evaluator().score().missed, 0);

        let wall = playing.transport().clock_us() + 700_000;
        playing.on_key(&mut ctx, key(60, true, wall));
        assert_eq!(playing.evaluator().outcome(0), Some(Outcome::Perfect));

        for _ in 0..10 {
            playing.on_frame(&mut ctx, 200_000);
        }
        assert_eq!(playing.transport().position_us(), 1_000_000);
    }

    #[test]
    fn seeking_forward_misses_skipped_notes() {
        env_logger::try_init().unwrap_or(());

        let mut ctx = context();
        let mut playing = Playing::new(&ctx);
        playing.on_enter(&mut ctx);

        playing.on_command(&mut ctx, Command::Seek(1_300_000));
        assert_eq!(playing.evaluator().score().missed, 2);

        playing.on_command(&mut ctx, Command::Skip(-SKIP_US));
        assert_eq!(playing.transport().position_us(), 0);
        assert_eq!(playing.evaluator().score().missed, 2);
    }

    #[test]
    fn speed_and_zoom_commands_stay_in_range() {
        env_logger::try_init().unwrap_or(());

        let mut ctx = context();
        let mut playing = Playing::new(&ctx);
        playing.on_enter(&mut ctx);

        playing.on_command(&mut ctx, Command::Up);
        assert_eq!(playing.transport().speed(), 1.1);
        playing.on_command(&mut ctx, Command::SetSpeed(0.1));
        playing.on_command(&mut ctx, Command::Down);
        assert_eq!(playing.transport().speed(), 0.1);
        playing.on_command(&mut ctx, Command::SetSpeed(-1.0));
        assert_eq!(playing.transport().speed(), 0.1);

        for _ in 0..20 {
            playing.on_command(&mut ctx, Command::Left);
        }
        assert_eq!(playing.window_us(), MAX_WINDOW_US);
        for _ in 0..40 {
            playing.on_command(&mut ctx, Command::Right);
        }
        assert_eq!(playing.window_us(), MIN_WINDOW_US);
    }

    #[test]
    fn loops_only_in_practice() {
        env_logger::try_init().unwrap_or(());

        let bounds = crate::transport::LoopBounds {
            start_us: 0,
            end_us: 600_000,
        };

        let mut ctx = context();
        let mut playing = Playing::new(&ctx);
        playing.on_command(&mut ctx, Command::SetLoop(Some(bounds)));
        assert_eq!(playing.transport().loop_bounds(), None);

        ctx.play_mode = PlayMode::Practice;
        playing.on_command(&mut ctx, Command::SetLoop(Some(bounds)));
        assert_eq!(playing.transport().loop_bounds(), Some(bounds));
    }

    #[test]
    fn render_hides_hidden_tracks() {
        env_logger::try_init().unwrap_or(());

        let mut ctx = context();
        ctx.track_modes[1] = TrackMode::Hidden;
        let playing = Playing::new(&ctx);

        let Frame::Playing(view) = playing.render(&ctx) else {
            panic!("expected a playing frame");
        };
        assert_eq!(view.notes.len(), 1);
        assert_eq!(view.notes[0].note, 60);
        assert!(view.notes[0].user);
        assert_eq!(view.fps, None);
    }
}

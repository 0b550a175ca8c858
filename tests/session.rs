use FALLING_NOTES::{
    AutoPlayer, Command, EvaluatorConfig, Frame, NoInhibitor, NoteOutput, NoteSpan, PlayMode,
    SharedState, StateManager, TrackMode, load_midi_file,
};
use midly::num::{u4, u7, u15, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Default)]
struct Recorder {
    sent: Rc<RefCell<Vec<(u8, u8, bool)>>>,
}

impl NoteOutput for Recorder {
    fn note_on(&mut self, channel: u8, note: u8, _velocity: u8) -> anyhow::Result<()> {
        self.sent.borrow_mut().push((channel, note, true));
        Ok(())
    }

    fn note_off(&mut self, channel: u8, note: u8) -> anyhow::Result<()> {
        self.sent.borrow_mut().push((channel, note, false));
        Ok(())
    }

    fn all_notes_off(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

fn midi(delta: u32, channel: u8, message: MidiMessage) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Midi {
            channel: u4::new(channel),
            message,
        },
    }
}

fn on(delta: u32, channel: u8, key: u8) -> TrackEvent<'static> {
    midi(delta, channel, MidiMessage::NoteOn { key: u7::new(key), vel: u7::new(96) })
}

fn off(delta: u32, channel: u8, key: u8) -> TrackEvent<'static> {
    midi(delta, channel, MidiMessage::NoteOff { key: u7::new(key), vel: u7::new(0) })
}

fn end() -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    }
}

/// A C major arpeggio for the right hand over a held C3 in the left, at 120 bpm.
fn write_fixture(dir: &std::path::Path) -> std::path::PathBuf {
    let mut smf = Smf::new(Header::new(Format::Parallel, Timing::Metrical(u15::new(480))));
    smf.tracks = vec![
        vec![
            on(0, 0, 60),
            off(480, 0, 60),
            on(0, 0, 64),
            off(480, 0, 64),
            on(0, 0, 67),
            off(480, 0, 67),
            on(0, 0, 72),
            off(480, 0, 72),
            end(),
        ],
        vec![on(0, 1, 48), off(1920, 1, 48), end()],
    ];

    let path = dir.join("Arpeggio.mid");
    smf.save(&path).unwrap();
    path
}

fn run_to_results(game: &mut StateManager, player: &mut AutoPlayer, frame_us: u64) {
    let mut clock_us = 0;
    for _ in 0..10_000 {
        let Frame::Playing(view) = game.render() else {
            return;
        };
        for key in player.due_keys(&view.transport, clock_us, frame_us) {
            game.key(key);
        }
        game.frame(frame_us);
        clock_us += frame_us;
    }
    panic!("session never finished");
}

fn user_spans(ctx: &SharedState) -> Vec<NoteSpan> {
    ctx.song
        .timeline
        .note_spans()
        .iter()
        .filter(|span| ctx.track_mode(span.track).is_played_by_user())
        .copied()
        .collect()
}

#[test]
fn exact_player_scores_every_note_perfect() {
    env_logger::try_init().unwrap_or(());

    let dir = tempfile::tempdir().unwrap();
    let song = load_midi_file(write_fixture(dir.path())).unwrap();
    assert_eq!(song.metadata.title, "arpeggio");
    assert_eq!(song.timeline.duration_us(), 2_000_000);

    let recorder = Recorder::default();
    let mut ctx = SharedState::new(
        song,
        EvaluatorConfig::default(),
        Box::new(recorder.clone()),
        Box::new(NoInhibitor),
    );
    ctx.track_modes[1] = TrackMode::Auto;
    let mut player = AutoPlayer::new(&user_spans(&ctx), 0, 0.0, 0);

    let mut game = StateManager::new(ctx);
    game.command(Command::Enter);
    game.command(Command::Enter);
    assert_eq!(game.state_name(), "Playing");

    run_to_results(&mut game, &mut player, 10_000);

    let Frame::Results(view) = game.render() else {
        panic!("expected results, got {}", game.state_name());
    };
    assert_eq!(view.score.perfect, 4);
    assert_eq!(view.score.best_streak, 4);
    assert_eq!(view.accuracy, 1.0);

    let sent = recorder.sent.borrow();
    assert!(sent.contains(&(1, 48, true)));
    assert!(sent.contains(&(1, 48, false)));
    // The player's own keys are echoed on their track's channel.
    assert!(sent.contains(&(0, 67, true)));
}

#[test]
fn practice_session_waits_for_a_slow_player() {
    env_logger::try_init().unwrap_or(());

    let dir = tempfile::tempdir().unwrap();
    let song = load_midi_file(write_fixture(dir.path())).unwrap();

    let mut ctx = SharedState::new(
        song,
        EvaluatorConfig::default(),
        Box::new(Recorder::default()),
        Box::new(NoInhibitor),
    );
    ctx.play_mode = PlayMode::Practice;
    ctx.track_modes[1] = TrackMode::Hidden;
    let mut player = AutoPlayer::new(&user_spans(&ctx), 150_000, 0.0, 42);

    let mut game = StateManager::new(ctx);
    game.command(Command::Enter);
    game.command(Command::Enter);

    run_to_results(&mut game, &mut player, 16_000);

    let Frame::Results(view) = game.render() else {
        panic!("expected results, got {}", game.state_name());
    };
    assert_eq!(view.score.missed, 0);
    assert_eq!(view.score.correct(), 4);
}

#[test]
fn unplayed_final_staccato_is_missed_at_the_end() {
    env_logger::try_init().unwrap_or(());

    // The last note lasts 50ms and the song ends with it, inside the default lag.
    let mut smf = Smf::new(Header::new(Format::SingleTrack, Timing::Metrical(u15::new(480))));
    smf.tracks = vec![vec![
        on(0, 0, 60),
        off(480, 0, 60),
        on(0, 0, 62),
        off(48, 0, 62),
        end(),
    ]];
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("staccato.mid");
    smf.save(&path).unwrap();

    let song = load_midi_file(&path).unwrap();
    assert_eq!(song.timeline.duration_us(), 550_000);

    let ctx = SharedState::new(
        song,
        EvaluatorConfig::default(),
        Box::new(Recorder::default()),
        Box::new(NoInhibitor),
    );
    let spans = user_spans(&ctx);
    assert_eq!(spans.len(), 2);
    // Only the first note gets played.
    let mut player = AutoPlayer::new(&spans[..1], 0, 0.0, 0);

    let mut game = StateManager::new(ctx);
    game.command(Command::Enter);
    game.command(Command::Enter);
    run_to_results(&mut game, &mut player, 16_667);

    let Frame::Results(view) = game.render() else {
        panic!("expected results, got {}", game.state_name());
    };
    assert_eq!(view.score.perfect, 1);
    assert_eq!(view.score.missed, 1);
    assert_eq!(view.score.correct() + view.score.missed, spans.len() as u32);
    assert_eq!(view.accuracy, 0.5);
}

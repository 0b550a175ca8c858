use FALLING_NOTES::{
    Args, AutoPlayer, Command, DEFAULT_REFRESH_RATE, EvaluatorConfig, Frame, IdleInhibitor,
    KeepAwake, LogOutput, NoInhibitor, NoteSpan, PlayMode, SharedState, Song, StateManager,
    UserSettings, default_settings_path, note_name, open_song, parse_play_mode, parse_stray_policy,
};
use anyhow::Result;
use clap::Parser;
use log::{debug, error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const KEEP_AWAKE_INTERVAL: Duration = Duration::from_secs(30);
/// Song time may stand still this long after the simulated player runs out of keys.
const STALL_LIMIT_US: u64 = 10_000_000;

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let settings_path = args.settings.clone().unwrap_or_else(default_settings_path);
    let (mut settings, settings_writable) = match UserSettings::load(&settings_path) {
        Ok(settings) => (settings, true),
        Err(e) => {
            warn!("{}, continuing without saved settings..!", e);
            (UserSettings::empty(&settings_path), false)
        }
    };

    let refresh_rate = settings.refresh_rate().unwrap_or_else(|e| {
        warn!("{}, using {} fps..!", e, DEFAULT_REFRESH_RATE);
        DEFAULT_REFRESH_RATE
    });

    let Some((midi_path, song)) = open_song(args.midi.as_deref(), &settings) else {
        info!("No usable MIDI file given or opened before, nothing to do..!");
        return Ok(());
    };

    settings.set_last_file(&midi_path);
    if settings_writable && let Err(e) = settings.save() {
        warn!("Could not save settings: {}", e);
    }

    if args.dry_run {
        preview(&song, args.dry_run_max);
        return Ok(());
    }

    run_session(&args, song, refresh_rate)
}

fn preview(song: &Song, max: usize) {
    info!(
        "'{}': {} track(s), {:.1} bpm, {:.2}s..!",
        song.metadata.title,
        song.metadata.track_count,
        song.metadata.tempo_bpm,
        song.timeline.duration_us() as f64 / 1_000_000.0
    );

    for track in song.timeline.tracks() {
        info!(
            "Track {}: '{}' with {} note(s) on channel(s) {:?}",
            track.index,
            track.name.as_deref().unwrap_or("<unnamed>"),
            track.note_count,
            track.channels
        );
    }

    info!("Previewing at most {} notes..!", max);
    for (i, span) in song.timeline.note_spans().iter().take(max).enumerate() {
        info!(
            "Note {}: {:>4} start_ms={:.3} dur_ms={:.3} track={} ch={}",
            i,
            note_name(span.note),
            span.start_us as f64 / 1000.0,
            span.duration_us() as f64 / 1000.0,
            span.track,
            span.channel
        );
    }
}

fn run_session(args: &Args, song: Song, refresh_rate: u32) -> Result<()> {
    let config = EvaluatorConfig::from_millis(
        args.lead_ms,
        args.lag_ms,
        args.tight_ms,
        parse_stray_policy(&args.stray_policy),
    );

    let inhibitor: Box<dyn IdleInhibitor> = match args.keep_awake_cmd.clone() {
        Some(cmd) => Box::new(KeepAwake::new(KEEP_AWAKE_INTERVAL, move || {
            match std::process::Command::new("sh").arg("-c").arg(&cmd).status() {
                Ok(status) if status.success() => debug!("Keep-awake command ran"),
                Ok(status) => warn!("Keep-awake command exited with {}..!", status),
                Err(e) => warn!("Keep-awake command failed: {}", e),
            }
        })),
        None => Box::new(NoInhibitor),
    };

    let mut ctx = SharedState::new(song, config, Box::new(LogOutput::new()), inhibitor);
    ctx.play_mode = parse_play_mode(&args.mode);
    ctx.initial_speed = args.speed;

    let user_spans: Vec<NoteSpan> = ctx
        .song
        .timeline
        .note_spans()
        .iter()
        .filter(|span| ctx.track_mode(span.track).is_played_by_user())
        .copied()
        .collect();

    // Practice waits on every note, so the simulated player may not skip or stray.
    let (humanize_us, skip_chance) = match ctx.play_mode {
        PlayMode::Play => (args.humanize_ms * 1_000, args.skip_chance),
        PlayMode::Practice => ((args.humanize_ms * 1_000).min(config.lead_us), 0.0),
    };
    let mut player = AutoPlayer::new(&user_spans, humanize_us, skip_chance, args.seed);

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        warn!("Ctrl-C received, stopping the session..!");
        handler_flag.store(false, Ordering::SeqCst);
    })?;

    let mut game = StateManager::new(ctx);
    game.command(Command::Enter);
    game.command(Command::Enter);

    let frame_us = 1_000_000 / refresh_rate.max(1) as u64;
    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let mut clock_us = 0u64;
    let mut last = Instant::now();
    let mut last_score = None;
    let mut stalled_us = 0u64;
    let mut last_position = 0u64;

    while running.load(Ordering::SeqCst) && game.is_playing() {
        let Frame::Playing(view) = game.render() else {
            break;
        };

        for key in player.due_keys(&view.transport, clock_us, frame_us) {
            game.key(key);
        }

        if args.verbose && last_score != Some(view.score) {
            info!(
                "{:>8.3}s perfect={} good={} missed={} wrong={} extra={} streak={}",
                view.transport.position_us as f64 / 1_000_000.0,
                view.score.perfect,
                view.score.good,
                view.score.missed,
                view.score.wrong,
                view.score.extra,
                view.score.streak
            );
            last_score = Some(view.score);
        }

        if view.transport.position_us == last_position && player.remaining() == 0 {
            stalled_us += frame_us;
            if stalled_us > STALL_LIMIT_US {
                warn!("Nothing left to play and the song is not moving, giving up..!");
                game.command(Command::Back);
                break;
            }
        } else {
            stalled_us = 0;
        }
        last_position = view.transport.position_us;

        let dt_us = if args.fast {
            frame_us
        } else {
            sleeper.sleep(Duration::from_micros(frame_us));
            let now = Instant::now();
            let dt = now.duration_since(last).as_micros() as u64;
            last = now;
            dt
        };

        game.frame(dt_us);
        clock_us += dt_us;
    }

    if game.is_playing() {
        game.command(Command::Back);
    }

    match game.render() {
        Frame::Results(view) => info!(
            "'{}' done: {} perfect, {} good, {} missed, {} wrong, {} extra, best streak {}, accuracy {:.1}%..!",
            view.title,
            view.score.perfect,
            view.score.good,
            view.score.missed,
            view.score.wrong,
            view.score.extra,
            view.score.best_streak,
            view.accuracy * 100.0
        ),
        _ => info!("Session stopped early..!"),
    }

    Ok(())
}

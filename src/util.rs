use crate::evaluator::StrayPolicy;
use crate::game::PlayMode;
use log::info;

const MIDI_EXTENSIONS: &[&str] = &[".mid", ".midi"];
const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

pub fn parse_stray_policy(input: &str) -> StrayPolicy {
    match input.to_lowercase().as_str() {
        "c" | "classify" => StrayPolicy::Classify,
        "w" | "wrong" | "always-wrong" => StrayPolicy::AlwaysWrong,
        "i" | "ignore" => StrayPolicy::Ignore,
        other => {
            info!("Unknown stray note policy '{}', defaulting to `classify`..!", other);
            StrayPolicy::Classify
        }
    }
}

pub fn parse_play_mode(input: &str) -> PlayMode {
    match input.to_lowercase().as_str() {
        "p" | "play" => PlayMode::Play,
        "pr" | "practice" | "wait" => PlayMode::Practice,
        other => {
            info!("Unknown play mode '{}', defaulting to `play`..!", other);
            PlayMode::Play
        }
    }
}

/// Removes one pair of surrounding quotes, as left behind by some launchers.
pub fn strip_quotes(input: &str) -> &str {
    let input = input.strip_prefix('"').unwrap_or(input);
    input.strip_suffix('"').unwrap_or(input)
}

/// Display title for a song file: lowercased, without directory or MIDI extension.
pub fn trim_filename(path: &str) -> String {
    let mut lower = path.to_lowercase();

    for ext in MIDI_EXTENSIONS {
        if let Some(stem) = lower.strip_suffix(ext) {
            lower = stem.to_string();
        }
    }

    match lower.rfind(['/', '\\']) {
        Some(i) => lower[i + 1..].to_string(),
        None => lower,
    }
}

/// Scientific pitch name, with middle C (60) as C4.
pub fn note_name(midi: u8) -> String {
    let octave = (midi / 12) as i32 - 1;
    format!("{}{}", NOTE_NAMES[(midi % 12) as usize], octave)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trims_directories_and_extensions() {
        assert_eq!(trim_filename("/home/me/Music/Fur_Elise.MID"), "fur_elise");
        assert_eq!(trim_filename("C:\\songs\\Minuet.midi"), "minuet");
        assert_eq!(trim_filename("plain"), "plain");
        assert_eq!(trim_filename("archive.mid.zip"), "archive.mid.zip");
    }

    #[test]
    fn strips_one_layer_of_quotes() {
        assert_eq!(strip_quotes("\"/tmp/song.mid\""), "/tmp/song.mid");
        assert_eq!(strip_quotes("\"/tmp/song.mid"), "/tmp/song.mid");
        assert_eq!(strip_quotes("/tmp/song.mid"), "/tmp/song.mid");
    }

    #[test]
    fn names_notes() {
        assert_eq!(note_name(60), "C4");
        assert_eq!(note_name(69), "A4");
        assert_eq!(note_name(21), "A0");
        assert_eq!(note_name(0), "C-1");
    }

    #[test]
    fn parses_policies_with_fallback() {
        env_logger::try_init().unwrap_or(());

        assert_eq!(parse_stray_policy("IGNORE"), StrayPolicy::Ignore);
        assert_eq!(parse_stray_policy("w"), StrayPolicy::AlwaysWrong);
        assert_eq!(parse_stray_policy("whatever"), StrayPolicy::Classify);
        assert_eq!(parse_play_mode("practice"), PlayMode::Practice);
        assert_eq!(parse_play_mode("??"), PlayMode::Play);
    }
}

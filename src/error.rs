use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Malformed or unsupported Standard MIDI File data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("missing or invalid MThd header chunk")]
    BadHeader,

    #[error("SMPTE or zero time division 0x{0:04X} is not supported")]
    UnsupportedDivision(u16),

    #[error("file ended in the middle of a chunk or event at byte {0}")]
    Truncated(usize),

    #[error("unexpected event byte 0x{byte:02X} at byte {offset}")]
    UnknownEventByte { byte: u8, offset: usize },

    #[error("variable-length quantity longer than 4 bytes at byte {0}")]
    VarLenTooLong(usize),
}

/// An invalid parameter handed to the transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("playback speed must be a positive number, got {0}")]
    InvalidSpeed(f64),

    #[error("loop bounds [{start}, {end}) are empty or past the end of the song")]
    InvalidLoop { start: u64, end: u64 },
}

/// Persisted user settings that could not be read, written or interpreted.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("settings file {path} is malformed: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value '{value}' for setting '{key}'")]
    InvalidValue { key: String, value: String },
}

/// Failure to turn a file on disk into a playable song.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read MIDI file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse MIDI file {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: FormatError,
    },
}

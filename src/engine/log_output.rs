use crate::engine::NoteOutput;
use crate::util::note_name;
use anyhow::{Result, bail};
use log::{debug, trace};
use std::collections::BTreeSet;

/// A [`NoteOutput`] that only logs, for headless sessions and tests.
#[derive(Debug, Default, Clone)]
pub struct LogOutput {
    sounding: BTreeSet<(u8, u8)>,
    sent: usize,
}

impl LogOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(channel, note)` pairs currently on.
    pub fn sounding(&self) -> impl Iterator<Item = (u8, u8)> + '_ {
        self.sounding.iter().copied()
    }

    /// Number of note messages sent so far.
    pub fn sent(&self) -> usize {
        self.sent
    }
}

impl NoteOutput for LogOutput {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        if channel > 15 || note > 127 {
            bail!("Invalid note on: channel {} note {}..!", channel, note);
        }

        trace!("note on  ch{:<2} {:>4} vel {}", channel, note_name(note), velocity);
        self.sounding.insert((channel, note));
        self.sent += 1;
        Ok(())
    }

    fn note_off(&mut self, channel: u8, note: u8) -> Result<()> {
        trace!("note off ch{:<2} {:>4}", channel, note_name(note));
        self.sounding.remove(&(channel, note));
        self.sent += 1;
        Ok(())
    }

    fn all_notes_off(&mut self) -> Result<()> {
        if !self.sounding.is_empty() {
            debug!("Silencing {} sounding note(s)", self.sounding.len());
        }
        self.sent += self.sounding.len();
        self.sounding.clear();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tracks_sounding_notes() {
        env_logger::try_init().unwrap_or(());

        let mut output = LogOutput::new();
        output.note_on(0, 60, 100).unwrap();
        output.note_on(1, 64, 100).unwrap();
        output.note_off(0, 60).unwrap();
        assert_eq!(output.sounding().collect::<Vec<_>>(), vec![(1, 64)]);

        output.all_notes_off().unwrap();
        assert_eq!(output.sounding().count(), 0);
        assert_eq!(output.sent(), 4);

        assert!(output.note_on(16, 60, 1).is_err());
    }
}

use anyhow::Result;

pub mod keep_awake;
pub mod log_output;

/// Whatever turns notes into sound. Synthesis itself lives outside the trainer.
pub trait NoteOutput {
    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<()>;

    fn note_off(&mut self, channel: u8, note: u8) -> Result<()>;

    /// Silence everything that is still sounding.
    fn all_notes_off(&mut self) -> Result<()>;
}

/// Keeps the display from blanking while a song is being played.
pub trait IdleInhibitor {
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

/// For platforms or sessions that do not need the screen kept awake.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInhibitor;

impl IdleInhibitor for NoInhibitor {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

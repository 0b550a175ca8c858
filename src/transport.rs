use crate::error::ValueError;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopBounds {
    pub start_us: u64,
    pub end_us: u64,
}

/// Read-only copy of the transport handed to renderers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TransportState {
    pub position_us: u64,
    pub duration_us: u64,
    pub speed: f64,
    pub paused: bool,
    pub state: PlaybackState,
    pub loop_bounds: Option<LoopBounds>,
    pub hold_us: Option<u64>,
}

/// What happened during one [`Transport::advance`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Advance {
    /// Playback reached the end on this call. Reported once.
    pub finished: bool,
    /// Playback wrapped from the loop end back to the loop start.
    pub looped: bool,
}

/// Converts frame-clock deltas into a song position.
#[derive(Debug, Clone)]
pub struct Transport {
    state: PlaybackState,
    position_us: u64,
    duration_us: u64,
    speed: f64,
    loop_bounds: Option<LoopBounds>,
    hold_us: Option<u64>,
    clock_us: u64,
}

impl Transport {
    pub fn new(duration_us: u64) -> Self {
        Self {
            state: PlaybackState::Stopped,
            position_us: 0,
            duration_us,
            speed: 1.0,
            loop_bounds: None,
            hold_us: None,
            clock_us: 0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn position_us(&self) -> u64 {
        self.position_us
    }

    pub fn duration_us(&self) -> u64 {
        self.duration_us
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn loop_bounds(&self) -> Option<LoopBounds> {
        self.loop_bounds
    }

    /// Total wall-clock time fed through [`Self::advance`], in every state.
    pub fn clock_us(&self) -> u64 {
        self.clock_us
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Starts playback. A transport parked at the end starts over.
    pub fn play(&mut self) {
        if self.state == PlaybackState::Stopped && self.position_us >= self.duration_us {
            self.position_us = 0;
        }
        self.state = PlaybackState::Playing;
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.state == PlaybackState::Paused {
            self.state = PlaybackState::Playing;
        }
    }

    pub fn toggle_pause(&mut self) {
        match self.state {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused => self.resume(),
            PlaybackState::Stopped => self.play(),
        }
    }

    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
    }

    /// Moves to `position_us`, clamped to the song. Valid in every state.
    pub fn seek(&mut self, position_us: i64) {
        self.position_us = position_us.clamp(0, self.duration_us as i64) as u64;
        debug!("Seek to {}us ({:?})", self.position_us, self.state);
    }

    pub fn set_speed(&mut self, speed: f64) -> Result<(), ValueError> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ValueError::InvalidSpeed(speed));
        }
        self.speed = speed;
        Ok(())
    }

    pub fn set_loop(&mut self, bounds: Option<LoopBounds>) -> Result<(), ValueError> {
        if let Some(b) = bounds
            && (b.start_us >= b.end_us || b.end_us > self.duration_us)
        {
            return Err(ValueError::InvalidLoop {
                start: b.start_us,
                end: b.end_us,
            });
        }
        self.loop_bounds = bounds;
        Ok(())
    }

    pub fn advance(&mut self, dt_us: u64) -> Advance {
        self.clock_us = self.clock_us.saturating_add(dt_us);

        if self.state != PlaybackState::Playing {
            return Advance::default();
        }

        let step = (dt_us as f64 * self.speed).round() as u64;
        let mut target = self.position_us.saturating_add(step);

        if let Some(hold) = self.hold_us
            && target > hold
        {
            target = hold.max(self.position_us);
        }

        if let Some(bounds) = self.loop_bounds
            && self.position_us < bounds.end_us
            && target >= bounds.end_us
        {
            self.position_us = bounds.start_us;
            return Advance {
                finished: false,
                looped: true,
            };
        }

        if target >= self.duration_us {
            self.position_us = self.duration_us;
            self.state = PlaybackState::Stopped;
            debug!("Transport reached the end at {}us", self.duration_us);
            return Advance {
                finished: true,
                looped: false,
            };
        }

        self.position_us = target;
        Advance::default()
    }

    /// Song position that corresponds to a wall-clock stamp, relative to the last advance.
    pub fn song_time_at(&self, wall_us: u64) -> u64 {
        if self.state != PlaybackState::Playing {
            return self.position_us;
        }

        let elapsed = wall_us as i128 - self.clock_us as i128;
        let offset = (elapsed as f64 * self.speed).round() as i128;
        let mut upper = self.duration_us as i128;
        if let Some(hold) = self.hold_us {
            upper = upper.min(hold.max(self.position_us) as i128);
        }
        (self.position_us as i128 + offset).clamp(0, upper) as u64
    }

    /// Playback will not move past `hold_us` while it is set. `None` releases it.
    pub fn set_hold(&mut self, hold_us: Option<u64>) {
        self.hold_us = hold_us;
    }

    pub fn hold_us(&self) -> Option<u64> {
        self.hold_us
    }

    pub fn snapshot(&self) -> TransportState {
        TransportState {
            position_us: self.position_us,
            duration_us: self.duration_us,
            speed: self.speed,
            paused: self.state == PlaybackState::Paused,
            state: self.state,
            loop_bounds: self.loop_bounds,
            hold_us: self.hold_us,
        }
    }
}

//! Frame timing for the game loop.

use std::time::{Duration, Instant};

/// Longest frame delta handed to simulation, in seconds. A debugger pause or
/// window drag would otherwise produce one enormous integration step.
const MAX_DELTA: f32 = 0.25;

/// Tracks per-frame delta time and total elapsed time.
#[derive(Debug)]
pub struct Time {
    start_time: Instant,
    last_frame: Instant,
    delta: Duration,
    elapsed: Duration,
    frame_count: u64,
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

impl Time {
    /// Create a new time tracker starting now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_frame: now,
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
            frame_count: 0,
        }
    }

    /// Advance timing at the start of a new frame.
    pub fn update(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last_frame;
        self.last_frame = now;
        self.elapsed = now - self.start_time;
        self.frame_count += 1;
    }

    /// Delta time of the last frame in seconds, clamped so long stalls
    /// don't explode the simulation.
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32().min(MAX_DELTA)
    }

    /// Total elapsed time in seconds.
    pub fn elapsed_seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }

    /// Frames counted since start.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Instantaneous FPS from the last frame.
    pub fn fps(&self) -> f32 {
        let d = self.delta.as_secs_f32();
        if d > 0.0 {
            1.0 / d
        } else {
            0.0
        }
    }
}

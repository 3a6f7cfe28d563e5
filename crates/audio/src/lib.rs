//! Audio playback using Kira.
//!
//! Sounds are prepared once by path into a [`SoundId`]; each play returns a
//! [`Playback`] handle that can be stopped individually. [`AudioSystem::update`]
//! is pumped once per frame to recycle finished playbacks.

use anyhow::Result;
use kira::{
    manager::{backend::DefaultBackend, AudioManager, AudioManagerSettings},
    sound::static_sound::{StaticSoundData, StaticSoundHandle, StaticSoundSettings},
    sound::PlaybackState,
    tween::Tween,
};
use std::path::Path;

/// Handle to a prepared sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundId(usize);

/// Handle to one running playback of a sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Playback(usize);

/// Audio system: prepared sound data plus active playback handles.
pub struct AudioSystem {
    manager: AudioManager,
    sounds: Vec<StaticSoundData>,
    active: Vec<Option<StaticSoundHandle>>,
}

impl AudioSystem {
    /// Initialize the audio backend.
    pub fn new() -> Result<Self> {
        let manager = AudioManager::<DefaultBackend>::new(AudioManagerSettings::default())?;
        Ok(Self {
            manager,
            sounds: Vec::new(),
            active: Vec::new(),
        })
    }

    /// Load a sound file and return its handle.
    pub fn prepare(&mut self, path: impl AsRef<Path>) -> Result<SoundId> {
        let path = path.as_ref();
        let data = StaticSoundData::from_file(path)?;
        self.sounds.push(data);
        log::debug!("prepared sound {:?}", path);
        Ok(SoundId(self.sounds.len() - 1))
    }

    /// Play a prepared sound once.
    pub fn play(&mut self, id: SoundId) -> Result<Playback> {
        self.spawn(id, StaticSoundSettings::new())
    }

    /// Play a prepared sound on a loop (background music).
    pub fn play_looping(&mut self, id: SoundId) -> Result<Playback> {
        self.spawn(id, StaticSoundSettings::new().loop_region(..))
    }

    fn spawn(&mut self, id: SoundId, settings: StaticSoundSettings) -> Result<Playback> {
        let data = self
            .sounds
            .get(id.0)
            .ok_or_else(|| anyhow::anyhow!("unknown sound id {:?}", id))?
            .clone()
            .with_settings(settings);
        let handle = self.manager.play(data)?;

        // Reuse a finished slot if one is free.
        let slot = self.active.iter().position(Option::is_none);
        match slot {
            Some(i) => {
                self.active[i] = Some(handle);
                Ok(Playback(i))
            }
            None => {
                self.active.push(Some(handle));
                Ok(Playback(self.active.len() - 1))
            }
        }
    }

    /// Stop one playback. Stopping a finished playback is a no-op.
    pub fn stop(&mut self, playback: Playback) {
        if let Some(mut handle) = self.active.get_mut(playback.0).and_then(Option::take) {
            handle.stop(Tween::default());
        }
    }

    /// Stop every active playback.
    pub fn stop_all(&mut self) {
        for slot in &mut self.active {
            if let Some(mut handle) = slot.take() {
                handle.stop(Tween::default());
            }
        }
    }

    /// Per-frame pump: recycle playbacks that have finished on their own.
    pub fn update(&mut self) {
        for slot in &mut self.active {
            if slot
                .as_ref()
                .is_some_and(|h| h.state() == PlaybackState::Stopped)
            {
                *slot = None;
            }
        }
    }

    /// Set master volume (0.0 to 1.0).
    pub fn set_master_volume(&mut self, volume: f64) {
        let _ = self
            .manager
            .main_track()
            .set_volume(volume, Tween::default());
    }
}

// Re-export for convenience
pub use kira;

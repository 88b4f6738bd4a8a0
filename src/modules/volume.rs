use super::Module;
use crate::error::ModuleError;

pub const TYPE: &str = "internal/volume";

/// Percentage points per volume step
const STEP: u8 = 5;

const LEGACY_UP: &str = "volume-up";
const LEGACY_DOWN: &str = "volume-down";
const LEGACY_TOGGLE_MUTE: &str = "volume-toggle-mute";

/// Audio mixer control used by [`VolumeModule`].
pub trait Mixer: Send {
    /// Volume in percent, 0 to 100
    fn volume(&self) -> u8;
    fn set_volume(&mut self, percent: u8) -> Result<(), ModuleError>;
    fn is_muted(&self) -> bool;
    fn set_muted(&mut self, muted: bool) -> Result<(), ModuleError>;
}

/// In-process mixer that only remembers its settings.
#[derive(Debug, Clone, Copy)]
pub struct SoftMixer {
    volume: u8,
    muted: bool,
}

impl SoftMixer {
    pub fn new(volume: u8) -> Self {
        Self {
            volume: volume.min(100),
            muted: false,
        }
    }
}

impl Mixer for SoftMixer {
    fn volume(&self) -> u8 {
        self.volume
    }

    fn set_volume(&mut self, percent: u8) -> Result<(), ModuleError> {
        self.volume = percent.min(100);
        Ok(())
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn set_muted(&mut self, muted: bool) -> Result<(), ModuleError> {
        self.muted = muted;
        Ok(())
    }
}

/// Volume readout with step and mute actions.
///
/// Structured actions: `inc`, `dec`, `toggle`. Legacy strings:
/// `volume-up`, `volume-down`, `volume-toggle-mute`.
pub struct VolumeModule {
    name: String,
    mixer: Box<dyn Mixer>,
    label_volume: String,
    label_muted: String,
    // (volume, muted) last rendered
    shown: Option<(u8, bool)>,
}

impl VolumeModule {
    pub fn new(name: &str, mixer: Box<dyn Mixer>) -> Self {
        Self {
            name: name.to_string(),
            mixer,
            label_volume: "%percentage%%".to_string(),
            label_muted: "muted".to_string(),
            shown: None,
        }
    }

    /// Built on a [`SoftMixer`] starting at the section's `volume` (default 50).
    pub fn from_section(name: &str, section: &serde_json::Value) -> Result<Self, ModuleError> {
        let volume = match section.get("volume") {
            None => 50,
            Some(v) => v
                .as_u64()
                .filter(|v| *v <= 100)
                .map(|v| v as u8)
                .ok_or_else(|| ModuleError::misconfigured(name, "volume must be 0-100"))?,
        };

        let mut module = Self::new(name, Box::new(SoftMixer::new(volume)));
        if let Some(label) = section.get("label-volume").and_then(|v| v.as_str()) {
            module.label_volume = label.to_string();
        }
        if let Some(label) = section.get("label-muted").and_then(|v| v.as_str()) {
            module.label_muted = label.to_string();
        }
        Ok(module)
    }

    fn step(&mut self, up: bool) -> Result<(), ModuleError> {
        let current = self.mixer.volume();
        let next = if up {
            current.saturating_add(STEP).min(100)
        } else {
            current.saturating_sub(STEP)
        };
        self.mixer.set_volume(next)
    }

    fn toggle_mute(&mut self) -> Result<(), ModuleError> {
        let muted = self.mixer.is_muted();
        self.mixer.set_muted(!muted)
    }
}

impl Module for VolumeModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, force: bool) -> Result<bool, ModuleError> {
        let state = (self.mixer.volume(), self.mixer.is_muted());
        if self.shown == Some(state) && !force {
            return Ok(false);
        }
        self.shown = Some(state);
        Ok(true)
    }

    fn get_output(&self) -> String {
        let volume = self.mixer.volume().to_string();
        let label = if self.mixer.is_muted() {
            &self.label_muted
        } else {
            &self.label_volume
        };
        label.replace("%percentage%", &volume)
    }

    fn input(&mut self, action: &str, _data: &str) -> bool {
        let result = match action {
            "inc" | LEGACY_UP => self.step(true),
            "dec" | LEGACY_DOWN => self.step(false),
            "toggle" | LEGACY_TOGGLE_MUTE => self.toggle_mute(),
            _ => return false,
        };
        // The action was ours even if the mixer refused it
        if let Err(e) = result {
            log::error!("Volume: {} failed to handle {} ({})", self.name, action, e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_steps_are_capped() {
        let mut volume = VolumeModule::new("vol", Box::new(SoftMixer::new(97)));
        assert!(volume.input("inc", ""));
        assert_eq!(volume.get_output(), "100%");
        assert!(volume.input(LEGACY_UP, ""));
        assert_eq!(volume.get_output(), "100%");

        let mut volume = VolumeModule::new("vol", Box::new(SoftMixer::new(3)));
        assert!(volume.input(LEGACY_DOWN, ""));
        assert_eq!(volume.get_output(), "0%");
    }

    #[test]
    fn test_toggle_mute_and_labels() {
        let mut volume = VolumeModule::from_section(
            "vol",
            &json!({ "volume": 40, "label-volume": "VOL %percentage%", "label-muted": "MUTE" }),
        )
        .unwrap();
        assert_eq!(volume.get_output(), "VOL 40");
        assert!(volume.input("volume-toggle-mute", ""));
        assert_eq!(volume.get_output(), "MUTE");
        assert!(volume.input("toggle", ""));
        assert_eq!(volume.get_output(), "VOL 40");
    }

    #[test]
    fn test_update_tracks_mixer_state() {
        let mut volume = VolumeModule::new("vol", Box::new(SoftMixer::new(50)));
        assert!(volume.update(false).unwrap());
        assert!(!volume.update(false).unwrap());
        volume.input("dec", "");
        assert!(volume.update(false).unwrap());
    }

    #[test]
    fn test_foreign_actions_are_not_handled() {
        let mut volume = VolumeModule::new("vol", Box::new(SoftMixer::new(50)));
        assert!(!volume.input("hook", "0"));
        assert!(VolumeModule::from_section("vol", &json!({ "volume": 150 })).is_err());
    }
}

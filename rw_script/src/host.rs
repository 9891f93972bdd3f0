use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Recoverable failure reported by the engine side of a world opcode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{capability}: {reason}")]
pub struct HostError {
    pub capability: &'static str,
    pub reason: String,
}

impl HostError {
    pub fn new(capability: &'static str, reason: impl Into<String>) -> Self {
        HostError {
            capability,
            reason: reason.into(),
        }
    }

    pub fn unsupported(capability: &'static str) -> Self {
        HostError::new(capability, "unsupported by this host")
    }
}

/// Model operand as seen by the host: a raw id or a name from the module's
/// model table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ModelRef<'a> {
    Id(i32),
    Named(&'a str),
}

impl fmt::Display for ModelRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRef::Id(id) => write!(f, "{id}"),
            ModelRef::Named(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Large centred text (`print_big`).
    Big,
    /// Subtitle line replacing whatever is showing (`print_now`).
    Now,
}

/// Engine capabilities reachable from world opcodes.
///
/// Handles are plain integers chosen by the host; scripts store them in
/// variables and hand them back later. Every method defaults to reporting
/// itself unsupported so a host only implements what it has.
pub trait ScriptHost {
    fn spawn_vehicle(&mut self, _model: ModelRef<'_>, _position: [f32; 3]) -> Result<i32, HostError> {
        Err(HostError::unsupported("spawn_vehicle"))
    }

    fn remove_vehicle(&mut self, _handle: i32) -> Result<(), HostError> {
        Err(HostError::unsupported("remove_vehicle"))
    }

    fn is_vehicle_wrecked(&mut self, _handle: i32) -> Result<bool, HostError> {
        Err(HostError::unsupported("is_vehicle_wrecked"))
    }

    fn spawn_character(
        &mut self,
        _ped_type: i32,
        _model: ModelRef<'_>,
        _position: [f32; 3],
    ) -> Result<i32, HostError> {
        Err(HostError::unsupported("spawn_character"))
    }

    fn remove_character(&mut self, _handle: i32) -> Result<(), HostError> {
        Err(HostError::unsupported("remove_character"))
    }

    fn is_character_dead(&mut self, _handle: i32) -> Result<bool, HostError> {
        Err(HostError::unsupported("is_character_dead"))
    }

    fn set_player_control(&mut self, _player: i32, _enabled: bool) -> Result<(), HostError> {
        Err(HostError::unsupported("set_player_control"))
    }

    /// Current in-game clock as `(hour, minute)`.
    fn time_of_day(&mut self) -> Result<(i32, i32), HostError> {
        Err(HostError::unsupported("time_of_day"))
    }

    fn set_time_of_day(&mut self, _hour: i32, _minute: i32) -> Result<(), HostError> {
        Err(HostError::unsupported("set_time_of_day"))
    }

    fn display_message(
        &mut self,
        _kind: MessageKind,
        _key: &str,
        _duration_ms: i32,
        _style: i32,
    ) -> Result<(), HostError> {
        Err(HostError::unsupported("display_message"))
    }

    fn fade_screen(&mut self, _duration_ms: i32, _fade_in: bool) -> Result<(), HostError> {
        Err(HostError::unsupported("fade_screen"))
    }

    fn set_fixed_camera(&mut self, _position: [f32; 3], _rotation: [f32; 3]) -> Result<(), HostError> {
        Err(HostError::unsupported("set_fixed_camera"))
    }

    fn restore_camera_behind_player(&mut self) -> Result<(), HostError> {
        Err(HostError::unsupported("restore_camera_behind_player"))
    }
}

impl fmt::Debug for dyn ScriptHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScriptHost")
    }
}

/// Host with no engine behind it; every world opcode logs a warning.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl ScriptHost for NullHost {}

use std::collections::BTreeMap;

use rw_script::{HostError, MessageKind, ModelRef, ScriptHost};
use serde::{Deserialize, Serialize};

/// Everything the headless world tracks on behalf of scripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    next_handle: i32,
    vehicles: BTreeMap<i32, Entity>,
    characters: BTreeMap<i32, Entity>,
    hour: i32,
    minute: i32,
    player_control: bool,
}

impl Default for WorldState {
    fn default() -> Self {
        WorldState {
            next_handle: 1,
            vehicles: BTreeMap::new(),
            characters: BTreeMap::new(),
            hour: 12,
            minute: 0,
            player_control: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub model: String,
    pub position: [f32; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ped_type: Option<i32>,
    #[serde(default)]
    pub wrecked: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostEvent {
    VehicleSpawned {
        handle: i32,
        model: String,
        position: [f32; 3],
    },
    VehicleRemoved {
        handle: i32,
    },
    CharacterSpawned {
        handle: i32,
        ped_type: i32,
        model: String,
        position: [f32; 3],
    },
    CharacterRemoved {
        handle: i32,
    },
    PlayerControl {
        player: i32,
        enabled: bool,
    },
    TimeOfDay {
        hour: i32,
        minute: i32,
    },
    Message {
        style: MessageKind,
        key: String,
        duration_ms: i32,
        flags: i32,
    },
    Fade {
        duration_ms: i32,
        fade_in: bool,
    },
    FixedCamera {
        position: [f32; 3],
        rotation: [f32; 3],
    },
    CameraBehindPlayer,
}

/// Script host without a renderer: keeps entity tables and logs every call.
#[derive(Debug, Default)]
pub struct RecordingHost {
    world: WorldState,
    events: Vec<HostEvent>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_world(world: WorldState) -> Self {
        RecordingHost {
            world,
            events: Vec::new(),
        }
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn events(&self) -> &[HostEvent] {
        &self.events
    }

    pub fn vehicle_count(&self) -> usize {
        self.world.vehicles.len()
    }

    pub fn character_count(&self) -> usize {
        self.world.characters.len()
    }

    /// Marks an entity destroyed, as the physics side would after a crash.
    #[cfg(test)]
    pub fn wreck(&mut self, handle: i32) -> bool {
        let entity = self
            .world
            .vehicles
            .get_mut(&handle)
            .or_else(|| self.world.characters.get_mut(&handle));
        match entity {
            Some(entity) => {
                entity.wrecked = true;
                true
            }
            None => false,
        }
    }

    fn allocate(&mut self) -> i32 {
        let handle = self.world.next_handle;
        self.world.next_handle = self.world.next_handle.wrapping_add(1).max(1);
        handle
    }
}

fn unknown(capability: &'static str, handle: i32) -> HostError {
    HostError::new(capability, format!("no entity with handle {handle}"))
}

impl ScriptHost for RecordingHost {
    fn spawn_vehicle(&mut self, model: ModelRef<'_>, position: [f32; 3]) -> Result<i32, HostError> {
        let handle = self.allocate();
        let model = model.to_string();
        self.world.vehicles.insert(
            handle,
            Entity {
                model: model.clone(),
                position,
                ped_type: None,
                wrecked: false,
            },
        );
        self.events.push(HostEvent::VehicleSpawned {
            handle,
            model,
            position,
        });
        Ok(handle)
    }

    fn remove_vehicle(&mut self, handle: i32) -> Result<(), HostError> {
        self.world
            .vehicles
            .remove(&handle)
            .ok_or_else(|| unknown("remove_vehicle", handle))?;
        self.events.push(HostEvent::VehicleRemoved { handle });
        Ok(())
    }

    fn is_vehicle_wrecked(&mut self, handle: i32) -> Result<bool, HostError> {
        self.world
            .vehicles
            .get(&handle)
            .map(|vehicle| vehicle.wrecked)
            .ok_or_else(|| unknown("is_vehicle_wrecked", handle))
    }

    fn spawn_character(
        &mut self,
        ped_type: i32,
        model: ModelRef<'_>,
        position: [f32; 3],
    ) -> Result<i32, HostError> {
        let handle = self.allocate();
        let model = model.to_string();
        self.world.characters.insert(
            handle,
            Entity {
                model: model.clone(),
                position,
                ped_type: Some(ped_type),
                wrecked: false,
            },
        );
        self.events.push(HostEvent::CharacterSpawned {
            handle,
            ped_type,
            model,
            position,
        });
        Ok(handle)
    }

    fn remove_character(&mut self, handle: i32) -> Result<(), HostError> {
        self.world
            .characters
            .remove(&handle)
            .ok_or_else(|| unknown("remove_character", handle))?;
        self.events.push(HostEvent::CharacterRemoved { handle });
        Ok(())
    }

    fn is_character_dead(&mut self, handle: i32) -> Result<bool, HostError> {
        self.world
            .characters
            .get(&handle)
            .map(|character| character.wrecked)
            .ok_or_else(|| unknown("is_character_dead", handle))
    }

    fn set_player_control(&mut self, player: i32, enabled: bool) -> Result<(), HostError> {
        self.world.player_control = enabled;
        self.events
            .push(HostEvent::PlayerControl { player, enabled });
        Ok(())
    }

    fn time_of_day(&mut self) -> Result<(i32, i32), HostError> {
        Ok((self.world.hour, self.world.minute))
    }

    fn set_time_of_day(&mut self, hour: i32, minute: i32) -> Result<(), HostError> {
        if !(0..24).contains(&hour) || !(0..60).contains(&minute) {
            return Err(HostError::new(
                "set_time_of_day",
                format!("{hour:02}:{minute:02} is not a valid time"),
            ));
        }
        self.world.hour = hour;
        self.world.minute = minute;
        self.events.push(HostEvent::TimeOfDay { hour, minute });
        Ok(())
    }

    fn display_message(
        &mut self,
        kind: MessageKind,
        key: &str,
        duration_ms: i32,
        style: i32,
    ) -> Result<(), HostError> {
        self.events.push(HostEvent::Message {
            style: kind,
            key: key.to_string(),
            duration_ms,
            flags: style,
        });
        Ok(())
    }

    fn fade_screen(&mut self, duration_ms: i32, fade_in: bool) -> Result<(), HostError> {
        self.events.push(HostEvent::Fade {
            duration_ms,
            fade_in,
        });
        Ok(())
    }

    fn set_fixed_camera(&mut self, position: [f32; 3], rotation: [f32; 3]) -> Result<(), HostError> {
        self.events
            .push(HostEvent::FixedCamera { position, rotation });
        Ok(())
    }

    fn restore_camera_behind_player(&mut self) -> Result<(), HostError> {
        self.events.push(HostEvent::CameraBehindPlayer);
        Ok(())
    }
}

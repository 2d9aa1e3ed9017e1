//! One race on one map: ships, their latest commands, and the tick step

use uuid::Uuid;

use super::collision::collides;
use super::map::GridMap;
use super::physics::{Command, PhysicsSystem, WorldConfig};
use super::vector::Vec2;

/// Ships are keyed by the owning connection's id
pub type ShipId = Uuid;

/// Ship lifecycle. Leaving `Alive` is terminal until the run is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipStatus {
    Alive,
    Crashed { tick: u64 },
    Finished { tick: u64 },
}

impl ShipStatus {
    pub fn is_alive(&self) -> bool {
        matches!(self, ShipStatus::Alive)
    }
}

/// Authoritative state of one ship
#[derive(Debug, Clone, PartialEq)]
pub struct ShipState {
    pub id: ShipId,
    pub name: String,
    pub status: ShipStatus,
    pub pos: Vec2,
    pub vel: Vec2,
}

impl ShipState {
    fn spawn(id: ShipId, name: String, at: Vec2) -> Self {
        Self {
            id,
            name,
            status: ShipStatus::Alive,
            pos: at,
            vel: Vec2::ZERO,
        }
    }

    pub fn crash_tick(&self) -> Option<u64> {
        match self.status {
            ShipStatus::Crashed { tick } => Some(tick),
            _ => None,
        }
    }

    pub fn finish_tick(&self) -> Option<u64> {
        match self.status {
            ShipStatus::Finished { tick } => Some(tick),
            _ => None,
        }
    }
}

/// Lifecycle transitions produced by a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    PlayerCrashed { ship_id: ShipId, tick: u64 },
    PlayerFinished { ship_id: ShipId, tick: u64 },
}

#[derive(Debug, Clone)]
struct ShipSlot {
    ship: ShipState,
    command: Command,
}

/// A simulation instance bound to one map and one set of world constants
#[derive(Debug)]
pub struct Run {
    map: GridMap,
    config: WorldConfig,
    tick: u64,
    /// Insertion-ordered so every step and snapshot is deterministic
    slots: Vec<ShipSlot>,
}

impl Run {
    pub fn new(map: GridMap, config: WorldConfig) -> Self {
        Self {
            map,
            config,
            tick: 0,
            slots: Vec::new(),
        }
    }

    pub fn map(&self) -> &GridMap {
        &self.map
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn ship_count(&self) -> usize {
        self.slots.len()
    }

    /// Spawn a fresh ship at the map start. Id uniqueness is up to the caller.
    pub fn add_player(&mut self, id: ShipId, name: impl Into<String>) -> ShipState {
        let ship = ShipState::spawn(id, name.into(), self.map.start);
        self.slots.push(ShipSlot {
            ship: ship.clone(),
            command: Command::IDLE,
        });
        ship
    }

    /// Drop the ship and its pending command, if present
    pub fn remove_player(&mut self, id: ShipId) {
        self.slots.retain(|slot| slot.ship.id != id);
    }

    /// Replace the pending command for `id`. Unknown ids are ignored so
    /// commands racing a disconnect are harmless.
    pub fn set_command(&mut self, id: ShipId, command: Command) {
        let command = command.sanitized();
        for slot in self.slots.iter_mut().filter(|slot| slot.ship.id == id) {
            slot.command = command;
        }
    }

    /// Independent copy of every ship
    pub fn ships(&self) -> Vec<ShipState> {
        self.slots.iter().map(|slot| slot.ship.clone()).collect()
    }

    /// True once no ship is still flying
    pub fn is_finished(&self) -> bool {
        self.slots.iter().all(|slot| !slot.ship.status.is_alive())
    }

    /// Back to tick 0 with every ship alive at the start, at rest, idle
    pub fn reset(&mut self) {
        self.tick = 0;
        let start = self.map.start;
        for slot in &mut self.slots {
            slot.ship.status = ShipStatus::Alive;
            slot.ship.pos = start;
            slot.ship.vel = Vec2::ZERO;
            slot.command = Command::IDLE;
        }
    }

    /// Advance one tick and return the lifecycle events it produced
    pub fn step(&mut self, dt: f64) -> Vec<RunEvent> {
        self.tick += 1;
        let tick = self.tick;

        let mut events = Vec::new();
        for slot in &mut self.slots {
            if let Some(event) = Self::step_ship(&self.map, &self.config, tick, slot, dt) {
                events.push(event);
            }
        }
        events
    }

    fn step_ship(
        map: &GridMap,
        config: &WorldConfig,
        tick: u64,
        slot: &mut ShipSlot,
        dt: f64,
    ) -> Option<RunEvent> {
        let ship = &mut slot.ship;
        if !ship.status.is_alive() {
            return None;
        }

        let (pos, vel) = PhysicsSystem::integrate(ship.pos, ship.vel, slot.command, config, dt);
        ship.pos = pos;
        ship.vel = vel;

        if collides(map, ship.pos, config.ship_radius) {
            return Some(Self::crash(ship, tick));
        }

        if ship.pos.distance(map.goal) <= config.goal_radius {
            if ship.vel.length() <= config.max_landing_speed {
                ship.status = ShipStatus::Finished { tick };
                ship.vel = Vec2::ZERO;
                return Some(RunEvent::PlayerFinished {
                    ship_id: ship.id,
                    tick,
                });
            }
            // Hard landing
            return Some(Self::crash(ship, tick));
        }

        None
    }

    fn crash(ship: &mut ShipState, tick: u64) -> RunEvent {
        ship.status = ShipStatus::Crashed { tick };
        ship.vel = Vec2::ZERO;
        RunEvent::PlayerCrashed {
            ship_id: ship.id,
            tick,
        }
    }
}

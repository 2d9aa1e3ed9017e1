//! Snapshot decimation and wire conversion

use crate::ws::protocol::{GameEvent, ServerMsg, ShipSnapshot, ShipStatusTag};

use super::run::{Run, RunEvent, ShipState, ShipStatus};

/// Decides which ticks get a position snapshot and builds them
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    /// Snapshot interval in ticks
    snapshot_interval: u64,
}

impl SnapshotBuilder {
    /// Interval is `tick_rate / snapshot_rate`, rounded, at least 1
    pub fn new(tick_rate: u32, snapshot_rate: u32) -> Self {
        let ratio = f64::from(tick_rate) / f64::from(snapshot_rate.max(1));
        Self {
            snapshot_interval: (ratio.round() as u64).max(1),
        }
    }

    #[cfg(test)]
    pub fn interval(&self) -> u64 {
        self.snapshot_interval
    }

    /// Check if the run's current tick is a snapshot tick
    pub fn should_send(&self, tick: u64) -> bool {
        tick % self.snapshot_interval == 0
    }

    /// Build a snapshot message for the run's current tick
    pub fn build(&self, run: &Run, dt: f64) -> ServerMsg {
        ServerMsg::State {
            tick: run.tick(),
            dt,
            ships: run.ships().iter().map(ShipSnapshot::from).collect(),
        }
    }
}

impl From<&ShipState> for ShipSnapshot {
    fn from(ship: &ShipState) -> Self {
        let status = match ship.status {
            ShipStatus::Alive => ShipStatusTag::Alive,
            ShipStatus::Crashed { .. } => ShipStatusTag::Crashed,
            ShipStatus::Finished { .. } => ShipStatusTag::Finished,
        };
        Self {
            id: ship.id,
            name: ship.name.clone(),
            status,
            pos: ship.pos,
            vel: ship.vel,
            finish_tick: ship.finish_tick(),
            crash_tick: ship.crash_tick(),
        }
    }
}

impl From<RunEvent> for GameEvent {
    fn from(event: RunEvent) -> Self {
        match event {
            RunEvent::PlayerCrashed { ship_id, tick } => GameEvent::PlayerCrashed {
                player_id: ship_id,
                tick,
            },
            RunEvent::PlayerFinished { ship_id, tick } => GameEvent::PlayerFinished {
                player_id: ship_id,
                tick,
            },
        }
    }
}

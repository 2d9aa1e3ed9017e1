//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::map::GridMap;
use crate::game::physics::WorldConfig;
use crate::game::vector::Vec2;

/// What a connection joins as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Owns a ship and sends commands
    Player,
    /// Watches (and, in multi mode, controls) the run
    Spectator,
}

/// Whether ticks currently advance the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
}

/// Run control actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlAction {
    Start,
    Reset,
    SetMap,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMsg {
    /// First message of every connection
    #[serde(rename_all = "camelCase")]
    Join {
        run_id: String,
        role: ClientRole,
        name: String,
        /// Shared secret, required in multi mode
        #[serde(default)]
        token: Option<String>,
    },

    /// Latest thrust command for the sender's ship
    Command {
        /// 0.0 = engine off, 1.0 = full thrust
        throttle: f64,
        /// Thrust direction
        dir: Vec2,
    },

    /// Run control
    #[serde(rename_all = "camelCase")]
    Control {
        action: ControlAction,
        /// Target map for `setMap`
        #[serde(default)]
        map_name: Option<String>,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Confirmation of a join, sent only to the joining client
    #[serde(rename_all = "camelCase")]
    Joined {
        run_id: String,
        role: ClientRole,
        /// Ship id, players only
        #[serde(skip_serializing_if = "Option::is_none")]
        player_id: Option<Uuid>,
        map_name: String,
        map: GridMap,
        world: WorldConfig,
        tick_rate: u32,
        snapshot_rate: u32,
    },

    /// The map was swapped; all ships were re-spawned
    #[serde(rename_all = "camelCase")]
    Map {
        run_id: String,
        map_name: String,
        map: GridMap,
        world: WorldConfig,
    },

    /// Run started or paused
    Run { status: RunStatus },

    /// Full ship snapshot
    State {
        /// Run tick this snapshot was taken at
        tick: u64,
        /// Simulation step in seconds
        dt: f64,
        ships: Vec<ShipSnapshot>,
    },

    /// One-off notification
    Event(GameEvent),

    /// Error message, sent only to the offending client
    Error { code: String, message: String },
}

impl ServerMsg {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Ship lifecycle as seen on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipStatusTag {
    Alive,
    Crashed,
    Finished,
}

/// Ship state in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipSnapshot {
    pub id: Uuid,
    pub name: String,
    pub status: ShipStatusTag,
    pub pos: Vec2,
    pub vel: Vec2,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_tick: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_tick: Option<u64>,
}

/// Game events, broadcast immediately (never decimated)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum GameEvent {
    #[serde(rename_all = "camelCase")]
    PlayerCrashed { player_id: Uuid, tick: u64 },

    #[serde(rename_all = "camelCase")]
    PlayerFinished { player_id: Uuid, tick: u64 },

    #[serde(rename_all = "camelCase")]
    PlayerJoined { player_id: Uuid, player_name: String },

    #[serde(rename_all = "camelCase")]
    PlayerLeft { player_id: Uuid, player_name: String },
}

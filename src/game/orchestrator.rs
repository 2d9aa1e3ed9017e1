//! Run orchestration: owns the current run and every connected client
//!
//! `RunOrchestrator` is driven by exactly one task (see `driver`), so
//! admissions, commands, control actions and ticks are applied strictly
//! one after another and a tick never observes a half-applied change.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerMode;
use crate::util::time::tick_delta;
use crate::ws::protocol::{ClientRole, GameEvent, RunStatus, ServerMsg};

use super::catalog::LoadedMap;
use super::physics::Command;
use super::run::Run;
use super::snapshot::SnapshotBuilder;

/// Identity assigned to a connection on join; players' ships share it
pub type ClientId = Uuid;

/// Outbound queue of one connection
pub type Outbound = mpsc::Sender<Arc<ServerMsg>>;

/// Static orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub run_id: String,
    pub tick_rate: u32,
    pub snapshot_rate: u32,
}

/// Read-only view of the run published for HTTP endpoints
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub map_name: String,
    pub status: RunStatus,
    pub tick: u64,
    pub players: usize,
    pub spectators: usize,
}

/// Control errors, reported only to the client that asked
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("Control actions are spectator-only")]
    Forbidden,

    #[error("Map not found")]
    UnknownMap,

    #[error("Map failed to load: {0}")]
    BadMap(String),
}

impl ControlError {
    /// Wire error code
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::Forbidden => "forbidden",
            ControlError::UnknownMap => "unknown_map",
            ControlError::BadMap(_) => "bad_map",
        }
    }
}

/// In multi mode only spectators may start, reset or swap maps
pub fn control_permitted(mode: ServerMode, role: ClientRole) -> Result<(), ControlError> {
    match (mode, role) {
        (ServerMode::Multi, ClientRole::Player) => Err(ControlError::Forbidden),
        _ => Ok(()),
    }
}

#[derive(Debug)]
struct ConnectedClient {
    id: ClientId,
    name: String,
    role: ClientRole,
    outbound: Outbound,
}

/// Owns the current run, the running flag and the client registry
pub struct RunOrchestrator {
    settings: OrchestratorSettings,
    dt: f64,
    snapshots: SnapshotBuilder,
    run: Run,
    map_name: String,
    running: bool,
    /// Join order, so re-admission after a map swap keeps ship order
    clients: Vec<ConnectedClient>,
    /// Set once per run when the last alive ship leaves `alive`
    completed: bool,
    summary: Arc<RwLock<RunSummary>>,
}

impl RunOrchestrator {
    pub fn new(settings: OrchestratorSettings, initial: LoadedMap) -> Self {
        let dt = tick_delta(settings.tick_rate);
        let snapshots = SnapshotBuilder::new(settings.tick_rate, settings.snapshot_rate);
        let summary = Arc::new(RwLock::new(RunSummary {
            map_name: initial.name.clone(),
            status: RunStatus::Paused,
            tick: 0,
            players: 0,
            spectators: 0,
        }));

        Self {
            settings,
            dt,
            snapshots,
            run: Run::new(initial.map, initial.world),
            map_name: initial.name,
            running: false,
            clients: Vec::new(),
            completed: false,
            summary,
        }
    }

    /// Shared summary, refreshed after every mutation
    pub fn summary(&self) -> Arc<RwLock<RunSummary>> {
        self.summary.clone()
    }

    #[cfg(test)]
    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn status(&self) -> RunStatus {
        if self.running {
            RunStatus::Running
        } else {
            RunStatus::Paused
        }
    }

    #[cfg(test)]
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn tick_rate(&self) -> u32 {
        self.settings.tick_rate
    }

    #[cfg(test)]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Register a connection. The joiner receives `joined`, `run` and a
    /// snapshot; a new player is then announced to everyone.
    pub fn add_client(&mut self, role: ClientRole, name: String, outbound: Outbound) -> ClientId {
        let id = Uuid::new_v4();
        if role == ClientRole::Player {
            self.run.add_player(id, name.clone());
            self.completed = false;
        }

        let client = ConnectedClient {
            id,
            name,
            role,
            outbound,
        };
        Self::send(&client, Arc::new(self.joined_msg(&client)));
        Self::send(&client, Arc::new(ServerMsg::Run { status: self.status() }));
        Self::send(&client, Arc::new(self.snapshot_msg()));

        info!(
            client_id = %id,
            name = %client.name,
            role = ?role,
            "Client joined run"
        );

        let announce = (role == ClientRole::Player).then(|| GameEvent::PlayerJoined {
            player_id: id,
            player_name: client.name.clone(),
        });
        self.clients.push(client);

        if let Some(event) = announce {
            self.broadcast(self.snapshot_msg());
            self.broadcast(ServerMsg::Event(event));
        }

        self.publish_summary();
        id
    }

    /// Unregister a connection; a departing player is announced to everyone
    pub fn remove_client(&mut self, id: ClientId) {
        let Some(idx) = self.clients.iter().position(|c| c.id == id) else {
            return;
        };
        let client = self.clients.remove(idx);
        info!(client_id = %id, name = %client.name, "Client left run");

        if client.role == ClientRole::Player {
            self.run.remove_player(id);
            self.broadcast(self.snapshot_msg());
            self.broadcast(ServerMsg::Event(GameEvent::PlayerLeft {
                player_id: id,
                player_name: client.name,
            }));
        }

        self.publish_summary();
    }

    /// Store the latest command for a player's ship; spectators are ignored
    pub fn handle_command(&mut self, id: ClientId, command: Command) {
        let is_player = self
            .clients
            .iter()
            .any(|c| c.id == id && c.role == ClientRole::Player);
        if is_player {
            self.run.set_command(id, command.sanitized());
        }
    }

    pub fn start_run(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        info!(map = %self.map_name, tick = self.run.tick(), "Run started");
        self.broadcast(ServerMsg::Run {
            status: RunStatus::Running,
        });
        self.publish_summary();
    }

    pub fn reset_run(&mut self) {
        self.running = false;
        self.run.reset();
        self.completed = false;
        info!(map = %self.map_name, "Run reset");

        self.broadcast(ServerMsg::Run {
            status: RunStatus::Paused,
        });
        self.broadcast(self.snapshot_msg());
        self.publish_summary();
    }

    /// Replace the run with a fresh one on `next`, re-admitting every player
    pub fn set_map(&mut self, next: LoadedMap) {
        self.running = false;
        self.completed = false;
        self.run = Run::new(next.map, next.world);
        self.map_name = next.name;

        for client in self.clients.iter().filter(|c| c.role == ClientRole::Player) {
            self.run.add_player(client.id, client.name.clone());
        }
        info!(
            map = %self.map_name,
            players = self.run.ship_count(),
            "Map changed"
        );

        self.broadcast(ServerMsg::Map {
            run_id: self.settings.run_id.clone(),
            map_name: self.map_name.clone(),
            map: self.run.map().clone(),
            world: *self.run.config(),
        });
        self.broadcast(ServerMsg::Run {
            status: RunStatus::Paused,
        });
        self.broadcast(self.snapshot_msg());
        self.publish_summary();
    }

    /// One driver heartbeat. A no-op while paused.
    pub fn on_tick(&mut self) {
        if !self.running {
            return;
        }

        let events = self.run.step(self.dt);

        if self.snapshots.should_send(self.run.tick()) {
            self.broadcast(self.snapshot_msg());
        }

        let had_events = !events.is_empty();
        for event in events {
            self.broadcast(ServerMsg::Event(event.into()));
        }

        if had_events && !self.completed && self.run.ship_count() > 0 && self.run.is_finished() {
            self.completed = true;
            info!(map = %self.map_name, tick = self.run.tick(), "Run completed, no ships left flying");
        }

        self.publish_summary();
    }

    /// Drop every client's outbound queue, which ends their sessions
    pub fn shutdown(&mut self) {
        info!(clients = self.clients.len(), "Releasing all connections");
        self.running = false;
        self.clients.clear();
        self.publish_summary();
    }

    fn joined_msg(&self, client: &ConnectedClient) -> ServerMsg {
        ServerMsg::Joined {
            run_id: self.settings.run_id.clone(),
            role: client.role,
            player_id: (client.role == ClientRole::Player).then_some(client.id),
            map_name: self.map_name.clone(),
            map: self.run.map().clone(),
            world: *self.run.config(),
            tick_rate: self.settings.tick_rate,
            snapshot_rate: self.settings.snapshot_rate,
        }
    }

    fn snapshot_msg(&self) -> ServerMsg {
        self.snapshots.build(&self.run, self.dt)
    }

    /// Best-effort delivery to every client; one bad peer never blocks the rest
    fn broadcast(&self, msg: ServerMsg) {
        let msg = Arc::new(msg);
        for client in &self.clients {
            Self::send(client, msg.clone());
        }
    }

    fn send(client: &ConnectedClient, msg: Arc<ServerMsg>) {
        match client.outbound.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(client_id = %client.id, "Outbound queue full, dropping message");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(client_id = %client.id, "Outbound queue closed, dropping message");
            }
        }
    }

    fn publish_summary(&self) {
        let players = self
            .clients
            .iter()
            .filter(|c| c.role == ClientRole::Player)
            .count();

        let mut summary = self.summary.write();
        summary.map_name.clone_from(&self.map_name);
        summary.status = self.status();
        summary.tick = self.run.tick();
        summary.players = players;
        summary.spectators = self.clients.len() - players;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::map::GridMap;
    use crate::game::physics::WorldConfig;
    use crate::game::run::ShipStatus;
    use crate::game::vector::Vec2;
    use crate::ws::protocol::ShipStatusTag;

    type Inbox = mpsc::Receiver<Arc<ServerMsg>>;

    fn still_world() -> WorldConfig {
        WorldConfig {
            gravity: Vec2::ZERO,
            max_thrust: 1.0,
            damping: 0.0,
            ship_radius: 0.4,
            goal_radius: 0.4,
            ..WorldConfig::default()
        }
    }

    fn loaded(name: &str, text: &str) -> LoadedMap {
        LoadedMap {
            name: name.to_string(),
            map: GridMap::parse(text).unwrap(),
            world: still_world(),
        }
    }

    fn orchestrator(tick_rate: u32, snapshot_rate: u32) -> RunOrchestrator {
        RunOrchestrator::new(
            OrchestratorSettings {
                run_id: "test".to_string(),
                tick_rate,
                snapshot_rate,
            },
            loaded("wall.txt", "#####\n#S#G#\n#####"),
        )
    }

    fn connect(orch: &mut RunOrchestrator, role: ClientRole, name: &str) -> (ClientId, Inbox) {
        let (tx, rx) = mpsc::channel(64);
        let id = orch.add_client(role, name.to_string(), tx);
        (id, rx)
    }

    fn drain(rx: &mut Inbox) -> Vec<Arc<ServerMsg>> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn kinds(msgs: &[Arc<ServerMsg>]) -> Vec<&'static str> {
        msgs.iter()
            .map(|m| match m.as_ref() {
                ServerMsg::Joined { .. } => "joined",
                ServerMsg::Map { .. } => "map",
                ServerMsg::Run { .. } => "run",
                ServerMsg::State { .. } => "state",
                ServerMsg::Event(_) => "event",
                ServerMsg::Error { .. } => "error",
            })
            .collect()
    }

    #[test]
    fn joiner_gets_welcome_sequence_and_others_hear_about_it() {
        let mut orch = orchestrator(60, 20);
        let (_, mut spectator) = connect(&mut orch, ClientRole::Spectator, "watcher");
        assert_eq!(kinds(&drain(&mut spectator)), ["joined", "run", "state"]);

        let (player_id, mut player) = connect(&mut orch, ClientRole::Player, "p1");

        let joined = drain(&mut player);
        assert_eq!(kinds(&joined), ["joined", "run", "state", "state", "event"]);
        match joined[0].as_ref() {
            ServerMsg::Joined { player_id: Some(id), tick_rate, .. } => {
                assert_eq!(*id, player_id);
                assert_eq!(*tick_rate, 60);
            }
            other => panic!("unexpected {other:?}"),
        }

        let seen = drain(&mut spectator);
        assert_eq!(kinds(&seen), ["state", "event"]);
        assert!(matches!(
            seen[1].as_ref(),
            ServerMsg::Event(GameEvent::PlayerJoined { player_id: id, .. }) if *id == player_id
        ));
        assert_eq!(orch.run().ship_count(), 1);
    }

    #[test]
    fn spectators_get_no_ship_and_no_announcement() {
        let mut orch = orchestrator(60, 20);
        let (_, mut player) = connect(&mut orch, ClientRole::Player, "p1");
        drain(&mut player);

        let (watcher_id, _watcher) = connect(&mut orch, ClientRole::Spectator, "watcher");

        assert!(drain(&mut player).is_empty());
        assert_eq!(orch.run().ship_count(), 1);

        orch.handle_command(watcher_id, Command::new(1.0, Vec2::new(1.0, 0.0)));
        orch.remove_client(watcher_id);
        assert!(drain(&mut player).is_empty());
    }

    #[test]
    fn paused_ticks_do_nothing() {
        let mut orch = orchestrator(1, 1);
        let (id, mut player) = connect(&mut orch, ClientRole::Player, "p1");
        drain(&mut player);

        orch.handle_command(id, Command::new(1.0, Vec2::new(1.0, 0.0)));
        orch.on_tick();
        orch.on_tick();

        assert!(drain(&mut player).is_empty());
        assert_eq!(orch.run().tick(), 0);
        assert!(orch.run().ships()[0].status.is_alive());
    }

    #[test]
    fn start_is_idempotent() {
        let mut orch = orchestrator(60, 20);
        let (_, mut watcher) = connect(&mut orch, ClientRole::Spectator, "watcher");
        drain(&mut watcher);

        orch.start_run();
        orch.start_run();

        let msgs = drain(&mut watcher);
        assert_eq!(kinds(&msgs), ["run"]);
        assert_eq!(orch.status(), RunStatus::Running);
        assert_eq!(orch.summary().read().status, RunStatus::Running);
    }

    #[test]
    fn snapshots_follow_the_decimation_interval() {
        let mut orch = orchestrator(60, 20);
        let (id, mut player) = connect(&mut orch, ClientRole::Player, "p1");
        orch.start_run();
        drain(&mut player);

        orch.handle_command(id, Command::new(1.0, Vec2::new(1.0, 0.0)));
        let dt = orch.dt();
        assert!((dt - 1.0 / 60.0).abs() < 1e-12);
        for _ in 0..3 {
            orch.on_tick();
        }

        let msgs = drain(&mut player);
        assert_eq!(kinds(&msgs), ["state"]);
        match msgs[0].as_ref() {
            ServerMsg::State { tick, .. } => assert_eq!(*tick, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn crash_event_is_sent_on_a_skipped_snapshot_tick() {
        let mut orch = RunOrchestrator::new(
            OrchestratorSettings {
                run_id: "test".to_string(),
                tick_rate: 2,
                snapshot_rate: 1,
            },
            LoadedMap {
                world: WorldConfig {
                    max_thrust: 4.0,
                    ..still_world()
                },
                ..loaded("wall.txt", "#####\n#S#G#\n#####")
            },
        );
        let (id, mut player) = connect(&mut orch, ClientRole::Player, "p1");
        orch.start_run();
        drain(&mut player);

        // dt = 0.5: vel 2.0, pos 2.5 lands inside the dividing wall on tick 1
        orch.handle_command(id, Command::new(1.0, Vec2::new(1.0, 0.0)));
        orch.on_tick();

        let msgs = drain(&mut player);
        assert_eq!(kinds(&msgs), ["event"]);
        assert!(matches!(
            msgs[0].as_ref(),
            ServerMsg::Event(GameEvent::PlayerCrashed { player_id, tick: 1 }) if *player_id == id
        ));

        orch.on_tick();
        match drain(&mut player)[0].as_ref() {
            ServerMsg::State { tick, ships, .. } => {
                assert_eq!(*tick, 2);
                assert_eq!(ships[0].status, ShipStatusTag::Crashed);
                assert_eq!(ships[0].crash_tick, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reset_pauses_and_pushes_a_fresh_snapshot() {
        let mut orch = orchestrator(1, 1);
        let (id, mut player) = connect(&mut orch, ClientRole::Player, "p1");
        orch.start_run();
        orch.handle_command(id, Command::new(1.0, Vec2::new(1.0, 0.0)));
        orch.on_tick();
        drain(&mut player);

        orch.reset_run();

        let msgs = drain(&mut player);
        assert_eq!(kinds(&msgs), ["run", "state"]);
        assert!(matches!(msgs[0].as_ref(), ServerMsg::Run { status: RunStatus::Paused }));
        match msgs[1].as_ref() {
            ServerMsg::State { tick, ships, .. } => {
                assert_eq!(*tick, 0);
                assert_eq!(ships[0].status, ShipStatusTag::Alive);
                assert_eq!(ships[0].pos, orch.run().map().start);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(orch.status(), RunStatus::Paused);
    }

    #[test]
    fn set_map_respawns_every_connected_player() {
        let mut orch = orchestrator(1, 1);
        let (a, mut inbox_a) = connect(&mut orch, ClientRole::Player, "a");
        let (b, _inbox_b) = connect(&mut orch, ClientRole::Player, "b");
        let (_, mut watcher) = connect(&mut orch, ClientRole::Spectator, "watcher");
        orch.start_run();
        orch.handle_command(a, Command::new(1.0, Vec2::new(1.0, 0.0)));
        orch.on_tick();
        drain(&mut inbox_a);
        drain(&mut watcher);

        orch.set_map(loaded("open.txt", "######\n#....#\n#.S.G#\n######"));

        let ships = orch.run().ships();
        assert_eq!(ships.len(), 2);
        assert_eq!(ships.iter().map(|s| s.id).collect::<Vec<_>>(), vec![a, b]);
        for ship in &ships {
            assert_eq!(ship.status, ShipStatus::Alive);
            assert_eq!(ship.pos, Vec2::new(2.5, 2.5));
            assert_eq!(ship.vel, Vec2::ZERO);
        }
        assert_eq!(orch.run().tick(), 0);
        assert_eq!(orch.status(), RunStatus::Paused);

        let msgs = drain(&mut watcher);
        assert_eq!(kinds(&msgs), ["map", "run", "state"]);
        match msgs[0].as_ref() {
            ServerMsg::Map { map_name, map, .. } => {
                assert_eq!(map_name, "open.txt");
                assert_eq!(map.width, 6);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(orch.summary().read().map_name, "open.txt");
    }

    #[test]
    fn leaving_player_is_announced_with_updated_snapshot() {
        let mut orch = orchestrator(60, 20);
        let (a, _inbox_a) = connect(&mut orch, ClientRole::Player, "a");
        let (_, mut inbox_b) = connect(&mut orch, ClientRole::Player, "b");
        drain(&mut inbox_b);

        orch.remove_client(a);
        orch.remove_client(a);

        let msgs = drain(&mut inbox_b);
        assert_eq!(kinds(&msgs), ["state", "event"]);
        match msgs[0].as_ref() {
            ServerMsg::State { ships, .. } => assert_eq!(ships.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            msgs[1].as_ref(),
            ServerMsg::Event(GameEvent::PlayerLeft { player_name, .. }) if player_name == "a"
        ));
        assert_eq!(orch.summary().read().players, 1);
    }

    #[test]
    fn full_or_closed_peers_do_not_stop_the_broadcast() {
        let mut orch = orchestrator(1, 1);
        let (tiny_tx, _tiny_rx) = mpsc::channel(1);
        orch.add_client(ClientRole::Spectator, "slow".to_string(), tiny_tx);
        let (gone_tx, gone_rx) = mpsc::channel(8);
        orch.add_client(ClientRole::Spectator, "gone".to_string(), gone_tx);
        drop(gone_rx);
        let (_, mut healthy) = connect(&mut orch, ClientRole::Spectator, "ok");
        drain(&mut healthy);

        orch.start_run();
        orch.on_tick();
        orch.on_tick();

        assert_eq!(kinds(&drain(&mut healthy)), ["run", "state", "state"]);
    }

    #[test]
    fn mid_race_joiner_starts_fresh() {
        let mut orch = RunOrchestrator::new(
            OrchestratorSettings {
                run_id: "test".to_string(),
                tick_rate: 1,
                snapshot_rate: 1,
            },
            LoadedMap {
                world: WorldConfig {
                    gravity: Vec2::new(0.1, 0.0),
                    ..still_world()
                },
                ..loaded("long.txt", "##########\n#S......G#\n##########")
            },
        );
        connect(&mut orch, ClientRole::Player, "early");
        orch.start_run();
        orch.on_tick();
        orch.on_tick();

        let (late, _) = connect(&mut orch, ClientRole::Player, "late");

        let ships = orch.run().ships();
        let late_ship = ships.iter().find(|s| s.id == late).unwrap();
        assert_eq!(late_ship.pos, orch.run().map().start);
        assert_eq!(late_ship.vel, Vec2::ZERO);
        assert!(ships[0].pos.x > late_ship.pos.x);
        assert_eq!(orch.run().tick(), 2);
    }

    #[test]
    fn control_policy_depends_on_mode() {
        assert!(control_permitted(ServerMode::Local, ClientRole::Player).is_ok());
        assert!(control_permitted(ServerMode::Multi, ClientRole::Spectator).is_ok());
        let err = control_permitted(ServerMode::Multi, ClientRole::Player).unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }

    #[test]
    fn shutdown_releases_every_client() {
        let mut orch = orchestrator(1, 1);
        let (_, mut player) = connect(&mut orch, ClientRole::Player, "p1");
        drain(&mut player);

        orch.shutdown();

        assert_eq!(orch.client_count(), 0);
        assert!(matches!(
            player.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}

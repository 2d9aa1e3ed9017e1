//! WebSocket upgrade handler and per-connection session

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::config::ServerMode;
use crate::game::orchestrator::{control_permitted, ClientId, Outbound};
use crate::game::physics::Command;
use crate::game::vector::Vec2;
use crate::game::{CatalogError, ControlError, ControlRequest, LoadedMap};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::protocol::{ClientMsg, ClientRole, ControlAction, ServerMsg};

/// Outbound queue depth per connection; overflow is dropped
const OUTBOUND_QUEUE: usize = 256;

/// How long a closing connection may take to flush queued messages
const WRITER_DRAIN: Duration = Duration::from_secs(1);

const MAX_NAME_LEN: usize = 32;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    debug!("New WebSocket connection");

    let (ws_sink, mut ws_stream) = socket.split();
    let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let mut writer = tokio::spawn(write_loop(ws_sink, outbound_rx));
    let mut writer_done = false;

    let rate_limiter = ConnectionRateLimiter::new();
    let mut shutdown = state.shutdown.clone();
    let mut session = Session::new(state.clone(), outbound);

    // Reader loop: WebSocket -> run driver
    loop {
        tokio::select! {
            _ = &mut writer, if !writer_done => {
                // Peer stopped accepting writes or the server released us
                writer_done = true;
                break;
            }
            _ = shutdown.changed() => {
                debug!(client_id = ?session.client_id(), "Server shutting down");
                break;
            }
            frame = ws_stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !rate_limiter.check_input() {
                        warn!(client_id = ?session.client_id(), "Rate limited inbound message");
                        continue;
                    }
                    if let Flow::Close = session.handle_text(&text).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    warn!(client_id = ?session.client_id(), "Received binary message, ignoring");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    debug!(client_id = ?session.client_id(), "Client initiated close");
                    break;
                }
                Some(Err(e)) => {
                    error!(client_id = ?session.client_id(), error = %e, "WebSocket error");
                    break;
                }
            }
        }
    }

    if let Some(client_id) = session.client_id() {
        state.run.leave(client_id).await;
        info!(client_id = %client_id, "WebSocket connection closed");
    }

    // Dropping the session's queue lets the writer flush and close
    drop(session);
    if !writer_done && tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
}

/// Drain the outbound queue into the socket
async fn write_loop(
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<ServerMsg>>,
) {
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(error = %e, "WebSocket send failed");
            return;
        }
    }
    let _ = ws_sink.send(Message::Close(None)).await;
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

/// Whether the connection should stay open
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

#[derive(Debug, Clone, Copy)]
struct Member {
    client_id: ClientId,
    role: ClientRole,
}

/// Protocol state of one connection
struct Session {
    state: AppState,
    outbound: Outbound,
    member: Option<Member>,
}

impl Session {
    fn new(state: AppState, outbound: Outbound) -> Self {
        Self {
            state,
            outbound,
            member: None,
        }
    }

    fn client_id(&self) -> Option<ClientId> {
        self.member.map(|m| m.client_id)
    }

    async fn handle_text(&mut self, text: &str) -> Flow {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                self.reply_error("bad_json", "Message must be valid JSON");
                return Flow::Continue;
            }
        };

        let parsed = serde_json::from_value::<ClientMsg>(value);
        let Some(member) = self.member else {
            return match parsed {
                Ok(ClientMsg::Join {
                    run_id,
                    role,
                    name,
                    token,
                }) => self.join(run_id, role, name, token).await,
                Ok(_) | Err(_) => {
                    self.reply_error("bad_join", "Join message invalid");
                    Flow::Continue
                }
            };
        };

        match parsed {
            Ok(ClientMsg::Command { throttle, dir }) => {
                self.command(member, throttle, dir).await;
                Flow::Continue
            }
            Ok(ClientMsg::Control { action, map_name }) => {
                self.control(member, action, map_name).await;
                Flow::Continue
            }
            Ok(ClientMsg::Join { .. }) | Err(_) => {
                debug!(client_id = %member.client_id, "Unrecognised message after join");
                self.reply_error("bad_message", "Message invalid");
                Flow::Continue
            }
        }
    }

    async fn join(
        &mut self,
        run_id: String,
        role: ClientRole,
        name: String,
        token: Option<String>,
    ) -> Flow {
        let config = &self.state.config;

        if config.mode == ServerMode::Multi && (config.token.is_none() || token != config.token) {
            warn!(name = %name, "Join rejected: bad token");
            self.reply_error("bad_token", "Invalid or missing token");
            return Flow::Close;
        }

        if run_id != config.run_id {
            self.reply_error("unknown_run", format!("Unknown run {run_id}"));
            return Flow::Continue;
        }

        let name = name.trim().to_string();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            self.reply_error("bad_join", "Join message invalid");
            return Flow::Continue;
        }

        match self.state.run.join(role, name, self.outbound.clone()).await {
            Some(client_id) => {
                self.member = Some(Member { client_id, role });
                Flow::Continue
            }
            None => {
                warn!("Run driver unavailable, closing connection");
                Flow::Close
            }
        }
    }

    async fn command(&self, member: Member, throttle: f64, dir: Vec2) {
        if member.role != ClientRole::Player {
            return;
        }
        self.state
            .run
            .command(member.client_id, Command::new(throttle, dir))
            .await;
    }

    async fn control(&self, member: Member, action: ControlAction, map_name: Option<String>) {
        if let Err(e) = control_permitted(self.state.config.mode, member.role) {
            self.reply_error(e.code(), e.to_string());
            return;
        }

        let request = match action {
            ControlAction::Start => ControlRequest::Start,
            ControlAction::Reset => ControlRequest::Reset,
            ControlAction::SetMap => match self.load_map(map_name.as_deref()).await {
                Ok(next) => ControlRequest::SetMap(Box::new(next)),
                Err(e) => {
                    self.reply_error(e.code(), e.to_string());
                    return;
                }
            },
        };

        self.state.run.control(member.client_id, request).await;
    }

    async fn load_map(&self, name: Option<&str>) -> Result<LoadedMap, ControlError> {
        let name = name.ok_or(ControlError::UnknownMap)?;
        self.state.catalog.load(name).await.map_err(|e| match e {
            CatalogError::UnknownMap(_) => ControlError::UnknownMap,
            other => {
                warn!(map = %name, error = %other, "Failed to load map");
                ControlError::BadMap(other.to_string())
            }
        })
    }

    /// Errors go only to this connection
    fn reply_error(&self, code: &str, message: impl Into<String>) {
        let msg = Arc::new(ServerMsg::error(code, message));
        match self.outbound.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(client_id = ?self.client_id(), code, "Outbound queue full, dropping error");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::{MapCatalog, OrchestratorSettings, RunDriver, RunOrchestrator};
    use crate::ws::protocol::{GameEvent, RunStatus};
    use std::path::PathBuf;
    use tokio::sync::watch;
    use uuid::Uuid;

    type Inbox = mpsc::Receiver<Arc<ServerMsg>>;

    fn config(mode: ServerMode, maps_dir: PathBuf) -> Config {
        Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "info".to_string(),
            run_id: "test".to_string(),
            tick_rate: 10,
            snapshot_rate: 10,
            maps_dir,
            map_name: "smoke.txt".to_string(),
            mode,
            token: (mode == ServerMode::Multi).then(|| "s3cret".to_string()),
            client_origin: "*".to_string(),
        }
    }

    async fn app(mode: ServerMode) -> (AppState, watch::Sender<bool>) {
        let dir = std::env::temp_dir().join(format!("lander-ws-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("smoke.txt"), "#####\n#S.G#\n#####").unwrap();
        std::fs::write(dir.join("wide.txt"), "#######\n#S...G#\n#######").unwrap();
        std::fs::write(dir.join("broken.txt"), "#####\n#S..#\n#####").unwrap();

        let config = config(mode, dir.clone());
        let catalog = MapCatalog::scan(&dir).await.unwrap();
        let initial = catalog.load("smoke.txt").await.unwrap();
        let orchestrator = RunOrchestrator::new(
            OrchestratorSettings {
                run_id: config.run_id.clone(),
                tick_rate: config.tick_rate,
                snapshot_rate: config.snapshot_rate,
            },
            initial,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (driver, run) = RunDriver::new(orchestrator, shutdown_rx.clone());
        tokio::spawn(driver.run());

        (AppState::new(config, catalog, run, shutdown_rx), shutdown_tx)
    }

    fn session(state: &AppState) -> (Session, Inbox) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        (Session::new(state.clone(), tx), rx)
    }

    async fn recv_until(rx: &mut Inbox, pred: impl Fn(&ServerMsg) -> bool) -> Arc<ServerMsg> {
        loop {
            let msg = rx.recv().await.expect("queue closed");
            if pred(&msg) {
                return msg;
            }
        }
    }

    fn error_code(msg: &ServerMsg) -> Option<&str> {
        match msg {
            ServerMsg::Error { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    const JOIN_PLAYER: &str = r#"{"type":"join","runId":"test","role":"player","name":"p1"}"#;
    const JOIN_SPECTATOR: &str = r#"{"type":"join","runId":"test","role":"spectator","name":"watcher"}"#;

    #[tokio::test(start_paused = true)]
    async fn rejects_garbage_before_join() {
        let (state, _shutdown) = app(ServerMode::Local).await;
        let (mut session, mut rx) = session(&state);

        assert_eq!(session.handle_text("{nope").await, Flow::Continue);
        assert_eq!(error_code(&rx.recv().await.unwrap()), Some("bad_json"));

        let cmd = r#"{"type":"command","throttle":1,"dir":{"x":1,"y":0}}"#;
        assert_eq!(session.handle_text(cmd).await, Flow::Continue);
        assert_eq!(error_code(&rx.recv().await.unwrap()), Some("bad_join"));

        let wrong_run = r#"{"type":"join","runId":"other","role":"player","name":"p1"}"#;
        session.handle_text(wrong_run).await;
        assert_eq!(error_code(&rx.recv().await.unwrap()), Some("unknown_run"));

        let long_name = format!(
            r#"{{"type":"join","runId":"test","role":"player","name":"{}"}}"#,
            "x".repeat(MAX_NAME_LEN + 1)
        );
        session.handle_text(&long_name).await;
        assert_eq!(error_code(&rx.recv().await.unwrap()), Some("bad_join"));
        assert!(session.client_id().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn join_then_command_moves_the_ship() {
        let (state, _shutdown) = app(ServerMode::Local).await;
        let (mut session, mut rx) = session(&state);

        session.handle_text(JOIN_PLAYER).await;
        let id = session.client_id().unwrap();
        assert!(matches!(
            rx.recv().await.unwrap().as_ref(),
            ServerMsg::Joined { player_id: Some(p), .. } if *p == id
        ));

        session.handle_text(JOIN_PLAYER).await;
        recv_until(&mut rx, |m| error_code(m) == Some("bad_message")).await;

        session
            .handle_text(r#"{"type":"command","throttle":0.1,"dir":{"x":1,"y":0}}"#)
            .await;
        session.handle_text(r#"{"type":"control","action":"start"}"#).await;
        recv_until(&mut rx, |m| matches!(m, ServerMsg::Run { status: RunStatus::Running })).await;

        recv_until(&mut rx, |m| match m {
            ServerMsg::State { ships, .. } => ships.iter().any(|s| s.id == id && s.pos.x > 1.5),
            _ => false,
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn multi_mode_checks_token_and_role() {
        let (state, _shutdown) = app(ServerMode::Multi).await;

        let (mut intruder, mut rx) = session(&state);
        assert_eq!(intruder.handle_text(JOIN_PLAYER).await, Flow::Close);
        assert_eq!(error_code(&rx.recv().await.unwrap()), Some("bad_token"));

        let (mut player, mut rx) = session(&state);
        let join = r#"{"type":"join","runId":"test","role":"player","name":"p1","token":"s3cret"}"#;
        assert_eq!(player.handle_text(join).await, Flow::Continue);
        player.handle_text(r#"{"type":"control","action":"start"}"#).await;
        recv_until(&mut rx, |m| error_code(m) == Some("forbidden")).await;
        assert_eq!(state.run.summary().status, RunStatus::Paused);

        let (mut spectator, mut rx) = session(&state);
        let join = r#"{"type":"join","runId":"test","role":"spectator","name":"s","token":"s3cret"}"#;
        spectator.handle_text(join).await;
        spectator.handle_text(r#"{"type":"control","action":"start"}"#).await;
        recv_until(&mut rx, |m| matches!(m, ServerMsg::Run { status: RunStatus::Running })).await;
    }

    #[tokio::test(start_paused = true)]
    async fn set_map_reports_errors_to_the_caller_only() {
        let (state, _shutdown) = app(ServerMode::Local).await;
        let (mut spectator, mut watcher_rx) = session(&state);
        let (mut player, mut player_rx) = session(&state);
        spectator.handle_text(JOIN_SPECTATOR).await;
        player.handle_text(JOIN_PLAYER).await;
        let player_id = player.client_id().unwrap();
        recv_until(&mut watcher_rx, |m| {
            matches!(m, ServerMsg::Event(GameEvent::PlayerJoined { .. }))
        })
        .await;

        spectator
            .handle_text(r#"{"type":"control","action":"setMap","mapName":"nowhere.txt"}"#)
            .await;
        recv_until(&mut watcher_rx, |m| error_code(m) == Some("unknown_map")).await;

        spectator.handle_text(r#"{"type":"control","action":"setMap"}"#).await;
        recv_until(&mut watcher_rx, |m| error_code(m) == Some("unknown_map")).await;

        spectator
            .handle_text(r#"{"type":"control","action":"setMap","mapName":"broken.txt"}"#)
            .await;
        recv_until(&mut watcher_rx, |m| error_code(m) == Some("bad_map")).await;

        spectator
            .handle_text(r#"{"type":"control","action":"setMap","mapName":"wide.txt"}"#)
            .await;
        let swapped = recv_until(&mut player_rx, |m| matches!(m, ServerMsg::Map { .. })).await;
        assert!(matches!(swapped.as_ref(), ServerMsg::Map { map_name, .. } if map_name == "wide.txt"));

        let snapshot = recv_until(&mut player_rx, |m| matches!(m, ServerMsg::State { .. })).await;
        match snapshot.as_ref() {
            ServerMsg::State { tick, ships, .. } => {
                assert_eq!(*tick, 0);
                assert_eq!(ships.len(), 1);
                assert_eq!(ships[0].id, player_id);
            }
            other => panic!("unexpected {other:?}"),
        }

        // The player never saw any of the spectator's errors
        while let Ok(msg) = player_rx.try_recv() {
            assert!(error_code(&msg).is_none());
        }
        assert_eq!(state.run.summary().map_name, "wide.txt");
    }
}

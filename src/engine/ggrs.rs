//! GGRS-backed transport engine
//!
//! Adapts the incremental start/add-player/set-delay contract onto GGRS's
//! builder API: the UDP socket is bound at start so an unusable port fails
//! the session up front, registration calls accumulate while the engine is
//! configuring, and the P2P session is finalized on the first per-frame
//! call. GGRS surfaces rollback work as requests rather than callbacks, so
//! stepping translates each request batch back into the callback contract
//! and emits an explicit rollback event with the observed depth.

use std::net::SocketAddr;
use std::time::Duration;

use ::ggrs::{
    Config, GgrsRequest, InputStatus, P2PSession, PlayerType, SessionBuilder, SessionState,
    UdpNonBlockingSocket,
};

use crate::engine::{
    EngineCallbacks, EngineEvent, EngineNetworkStats, EngineOptions, EnginePlayer, PlayerHandle,
    RollbackEngine,
};
use crate::error::NetplayError;
use crate::input::{INPUT_BLOCK_BYTES, InputBlock};

/// How far GGRS may speculate past confirmed remote input
const MAX_PREDICTION_FRAMES: usize = 8;

/// Milliseconds of silence before a peer is dropped
const DISCONNECT_TIMEOUT_MS: u64 = 3000;

/// Milliseconds of silence before an interruption event fires
const DISCONNECT_NOTIFY_MS: u64 = 1000;

/// Simulation frame rate used for time sync
const SESSION_FPS: usize = 60;

/// GGRS configuration: wire input blocks, snapshot envelopes as opaque
/// bytes, UDP peer addresses
pub(crate) struct NetplayGgrsConfig;

impl Config for NetplayGgrsConfig {
    type Input = InputBlock;
    type State = Vec<u8>;
    type Address = SocketAddr;
}

enum Inner {
    Idle,
    Configuring {
        options: EngineOptions,
        players: Vec<EnginePlayer>,
        frame_delay: usize,
        socket: UdpNonBlockingSocket,
    },
    Running(Box<P2PSession<NetplayGgrsConfig>>),
}

/// Rollback transport over GGRS + UDP
pub struct GgrsEngine {
    inner: Inner,
    game_id: &'static str,
    /// Remote handle -> address, for translating event addresses back to
    /// player handles
    remote_addrs: Vec<(PlayerHandle, SocketAddr)>,
    /// Inputs for the current frame, filled by the newest advance
    synced_inputs: Vec<u8>,
    begin_game_sent: bool,
}

impl GgrsEngine {
    /// Create an engine with no active session
    pub fn new() -> Self {
        Self {
            inner: Inner::Idle,
            game_id: "",
            remote_addrs: Vec::new(),
            synced_inputs: Vec::new(),
            begin_game_sent: false,
        }
    }

    /// Finalize the GGRS session builder once registration is complete
    fn ensure_started(&mut self) -> Result<(), NetplayError> {
        let (options, players, frame_delay, socket) =
            match std::mem::replace(&mut self.inner, Inner::Idle) {
                Inner::Running(session) => {
                    self.inner = Inner::Running(session);
                    return Ok(());
                }
                Inner::Idle => {
                    return Err(NetplayError::Engine("session not started".to_string()));
                }
                Inner::Configuring {
                    options,
                    players,
                    frame_delay,
                    socket,
                } => (options, players, frame_delay, socket),
            };

        let mut builder = SessionBuilder::<NetplayGgrsConfig>::new()
            .with_num_players(options.num_players)
            .with_max_prediction_window(MAX_PREDICTION_FRAMES)
            .with_input_delay(frame_delay)
            .with_fps(SESSION_FPS)
            .map_err(|e| NetplayError::Engine(e.to_string()))?
            .with_disconnect_timeout(Duration::from_millis(DISCONNECT_TIMEOUT_MS))
            .with_disconnect_notify_delay(Duration::from_millis(DISCONNECT_NOTIFY_MS));

        for (handle, player) in players.iter().enumerate() {
            let player_type = match player {
                EnginePlayer::Local => PlayerType::Local,
                EnginePlayer::Remote(addr) => PlayerType::Remote(*addr),
            };
            builder = builder
                .add_player(player_type, handle)
                .map_err(|e| NetplayError::Engine(e.to_string()))?;
        }

        let session = builder
            .start_p2p_session(socket)
            .map_err(|e| NetplayError::Engine(e.to_string()))?;

        log::info!(
            "ggrs session started: {} players, port {}",
            options.num_players,
            options.local_port
        );
        self.inner = Inner::Running(Box::new(session));
        Ok(())
    }

    /// Player handle for a peer address; unknown addresses are logged and
    /// yield `None` so the event is dropped rather than misattributed
    fn handle_for_addr(&self, addr: &SocketAddr) -> Option<PlayerHandle> {
        let found = self
            .remote_addrs
            .iter()
            .find(|(_, a)| a == addr)
            .map(|(h, _)| *h);
        if found.is_none() {
            log::warn!("engine event from unknown peer {addr}, dropped");
        }
        found
    }

    fn map_event(&self, event: &::ggrs::GgrsEvent<NetplayGgrsConfig>) -> Option<EngineEvent> {
        use ::ggrs::GgrsEvent;
        match event {
            GgrsEvent::Synchronizing { total, count, .. } => {
                log::debug!("synchronizing with peer: {count}/{total}");
                None
            }
            GgrsEvent::Synchronized { addr } => Some(EngineEvent::ConnectedToPeer {
                player: self.handle_for_addr(addr)?,
            }),
            GgrsEvent::Disconnected { addr } => Some(EngineEvent::DisconnectedFromPeer {
                player: self.handle_for_addr(addr)?,
            }),
            GgrsEvent::NetworkInterrupted {
                addr,
                disconnect_timeout,
            } => Some(EngineEvent::ConnectionInterrupted {
                player: self.handle_for_addr(addr)?,
                timeout_ms: *disconnect_timeout as u64,
            }),
            GgrsEvent::NetworkResumed { addr } => Some(EngineEvent::ConnectionResumed {
                player: self.handle_for_addr(addr)?,
            }),
            GgrsEvent::WaitRecommendation { skip_frames } => Some(EngineEvent::TimeSync {
                frames_ahead: *skip_frames as i32,
            }),
            GgrsEvent::DesyncDetected {
                frame,
                local_checksum,
                remote_checksum,
                ..
            } => Some(EngineEvent::Desync {
                frame: *frame,
                local_checksum: *local_checksum as u64,
                remote_checksum: *remote_checksum as u64,
            }),
        }
    }
}

impl Default for GgrsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RollbackEngine for GgrsEngine {
    fn start(&mut self, options: EngineOptions) -> Result<(), NetplayError> {
        if !matches!(self.inner, Inner::Idle) {
            return Err(NetplayError::Engine("engine already started".to_string()));
        }
        if options.input_size != INPUT_BLOCK_BYTES {
            return Err(NetplayError::Configuration(format!(
                "engine requires {INPUT_BLOCK_BYTES} byte inputs, got {}",
                options.input_size
            )));
        }
        // Bind up front so an unusable port fails initialize, not the
        // first frame
        let socket = UdpNonBlockingSocket::bind_to_port(options.local_port).map_err(|e| {
            NetplayError::Engine(format!("failed to bind UDP port {}: {e}", options.local_port))
        })?;
        self.game_id = options.game_id;
        self.inner = Inner::Configuring {
            options,
            players: Vec::new(),
            frame_delay: 0,
            socket,
        };
        self.remote_addrs.clear();
        self.synced_inputs.clear();
        self.begin_game_sent = false;
        Ok(())
    }

    fn add_player(&mut self, player: EnginePlayer) -> Result<PlayerHandle, NetplayError> {
        let Inner::Configuring {
            options, players, ..
        } = &mut self.inner
        else {
            return Err(NetplayError::Engine(
                "players must be added before the first frame".to_string(),
            ));
        };
        if players.len() >= options.num_players {
            return Err(NetplayError::Engine(format!(
                "session already has {} players",
                players.len()
            )));
        }
        let handle = players.len();
        if let EnginePlayer::Remote(addr) = player {
            self.remote_addrs.push((handle, addr));
        }
        players.push(player);
        Ok(handle)
    }

    fn set_frame_delay(
        &mut self,
        player: PlayerHandle,
        delay: usize,
    ) -> Result<(), NetplayError> {
        let Inner::Configuring {
            players,
            frame_delay,
            ..
        } = &mut self.inner
        else {
            return Err(NetplayError::Engine(
                "frame delay must be set before the first frame".to_string(),
            ));
        };
        match players.get(player) {
            Some(EnginePlayer::Local) => {
                *frame_delay = delay;
                Ok(())
            }
            Some(EnginePlayer::Remote(_)) => Err(NetplayError::Engine(
                "frame delay applies only to local players".to_string(),
            )),
            None => Err(NetplayError::Engine(format!("unknown player {player}"))),
        }
    }

    fn add_local_input(
        &mut self,
        player: PlayerHandle,
        input: &InputBlock,
    ) -> Result<(), NetplayError> {
        self.ensure_started()?;
        let Inner::Running(session) = &mut self.inner else {
            return Err(NetplayError::Engine("session not started".to_string()));
        };
        session
            .add_local_input(player, *input)
            .map_err(|e| NetplayError::Engine(e.to_string()))
    }

    fn synchronize_inputs(&mut self, out: &mut [u8]) -> Result<(), NetplayError> {
        if self.synced_inputs.is_empty() {
            return Err(NetplayError::Engine(
                "no synchronized inputs for this frame".to_string(),
            ));
        }
        if out.len() != self.synced_inputs.len() {
            return Err(NetplayError::Engine(format!(
                "input buffer of {} bytes, expected {}",
                out.len(),
                self.synced_inputs.len()
            )));
        }
        out.copy_from_slice(&self.synced_inputs);
        Ok(())
    }

    fn advance_frame(&mut self, callbacks: &mut dyn EngineCallbacks) -> Result<(), NetplayError> {
        self.ensure_started()?;

        if !self.begin_game_sent {
            self.begin_game_sent = true;
            if !callbacks.begin_game(self.game_id) {
                return Err(NetplayError::Engine("begin game rejected".to_string()));
            }
        }

        let events: Vec<_> = {
            let Inner::Running(session) = &mut self.inner else {
                return Err(NetplayError::Engine("session not started".to_string()));
            };
            session.poll_remote_clients();
            session.events().collect()
        };
        // Deliver events even while synchronizing, so connection progress
        // is never lost to a skipped frame
        for event in &events {
            if let Some(mapped) = self.map_event(event) {
                callbacks.on_event(mapped);
            }
        }

        let requests = {
            let Inner::Running(session) = &mut self.inner else {
                return Err(NetplayError::Engine("session not started".to_string()));
            };
            if session.current_state() != SessionState::Running {
                return Err(NetplayError::Engine(
                    "session is still synchronizing".to_string(),
                ));
            }
            session
                .advance_frame()
                .map_err(|e| NetplayError::Engine(e.to_string()))?
        };

        let advance_total = requests
            .iter()
            .filter(|r| matches!(r, GgrsRequest::AdvanceFrame { .. }))
            .count();
        let mut advanced = 0usize;
        let mut rolled_back = false;

        for request in requests {
            match request {
                GgrsRequest::SaveGameState { cell, frame } => {
                    let Some(saved) = callbacks.save_state(frame as u32) else {
                        return Err(NetplayError::Engine("state save failed".to_string()));
                    };
                    let bytes = saved.buffer.as_slice()[..saved.len].to_vec();
                    cell.save(frame, Some(bytes), Some(saved.checksum as u128));
                    // GGRS owns cell contents from here; the pooled buffer
                    // goes straight back
                    callbacks.free_buffer(saved.buffer);
                }
                GgrsRequest::LoadGameState { cell, .. } => {
                    rolled_back = true;
                    let Some(bytes) = cell.load() else {
                        return Err(NetplayError::Engine(
                            "engine requested load of an empty state cell".to_string(),
                        ));
                    };
                    if !callbacks.load_state(&bytes) {
                        return Err(NetplayError::Engine("state load failed".to_string()));
                    }
                }
                GgrsRequest::AdvanceFrame { inputs } => {
                    advanced += 1;
                    let bytes = pack_inputs(&inputs);
                    if advanced == advance_total {
                        // Newest frame: the frame driver applies these and
                        // the emulator runs it naturally
                        self.synced_inputs = bytes;
                    } else if !callbacks.advance_frame(&bytes) {
                        return Err(NetplayError::Engine(
                            "re-simulation step failed".to_string(),
                        ));
                    }
                }
            }
        }

        if rolled_back {
            callbacks.on_event(EngineEvent::Rollback {
                depth: rollback_depth(advance_total),
            });
        }

        Ok(())
    }

    fn network_stats(&mut self, player: PlayerHandle) -> Option<EngineNetworkStats> {
        let Inner::Running(session) = &mut self.inner else {
            return None;
        };
        session
            .network_stats(player)
            .ok()
            .map(|stats| EngineNetworkStats {
                ping_ms: stats.ping as u32,
                local_frames_behind: stats.local_frames_behind,
                remote_frames_behind: stats.remote_frames_behind,
            })
    }

    fn close(&mut self) {
        if matches!(self.inner, Inner::Running(_)) {
            log::info!("ggrs session closed");
        }
        self.inner = Inner::Idle;
        self.remote_addrs.clear();
        self.synced_inputs.clear();
        self.begin_game_sent = false;
    }
}

/// Rollback depth for a request batch that contained a state load
///
/// The newest advance request is the fresh frame, so re-simulated frames
/// number one less; a load with a single advance still rewound one frame,
/// so the depth never reports zero.
fn rollback_depth(advance_total: usize) -> u32 {
    advance_total.saturating_sub(1).max(1) as u32
}

fn pack_inputs(inputs: &[(InputBlock, InputStatus)]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(inputs.len() * INPUT_BLOCK_BYTES);
    for (input, _status) in inputs {
        bytes.extend_from_slice(input.as_wire());
    }
    bytes
}

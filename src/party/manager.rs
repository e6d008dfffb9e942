// Main orchestrator: owns the UDP transport and the summoner_id -> peer
// map, drives the two background loops, and is the only thing the
// injector and the rest of the host application talk to.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, UdpSocket as StdUdpSocket};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use super::config::PartyConfig;
use super::crypto::{Crypto, KEY_SIZE};
use super::lobby::{LobbyMatcher, LobbyProvider};
use super::message::{create_lobby_info, create_skin_sync, create_skin_update, Message, MessageType, SkinSelection};
use super::peer::PeerConnection;
use super::skins::{LocalSelectionProvider, PartySkinData, SkinCollector};
use super::stun;
use super::token::Token;
use super::transport::{TransportError, UdpTransport};
use crate::{party_debug, party_info, party_warn};

#[derive(Debug)]
pub enum EnableError {
  Bind(String),
  Stun(String),
}

impl std::fmt::Display for EnableError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Bind(reason) => write!(f, "failed to bind UDP transport: {}", reason),
      Self::Stun(reason) => write!(f, "STUN discovery failed: {}", reason),
    }
  }
}

impl std::error::Error for EnableError {}

impl From<TransportError> for EnableError {
  fn from(e: TransportError) -> Self {
    Self::Bind(e.to_string())
  }
}

fn local_lan_ip() -> Ipv4Addr {
  // Same trick as the reference implementation: a connected UDP socket
  // picks the outbound interface without sending any packet.
  StdUdpSocket::bind("0.0.0.0:0")
    .and_then(|sock| {
      sock.connect("8.8.8.8:80")?;
      sock.local_addr()
    })
    .ok()
    .and_then(|addr| match addr.ip() {
      IpAddr::V4(ip) => Some(ip),
      IpAddr::V6(_) => None,
    })
    .unwrap_or(Ipv4Addr::LOCALHOST)
}

struct State {
  enabled: bool,
  running: bool,
  my_summoner_id: u64,
  my_summoner_name: String,
  my_key: Option<[u8; KEY_SIZE]>,
  my_token: Option<String>,
  transport: Option<Arc<UdpTransport>>,
  peers: HashMap<u64, PeerConnection>,
  last_broadcast: Option<(u32, Option<u32>)>,
  lobby_check_task: Option<JoinHandle<()>>,
  skin_broadcast_task: Option<JoinHandle<()>>,
}

struct ManagerInner {
  lobby_provider: Arc<dyn LobbyProvider>,
  selection_provider: Arc<dyn LocalSelectionProvider>,
  config: PartyConfig,
  skin_collector: SkinCollector,
  state: Mutex<State>,
}

#[derive(Clone)]
pub struct PartyManager {
  inner: Arc<ManagerInner>,
}

impl PartyManager {
  pub fn new(lobby_provider: Arc<dyn LobbyProvider>, selection_provider: Arc<dyn LocalSelectionProvider>, config: PartyConfig) -> Self {
    Self {
      inner: Arc::new(ManagerInner {
        lobby_provider,
        selection_provider,
        config,
        skin_collector: SkinCollector::new(),
        state: Mutex::new(State {
          enabled: false,
          running: false,
          my_summoner_id: 0,
          my_summoner_name: String::new(),
          my_key: None,
          my_token: None,
          transport: None,
          peers: HashMap::new(),
          last_broadcast: None,
          lobby_check_task: None,
          skin_broadcast_task: None,
        }),
      }),
    }
  }

  pub fn is_enabled(&self) -> bool {
    self.inner.state.lock().unwrap().enabled
  }

  pub fn my_token_str(&self) -> Option<String> {
    self.inner.state.lock().unwrap().my_token.clone()
  }

  pub async fn enable(&self) -> Result<String, EnableError> {
    {
      let state = self.inner.state.lock().unwrap();
      if state.enabled {
        return Ok(state.my_token.clone().unwrap_or_default());
      }
    }

    party_info!("[PARTY] enabling party mode...");

    let my_summoner_id = self.inner.lobby_provider.my_summoner_id();
    let my_summoner_name = self.inner.lobby_provider.my_summoner_name();

    let transport = Arc::new(UdpTransport::bind(0, &self.inner.config).await.map_err(|e| EnableError::Bind(e.to_string()))?);

    let stun_result = stun::discover(transport.socket(), &self.inner.config).await.map_err(|e| EnableError::Stun(e.to_string()))?;
    transport.start_receiving();

    let my_key = Crypto::generate_key();
    let token = Token {
      version: super::token::TOKEN_VERSION,
      timestamp: Token::now_timestamp(),
      summoner_id: my_summoner_id,
      external_port: stun_result.external_port,
      internal_port: transport.local_port(),
      external_ip: stun_result.external_ip,
      internal_ip: local_lan_ip(),
      key: my_key,
    };
    let token_str = token.encode();

    let lobby_check_task = {
      let mgr = self.clone();
      tokio::spawn(async move { mgr.lobby_check_loop().await })
    };
    let skin_broadcast_task = {
      let mgr = self.clone();
      tokio::spawn(async move { mgr.skin_broadcast_loop().await })
    };

    {
      let mut state = self.inner.state.lock().unwrap();
      state.my_summoner_id = my_summoner_id;
      state.my_summoner_name = my_summoner_name;
      state.my_key = Some(my_key);
      state.my_token = Some(token_str.clone());
      state.transport = Some(transport);
      state.enabled = true;
      state.running = true;
      state.lobby_check_task = Some(lobby_check_task);
      state.skin_broadcast_task = Some(skin_broadcast_task);
    }

    party_info!("[PARTY] party mode enabled, token issued for summoner {}", my_summoner_id);
    Ok(token_str)
  }

  pub async fn disable(&self) {
    party_info!("[PARTY] disabling party mode...");

    let (lobby_task, skin_task, peers, transport) = {
      let mut state = self.inner.state.lock().unwrap();
      state.running = false;
      let peers: Vec<PeerConnection> = state.peers.drain().map(|(_, p)| p).collect();
      (state.lobby_check_task.take(), state.skin_broadcast_task.take(), peers, state.transport.take())
    };

    for task in [lobby_task, skin_task].into_iter().flatten() {
      task.abort();
      let _ = task.await;
    }

    for peer in peers {
      peer.disconnect().await;
    }

    if let Some(transport) = transport {
      transport.stop().await;
    }

    {
      let mut state = self.inner.state.lock().unwrap();
      state.enabled = false;
      state.my_key = None;
      state.my_token = None;
    }
    self.inner.skin_collector.clear_all();

    party_info!("[PARTY] party mode disabled");
  }

  pub async fn add_peer(&self, token_str: &str) -> bool {
    let enabled = self.is_enabled();
    if !enabled {
      party_warn!("[PARTY] cannot add peer - party mode not enabled");
      return false;
    }

    let token = match Token::decode(token_str) {
      Ok(t) => t,
      Err(e) => {
        party_warn!("[PARTY] invalid token: {}", e);
        return false;
      }
    };

    let (my_summoner_id, my_summoner_name, my_key, transport) = {
      let state = self.inner.state.lock().unwrap();
      (state.my_summoner_id, state.my_summoner_name.clone(), state.my_key, state.transport.clone())
    };

    let transport = match transport {
      Some(t) => t,
      None => return false,
    };
    let my_key = match my_key {
      Some(k) => k,
      None => return false,
    };

    if token.summoner_id == my_summoner_id {
      party_warn!("[PARTY] cannot add self as peer");
      return false;
    }

    let existing = self.inner.state.lock().unwrap().peers.get(&token.summoner_id).cloned();
    if let Some(existing) = existing {
      if existing.is_connected() {
        party_info!("[PARTY] already connected to summoner {}", token.summoner_id);
        return true;
      }
      existing.disconnect().await;
      self.inner.state.lock().unwrap().peers.remove(&token.summoner_id);
    }

    party_info!("[PARTY] adding peer: summoner {}", token.summoner_id);
    let peer = PeerConnection::new(token.clone(), transport, my_summoner_id, my_summoner_name, my_key, self.inner.config.clone());

    let peer_for_message = peer.clone();
    let mgr_for_message = self.clone();
    let mgr_for_skin = self.clone();
    peer.set_callbacks(
      Some(Arc::new(move |msg: &Message| {
        mgr_for_message.handle_peer_message(&peer_for_message, msg);
      })),
      None,
      Some(Arc::new(move |selection: &SkinSelection| {
        mgr_for_skin.inner.skin_collector.update_from_peer(selection.clone());
      })),
    );

    if peer.connect().await {
      self.inner.state.lock().unwrap().peers.insert(token.summoner_id, peer.clone());
      party_info!("[PARTY] connected to {} ({})", peer.summoner_name(), token.summoner_id);

      let my_name = self.inner.state.lock().unwrap().my_summoner_name.clone();
      let mut known_selections: Vec<SkinSelection> = self
        .inner
        .state
        .lock()
        .unwrap()
        .peers
        .values()
        .filter(|p| p.summoner_id() != token.summoner_id)
        .filter_map(|p| p.skin_selection())
        .collect();
      if let Some(selection) = self.inner.skin_collector.get_my_selection(self.inner.selection_provider.as_ref(), my_summoner_id, &my_name) {
        known_selections.push(selection);
      }
      if !known_selections.is_empty() {
        if let Err(e) = peer.send_message(create_skin_sync(0, &known_selections)).await {
          party_debug!("[PARTY] failed to send skin sync to {}: {}", peer.summoner_id(), e);
        }
      }

      true
    } else {
      false
    }
  }

  /// Dispatches a message that the per-peer state machine doesn't act on
  /// itself: lobby overlap is only meaningful in the context of the whole
  /// peer map, and peer errors are just logged, matching the original's
  /// one-directional, true-only lobby status update.
  fn handle_peer_message(&self, peer: &PeerConnection, msg: &Message) {
    match msg.message_type {
      MessageType::LobbyInfo => {
        let peer_lobby_ids: Vec<u64> = msg
          .payload
          .get("lobby_summoner_ids")
          .and_then(|v| v.as_array())
          .map(|arr| arr.iter().filter_map(|v| v.as_u64()).collect())
          .unwrap_or_default();

        let matcher = LobbyMatcher::new(self.inner.lobby_provider.as_ref());
        if !peer.in_lobby() && matcher.is_in_same_lobby(&peer_lobby_ids) {
          peer.set_in_lobby(true);
          party_info!("[PARTY] peer {} is in our lobby", peer.summoner_id());
        }
      }
      MessageType::Error => {
        let code = msg.payload.get("code").and_then(|v| v.as_str()).unwrap_or("unknown");
        let reason = msg.payload.get("message").and_then(|v| v.as_str()).unwrap_or("");
        party_warn!("[PARTY] peer {} reported error {}: {}", peer.summoner_id(), code, reason);
      }
      _ => {}
    }
  }

  pub async fn remove_peer(&self, summoner_id: u64) {
    let peer = self.inner.state.lock().unwrap().peers.remove(&summoner_id);
    if let Some(peer) = peer {
      peer.disconnect().await;
    }
    self.inner.skin_collector.clear_peer(summoner_id);
    party_info!("[PARTY] removed peer {}", summoner_id);
  }

  pub async fn broadcast_skin_update(&self) {
    if !self.is_enabled() {
      return;
    }

    let (my_summoner_id, my_summoner_name) = {
      let state = self.inner.state.lock().unwrap();
      (state.my_summoner_id, state.my_summoner_name.clone())
    };

    let selection = match self.inner.skin_collector.get_my_selection(self.inner.selection_provider.as_ref(), my_summoner_id, &my_summoner_name) {
      Some(s) => s,
      None => return,
    };

    let peers: Vec<PeerConnection> = self.inner.state.lock().unwrap().peers.values().cloned().collect();
    let msg = create_skin_update(0, &selection);

    for peer in peers {
      if peer.is_connected() {
        if let Err(e) = peer.send_message(msg.clone()).await {
          party_debug!("[PARTY] failed to send skin update to {}: {}", peer.summoner_id(), e);
        }
      }
    }
  }

  pub fn get_party_skins(&self) -> Vec<PartySkinData> {
    if !self.is_enabled() {
      return Vec::new();
    }

    let (my_summoner_id, my_summoner_name) = {
      let state = self.inner.state.lock().unwrap();
      (state.my_summoner_id, state.my_summoner_name.clone())
    };

    let team_champions = self.inner.lobby_provider.team_champion_map();
    let peers: Vec<PeerConnection> = self.inner.state.lock().unwrap().peers.values().cloned().collect();

    self.inner.skin_collector.collect_all_skins(self.inner.selection_provider.as_ref(), &peers, my_summoner_id, &my_summoner_name, &team_champions)
  }

  async fn lobby_check_loop(&self) {
    loop {
      tokio::time::sleep(self.inner.config.lobby_check_interval).await;

      if !self.inner.state.lock().unwrap().running {
        break;
      }

      let matcher = LobbyMatcher::new(self.inner.lobby_provider.as_ref());
      let lobby_ids = matcher.current_summoner_ids();
      let game_mode = matcher.game_mode();

      let (my_summoner_id, peers) = {
        let state = self.inner.state.lock().unwrap();
        (state.my_summoner_id, state.peers.values().cloned().collect::<Vec<_>>())
      };

      let matched: HashSet<u64> = matcher.match_peers_to_lobby(&peers).into_iter().collect();
      for peer in &peers {
        let in_lobby = matched.contains(&peer.summoner_id());
        if peer.in_lobby() != in_lobby {
          peer.set_in_lobby(in_lobby);
          if in_lobby {
            party_info!("[PARTY] peer {} joined our lobby", peer.summoner_name());
          } else {
            party_info!("[PARTY] peer {} left our lobby", peer.summoner_name());
          }
        }
      }

      if !lobby_ids.is_empty() {
        let ids: Vec<u64> = lobby_ids.into_iter().collect();
        let msg = create_lobby_info(0, my_summoner_id, &ids, game_mode.as_deref());
        for peer in &peers {
          if peer.is_connected() {
            let _ = peer.send_message(msg.clone()).await;
          }
        }
      }
    }
  }

  async fn skin_broadcast_loop(&self) {
    loop {
      tokio::time::sleep(self.inner.config.skin_broadcast_interval).await;

      if !self.inner.state.lock().unwrap().running {
        break;
      }

      let (my_summoner_id, my_summoner_name) = {
        let state = self.inner.state.lock().unwrap();
        (state.my_summoner_id, state.my_summoner_name.clone())
      };

      let current = self.inner.skin_collector.get_my_selection(self.inner.selection_provider.as_ref(), my_summoner_id, &my_summoner_name).map(|s| (s.skin_id, s.chroma_id));

      let changed = {
        let mut state = self.inner.state.lock().unwrap();
        let changed = state.last_broadcast != current;
        state.last_broadcast = current;
        changed
      };

      if changed {
        self.broadcast_skin_update().await;
      }
    }
  }
}

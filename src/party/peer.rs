// Single peer-to-peer connection: hole punch, handshake, keep-alive, and
// message dispatch. Wrapped in an outer `Arc` (via `#[derive(Clone)]`) so
// the same handle can be moved into the transport's packet handler closure
// and into the background keep-alive task without fighting the borrow
// checker over `&self`'s lifetime.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinHandle;

use super::config::PartyConfig;
use super::crypto::{derive_shared_key, Crypto, KEY_SIZE};
use super::message::{create_hello, create_hello_ack, create_ping, create_pong, create_ready, create_skin_update, Message, MessageType, SkinSelection};
use super::token::Token;
use super::transport::{PeerEndpoint, UdpTransport};
use crate::{party_debug, party_info, party_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Disconnected,
  Connecting,
  Handshaking,
  Connected,
  Dead,
}

impl ConnectionState {
  fn label(&self) -> &'static str {
    match self {
      Self::Disconnected => "disconnected",
      Self::Connecting => "connecting",
      Self::Handshaking => "handshaking",
      Self::Connected => "connected",
      Self::Dead => "dead",
    }
  }
}

#[derive(Debug, Clone)]
pub struct PeerInfo {
  pub summoner_id: u64,
  pub summoner_name: String,
  pub connected_at: Option<Instant>,
  pub last_seen: Instant,
  pub in_lobby: bool,
  pub skin_selection: Option<SkinSelection>,
}

#[derive(Debug)]
pub enum PeerError {
  NotConnected,
  HolePunchFailed,
  HandshakeFailed,
  Message(String),
  Transport(String),
}

impl std::fmt::Display for PeerError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::NotConnected => write!(f, "peer is not connected"),
      Self::HolePunchFailed => write!(f, "hole punch failed"),
      Self::HandshakeFailed => write!(f, "handshake failed"),
      Self::Message(reason) => write!(f, "message error: {}", reason),
      Self::Transport(reason) => write!(f, "transport error: {}", reason),
    }
  }
}

impl std::error::Error for PeerError {}

pub type MessageCallback = Arc<dyn Fn(&Message) + Send + Sync>;
pub type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;
pub type SkinCallback = Arc<dyn Fn(&SkinSelection) + Send + Sync>;

struct Mutable {
  state: ConnectionState,
  remote_addr: Option<SocketAddr>,
  crypto: Option<Crypto>,
  sequence: u32,
  last_ping_time: Instant,
  last_pong_time: Instant,
  pending_ping_seq: Option<u32>,
  peer_info: PeerInfo,
  on_message: Option<MessageCallback>,
  on_state_change: Option<StateCallback>,
  on_skin_update: Option<SkinCallback>,
}

struct PeerConnectionState {
  token: Token,
  transport: Arc<UdpTransport>,
  my_summoner_id: u64,
  my_summoner_name: String,
  my_key: [u8; KEY_SIZE],
  config: PartyConfig,
  mutable: Mutex<Mutable>,
  running: AtomicBool,
  keepalive_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct PeerConnection {
  inner: Arc<PeerConnectionState>,
}

impl PeerConnection {
  pub fn new(token: Token, transport: Arc<UdpTransport>, my_summoner_id: u64, my_summoner_name: String, my_key: [u8; KEY_SIZE], config: PartyConfig) -> Self {
    let now = Instant::now();
    let peer_info = PeerInfo {
      summoner_id: token.summoner_id,
      summoner_name: "Unknown".to_string(),
      connected_at: None,
      last_seen: now,
      in_lobby: false,
      skin_selection: None,
    };

    Self {
      inner: Arc::new(PeerConnectionState {
        token,
        transport,
        my_summoner_id,
        my_summoner_name,
        my_key,
        config,
        mutable: Mutex::new(Mutable {
          state: ConnectionState::Disconnected,
          remote_addr: None,
          crypto: None,
          sequence: 0,
          last_ping_time: now,
          last_pong_time: now,
          pending_ping_seq: None,
          peer_info,
          on_message: None,
          on_state_change: None,
          on_skin_update: None,
        }),
        running: AtomicBool::new(false),
        keepalive_task: Mutex::new(None),
      }),
    }
  }

  pub fn summoner_id(&self) -> u64 {
    self.inner.token.summoner_id
  }

  pub fn summoner_name(&self) -> String {
    self.inner.mutable.lock().unwrap().peer_info.summoner_name.clone()
  }

  pub fn state(&self) -> ConnectionState {
    self.inner.mutable.lock().unwrap().state
  }

  pub fn is_connected(&self) -> bool {
    self.state() == ConnectionState::Connected
  }

  pub fn skin_selection(&self) -> Option<SkinSelection> {
    self.inner.mutable.lock().unwrap().peer_info.skin_selection.clone()
  }

  pub fn in_lobby(&self) -> bool {
    self.inner.mutable.lock().unwrap().peer_info.in_lobby
  }

  pub fn set_in_lobby(&self, in_lobby: bool) {
    self.inner.mutable.lock().unwrap().peer_info.in_lobby = in_lobby;
  }

  pub fn set_callbacks(&self, on_message: Option<MessageCallback>, on_state_change: Option<StateCallback>, on_skin_update: Option<SkinCallback>) {
    let mut m = self.inner.mutable.lock().unwrap();
    m.on_message = on_message;
    m.on_state_change = on_state_change;
    m.on_skin_update = on_skin_update;
  }

  fn set_state(&self, new_state: ConnectionState) {
    let callback = {
      let mut m = self.inner.mutable.lock().unwrap();
      if m.state == new_state {
        return;
      }
      let old = m.state;
      m.state = new_state;
      party_debug!("[PEER] {}: {} -> {}", self.summoner_id(), old.label(), new_state.label());
      m.on_state_change.clone()
    };
    if let Some(cb) = callback {
      cb(new_state);
    }
  }

  fn next_sequence(&self) -> u32 {
    let mut m = self.inner.mutable.lock().unwrap();
    m.sequence = (m.sequence + 1) % super::message::SEQUENCE_MODULUS;
    m.sequence
  }

  pub async fn connect(&self) -> bool {
    let current = self.state();
    if current == ConnectionState::Connected || current == ConnectionState::Connecting {
      return current == ConnectionState::Connected;
    }

    self.set_state(ConnectionState::Connecting);

    let endpoint = PeerEndpoint {
      external_ip: self.inner.token.external_ip,
      external_port: self.inner.token.external_port,
      internal_ip: self.inner.token.internal_ip,
      internal_port: self.inner.token.internal_port,
    };

    let remote_addr = match self.inner.transport.hole_punch(&endpoint, &self.inner.config).await {
      Some(addr) => addr,
      None => {
        party_warn!("[PEER] hole punch failed for {}", self.summoner_id());
        self.set_state(ConnectionState::Disconnected);
        return false;
      }
    };

    let shared_key = derive_shared_key(&self.inner.my_key, &self.inner.token.key);
    {
      let mut m = self.inner.mutable.lock().unwrap();
      m.remote_addr = Some(remote_addr);
      m.crypto = Some(Crypto::new(shared_key));
    }

    self.set_state(ConnectionState::Handshaking);
    if !self.handshake().await {
      party_warn!("[PEER] handshake failed for {}", self.summoner_id());
      self.set_state(ConnectionState::Disconnected);
      return false;
    }

    self.set_state(ConnectionState::Connected);
    {
      let mut m = self.inner.mutable.lock().unwrap();
      let now = Instant::now();
      m.peer_info.connected_at = Some(now);
      m.peer_info.last_seen = now;
    }

    self.inner.running.store(true, Ordering::SeqCst);
    let keepalive_handle = {
      let pc = self.clone();
      tokio::spawn(async move { pc.keepalive_loop().await })
    };
    *self.inner.keepalive_task.lock().unwrap() = Some(keepalive_handle);

    let pc = self.clone();
    self.inner.transport.set_handler(remote_addr, Arc::new(move |data, addr| pc.handle_packet(data, addr)));

    if let Err(e) = self.send_message(create_ready(0)).await {
      party_debug!("[PEER] failed to send ready to {}: {}", self.summoner_id(), e);
    }

    party_info!("[PEER] connected to {} (id: {}) at {}", self.summoner_name(), self.summoner_id(), remote_addr);
    true
  }

  pub async fn disconnect(&self) {
    self.inner.running.store(false, Ordering::SeqCst);

    let task = self.inner.keepalive_task.lock().unwrap().take();
    if let Some(task) = task {
      task.abort();
      let _ = task.await;
    }

    let remote_addr = self.inner.mutable.lock().unwrap().remote_addr;
    if let Some(addr) = remote_addr {
      self.inner.transport.remove_handler(addr);
    }

    self.set_state(ConnectionState::Disconnected);
    party_info!("[PEER] disconnected from {}", self.summoner_id());
  }

  pub async fn send_message(&self, mut msg: Message) -> Result<(), PeerError> {
    let (remote_addr, crypto) = {
      let mut m = self.inner.mutable.lock().unwrap();
      let addr = m.remote_addr.ok_or(PeerError::NotConnected)?;
      let crypto = m.crypto.clone().ok_or(PeerError::NotConnected)?;
      // PONG carries the sequence of the PING it answers; every other
      // message type draws a fresh one from this connection's counter.
      if msg.message_type != MessageType::Pong {
        m.sequence = (m.sequence + 1) % super::message::SEQUENCE_MODULUS;
        msg.sequence = m.sequence;
      }
      (addr, crypto)
    };

    let plaintext = msg.to_bytes().map_err(|e| PeerError::Message(e.to_string()))?;
    let ciphertext = crypto.encrypt(&plaintext);

    self.inner.transport.send(&ciphertext, remote_addr).await.map_err(|e| PeerError::Transport(e.to_string()))
  }

  pub async fn send_skin_update(&self, selection: &SkinSelection) -> Result<(), PeerError> {
    let msg = create_skin_update(0, selection);
    self.send_message(msg).await
  }

  fn handle_packet(&self, data: &[u8], addr: SocketAddr) {
    let plaintext = {
      let m = self.inner.mutable.lock().unwrap();
      if m.remote_addr != Some(addr) {
        return;
      }
      match &m.crypto {
        Some(crypto) => match crypto.decrypt(data) {
          Ok(pt) => pt,
          Err(e) => {
            party_debug!("[PEER] failed to process packet: {}", e);
            return;
          }
        },
        None => return,
      }
    };

    let msg = match Message::from_bytes(&plaintext) {
      Ok(msg) => msg,
      Err(e) => {
        party_debug!("[PEER] failed to process packet: {}", e);
        return;
      }
    };

    self.handle_message(msg);
  }

  fn handle_message(&self, msg: Message) {
    let (on_message, on_skin_update, parsed_selection, synced_selections) = {
      let mut m = self.inner.mutable.lock().unwrap();
      m.peer_info.last_seen = Instant::now();

      let mut parsed_selection = None;
      let mut synced_selections = Vec::new();

      match msg.message_type {
        MessageType::Ping => {
          let seq = msg.sequence;
          let pc = self.clone();
          tokio::spawn(async move { pc.send_pong(seq).await });
        }
        MessageType::Pong => {
          if m.pending_ping_seq == Some(msg.sequence) {
            m.last_pong_time = Instant::now();
            m.pending_ping_seq = None;
          }
        }
        MessageType::Ready => {
          party_info!("[PEER] {} is ready", m.peer_info.summoner_name);
        }
        MessageType::SkinUpdate => match serde_json::from_value::<SkinSelection>(msg.payload.clone()) {
          Ok(selection) => {
            m.peer_info.skin_selection = Some(selection.clone());
            party_info!("[PEER] {} selected skin {} for champion {}", m.peer_info.summoner_name, selection.skin_id, selection.champion_id);
            parsed_selection = Some(selection);
          }
          Err(e) => party_warn!("[PEER] failed to parse skin update: {}", e),
        },
        MessageType::SkinSync => {
          let selections = msg.payload.get("selections").cloned().unwrap_or(serde_json::json!([]));
          match serde_json::from_value::<Vec<SkinSelection>>(selections) {
            Ok(selections) => {
              party_info!("[PEER] {} synced {} skin selection(s)", m.peer_info.summoner_name, selections.len());
              synced_selections = selections;
            }
            Err(e) => party_warn!("[PEER] failed to parse skin sync: {}", e),
          }
        }
        MessageType::SkinClear => {
          m.peer_info.skin_selection = None;
          party_info!("[PEER] {} cleared skin selection", m.peer_info.summoner_name);
        }
        MessageType::LobbyMatch => {
          m.peer_info.in_lobby = msg.payload.get("matched").and_then(|v| v.as_bool()).unwrap_or(false);
        }
        _ => {}
      }

      (m.on_message.clone(), m.on_skin_update.clone(), parsed_selection, synced_selections)
    };

    if let Some(cb) = on_skin_update {
      if let Some(selection) = parsed_selection {
        cb(&selection);
      }
      for selection in &synced_selections {
        cb(selection);
      }
    }
    if let Some(cb) = on_message {
      cb(&msg);
    }
  }

  async fn handshake(&self) -> bool {
    let hello = create_hello(0, self.inner.my_summoner_id, &self.inner.my_summoner_name, &hex::encode(self.inner.my_key));
    if self.send_message(hello.clone()).await.is_err() {
      return false;
    }

    let remote_addr = self.inner.mutable.lock().unwrap().remote_addr;
    let start = Instant::now();

    while start.elapsed() < self.inner.config.handshake_timeout {
      match self.inner.transport.recv(self.inner.config.handshake_resend_interval).await {
        Ok((data, addr)) => {
          if Some(addr) != remote_addr {
            continue;
          }

          let crypto = match self.inner.mutable.lock().unwrap().crypto.clone() {
            Some(c) => c,
            None => continue,
          };

          let plaintext = match crypto.decrypt(&data) {
            Ok(pt) => pt,
            Err(_) => continue,
          };

          let msg = match Message::from_bytes(&plaintext) {
            Ok(m) => m,
            Err(_) => continue,
          };

          match msg.message_type {
            MessageType::Hello => {
              let name = msg.payload.get("summoner_name").and_then(|v| v.as_str()).unwrap_or("Unknown").to_string();
              self.inner.mutable.lock().unwrap().peer_info.summoner_name = name;

              let ack = create_hello_ack(0, self.inner.my_summoner_id, &self.inner.my_summoner_name);
              let _ = self.send_message(ack).await;
              return true;
            }
            MessageType::HelloAck => {
              let name = msg.payload.get("summoner_name").and_then(|v| v.as_str()).unwrap_or("Unknown").to_string();
              self.inner.mutable.lock().unwrap().peer_info.summoner_name = name;
              return true;
            }
            _ => continue,
          }
        }
        Err(_) => {
          let _ = self.send_message(hello.clone()).await;
          continue;
        }
      }
    }

    false
  }

  async fn keepalive_loop(&self) {
    while self.inner.running.load(Ordering::SeqCst) {
      tokio::time::sleep(self.inner.config.ping_interval).await;

      if !self.inner.running.load(Ordering::SeqCst) {
        break;
      }

      let time_since_seen = {
        let m = self.inner.mutable.lock().unwrap();
        m.peer_info.last_seen.elapsed()
      };

      if time_since_seen > self.inner.config.dead_timeout {
        party_warn!("[PEER] {} appears dead (last seen {:?} ago)", self.summoner_name(), time_since_seen);
        self.set_state(ConnectionState::Dead);
        break;
      }

      let seq = self.next_sequence();
      {
        let mut m = self.inner.mutable.lock().unwrap();
        m.pending_ping_seq = Some(seq);
        m.last_ping_time = Instant::now();
      }

      let ping = create_ping(seq);
      if self.send_message(ping).await.is_err() {
        party_debug!("[PEER] ping send failed for {}", self.summoner_id());
      }
    }
  }

  async fn send_pong(&self, sequence: u32) {
    let pong = create_pong(sequence);
    if let Err(e) = self.send_message(pong).await {
      party_debug!("[PEER] failed to send pong: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_token() -> Token {
    Token {
      version: super::super::token::TOKEN_VERSION,
      timestamp: Token::now_timestamp(),
      summoner_id: 7,
      external_port: 40001,
      internal_port: 40002,
      external_ip: "127.0.0.1".parse().unwrap(),
      internal_ip: "0.0.0.0".parse().unwrap(),
      key: [1u8; KEY_SIZE],
    }
  }

  #[tokio::test]
  async fn fresh_connection_starts_disconnected() {
    let config = PartyConfig::default();
    let transport = Arc::new(UdpTransport::bind(0, &config).await.unwrap());
    let pc = PeerConnection::new(sample_token(), transport, 1, "Me".to_string(), [2u8; KEY_SIZE], config);
    assert_eq!(pc.state(), ConnectionState::Disconnected);
    assert!(!pc.is_connected());
  }

  #[test]
  fn sequence_wraps_within_message_modulus() {
    // Covered end-to-end via message::tests::sequence_wraps_at_modulus; this
    // just asserts the peer's counter field shares the same modulus.
    assert_eq!(super::super::message::SEQUENCE_MODULUS, 65536);
  }
}

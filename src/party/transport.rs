// Async UDP transport with a three-bucket receive dispatch and hole
// punching. One socket backs both the control traffic below and any STUN
// query made before `start_receiving` is called, so NAT mappings learned
// during discovery stay valid for the peer traffic that follows.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::config::PartyConfig;
use crate::{party_debug, party_info, party_warn};

pub const PUNCH_MARKER: &[u8] = b"PUNCH";
const MAX_DATAGRAM: usize = 65535;

pub type PacketHandler = Arc<dyn Fn(&[u8], SocketAddr) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerEndpoint {
  pub external_ip: Ipv4Addr,
  pub external_port: u16,
  pub internal_ip: Ipv4Addr,
  pub internal_port: u16,
}

impl PeerEndpoint {
  /// External address first, then the internal (LAN) address when it looks
  /// distinct and real - `0.0.0.0` can never be dialed.
  pub fn candidate_addresses(&self) -> Vec<SocketAddr> {
    let mut addrs = vec![SocketAddr::V4(SocketAddrV4::new(self.external_ip, self.external_port))];

    if !self.internal_ip.is_unspecified() && self.internal_ip != self.external_ip {
      addrs.push(SocketAddr::V4(SocketAddrV4::new(self.internal_ip, self.internal_port)));
    }

    addrs
  }
}

#[derive(Debug)]
pub enum TransportError {
  NotBound,
  Send(String),
  Timeout,
}

impl std::fmt::Display for TransportError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::NotBound => write!(f, "transport is not bound to a socket"),
      Self::Send(reason) => write!(f, "send failed: {}", reason),
      Self::Timeout => write!(f, "timed out waiting for a packet"),
    }
  }
}

impl std::error::Error for TransportError {}

struct Shared {
  socket: UdpSocket,
  handlers: Mutex<HashMap<SocketAddr, PacketHandler>>,
  default_tx: mpsc::Sender<(Vec<u8>, SocketAddr)>,
  default_rx: Mutex<mpsc::Receiver<(Vec<u8>, SocketAddr)>>,
  running: AtomicBool,
}

pub struct UdpTransport {
  shared: Arc<Shared>,
  receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
  pub async fn bind(local_port: u16, config: &PartyConfig) -> Result<Self, TransportError> {
    let socket = UdpSocket::bind(("0.0.0.0", local_port))
      .await
      .map_err(|e| TransportError::Send(e.to_string()))?;

    let bound_port = socket.local_addr().map(|a| a.port()).unwrap_or(local_port);
    party_info!("[UDP] bound to port {}", bound_port);

    let (default_tx, default_rx) = mpsc::channel(config.default_queue_capacity);

    Ok(Self {
      shared: Arc::new(Shared {
        socket,
        handlers: Mutex::new(HashMap::new()),
        default_tx,
        default_rx: Mutex::new(default_rx),
        running: AtomicBool::new(false),
      }),
      receive_task: Mutex::new(None),
    })
  }

  pub fn local_port(&self) -> u16 {
    self.shared.socket.local_addr().map(|a| a.port()).unwrap_or(0)
  }

  pub fn socket(&self) -> &UdpSocket {
    &self.shared.socket
  }

  pub fn start_receiving(&self) {
    if self.shared.running.swap(true, Ordering::SeqCst) {
      return;
    }

    let shared = Arc::clone(&self.shared);
    let handle = tokio::spawn(async move {
      receive_loop(shared).await;
    });

    *self.receive_task.lock().unwrap() = Some(handle);
    party_debug!("[UDP] receive loop started");
  }

  pub async fn stop(&self) {
    self.shared.running.store(false, Ordering::SeqCst);
    let task = self.receive_task.lock().unwrap().take();
    if let Some(task) = task {
      task.abort();
      let _ = task.await;
    }
    party_info!("[UDP] transport stopped");
  }

  pub async fn send(&self, data: &[u8], addr: SocketAddr) -> Result<(), TransportError> {
    self
      .shared
      .socket
      .send_to(data, addr)
      .await
      .map(|_| ())
      .map_err(|e| {
        party_warn!("[UDP] send failed to {}: {}", addr, e);
        TransportError::Send(e.to_string())
      })
  }

  /// Pull the next packet not claimed by any registered per-address handler.
  pub async fn recv(&self, recv_timeout: std::time::Duration) -> Result<(Vec<u8>, SocketAddr), TransportError> {
    let mut rx = self.shared.default_rx.lock().unwrap_or_else(|p| p.into_inner());
    match timeout(recv_timeout, rx.recv()).await {
      Ok(Some(pair)) => Ok(pair),
      Ok(None) => Err(TransportError::NotBound),
      Err(_) => Err(TransportError::Timeout),
    }
  }

  pub fn set_handler(&self, addr: SocketAddr, handler: PacketHandler) {
    self.shared.handlers.lock().unwrap().insert(addr, handler);
  }

  pub fn remove_handler(&self, addr: SocketAddr) {
    self.shared.handlers.lock().unwrap().remove(&addr);
  }

  /// Sends PUNCH packets at each candidate address until one replies. PUNCH
  /// replies are swallowed by the receive loop; a non-PUNCH reply (the peer
  /// beat us to their own HELLO) is requeued for the handshake that follows.
  pub async fn hole_punch(&self, endpoint: &PeerEndpoint, config: &PartyConfig) -> Option<SocketAddr> {
    if !self.shared.running.load(Ordering::SeqCst) {
      self.start_receiving();
    }

    let addresses = endpoint.candidate_addresses();
    party_info!("[UDP] starting hole punch to {} address(es)", addresses.len());

    for addr in addresses {
      party_debug!("[UDP] trying to punch through to {}", addr);

      for attempt in 0..config.hole_punch_attempts {
        if let Err(e) = self.send(PUNCH_MARKER, addr).await {
          party_debug!("[UDP] punch send failed: {}", e);
        } else {
          party_debug!("[UDP] sent punch packet {}/{} to {}", attempt + 1, config.hole_punch_attempts, addr);
        }

        tokio::time::sleep(config.hole_punch_interval).await;

        match self.recv(config.hole_punch_recv_timeout).await {
          Ok((data, recv_addr)) => {
            if recv_addr.ip() == addr.ip() || recv_addr.ip() == std::net::IpAddr::V4(endpoint.external_ip) {
              party_info!("[UDP] hole punch successful, connected via {}", recv_addr);
              if !data.starts_with(PUNCH_MARKER) {
                let _ = self.shared.default_tx.send((data, recv_addr)).await;
              }
              return Some(recv_addr);
            }
            let _ = self.shared.default_tx.send((data, recv_addr)).await;
          }
          Err(TransportError::Timeout) => continue,
          Err(_) => continue,
        }
      }
    }

    party_warn!("[UDP] hole punch failed after {} attempts per address", config.hole_punch_attempts);
    None
  }
}

async fn receive_loop(shared: Arc<Shared>) {
  let mut buf = vec![0u8; MAX_DATAGRAM];

  while shared.running.load(Ordering::SeqCst) {
    let (len, addr) = match shared.socket.recv_from(&mut buf).await {
      Ok(pair) => pair,
      Err(e) => {
        if shared.running.load(Ordering::SeqCst) {
          party_debug!("[UDP] receive error: {}", e);
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        continue;
      }
    };

    let data = &buf[..len];

    if data.starts_with(PUNCH_MARKER) {
      if let Err(e) = shared.socket.send_to(data, addr).await {
        party_debug!("[UDP] punch reply failed: {}", e);
      } else {
        party_debug!("[UDP] sent punch reply to {}", addr);
      }
    }

    let handler = shared.handlers.lock().unwrap().get(&addr).cloned();
    if let Some(handler) = handler {
      handler(data, addr);
    } else if shared.default_tx.try_send((data.to_vec(), addr)).is_err() {
      party_debug!("[UDP] default queue full, dropping packet from {}", addr);
    }
  }

  party_debug!("[UDP] receive loop ended");
}

#[cfg(test)]
mod tests {
  use super::*;

  fn endpoint(external: (u8, u8, u8, u8), internal: (u8, u8, u8, u8)) -> PeerEndpoint {
    PeerEndpoint {
      external_ip: Ipv4Addr::new(external.0, external.1, external.2, external.3),
      external_port: 40001,
      internal_ip: Ipv4Addr::new(internal.0, internal.1, internal.2, internal.3),
      internal_port: 40002,
    }
  }

  #[test]
  fn candidate_addresses_includes_distinct_lan_address() {
    let ep = endpoint((203, 0, 113, 5), (192, 168, 1, 10));
    let addrs = ep.candidate_addresses();
    assert_eq!(addrs.len(), 2);
  }

  #[test]
  fn candidate_addresses_skips_unspecified_internal() {
    let ep = endpoint((203, 0, 113, 5), (0, 0, 0, 0));
    let addrs = ep.candidate_addresses();
    assert_eq!(addrs.len(), 1);
  }

  #[test]
  fn candidate_addresses_skips_duplicate_internal() {
    let ep = endpoint((203, 0, 113, 5), (203, 0, 113, 5));
    let addrs = ep.candidate_addresses();
    assert_eq!(addrs.len(), 1);
  }

  #[tokio::test]
  async fn bind_assigns_a_port_and_sends_receives() {
    let config = PartyConfig::default();
    let a = UdpTransport::bind(0, &config).await.unwrap();
    let b = UdpTransport::bind(0, &config).await.unwrap();
    a.start_receiving();
    b.start_receiving();

    let b_addr = SocketAddr::new("127.0.0.1".parse().unwrap(), b.local_port());
    a.send(b"hello", b_addr).await.unwrap();

    let (data, _from) = b.recv(std::time::Duration::from_secs(2)).await.unwrap();
    assert_eq!(data, b"hello");

    a.stop().await;
    b.stop().await;
  }
}

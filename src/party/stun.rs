// RFC 5389 STUN Binding Request/Response, just enough of it to learn our
// public IP:port mapping through whatever NAT sits in front of us. We
// always query on the same socket the transport will use for peer
// traffic, because a NAT's mapping is tied to the (local port, remote
// addr) pair the query was sent from - a second, throwaway socket would
// learn the wrong mapping.

use rand::RngCore;
use std::net::Ipv4Addr;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;

use super::config::PartyConfig;
use crate::{party_debug, party_info, party_warn};

const STUN_BINDING_REQUEST: u16 = 0x0001;
const STUN_BINDING_RESPONSE: u16 = 0x0101;
const STUN_ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const STUN_ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const STUN_MAGIC_COOKIE: u32 = 0x2112_A442;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StunResult {
  pub external_ip: Ipv4Addr,
  pub external_port: u16,
}

#[derive(Debug)]
pub enum StunError {
  AllServersFailed,
}

impl std::fmt::Display for StunError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::AllServersFailed => write!(f, "all STUN servers failed to respond"),
    }
  }
}

impl std::error::Error for StunError {}

fn build_binding_request() -> ([u8; 20], [u8; 12]) {
  let mut transaction_id = [0u8; 12];
  rand::thread_rng().fill_bytes(&mut transaction_id);

  let mut message = [0u8; 20];
  message[0..2].copy_from_slice(&STUN_BINDING_REQUEST.to_be_bytes());
  message[2..4].copy_from_slice(&0u16.to_be_bytes());
  message[4..8].copy_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
  message[8..20].copy_from_slice(&transaction_id);

  (message, transaction_id)
}

fn parse_xor_mapped_address(data: &[u8]) -> Option<(Ipv4Addr, u16)> {
  if data.len() < 8 {
    return None;
  }
  let family = data[1];
  if family != 0x01 {
    return None;
  }
  let xor_port = u16::from_be_bytes([data[2], data[3]]);
  let port = xor_port ^ ((STUN_MAGIC_COOKIE >> 16) as u16);

  let xor_addr = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
  let addr = xor_addr ^ STUN_MAGIC_COOKIE;
  Some((Ipv4Addr::from(addr), port))
}

fn parse_mapped_address(data: &[u8]) -> Option<(Ipv4Addr, u16)> {
  if data.len() < 8 {
    return None;
  }
  let family = data[1];
  if family != 0x01 {
    return None;
  }
  let port = u16::from_be_bytes([data[2], data[3]]);
  let ip = Ipv4Addr::new(data[4], data[5], data[6], data[7]);
  Some((ip, port))
}

fn parse_binding_response(data: &[u8], transaction_id: &[u8; 12]) -> Option<(Ipv4Addr, u16)> {
  if data.len() < 20 {
    party_debug!("[STUN] response too short ({} bytes)", data.len());
    return None;
  }

  let msg_type = u16::from_be_bytes([data[0], data[1]]);
  let magic_cookie = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
  let resp_transaction_id = &data[8..20];

  if msg_type != STUN_BINDING_RESPONSE {
    party_debug!("[STUN] unexpected message type: {:#x}", msg_type);
    return None;
  }
  if magic_cookie != STUN_MAGIC_COOKIE {
    party_debug!("[STUN] invalid magic cookie: {:#x}", magic_cookie);
    return None;
  }
  if resp_transaction_id != transaction_id {
    party_debug!("[STUN] transaction id mismatch");
    return None;
  }

  let mut offset = 20usize;
  while offset + 4 <= data.len() {
    let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
    let attr_length = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
    offset += 4;

    if offset + attr_length > data.len() {
      break;
    }
    let attr_value = &data[offset..offset + attr_length];

    match attr_type {
      STUN_ATTR_XOR_MAPPED_ADDRESS => {
        if let Some(found) = parse_xor_mapped_address(attr_value) {
          return Some(found);
        }
      }
      STUN_ATTR_MAPPED_ADDRESS => {
        if let Some(found) = parse_mapped_address(attr_value) {
          return Some(found);
        }
      }
      _ => {}
    }

    offset += attr_length;
    if attr_length % 4 != 0 {
      offset += 4 - (attr_length % 4);
    }
  }

  party_debug!("[STUN] no mapped address found in response");
  None
}

/// Query every configured STUN server in turn over `socket`, returning the
/// first address mapping discovered.
pub async fn discover(socket: &UdpSocket, config: &PartyConfig) -> Result<StunResult, StunError> {
  for (host, port) in &config.stun_servers {
    let server_addr = match lookup_host((host.as_str(), *port)).await {
      Ok(mut addrs) => match addrs.find(|a| a.is_ipv4()) {
        Some(addr) => addr,
        None => continue,
      },
      Err(e) => {
        party_debug!("[STUN] could not resolve {}: {}", host, e);
        continue;
      }
    };

    let (request, transaction_id) = build_binding_request();

    if let Err(e) = socket.send_to(&request, server_addr).await {
      party_debug!("[STUN] send to {} failed: {}", host, e);
      continue;
    }

    let mut buf = [0u8; 1024];
    let recv = timeout(config.stun_timeout, socket.recv_from(&mut buf)).await;
    let (len, _from) = match recv {
      Ok(Ok(pair)) => pair,
      Ok(Err(e)) => {
        party_debug!("[STUN] recv from {} failed: {}", host, e);
        continue;
      }
      Err(_) => {
        party_debug!("[STUN] timed out waiting for {}", host);
        continue;
      }
    };

    if let Some((external_ip, external_port)) = parse_binding_response(&buf[..len], &transaction_id) {
      party_info!("[STUN] discovered external address {}:{} via {}", external_ip, external_port, host);
      return Ok(StunResult { external_ip, external_port });
    }
  }

  party_warn!("[STUN] all STUN servers failed");
  Err(StunError::AllServersFailed)
}

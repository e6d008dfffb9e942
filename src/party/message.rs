// Wire message envelope and payload shapes exchanged between connected peers.
// JSON over the encrypted UDP transport; every message carries a
// monotonically increasing, wrapping sequence number so peers can detect
// drops and reordering without a full retransmission protocol.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const SEQUENCE_MODULUS: u32 = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
  Ping,
  Pong,
  Hello,
  HelloAck,
  SkinUpdate,
  SkinSync,
  SkinClear,
  LobbyInfo,
  LobbyMatch,
  Ready,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkinSelection {
  pub summoner_id: u64,
  pub summoner_name: String,
  pub champion_id: u32,
  pub skin_id: u32,
  pub chroma_id: Option<u32>,
  pub custom_mod_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
  #[serde(rename = "type")]
  pub message_type: MessageType,
  pub sequence: u32,
  pub timestamp: f64,
  pub payload: serde_json::Value,
}

#[derive(Debug)]
pub enum MessageError {
  Malformed(String),
}

impl std::fmt::Display for MessageError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Malformed(reason) => write!(f, "malformed message: {}", reason),
    }
  }
}

impl std::error::Error for MessageError {}

fn now_timestamp() -> f64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs_f64()
}

impl Message {
  pub fn new(message_type: MessageType, sequence: u32, payload: serde_json::Value) -> Self {
    Self {
      message_type,
      sequence: sequence % SEQUENCE_MODULUS,
      timestamp: now_timestamp(),
      payload,
    }
  }

  pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
    serde_json::to_vec(self).map_err(|e| MessageError::Malformed(e.to_string()))
  }

  pub fn from_bytes(data: &[u8]) -> Result<Self, MessageError> {
    serde_json::from_slice(data).map_err(|e| MessageError::Malformed(e.to_string()))
  }
}

pub fn create_hello(sequence: u32, summoner_id: u64, summoner_name: &str, key_hex: &str) -> Message {
  Message::new(
    MessageType::Hello,
    sequence,
    serde_json::json!({
        "summoner_id": summoner_id,
        "summoner_name": summoner_name,
        "key": key_hex,
        "version": 1,
    }),
  )
}

pub fn create_hello_ack(sequence: u32, summoner_id: u64, summoner_name: &str) -> Message {
  Message::new(
    MessageType::HelloAck,
    sequence,
    serde_json::json!({
        "summoner_id": summoner_id,
        "summoner_name": summoner_name,
    }),
  )
}

pub fn create_ping(sequence: u32) -> Message {
  Message::new(MessageType::Ping, sequence, serde_json::json!({}))
}

pub fn create_pong(sequence: u32) -> Message {
  Message::new(MessageType::Pong, sequence, serde_json::json!({}))
}

pub fn create_skin_update(sequence: u32, selection: &SkinSelection) -> Message {
  Message::new(
    MessageType::SkinUpdate,
    sequence,
    serde_json::to_value(selection).expect("SkinSelection always serializes"),
  )
}

pub fn create_skin_sync(sequence: u32, selections: &[SkinSelection]) -> Message {
  Message::new(
    MessageType::SkinSync,
    sequence,
    serde_json::json!({ "selections": selections }),
  )
}

pub fn create_skin_clear(sequence: u32, summoner_id: u64, champion_id: u32) -> Message {
  Message::new(
    MessageType::SkinClear,
    sequence,
    serde_json::json!({ "summoner_id": summoner_id, "champion_id": champion_id }),
  )
}

pub fn create_lobby_info(
  sequence: u32,
  summoner_id: u64,
  lobby_summoner_ids: &[u64],
  game_mode: Option<&str>,
) -> Message {
  Message::new(
    MessageType::LobbyInfo,
    sequence,
    serde_json::json!({
        "summoner_id": summoner_id,
        "lobby_summoner_ids": lobby_summoner_ids,
        "game_mode": game_mode,
    }),
  )
}

pub fn create_lobby_match(sequence: u32, matched: bool, common_summoner_ids: &[u64]) -> Message {
  Message::new(
    MessageType::LobbyMatch,
    sequence,
    serde_json::json!({ "matched": matched, "common_summoner_ids": common_summoner_ids }),
  )
}

pub fn create_ready(sequence: u32) -> Message {
  Message::new(MessageType::Ready, sequence, serde_json::json!({}))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_through_json() {
    let msg = create_hello(1, 42, "Ashe", "deadbeef");
    let bytes = msg.to_bytes().unwrap();
    let decoded = Message::from_bytes(&bytes).unwrap();
    assert_eq!(decoded.message_type, MessageType::Hello);
    assert_eq!(decoded.sequence, 1);
  }

  #[test]
  fn lobby_match_round_trips_common_ids() {
    let msg = create_lobby_match(0, true, &[1, 2, 3]);
    let bytes = msg.to_bytes().unwrap();
    let decoded = Message::from_bytes(&bytes).unwrap();
    assert_eq!(decoded.payload["common_summoner_ids"], serde_json::json!([1, 2, 3]));
  }

  #[test]
  fn sequence_wraps_at_modulus() {
    let msg = Message::new(MessageType::Ping, SEQUENCE_MODULUS, serde_json::json!({}));
    assert_eq!(msg.sequence, 0);

    let msg = Message::new(MessageType::Ping, SEQUENCE_MODULUS + 5, serde_json::json!({}));
    assert_eq!(msg.sequence, 5);
  }

  #[test]
  fn rejects_malformed_json() {
    assert!(matches!(Message::from_bytes(b"not json"), Err(MessageError::Malformed(_))));
  }

  #[test]
  fn skin_update_round_trips_selection() {
    let selection = SkinSelection {
      summoner_id: 99,
      summoner_name: "Jinx".to_string(),
      champion_id: 1,
      skin_id: 5,
      chroma_id: Some(3),
      custom_mod_path: None,
    };
    let msg = create_skin_update(0, &selection);
    let bytes = msg.to_bytes().unwrap();
    let decoded = Message::from_bytes(&bytes).unwrap();
    let decoded_selection: SkinSelection = serde_json::from_value(decoded.payload).unwrap();
    assert_eq!(decoded_selection, selection);
  }
}

// Tunable timings for the party mode core. Everything here has a literal
// default matching the protocol design; integrators override fields with
// struct-update syntax rather than reading module-level constants.

use std::time::Duration;

/// Well-known public STUN servers, tried in order until one replies.
pub fn default_stun_servers() -> Vec<(String, u16)> {
  vec![
    ("stun.l.google.com".to_string(), 19302),
    ("stun1.l.google.com".to_string(), 19302),
    ("stun2.l.google.com".to_string(), 19302),
    ("stun.cloudflare.com".to_string(), 3478),
    ("stun.stunprotocol.org".to_string(), 3478),
  ]
}

#[derive(Debug, Clone)]
pub struct PartyConfig {
  /// STUN servers tried in order, each with `stun_timeout`.
  pub stun_servers: Vec<(String, u16)>,
  pub stun_timeout: Duration,

  pub hole_punch_attempts: u32,
  pub hole_punch_interval: Duration,
  pub hole_punch_recv_timeout: Duration,

  pub handshake_timeout: Duration,
  pub handshake_resend_interval: Duration,

  pub ping_interval: Duration,
  pub dead_timeout: Duration,

  pub lobby_check_interval: Duration,
  pub skin_broadcast_interval: Duration,

  /// Inbound queue depth for packets not claimed by any registered handler.
  pub default_queue_capacity: usize,
}

impl Default for PartyConfig {
  fn default() -> Self {
    Self {
      stun_servers: default_stun_servers(),
      stun_timeout: Duration::from_secs(3),

      hole_punch_attempts: 10,
      hole_punch_interval: Duration::from_millis(300),
      hole_punch_recv_timeout: Duration::from_millis(800),

      handshake_timeout: Duration::from_secs(10),
      handshake_resend_interval: Duration::from_secs(1),

      ping_interval: Duration::from_secs(15),
      dead_timeout: Duration::from_secs(45),

      lobby_check_interval: Duration::from_secs(2),
      skin_broadcast_interval: Duration::from_secs(1),

      default_queue_capacity: 256,
    }
  }
}

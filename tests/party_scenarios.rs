// Multi-peer scenarios that need two real transports talking over
// loopback. Hole-punch/handshake timings are shrunk via `PartyConfig`
// overrides so these run in well under a second instead of the
// production 10s handshake / 45s dead-timeout windows.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use party_core::party::config::PartyConfig;
use party_core::party::crypto::{derive_shared_key, Crypto, KEY_SIZE};
use party_core::party::lobby::LobbyProvider;
use party_core::party::message::SkinSelection;
use party_core::party::peer::{ConnectionState, PeerConnection};
use party_core::party::skins::{LocalSelectionProvider, SkinCollector};
use party_core::party::token::{Token, TOKEN_VERSION};
use party_core::party::transport::{PeerEndpoint, UdpTransport};

fn fast_config() -> PartyConfig {
  PartyConfig {
    hole_punch_attempts: 20,
    hole_punch_interval: Duration::from_millis(10),
    hole_punch_recv_timeout: Duration::from_millis(60),
    handshake_timeout: Duration::from_millis(800),
    handshake_resend_interval: Duration::from_millis(30),
    ping_interval: Duration::from_millis(50),
    dead_timeout: Duration::from_millis(120),
    ..Default::default()
  }
}

async fn bound_transport(config: &PartyConfig) -> Arc<UdpTransport> {
  let transport = Arc::new(UdpTransport::bind(0, config).await.unwrap());
  transport.start_receiving();
  transport
}

fn token_for(summoner_id: u64, transport: &UdpTransport, key: [u8; KEY_SIZE]) -> Token {
  Token {
    version: TOKEN_VERSION,
    timestamp: Token::now_timestamp(),
    summoner_id,
    external_port: transport.local_port(),
    internal_port: transport.local_port(),
    external_ip: Ipv4Addr::LOCALHOST,
    internal_ip: Ipv4Addr::UNSPECIFIED,
    key,
  }
}

async fn connect_pair() -> (PeerConnection, PeerConnection) {
  let config = fast_config();
  let transport_a = bound_transport(&config).await;
  let transport_b = bound_transport(&config).await;

  let key_a = Crypto::generate_key();
  let key_b = Crypto::generate_key();

  let token_for_b = token_for(1, &transport_a, key_a);
  let token_for_a = token_for(2, &transport_b, key_b);

  let peer_b_side = PeerConnection::new(token_for_b, transport_b.clone(), 2, "Bob".to_string(), key_b, config.clone());
  let peer_a_side = PeerConnection::new(token_for_a, transport_a.clone(), 1, "Alice".to_string(), key_a, config.clone());

  let (connected_a, connected_b) = tokio::join!(peer_a_side.connect(), peer_b_side.connect());
  assert!(connected_a, "peer A failed to connect");
  assert!(connected_b, "peer B failed to connect");

  (peer_a_side, peer_b_side)
}

#[tokio::test]
async fn s2_hole_punch_happy_path() {
  let config = fast_config();
  let transport_a = bound_transport(&config).await;
  let transport_b = bound_transport(&config).await;

  let endpoint_to_b = PeerEndpoint {
    external_ip: Ipv4Addr::LOCALHOST,
    external_port: transport_b.local_port(),
    internal_ip: Ipv4Addr::UNSPECIFIED,
    internal_port: 0,
  };
  let endpoint_to_a = PeerEndpoint {
    external_ip: Ipv4Addr::LOCALHOST,
    external_port: transport_a.local_port(),
    internal_ip: Ipv4Addr::UNSPECIFIED,
    internal_port: 0,
  };

  let (addr_from_a, addr_from_b) = tokio::join!(transport_a.hole_punch(&endpoint_to_b, &config), transport_b.hole_punch(&endpoint_to_a, &config));

  assert_eq!(addr_from_a.unwrap().port(), transport_b.local_port());
  assert_eq!(addr_from_b.unwrap().port(), transport_a.local_port());
}

#[tokio::test]
async fn s3_mutual_handshake_establishes_connection() {
  let (peer_a, peer_b) = connect_pair().await;

  assert_eq!(peer_a.state(), ConnectionState::Connected);
  assert_eq!(peer_b.state(), ConnectionState::Connected);
  assert_eq!(peer_a.summoner_name(), "Bob");
  assert_eq!(peer_b.summoner_name(), "Alice");

  peer_a.disconnect().await;
  peer_b.disconnect().await;
}

#[tokio::test]
async fn s4_dead_peer_is_detected_after_silence() {
  let (peer_a, peer_b) = connect_pair().await;

  // Peer B stops answering (its keep-alive task and packet handler are torn
  // down) without peer A being told, so peer A's own keep-alive loop has to
  // notice the silence on its own.
  peer_b.disconnect().await;

  tokio::time::sleep(Duration::from_millis(400)).await;

  assert_eq!(peer_a.state(), ConnectionState::Dead);
}

#[tokio::test]
async fn s5_skin_selection_propagates_to_peer() {
  let (peer_a, peer_b) = connect_pair().await;

  let selection = SkinSelection {
    summoner_id: 1,
    summoner_name: "Alice".to_string(),
    champion_id: 103,
    skin_id: 12,
    chroma_id: None,
    custom_mod_path: None,
  };

  peer_a.send_skin_update(&selection).await.unwrap();
  tokio::time::sleep(Duration::from_millis(150)).await;

  assert_eq!(peer_b.skin_selection(), Some(selection));

  peer_a.disconnect().await;
  peer_b.disconnect().await;
}

struct FakeLocalSelection;

impl LocalSelectionProvider for FakeLocalSelection {
  fn current_champion_id(&self) -> Option<u32> {
    None
  }
  fn current_skin_id(&self) -> Option<u32> {
    None
  }
  fn current_chroma_id(&self) -> Option<u32> {
    None
  }
  fn current_custom_mod_path(&self, _skin_id: u32) -> Option<String> {
    None
  }
}

#[allow(dead_code)]
struct FakeLobby;

impl LobbyProvider for FakeLobby {
  fn my_summoner_id(&self) -> u64 {
    1
  }
  fn my_summoner_name(&self) -> String {
    "Alice".to_string()
  }
  fn current_lobby_ids(&self) -> HashSet<u64> {
    HashSet::from([1, 2])
  }
  fn champ_select_team_ids(&self) -> HashSet<u64> {
    HashSet::new()
  }
  fn team_champion_map(&self) -> HashMap<u64, u32> {
    HashMap::from([(2, 103)])
  }
  fn game_mode(&self) -> Option<String> {
    Some("CLASSIC".to_string())
  }
}

#[tokio::test]
async fn s6_team_map_enforcement_rejects_champion_mismatch() {
  let (peer_a, peer_b) = connect_pair().await;

  let matching = SkinSelection {
    summoner_id: 2,
    summoner_name: "Bob".to_string(),
    champion_id: 103,
    skin_id: 44,
    chroma_id: None,
    custom_mod_path: None,
  };
  peer_b.send_skin_update(&matching).await.unwrap();
  tokio::time::sleep(Duration::from_millis(150)).await;

  let collector = SkinCollector::new();
  let provider = FakeLocalSelection;
  let team_map = HashMap::from([(2u64, 103u32)]);

  let skins = collector.collect_all_skins(&provider, &[peer_a.clone()], 1, "Alice", &team_map);
  assert!(skins.iter().any(|s| s.summoner_id == 2 && s.champion_id == 103));

  let mismatched = SkinSelection {
    summoner_id: 2,
    summoner_name: "Bob".to_string(),
    champion_id: 77,
    skin_id: 44,
    chroma_id: None,
    custom_mod_path: None,
  };
  peer_b.send_skin_update(&mismatched).await.unwrap();
  tokio::time::sleep(Duration::from_millis(150)).await;

  let skins = collector.collect_all_skins(&provider, &[peer_a.clone()], 1, "Alice", &team_map);
  assert!(!skins.iter().any(|s| s.summoner_id == 2 && s.champion_id == 77));

  peer_a.disconnect().await;
  peer_b.disconnect().await;
}

#[test]
fn derive_shared_key_matches_between_both_sides() {
  let key_a = [3u8; KEY_SIZE];
  let key_b = [9u8; KEY_SIZE];
  assert_eq!(derive_shared_key(&key_a, &key_b), derive_shared_key(&key_b, &key_a));
}

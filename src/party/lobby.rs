// Lobby membership lookup and peer matching. Everything here is a pure
// function over a provider snapshot; nothing is cached or mutated in the
// background, matching the way the host application keeps lobby state in
// its own LCU watcher rather than duplicating it here.

use std::collections::{HashMap, HashSet};

use super::peer::PeerConnection;

/// Narrow seam into the client's lobby/champ-select state. Implemented by
/// the host application; this crate never talks to the game client
/// directly.
pub trait LobbyProvider: Send + Sync {
  fn my_summoner_id(&self) -> u64;
  fn my_summoner_name(&self) -> String;
  fn current_lobby_ids(&self) -> HashSet<u64>;
  fn champ_select_team_ids(&self) -> HashSet<u64>;
  fn team_champion_map(&self) -> HashMap<u64, u32>;
  fn game_mode(&self) -> Option<String>;
}

pub struct LobbyMatcher<'a> {
  provider: &'a dyn LobbyProvider,
}

impl<'a> LobbyMatcher<'a> {
  pub fn new(provider: &'a dyn LobbyProvider) -> Self {
    Self { provider }
  }

  /// Lobby set if non-empty, else the champ-select team set, else the
  /// union of both.
  pub fn current_summoner_ids(&self) -> HashSet<u64> {
    let lobby_ids = self.provider.current_lobby_ids();
    if !lobby_ids.is_empty() {
      return lobby_ids;
    }

    let team_ids = self.provider.champ_select_team_ids();
    if !team_ids.is_empty() {
      return team_ids;
    }

    lobby_ids.union(&team_ids).copied().collect()
  }

  pub fn team_champion_map(&self) -> HashMap<u64, u32> {
    self.provider.team_champion_map()
  }

  pub fn game_mode(&self) -> Option<String> {
    self.provider.game_mode()
  }

  /// Marks each peer's `in_lobby` flag and returns the subset that matched.
  pub fn match_peers_to_lobby(&self, peers: &[PeerConnection]) -> Vec<u64> {
    let lobby_ids = self.current_summoner_ids();
    if lobby_ids.is_empty() {
      return Vec::new();
    }

    let mut matched = Vec::new();
    for peer in peers {
      if peer.is_connected() && lobby_ids.contains(&peer.summoner_id()) {
        matched.push(peer.summoner_id());
      }
    }
    matched
  }

  pub fn is_in_same_lobby(&self, peer_summoner_ids: &[u64]) -> bool {
    let lobby_ids = self.current_summoner_ids();
    peer_summoner_ids.iter().any(|id| lobby_ids.contains(id))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct FakeProvider {
    my_id: u64,
    lobby: HashSet<u64>,
    team: HashSet<u64>,
    champ_map: HashMap<u64, u32>,
  }

  impl LobbyProvider for FakeProvider {
    fn my_summoner_id(&self) -> u64 {
      self.my_id
    }
    fn my_summoner_name(&self) -> String {
      "Me".to_string()
    }
    fn current_lobby_ids(&self) -> HashSet<u64> {
      self.lobby.clone()
    }
    fn champ_select_team_ids(&self) -> HashSet<u64> {
      self.team.clone()
    }
    fn team_champion_map(&self) -> HashMap<u64, u32> {
      self.champ_map.clone()
    }
    fn game_mode(&self) -> Option<String> {
      None
    }
  }

  #[test]
  fn prefers_lobby_ids_over_champ_select() {
    let provider = FakeProvider {
      my_id: 1,
      lobby: HashSet::from([1, 2]),
      team: HashSet::from([3, 4]),
      champ_map: HashMap::new(),
    };
    let matcher = LobbyMatcher::new(&provider);
    assert_eq!(matcher.current_summoner_ids(), HashSet::from([1, 2]));
  }

  #[test]
  fn falls_back_to_champ_select_when_lobby_empty() {
    let provider = FakeProvider {
      my_id: 1,
      lobby: HashSet::new(),
      team: HashSet::from([3, 4]),
      champ_map: HashMap::new(),
    };
    let matcher = LobbyMatcher::new(&provider);
    assert_eq!(matcher.current_summoner_ids(), HashSet::from([3, 4]));
  }

  #[test]
  fn is_in_same_lobby_detects_overlap() {
    let provider = FakeProvider {
      my_id: 1,
      lobby: HashSet::from([9, 10]),
      team: HashSet::new(),
      champ_map: HashMap::new(),
    };
    let matcher = LobbyMatcher::new(&provider);
    assert!(matcher.is_in_same_lobby(&[10, 11]));
    assert!(!matcher.is_in_same_lobby(&[11, 12]));
  }
}

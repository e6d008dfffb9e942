// Aggregates local and peer skin selections for the injector. Peer
// selections are cached here as a fallback for the moment between a peer
// disconnecting and being removed from the manager's map, mirroring the
// host application's own skin-cache dict.

use std::collections::HashMap;
use std::sync::Mutex;

use super::message::SkinSelection;
use super::peer::PeerConnection;
use crate::party_warn;

/// Narrow seam into the local client's current champ-select hover/lock
/// state. Implemented by the host application.
pub trait LocalSelectionProvider: Send + Sync {
  fn current_champion_id(&self) -> Option<u32>;
  fn current_skin_id(&self) -> Option<u32>;
  fn current_chroma_id(&self) -> Option<u32>;
  fn current_custom_mod_path(&self, skin_id: u32) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartySkinData {
  pub summoner_id: u64,
  pub summoner_name: String,
  pub champion_id: u32,
  pub skin_id: u32,
  pub chroma_id: Option<u32>,
  pub custom_mod_path: Option<String>,
  pub is_local: bool,
}

pub struct SkinCollector {
  selections: Mutex<HashMap<u64, SkinSelection>>,
}

impl SkinCollector {
  pub fn new() -> Self {
    Self { selections: Mutex::new(HashMap::new()) }
  }

  pub fn update_from_peer(&self, selection: SkinSelection) {
    let mut selections = self.selections.lock().unwrap();
    selections.insert(selection.summoner_id, selection);
  }

  pub fn clear_peer(&self, summoner_id: u64) {
    self.selections.lock().unwrap().remove(&summoner_id);
  }

  pub fn clear_all(&self) {
    self.selections.lock().unwrap().clear();
  }

  pub fn get_my_selection(&self, provider: &dyn LocalSelectionProvider, my_summoner_id: u64, my_summoner_name: &str) -> Option<SkinSelection> {
    let champion_id = provider.current_champion_id()?;
    let skin_id = provider.current_skin_id()?;

    Some(SkinSelection {
      summoner_id: my_summoner_id,
      summoner_name: my_summoner_name.to_string(),
      champion_id,
      skin_id,
      chroma_id: provider.current_chroma_id(),
      custom_mod_path: provider.current_custom_mod_path(skin_id),
    })
  }

  pub fn collect_all_skins(
    &self,
    provider: &dyn LocalSelectionProvider,
    peers: &[PeerConnection],
    my_summoner_id: u64,
    my_summoner_name: &str,
    team_champions: &HashMap<u64, u32>,
  ) -> Vec<PartySkinData> {
    let mut skins = Vec::new();

    if let Some(my_selection) = self.get_my_selection(provider, my_summoner_id, my_summoner_name) {
      skins.push(PartySkinData {
        summoner_id: my_summoner_id,
        summoner_name: my_summoner_name.to_string(),
        champion_id: my_selection.champion_id,
        skin_id: my_selection.skin_id,
        chroma_id: my_selection.chroma_id,
        custom_mod_path: my_selection.custom_mod_path,
        is_local: true,
      });
    }

    for peer in peers {
      if !peer.is_connected() {
        continue;
      }

      let selection = match peer.skin_selection() {
        Some(selection) => Some(selection),
        None => self.selections.lock().unwrap().get(&peer.summoner_id()).cloned(),
      };

      let selection = match selection {
        Some(s) => s,
        None => continue,
      };

      if let Some(&expected_champion) = team_champions.get(&selection.summoner_id) {
        if expected_champion != selection.champion_id {
          party_warn!(
            "[SKIN_COLLECT] champion mismatch for {}: expected {}, got {}",
            selection.summoner_name,
            expected_champion,
            selection.champion_id
          );
          continue;
        }
      }

      skins.push(PartySkinData {
        summoner_id: selection.summoner_id,
        summoner_name: selection.summoner_name,
        champion_id: selection.champion_id,
        skin_id: selection.skin_id,
        chroma_id: selection.chroma_id,
        custom_mod_path: selection.custom_mod_path,
        is_local: false,
      });
    }

    skins
  }

  pub fn get_peer_selections(&self) -> HashMap<u64, SkinSelection> {
    self.selections.lock().unwrap().clone()
  }
}

impl Default for SkinCollector {
  fn default() -> Self {
    Self::new()
  }
}

//! Party Mode: a UDP-based NAT-traversing mesh that lets a small group of
//! players exchange their currently selected cosmetic choices before a
//! match starts.
//!
//! This crate only implements the peer-to-peer core. Game-client
//! detection, the local mod store, license validation, and the UI bridge
//! all live outside it; they talk to the core through [`party::LobbyProvider`]
//! and [`party::LocalSelectionProvider`].

pub mod party;

pub use party::{
  LobbyProvider, LocalSelectionProvider, PartyConfig, PartyManager, PartySkinData, SkinSelection,
};

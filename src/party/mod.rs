pub mod config;
pub mod crypto;
pub mod lobby;
pub mod log;
pub mod manager;
pub mod message;
pub mod peer;
pub mod skins;
pub mod stun;
pub mod token;
pub mod transport;

pub use config::PartyConfig;
pub use lobby::LobbyProvider;
pub use manager::{EnableError, PartyManager};
pub use message::{Message, MessageType, SkinSelection};
pub use peer::{ConnectionState, PeerConnection, PeerError};
pub use skins::{LocalSelectionProvider, PartySkinData};
pub use token::{Token, TokenError};

//! `propabot-presence`: watches accounts on a game-presence API and reports
//! the moment one of them starts the watched game.
//!
//! A [`poller::PresencePoller`] asks a [`source::PresenceSource`] for all
//! watched accounts in one batched request per cycle, feeds each observation
//! through a [`tracker::PresenceTracker`] and sends every `false → true` edge
//! as a [`poller::PresenceEvent`].

pub mod error;
pub mod poller;
pub mod source;
pub mod tracker;

pub use error::PresenceError;
pub use poller::{PollerHandle, PresenceEvent, PresencePoller};
pub use source::{Observation, PresenceSource, SteamPresence};
pub use tracker::PresenceTracker;

//! `propabot-core`: settings, the persisted bot configuration and the
//! delivery interface shared by every other crate.

pub mod config;
pub mod delivery;
pub mod error;
pub mod store;

pub use config::Settings;
pub use delivery::{DeliveryError, DeliveryTarget};
pub use error::{CoreError, Result};
pub use store::{ConfigStore, PropagandaConfig, ScheduleConfig};

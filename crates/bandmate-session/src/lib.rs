//! Session authority for bandmate agents.
//!
//! A session owns the musical context, the agent directory, and the router.
//! It advances the context once per tick and delivers every message agents
//! produce before the next agent runs. Sessions share nothing, so several can
//! run in one process.

pub mod config;
pub mod cue;
pub mod directory;
pub mod error;
pub mod router;
pub mod session;

pub use config::{AgentKind, AgentSpec, BandConfig, ConfigSources};
pub use cue::{AudioFeatures, Cue};
pub use directory::Directory;
pub use error::{ConfigError, SessionError};
pub use router::{DeliveryReport, Router};
pub use session::{SessionAuthority, SessionHandle, TickReport};

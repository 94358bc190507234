//! Data models for the team sync daemon.
//!
//! Wire names follow the dashboard's JSON contract (camelCase, `_userId`/`_userName`
//! provenance on records).

mod entity;
mod identity;
mod record;
mod scope;
mod snapshot;

pub use entity::*;
pub use identity::*;
pub use record::*;
pub use scope::*;
pub use snapshot::*;

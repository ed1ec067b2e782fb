//! Data models for the gateway ops backend.

mod chat;
mod scim;
mod spend;
mod team;
mod user;

pub use chat::*;
pub use scim::*;
pub use spend::*;
pub use team::*;
pub use user::*;

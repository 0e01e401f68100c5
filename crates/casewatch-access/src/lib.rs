//! Role-based filing permissions for the moderation bot.
pub mod permissions;

pub use permissions::*;

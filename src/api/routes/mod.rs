//! API Routes
//!
//! Route handlers organized by functionality.

pub mod channels;
pub mod health;
pub mod links;
pub mod stats;

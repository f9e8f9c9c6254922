pub mod api;
pub mod discord;
pub mod service;

pub use service::{ClaimGrant, ClaimService};

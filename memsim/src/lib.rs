pub mod cache;
pub mod config;
pub mod handshake;
pub mod memory;
pub mod sim;

#[cfg(feature = "stat")]
pub mod stat;

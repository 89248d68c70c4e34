//! Beta-era Minecraft server on top of `bravo_engine`.
//!
//! The wire protocol lives in [`protocol`], per-connection state in
//! [`net`], and server-wide state in [`server`].

pub mod config;
pub mod dashboard;
pub mod net;
pub mod persistence;
pub mod protocol;
pub mod server;

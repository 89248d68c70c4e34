pub mod auth;
pub mod connection;
pub mod listener;
pub mod outbound;
pub mod session;
pub mod visibility;

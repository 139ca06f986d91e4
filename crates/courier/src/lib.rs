//! Courier - keeps one authenticated messaging session alive and exposes it
//! over a small local HTTP API (status, pairing code, send, logout).

pub mod config;
pub mod driver;
pub mod gateway;
pub mod handlers;
pub mod render;
pub mod response;
pub mod server;
pub mod session;

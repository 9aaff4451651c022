//! Client-facing transport.

pub mod websocket;

pub use websocket::ws_handler;

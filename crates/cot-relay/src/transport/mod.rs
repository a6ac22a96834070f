//! Subscriber-facing transports.

pub mod websocket;

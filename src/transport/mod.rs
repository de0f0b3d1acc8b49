//! The two carriers a session can be backed by: http long-polling and
//! websocket, plus the upgrade path between them.

pub mod polling;
pub mod ws;

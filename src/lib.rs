//! An Engine.IO v2 server core.
//!
//! Clients talk to the server over two HTTP-based carriers, long-polling and
//! websocket, and the crate presents both as one per-client [`Session`] with
//! ordered outbound delivery, periodic keepalive and a graceful
//! polling-to-websocket upgrade.
//!
//! The crate integrates as a [`tower::Service`] middleware
//! ([`EngineIoService`]) or a [`tower::Layer`] ([`EngineIoLayer`]) and can be
//! handed directly to a hyper v1 connection builder (use `.with_upgrades()`
//! so websocket hijacking works). Application code implements
//! [`EngineIoHandler`] to observe connects, messages and closes.
//!
//! #### Example with a hyper standalone service:
//! ```no_run
//! # use bytes::Bytes;
//! # use engineio2::{BoxError, EngineIoHandler, EngineIoService, Session};
//! #[derive(Debug)]
//! struct EchoHandler;
//!
//! impl EngineIoHandler for EchoHandler {
//!     fn on_connect(&self, session: Session<Self>) {
//!         println!("session connected: {}", session.id());
//!     }
//!     fn on_message(&self, data: Bytes, session: Session<Self>) -> Result<(), BoxError> {
//!         session.write(data)?;
//!         Ok(())
//!     }
//!     fn on_close(&self, session: Session<Self>) {
//!         println!("session closed: {}", session.id());
//!     }
//! }
//!
//! let svc = EngineIoService::new(EchoHandler);
//! ```

pub mod config;
pub mod errors;
pub mod handler;
pub mod layer;
pub mod service;
pub mod session;
pub mod sid;
pub mod transport;

mod body;
mod engine;
mod futures;
mod packet;
mod payload;

pub use config::EngineIoConfig;
pub use errors::Error;
pub use handler::{BoxError, EngineIoHandler};
pub use layer::EngineIoLayer;
pub use service::EngineIoService;
pub use session::Session;
pub use sid::Sid;

//! ## An [`EngineIoHandler`] to observe every session event
//! #### Example:
//! ```no_run
//! # use bytes::Bytes;
//! # use engineio2::{BoxError, EngineIoHandler, EngineIoService, Session};
//! # use std::sync::atomic::{AtomicUsize, Ordering};
//! #[derive(Debug, Default)]
//! struct MyHandler {
//!     user_cnt: AtomicUsize,
//! }
//!
//! impl EngineIoHandler for MyHandler {
//!     fn on_connect(&self, session: Session<Self>) {
//!         let cnt = self.user_cnt.fetch_add(1, Ordering::Relaxed) + 1;
//!         session.write(cnt.to_string()).ok();
//!     }
//!     fn on_message(&self, data: Bytes, session: Session<Self>) -> Result<(), BoxError> {
//!         session.write(data)?;
//!         Ok(())
//!     }
//!     fn on_close(&self, _session: Session<Self>) {
//!         self.user_cnt.fetch_sub(1, Ordering::Relaxed);
//!     }
//! }
//!
//! // Create an engine.io service with the given handler
//! let svc = EngineIoService::new(MyHandler::default());
//! ```

use bytes::Bytes;

use crate::session::Session;

/// Boxed error returned by the message callback.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The [`EngineIoHandler`] trait can be implemented on any struct to handle
/// session events.
///
/// Callbacks run on the task that decoded the triggering frame: they may be
/// invoked concurrently across sessions but are serial within one session.
pub trait EngineIoHandler: Sized + Send + Sync + 'static {
    /// Called when a new session is established.
    fn on_connect(&self, session: Session<Self>);

    /// Called for every message frame received from the client.
    ///
    /// Returning an error terminates the session.
    fn on_message(&self, data: Bytes, session: Session<Self>) -> Result<(), BoxError>;

    /// Called exactly once when a session is torn down, whatever triggered
    /// the teardown.
    fn on_close(&self, session: Session<Self>);
}

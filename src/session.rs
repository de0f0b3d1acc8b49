use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::errors::Error;
use crate::handler::EngineIoHandler;
use crate::sid::Sid;
use crate::transport::polling::PollingTransport;
use crate::transport::ws::WsSession;

/// A handle to one client session, backed at any moment by exactly one
/// transport. This is what [`EngineIoHandler`] callbacks receive; cloning is
/// cheap and clones refer to the same session.
pub enum Session<H: EngineIoHandler> {
    Polling(Arc<PollingTransport<H>>),
    Websocket(Arc<WsSession<H>>),
}

impl<H: EngineIoHandler> Session<H> {
    /// The session id.
    pub fn id(&self) -> Sid {
        match self {
            Session::Polling(t) => t.sid(),
            Session::Websocket(t) => t.sid(),
        }
    }

    /// Queue a message frame for delivery to the client.
    ///
    /// Never blocks: returns [`Error::QueueFull`] when the outbound budget is
    /// exhausted and [`Error::NotConnected`] once the session has closed.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<(), Error> {
        match self {
            Session::Polling(t) => t.write(data.into()),
            Session::Websocket(t) => t.write(data.into()),
        }
    }

    /// Tear the session down. The close callback fires once, from whichever
    /// path gets there first.
    pub fn close(&self) {
        match self {
            Session::Polling(t) => t.close(),
            Session::Websocket(t) => t.close(),
        }
    }
}

impl<H: EngineIoHandler> Clone for Session<H> {
    fn clone(&self) -> Self {
        match self {
            Session::Polling(t) => Session::Polling(t.clone()),
            Session::Websocket(t) => Session::Websocket(t.clone()),
        }
    }
}

impl<H: EngineIoHandler> fmt::Debug for Session<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transport = match self {
            Session::Polling(_) => "polling",
            Session::Websocket(_) => "websocket",
        };
        f.debug_struct("Session")
            .field("sid", &self.id())
            .field("transport", &transport)
            .finish()
    }
}

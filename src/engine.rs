use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::EngineIoConfig;
use crate::errors::Error;
use crate::handler::EngineIoHandler;
use crate::packet::OpenPacket;
use crate::session::Session;
use crate::sid::Sid;
use crate::transport::polling::PollingTransport;

/// Backlog of the removal channel. Sends are best-effort: a session being
/// removed is already torn down, a dropped delete only delays the map
/// cleanup.
const REMOVE_BACKLOG: usize = 64;

type SessionMap<H> = Arc<RwLock<HashMap<Sid, Session<H>>>>;

/// The session registry: owns the sid to session mapping, creates sessions
/// on handshake, and runs the removal task that is the only deleter.
pub struct EngineIo<H: EngineIoHandler> {
    sessions: SessionMap<H>,
    pub(crate) handler: Arc<H>,
    pub(crate) remove_tx: mpsc::Sender<Sid>,
    pub config: EngineIoConfig,
}

impl<H: EngineIoHandler> EngineIo<H> {
    /// Create a new engine and spawn its removal task. Must be called from
    /// within a tokio runtime.
    pub fn new(handler: H, config: EngineIoConfig) -> Self {
        let sessions: SessionMap<H> = Arc::new(RwLock::new(HashMap::new()));
        let (remove_tx, remove_rx) = mpsc::channel(REMOVE_BACKLOG);
        tokio::spawn(remover(sessions.clone(), remove_rx));
        Self {
            sessions,
            handler: Arc::new(handler),
            remove_tx,
            config,
        }
    }

    /// Handshake: build a polling session, register it and fire the connect
    /// callback. Returns the transport together with its serialized open
    /// payload.
    pub(crate) fn create_session(
        &self,
        jsonp: Option<u32>,
    ) -> Result<(Arc<PollingTransport<H>>, Bytes), Error> {
        let sid = Sid::new();
        let open = serde_json::to_string(&OpenPacket::new(sid, &self.config))?;

        let transport = PollingTransport::new(
            sid,
            jsonp,
            &self.config,
            self.handler.clone(),
            self.remove_tx.clone(),
        );
        {
            let mut sessions = self.sessions.write().unwrap();
            if sessions.contains_key(&sid) {
                transport.detach();
                return Err(Error::DuplicateSession);
            }
            sessions.insert(sid, Session::Polling(transport.clone()));
        }
        self.handler.on_connect(Session::Polling(transport.clone()));

        Ok((transport, Bytes::from(open)))
    }

    /// Get a session by its sid. Clones the handle so the lock is not held.
    pub(crate) fn get_session(&self, sid: Sid) -> Option<Session<H>> {
        self.sessions.read().unwrap().get(&sid).cloned()
    }

    /// Swap the registry entry for `sid` once an upgrade completes. Returns
    /// false when the session vanished during the handshake.
    pub(crate) fn promote_session(&self, sid: Sid, session: Session<H>) -> bool {
        match self.sessions.write().unwrap().get_mut(&sid) {
            Some(entry) => {
                *entry = session;
                true
            }
            None => false,
        }
    }
}

async fn remover<H: EngineIoHandler>(sessions: SessionMap<H>, mut remove_rx: mpsc::Receiver<Sid>) {
    while let Some(sid) = remove_rx.recv().await {
        let mut sessions = sessions.write().unwrap();
        if sessions.remove(&sid).is_some() {
            debug!("[sid={sid}] session removed, {} remaining", sessions.len());
        } else {
            debug!("[sid={sid}] session already removed");
        }
    }
}

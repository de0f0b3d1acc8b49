#![deny(clippy::await_holding_lock)]
//! The polling transport multiplexes short-lived http round trips into one
//! logical stream: POST requests carry inbound frames, GET requests park a
//! poll slot that the per-session flusher task drains the outbound queue
//! into.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use http::{Request, Response, StatusCode};
use http_body::Body;
use http_body_util::BodyExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::debug;

use crate::body::ResponseBody;
use crate::config::EngineIoConfig;
use crate::engine::EngineIo;
use crate::errors::Error;
use crate::futures::http_response;
use crate::handler::EngineIoHandler;
use crate::packet::{Packet, OK_RESPONSE};
use crate::payload;
use crate::session::Session;
use crate::sid::Sid;

/// Queue slots kept back for internal packets so they stay invisible to
/// `write` callers.
pub(crate) const HEARTBEAT_RESERVE: usize = 10;
/// Consecutive unserviced heartbeats after which a session counts as
/// unreachable.
const MAX_HEARTBEAT: u32 = 10;
/// Pause taken by the flusher for each consumed heartbeat.
const HEARTBEAT_DELAY: Duration = Duration::from_millis(500);

/// One session's polling carrier: the bounded outbound queue, the poll-slot
/// map its flusher writes into, and the lifecycle flags shared with the
/// upgrade path.
pub struct PollingTransport<H: EngineIoHandler> {
    sid: Sid,
    /// Jsonp callback index, fixed at handshake time.
    jsonp: Option<u32>,
    handler: Arc<H>,

    /// Sender half of the outbound queue. `None` once the session is
    /// disconnected, so the connected check and the enqueue share one lock.
    queue: Mutex<Option<mpsc::Sender<Packet>>>,
    /// Set when a websocket has taken ownership; a subsequent `close` must
    /// not remove the session or fire the user callback.
    upgraded: AtomicBool,
    /// The close callback fires at most once per session.
    close_fired: AtomicBool,

    /// Sequence numbers for poll slots, in arrival order.
    seq: AtomicU64,
    /// In-flight GET polls by sequence number. A slot is taken out of the
    /// map to be written, exactly once.
    slots: RwLock<HashMap<u64, oneshot::Sender<Bytes>>>,

    remove_tx: mpsc::Sender<Sid>,
    ping_interval: Duration,
    /// Total queue capacity, also the flusher's per-batch drain limit.
    capacity: usize,
}

impl<H: EngineIoHandler> PollingTransport<H> {
    pub(crate) fn new(
        sid: Sid,
        jsonp: Option<u32>,
        config: &EngineIoConfig,
        handler: Arc<H>,
        remove_tx: mpsc::Sender<Sid>,
    ) -> Arc<Self> {
        let capacity = config.queue_length + HEARTBEAT_RESERVE;
        let (queue_tx, queue_rx) = mpsc::channel(capacity);

        let transport = Arc::new(Self {
            sid,
            jsonp,
            handler,
            queue: Mutex::new(Some(queue_tx)),
            upgraded: AtomicBool::new(false),
            close_fired: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            slots: RwLock::new(HashMap::new()),
            remove_tx,
            ping_interval: config.ping_interval,
            capacity,
        });
        tokio::spawn(transport.clone().flush_loop(queue_rx));
        transport
    }

    pub fn sid(&self) -> Sid {
        self.sid
    }

    pub(crate) fn jsonp(&self) -> Option<u32> {
        self.jsonp
    }

    pub(crate) fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Queue a message frame. Never blocks; only the user-visible part of
    /// the queue is available here, the reserve is kept for internal
    /// packets.
    pub(crate) fn write(&self, data: Bytes) -> Result<(), Error> {
        let queue = self.queue.lock().unwrap();
        let tx = queue.as_ref().ok_or(Error::NotConnected)?;
        if tx.capacity() <= HEARTBEAT_RESERVE {
            return Err(Error::QueueFull);
        }
        tx.try_send(Packet::Message(data)).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull,
            TrySendError::Closed(_) => Error::NotConnected,
        })
    }

    /// Queue an internal packet; may use the heartbeat reserve.
    pub(crate) fn send_packet(&self, packet: Packet) -> Result<(), Error> {
        let queue = self.queue.lock().unwrap();
        let tx = queue.as_ref().ok_or(Error::NotConnected)?;
        tx.try_send(packet).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull,
            TrySendError::Closed(_) => Error::NotConnected,
        })
    }

    /// Queue `packet` to flush any pending poll and mark the session as
    /// owned by a websocket. The flag is set even when the enqueue fails:
    /// from here on the websocket path decides the session's fate.
    pub(crate) fn upgrade(&self, packet: Packet) -> Result<(), Error> {
        let res = self.send_packet(packet);
        self.upgraded.store(true, Ordering::Release);
        res
    }

    /// Disconnect the session. Closes the queue (the flusher drains out and
    /// exits), completes pending polls with an error, and, unless a
    /// websocket has taken ownership, removes the session from the registry
    /// and fires the user close callback.
    pub fn close(self: &Arc<Self>) {
        if self.queue.lock().unwrap().take().is_none() {
            return;
        }
        self.drop_slots();
        debug!("[sid={}] polling transport closed", self.sid);
        if self.upgraded.load(Ordering::Acquire) {
            return;
        }
        self.finish_close();
    }

    /// Close the queue without touching the session lifecycle: ownership has
    /// transferred to the websocket transport.
    pub(crate) fn detach(&self) {
        self.queue.lock().unwrap().take();
        self.drop_slots();
        debug!("[sid={}] polling transport detached", self.sid);
    }

    /// Tear down after a failed upgrade: whatever state the flags are in,
    /// make sure the session is removed and the close callback has fired.
    pub(crate) fn abort(self: &Arc<Self>) {
        self.queue.lock().unwrap().take();
        self.drop_slots();
        self.finish_close();
    }

    fn finish_close(self: &Arc<Self>) {
        if self.close_fired.swap(true, Ordering::AcqRel) {
            return;
        }
        self.remove_tx.try_send(self.sid).ok();
        self.handler.on_close(Session::Polling(self.clone()));
    }

    fn drop_slots(&self) {
        self.slots.write().unwrap().clear();
    }

    /// Hold a GET poll open until the flusher writes into its slot, the
    /// client goes away, or `ping_interval` passes with nothing to deliver
    /// (then a pong targeted at this slot is queued so the client sees the
    /// session is alive).
    pub(crate) async fn poll(self: &Arc<Self>) -> Result<Bytes, Error> {
        if self.queue.lock().unwrap().is_none() {
            return Err(Error::NotConnected);
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let (slot_tx, mut slot_rx) = oneshot::channel();
        self.slots.write().unwrap().insert(seq, slot_tx);
        debug!("[sid={}] poll slot {seq} registered", self.sid);

        // Dropping the request future before completion means the client
        // closed the connection: the guard then disconnects the session.
        let mut guard = SlotGuard {
            transport: self,
            seq,
            client_gone: true,
        };

        let res = loop {
            tokio::select! {
                res = &mut slot_rx => {
                    break res.map_err(|_| Error::NotConnected);
                }
                _ = time::sleep(self.ping_interval) => {
                    debug!("[sid={}] ping interval elapsed on poll slot {seq}", self.sid);
                    self.send_packet(Packet::Pong { slot: Some(seq) }).ok();
                }
            }
        };
        guard.client_gone = false;
        res
    }

    /// Drain the outbound queue into poll slots, one coalesced batch per
    /// wakeup. Heartbeats pace the loop while no poll is pending; too many
    /// in a row means the client is gone.
    async fn flush_loop(self: Arc<Self>, mut queue_rx: mpsc::Receiver<Packet>) {
        let mut buf = BytesMut::new();
        let mut heartbeats: u32 = 0;

        while let Some(packet) = queue_rx.recv().await {
            let mut target = None;
            self.absorb(packet, &mut buf, &mut heartbeats, &mut target)
                .await;

            let mut drained = 1;
            while drained < self.capacity {
                match queue_rx.try_recv() {
                    Ok(packet) => {
                        drained += 1;
                        self.absorb(packet, &mut buf, &mut heartbeats, &mut target)
                            .await;
                    }
                    Err(_) => break,
                }
            }

            // Nothing may leave through a polling slot once the session is
            // disconnected.
            if self.queue.lock().unwrap().is_none() {
                return;
            }

            let slot = {
                let mut slots = self.slots.write().unwrap();
                match target {
                    Some(seq) => slots.remove(&seq),
                    None => {
                        let seq = slots.keys().next().copied();
                        seq.and_then(|seq| slots.remove(&seq))
                    }
                }
            };

            match slot {
                Some(slot) => {
                    if slot.send(buf.split().freeze()).is_err() {
                        debug!("[sid={}] poll slot dropped before flush", self.sid);
                        self.close();
                        return;
                    }
                    heartbeats = 0;
                }
                None => {
                    if heartbeats >= MAX_HEARTBEAT {
                        debug!(
                            "[sid={}] no poll for {heartbeats} heartbeats, session unreachable",
                            self.sid
                        );
                        self.close();
                        return;
                    }
                    let queue = self.queue.lock().unwrap();
                    match &*queue {
                        Some(tx) => {
                            tx.try_send(Packet::Heartbeat).ok();
                        }
                        None => return,
                    }
                }
            }
        }
    }

    async fn absorb(
        &self,
        packet: Packet,
        buf: &mut BytesMut,
        heartbeats: &mut u32,
        target: &mut Option<u64>,
    ) {
        match packet {
            Packet::Heartbeat => {
                time::sleep(HEARTBEAT_DELAY).await;
                *heartbeats += 1;
            }
            Packet::Pong { slot } => {
                if slot.is_some() {
                    *target = slot;
                }
                payload::encode(&Packet::Pong { slot }, self.jsonp, buf);
            }
            packet => payload::encode(&packet, self.jsonp, buf),
        }
    }

    /// Process one POST body worth of inbound frames.
    pub(crate) async fn post(self: &Arc<Self>, body: Bytes) -> Result<(), Error> {
        let data = match self.jsonp {
            Some(_) => form_field(&body, "d").ok_or(Error::BodyRead)?,
            None => body,
        };

        for packet in payload::decode(&data)? {
            match packet {
                Packet::Close => {
                    debug!("[sid={}] close frame received", self.sid);
                    break;
                }
                Packet::Ping => {
                    self.send_packet(Packet::Pong { slot: None }).ok();
                }
                Packet::Message(data) => {
                    let session = Session::Polling(self.clone());
                    if let Err(e) = self.handler.on_message(data, session) {
                        debug!("[sid={}] message handler error: {e}", self.sid);
                        self.close();
                        break;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl<H: EngineIoHandler> fmt::Debug for PollingTransport<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingTransport")
            .field("sid", &self.sid)
            .field("jsonp", &self.jsonp)
            .finish()
    }
}

/// Removes the poll slot on every exit path and disconnects the session when
/// the request future was dropped by the client.
struct SlotGuard<'a, H: EngineIoHandler> {
    transport: &'a Arc<PollingTransport<H>>,
    seq: u64,
    client_gone: bool,
}

impl<H: EngineIoHandler> Drop for SlotGuard<'_, H> {
    fn drop(&mut self) {
        self.transport.slots.write().unwrap().remove(&self.seq);
        if self.client_gone {
            debug!(
                "[sid={}] client left poll slot {}, closing",
                self.transport.sid, self.seq
            );
            self.transport.close();
        }
    }
}

/// Handshake request: create the session and answer with its open frame.
pub(crate) fn open_req<H, B>(
    engine: &Arc<EngineIo<H>>,
    jsonp: Option<u32>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
    B: Send + 'static,
{
    let (transport, open) = engine.create_session(jsonp)?;
    let mut buf = BytesMut::new();
    payload::encode(&Packet::Open(open), jsonp, &mut buf);
    debug!("[sid={}] handshake complete", transport.sid());
    http_response(StatusCode::OK, buf.freeze(), jsonp.is_some()).map_err(Error::Http)
}

/// GET: park a poll slot and relay whatever the flusher writes into it.
pub(crate) async fn poll_req<H, B>(
    transport: Arc<PollingTransport<H>>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
    B: Send + 'static,
{
    let data = transport.poll().await?;
    http_response(StatusCode::OK, data, transport.jsonp().is_some()).map_err(Error::Http)
}

/// POST: decode the body (or its jsonp `d` field) and feed each frame to the
/// session; acknowledged with a literal `ok`.
pub(crate) async fn post_req<H, R, B>(
    transport: Arc<PollingTransport<H>>,
    req: Request<R>,
    max_payload: u64,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
    R: Body + Send + 'static,
    R::Data: Send,
    R::Error: fmt::Debug,
    B: Send + 'static,
{
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| {
            debug!("error reading request body: {e:?}");
            Error::BodyRead
        })?
        .to_bytes();
    if body.len() as u64 > max_payload {
        return Err(Error::PayloadTooLarge);
    }

    transport.post(body).await?;
    http_response(StatusCode::OK, OK_RESPONSE, false).map_err(Error::Http)
}

/// Pull one field out of a form-urlencoded body.
fn form_field(body: &Bytes, name: &str) -> Option<Bytes> {
    let body = std::str::from_utf8(body).ok()?;
    body.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == name).then(|| percent_decode(value))
    })
}

fn percent_decode(value: &str) -> Bytes {
    let raw = value.as_bytes();
    let mut out = BytesMut::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'+' => {
                out.put_u8(b' ');
                i += 1;
            }
            b'%' if i + 2 < raw.len() => {
                match (hex_value(raw[i + 1]), hex_value(raw[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.put_u8(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.put_u8(b'%');
                        i += 1;
                    }
                }
            }
            byte => {
                out.put_u8(byte);
                i += 1;
            }
        }
    }
    out.freeze()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

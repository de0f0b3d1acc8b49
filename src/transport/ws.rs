//! The websocket transport takes over an existing polling session: it
//! performs the probe handshake over the hijacked connection, detaches the
//! polling carrier, then serves the session over full-duplex frames with
//! read and write deadlines.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use http::{header, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use crate::body::ResponseBody;
use crate::engine::EngineIo;
use crate::errors::Error;
use crate::futures::ws_response;
use crate::handler::EngineIoHandler;
use crate::packet::{Packet, PROBE_REQUEST, PROBE_RESPONSE, UPGRADE_REQUEST};
use crate::session::Session;
use crate::sid::Sid;
use crate::transport::polling::PollingTransport;

/// One session's websocket carrier. Writes go through a channel to the
/// writer task that owns the sink; the read loop runs on the upgrade task.
pub struct WsSession<H: EngineIoHandler> {
    sid: Sid,
    writer_tx: mpsc::Sender<Packet>,
    closed: AtomicBool,
    remove_tx: mpsc::Sender<Sid>,
    handler: Arc<H>,
}

impl<H: EngineIoHandler> WsSession<H> {
    pub fn sid(&self) -> Sid {
        self.sid
    }

    /// Send a message frame to the client.
    pub(crate) fn write(&self, data: Bytes) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }
        self.send_packet(Packet::Message(data))
    }

    pub(crate) fn send_packet(&self, packet: Packet) -> Result<(), Error> {
        self.writer_tx.try_send(packet).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull,
            TrySendError::Closed(_) => Error::NotConnected,
        })
    }

    /// Tear the session down: stop the writer with a close frame, remove the
    /// session from the registry and fire the user close callback. Only the
    /// first caller does any of this.
    pub fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("[sid={}] websocket session closed", self.sid);
        self.writer_tx.try_send(Packet::Close).ok();
        self.remove_tx.try_send(self.sid).ok();
        self.handler.on_close(Session::Websocket(self.clone()));
    }
}

impl<H: EngineIoHandler> fmt::Debug for WsSession<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsSession").field("sid", &self.sid).finish()
    }
}

/// Accept a websocket upgrade for an existing polling session: answer the
/// 101 immediately and run the probe handshake and read loop on a spawned
/// task, since the connection is hijacked and can carry no http error.
pub(crate) fn upgrade_req<H, R, B>(
    engine: Arc<EngineIo<H>>,
    polling: Arc<PollingTransport<H>>,
    req: Request<R>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
{
    if !engine.config.upgrades.iter().any(|u| u == "websocket") {
        return Err(Error::TransportMismatch);
    }

    let (parts, _) = req.into_parts();
    let ws_key = parts
        .headers
        .get(header::SEC_WEBSOCKET_KEY)
        .cloned()
        .ok_or(Error::MissingWsKey)?;

    let req = Request::from_parts(parts, ());
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(conn) => {
                let io = TokioIo::new(conn);
                match on_upgrade(engine, polling, io).await {
                    Ok(()) => debug!("ws connection closed"),
                    Err(e) => debug!("ws connection closed with error: {e:?}"),
                }
            }
            Err(e) => {
                debug!("ws upgrade error: {e}");
                polling.abort();
            }
        }
    });

    ws_response(&ws_key).map_err(Error::Http)
}

/// Drive one upgraded connection: probe handshake, registry swap, then the
/// read loop until the connection dies.
async fn on_upgrade<H, S>(
    engine: Arc<EngineIo<H>>,
    polling: Arc<PollingTransport<H>>,
    io: S,
) -> Result<(), Error>
where
    H: EngineIoHandler,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let sid = polling.sid();
    let mut ws = WebSocketStream::from_raw_socket(io, Role::Server, None).await;

    if let Err(e) = probe_handshake(&mut ws, &polling).await {
        debug!("[sid={sid}] probe handshake failed: {e:?}");
        polling.abort();
        return Err(e);
    }
    drop(polling);
    debug!("[sid={sid}] upgraded to websocket");

    let ping_timeout = engine.config.ping_timeout;
    let (writer_tx, writer_rx) = mpsc::channel(engine.config.queue_length);
    let session = Arc::new(WsSession {
        sid,
        writer_tx,
        closed: AtomicBool::new(false),
        remove_tx: engine.remove_tx.clone(),
        handler: engine.handler.clone(),
    });

    let (sink, stream) = ws.split();
    let writer = spawn_writer(sid, sink, writer_rx, ping_timeout);

    if !engine.promote_session(sid, Session::Websocket(session.clone())) {
        // the session was removed while the handshake ran; there is no one
        // left to notify
        debug!("[sid={sid}] session vanished during upgrade");
        session.closed.store(true, Ordering::Release);
        writer.abort();
        return Err(Error::NotConnected);
    }

    let res = read_loop(&session, stream, ping_timeout).await;
    if let Err(ref e) = res {
        debug!("[sid={sid}] read loop error: {e:?}");
    }
    session.close();
    writer.abort();
    res
}

/// The upgrade exchange: `2probe` in, `3probe` out, a noop through the
/// polling queue to flush any pending poll, `5` in, then the polling
/// transport is detached without firing the user close callback.
async fn probe_handshake<H, S>(
    ws: &mut WebSocketStream<S>,
    polling: &Arc<PollingTransport<H>>,
) -> Result<(), Error>
where
    H: EngineIoHandler,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match ws.next().await {
        Some(Ok(Message::Text(msg))) if msg == PROBE_REQUEST => {}
        Some(Ok(msg)) => {
            debug!("unexpected probe message: {msg:?}");
            return Err(Error::Probe);
        }
        _ => return Err(Error::Probe),
    }
    ws.send(Message::Text(PROBE_RESPONSE.into())).await?;

    polling.upgrade(Packet::Noop)?;

    match ws.next().await {
        Some(Ok(Message::Text(msg))) if msg == UPGRADE_REQUEST => {}
        Some(Ok(msg)) => {
            debug!("unexpected upgrade message: {msg:?}");
            return Err(Error::UpgradeFailed);
        }
        _ => return Err(Error::UpgradeFailed),
    }

    polling.detach();
    Ok(())
}

/// Receive frames until the client closes, errors out, or stays silent past
/// the read deadline.
async fn read_loop<H, S>(
    session: &Arc<WsSession<H>>,
    mut stream: SplitStream<WebSocketStream<S>>,
    ping_timeout: Duration,
) -> Result<(), Error>
where
    H: EngineIoHandler,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let msg = match time::timeout(ping_timeout, stream.next()).await {
            Err(_) => {
                debug!("[sid={}] read deadline expired", session.sid);
                return Ok(());
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(Error::Ws(e)),
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => match Packet::decode_frame(&text)? {
                Packet::Close => {
                    debug!("[sid={}] close frame received", session.sid);
                    return Ok(());
                }
                Packet::Ping => {
                    session.send_packet(Packet::Pong { slot: None }).ok();
                }
                Packet::Message(data) => {
                    let handle = Session::Websocket(session.clone());
                    if let Err(e) = session.handler.on_message(data, handle) {
                        debug!("[sid={}] message handler error: {e}", session.sid);
                        return Ok(());
                    }
                }
                packet => {
                    debug!("[sid={}] ignoring packet: {packet:?}", session.sid);
                }
            },
            Message::Close(_) => return Ok(()),
            Message::Binary(_) => {
                debug!("[sid={}] binary frames are not supported", session.sid);
                return Ok(());
            }
            // ws-level ping/pong frames are answered by tungstenite itself
            _ => {}
        }
    }
}

/// Writer task: owns the sink half and transmits queued packets as text
/// frames, each send bounded by the write deadline. A close packet emits a
/// websocket close frame and stops the task.
fn spawn_writer<S>(
    sid: Sid,
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut writer_rx: mpsc::Receiver<Packet>,
    ping_timeout: Duration,
) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(packet) = writer_rx.recv().await {
            let msg = match packet {
                Packet::Close => {
                    sink.send(Message::Close(None)).await.ok();
                    break;
                }
                packet => match packet.encode_frame() {
                    Some(frame) => Message::Text(frame),
                    None => {
                        debug!("[sid={sid}] dropping unencodable frame");
                        continue;
                    }
                },
            };

            match time::timeout(ping_timeout, sink.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!("[sid={sid}] write error: {e}");
                    break;
                }
                Err(_) => {
                    debug!("[sid={sid}] write deadline expired");
                    break;
                }
            }
        }
    })
}

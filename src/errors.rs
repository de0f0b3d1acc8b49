use http::{Response, StatusCode};
use tokio_tungstenite::tungstenite;
use tracing::debug;

use crate::body::ResponseBody;
use crate::payload::PayloadError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unknown session id")]
    UnknownSession,
    #[error("queue limit reached")]
    QueueFull,
    #[error("not connected")]
    NotConnected,
    #[error("session id already registered")]
    DuplicateSession,
    #[error("transport mismatch")]
    TransportMismatch,
    #[error("missing Sec-WebSocket-Key header")]
    MissingWsKey,
    #[error("unexpected probe message")]
    Probe,
    #[error("upgrade handshake failed")]
    UpgradeFailed,
    #[error("failed to read request body")]
    BodyRead,
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("error decoding payload: {0}")]
    Payload(#[from] PayloadError),
    #[error("error serializing handshake: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("ws transport error: {0}")]
    Ws(#[from] tungstenite::Error),
    #[error("http error: {0}")]
    Http(#[from] http::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert an error into an http response.
/// Known client errors map to a 400, everything else to a 500.
impl<B> From<Error> for Response<ResponseBody<B>> {
    fn from(err: Error) -> Self {
        let (status, body) = match &err {
            Error::UnknownSession => (StatusCode::BAD_REQUEST, Some(err.to_string())),
            Error::TransportMismatch
            | Error::MissingWsKey
            | Error::BodyRead
            | Error::PayloadTooLarge => (StatusCode::BAD_REQUEST, None),
            Error::Payload(e) => (StatusCode::INTERNAL_SERVER_ERROR, Some(e.to_string())),
            Error::Serialize(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Some(format!("handshake: {e}")),
            ),
            e => {
                debug!("uncaught error: {e:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = match body {
            Some(message) => ResponseBody::custom_response(message),
            None => ResponseBody::empty_response(),
        };
        Response::builder()
            .status(status)
            .body(body)
            .unwrap()
    }
}

//! ## A tower [`Service`] for engine.io so it can be used with frameworks
//! supporting tower services, plus a hyper v1 [`Service`](hyper::service::Service)
//! impl so the service can be handed straight to a connection builder.
//!
//! Remember to enable upgrades on the http server (`.with_upgrades()` on
//! hyper's connection builder), otherwise websocket hijacking fails.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::{self, Ready};
use http::{Method, Request, Response};
use http_body::Body;
use http_body_util::Empty;
use tower::Service;
use tracing::debug;

use crate::body::ResponseBody;
use crate::config::EngineIoConfig;
use crate::engine::EngineIo;
use crate::errors::Error;
use crate::futures::ResponseFuture;
use crate::handler::EngineIoHandler;
use crate::session::Session;
use crate::sid::Sid;
use crate::transport::{polling, ws};

/// A [`Service`] that handles engine.io requests as a middleware.
/// If the request is not an engine.io request, it forwards it to the inner
/// service.
///
/// By default, it uses a [`NotFoundService`] as the inner service so it can
/// be used as a standalone [`Service`].
pub struct EngineIoService<H: EngineIoHandler, S = NotFoundService> {
    inner: S,
    engine: Arc<EngineIo<H>>,
}

impl<H: EngineIoHandler> EngineIoService<H, NotFoundService> {
    /// Create a new [`EngineIoService`] with a [`NotFoundService`] as the
    /// inner service. Requests outside the engine.io path get a 404.
    pub fn new(handler: H) -> Self {
        EngineIoService::with_config(handler, EngineIoConfig::default())
    }

    /// Create a new [`EngineIoService`] with a custom config.
    pub fn with_config(handler: H, config: EngineIoConfig) -> Self {
        EngineIoService::with_config_inner(NotFoundService, handler, config)
    }
}

impl<H: EngineIoHandler, S> EngineIoService<H, S> {
    /// Create a new [`EngineIoService`] with a custom inner service.
    pub fn with_inner(inner: S, handler: H) -> Self {
        EngineIoService::with_config_inner(inner, handler, EngineIoConfig::default())
    }

    /// Create a new [`EngineIoService`] with a custom inner service and a
    /// custom config.
    pub fn with_config_inner(inner: S, handler: H, config: EngineIoConfig) -> Self {
        EngineIoService {
            inner,
            engine: Arc::new(EngineIo::new(handler, config)),
        }
    }

    /// Convert this [`EngineIoService`] into a [`MakeEngineIoService`].
    /// This is useful when using [`EngineIoService`] without layers.
    pub fn into_make_service(self) -> MakeEngineIoService<H, S>
    where
        S: Clone,
    {
        MakeEngineIoService::new(self)
    }
}

impl<H: EngineIoHandler, S: Clone> Clone for EngineIoService<H, S> {
    fn clone(&self) -> Self {
        EngineIoService {
            inner: self.inner.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl<H: EngineIoHandler, S> fmt::Debug for EngineIoService<H, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineIoService").finish()
    }
}

/// Tower [`Service`] implementation for [`EngineIoService`].
impl<ReqBody, ResBody, S, H> Service<Request<ReqBody>> for EngineIoService<H, S>
where
    ReqBody: Body + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: fmt::Debug,
    ResBody: Body + Send + 'static,
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    H: EngineIoHandler,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        if req.uri().path().starts_with(&self.engine.config.req_path) {
            dispatch_req(req, self.engine.clone())
        } else {
            ResponseFuture::new(self.inner.call(req))
        }
    }
}

/// Hyper v1 [`Service`](hyper::service::Service) implementation so the
/// service can be served directly by a hyper connection builder.
impl<ReqBody, ResBody, S, H> hyper::service::Service<Request<ReqBody>> for EngineIoService<H, S>
where
    ReqBody: Body + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: fmt::Debug,
    ResBody: Body + Send + 'static,
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone,
    H: EngineIoHandler,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn call(&self, req: Request<ReqBody>) -> Self::Future {
        if req.uri().path().starts_with(&self.engine.config.req_path) {
            dispatch_req(req, self.engine.clone())
        } else {
            let mut inner = self.inner.clone();
            ResponseFuture::new(inner.call(req))
        }
    }
}

/// Route one engine.io request to the owning transport, per the session
/// lookup and the upgrade header.
fn dispatch_req<F, H, ReqBody, ResBody>(
    req: Request<ReqBody>,
    engine: Arc<EngineIo<H>>,
) -> ResponseFuture<F, ResBody>
where
    ReqBody: Body + Send + 'static,
    ReqBody::Data: Send,
    ReqBody::Error: fmt::Debug,
    ResBody: Send + 'static,
    H: EngineIoHandler,
{
    let info = RequestInfo::parse(&req);

    let Some(raw_sid) = info.sid else {
        return match info.method {
            Method::GET => ResponseFuture::ready(polling::open_req(&engine, info.jsonp)),
            _ => {
                debug!("bad handshake method: {}", info.method);
                ResponseFuture::empty_response(400)
            }
        };
    };
    let Ok(sid) = Sid::from_str(&raw_sid) else {
        debug!("unparseable sid: {raw_sid}");
        return ResponseFuture::ready(Err(Error::UnknownSession));
    };
    let Some(session) = engine.get_session(sid) else {
        debug!("[sid={sid}] unknown session");
        return ResponseFuture::ready(Err(Error::UnknownSession));
    };

    if info.ws_upgrade {
        return match session {
            Session::Polling(transport) if info.method == Method::GET => {
                ResponseFuture::ready(ws::upgrade_req(engine, transport, req))
            }
            _ => ResponseFuture::ready(Err(Error::TransportMismatch)),
        };
    }

    match (session, info.method) {
        (Session::Polling(transport), Method::GET) => {
            ResponseFuture::async_response(Box::pin(polling::poll_req(transport)))
        }
        (Session::Polling(transport), Method::POST) => {
            let max_payload = engine.config.max_payload;
            ResponseFuture::async_response(Box::pin(polling::post_req(
                transport,
                req,
                max_payload,
            )))
        }
        (Session::Websocket(_), _) => ResponseFuture::ready(Err(Error::TransportMismatch)),
        _ => ResponseFuture::empty_response(400),
    }
}

/// A MakeService that always returns a clone of the [`EngineIoService`] it
/// was created with.
pub struct MakeEngineIoService<H: EngineIoHandler, S> {
    svc: EngineIoService<H, S>,
}

impl<H: EngineIoHandler, S> MakeEngineIoService<H, S> {
    pub fn new(svc: EngineIoService<H, S>) -> Self {
        MakeEngineIoService { svc }
    }
}

impl<H: EngineIoHandler, S: Clone, T> Service<T> for MakeEngineIoService<H, S> {
    type Response = EngineIoService<H, S>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: T) -> Self::Future {
        future::ready(Ok(self.svc.clone()))
    }
}

/// A [`Service`] that always returns a 404 response and that is compatible
/// with [`EngineIoService`].
#[derive(Debug, Clone)]
pub struct NotFoundService;

impl<ReqBody> Service<Request<ReqBody>> for NotFoundService {
    type Response = Response<ResponseBody<Empty<Bytes>>>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _: Request<ReqBody>) -> Self::Future {
        future::ready(Ok(Response::builder()
            .status(404)
            .body(ResponseBody::empty_response())
            .unwrap()))
    }
}

/// What the router needs from a request: the session id and jsonp index from
/// the query string, the method, and whether the client asks for a websocket
/// upgrade. The `transport` query parameter is informational only.
#[derive(Debug)]
struct RequestInfo {
    sid: Option<String>,
    jsonp: Option<u32>,
    method: Method,
    ws_upgrade: bool,
}

impl RequestInfo {
    fn parse<B>(req: &Request<B>) -> Self {
        let query = req.uri().query().unwrap_or("");
        let sid = query_param(query, "sid").map(ToOwned::to_owned);
        let jsonp = query_param(query, "j").and_then(|j| j.parse().ok());

        let ws_upgrade = req
            .headers()
            .get(http::header::UPGRADE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);

        RequestInfo {
            sid,
            jsonp,
            method: req.method().clone(),
            ws_upgrade,
        }
    }
}

fn query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix(key).and_then(|rest| rest.strip_prefix('=')))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_request(path: &str) -> Request<()> {
        Request::get(path).body(()).unwrap()
    }

    #[test]
    fn request_info_handshake() {
        let req = build_request("http://localhost:3000/engine.io/?transport=polling");
        let info = RequestInfo::parse(&req);
        assert_eq!(info.sid, None);
        assert_eq!(info.jsonp, None);
        assert_eq!(info.method, Method::GET);
        assert!(!info.ws_upgrade);
    }

    #[test]
    fn request_info_with_sid() {
        let sid = crate::sid::Sid::new();
        let req = build_request(&format!(
            "http://localhost:3000/engine.io/?transport=polling&sid={sid}"
        ));
        let info = RequestInfo::parse(&req);
        assert_eq!(info.sid, Some(sid.to_string()));
    }

    #[test]
    fn request_info_jsonp() {
        let req = build_request("http://localhost:3000/engine.io/?transport=polling&j=4");
        let info = RequestInfo::parse(&req);
        assert_eq!(info.jsonp, Some(4));
    }

    #[test]
    fn request_info_upgrade_header() {
        let req = Request::get("http://localhost:3000/engine.io/?transport=websocket&sid=x")
            .header(http::header::UPGRADE, "websocket")
            .body(())
            .unwrap();
        let info = RequestInfo::parse(&req);
        assert!(info.ws_upgrade);
    }

    #[test]
    fn request_info_ignores_prefix_collisions() {
        let req = build_request("http://localhost:3000/engine.io/?sidecar=1&j=2");
        let info = RequestInfo::parse(&req);
        assert_eq!(info.sid, None);
        assert_eq!(info.jsonp, Some(2));
    }
}

//! End to end tests for the polling transport: handshake, echo, idle-poll
//! keepalive, heartbeat exhaustion and error surfaces.

use std::time::Duration;

use http::{Method, StatusCode};
use tokio::time::timeout;


use fixture::{create_polling_connection, create_server, send_req, Event};

#[tokio::test]
async fn handshake() {
    let mut events = create_server(4801).await;

    let (status, body) = send_req(4801, "transport=polling".to_string(), Method::GET, None).await;
    assert_eq!(status, StatusCode::OK);

    // body is `<len>:0<json>` where <len> counts the frame bytes
    let open = fixture::parse_open_packet(&body);
    assert_eq!(open.sid.len(), 40);
    assert!(open
        .sid
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')));
    assert_eq!(open.upgrades, vec!["websocket".to_string()]);
    assert_eq!(open.ping_interval, 300);
    assert_eq!(open.ping_timeout, 2000);

    let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
    assert_eq!(event, Some(Event::Connect));
}

#[tokio::test]
async fn polling_echo() {
    let _events = create_server(4802).await;
    let open = create_polling_connection(4802).await;
    let sid = open.sid;

    // park a poll before writing so the flush goes straight to it
    let poll = tokio::spawn(send_req(
        4802,
        format!("transport=polling&sid={sid}"),
        Method::GET,
        None,
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, body) = send_req(
        4802,
        format!("transport=polling&sid={sid}"),
        Method::POST,
        Some("6:4hello".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let (status, body) = timeout(Duration::from_secs(2), poll).await.unwrap().unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "6:4hello");
}

#[tokio::test]
async fn idle_poll_answers_with_pong() {
    let _events = create_server(4803).await;
    let open = create_polling_connection(4803).await;

    let (status, body) = timeout(
        Duration::from_secs(2),
        send_req(
            4803,
            format!("transport=polling&sid={}", open.sid),
            Method::GET,
            None,
        ),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "1:3");
}

#[tokio::test]
async fn heartbeat_exhaustion_closes_the_session() {
    let mut events = create_server(4804).await;
    let open = create_polling_connection(4804).await;
    let sid = open.sid;

    let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
    assert_eq!(event, Some(Event::Connect));

    // seed the outbound queue through the echo handler, then never poll
    let (status, _) = send_req(
        4804,
        format!("transport=polling&sid={sid}"),
        Method::POST,
        Some("6:4hello".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let event = timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("timeout waiting for the close event");
    assert_eq!(event, Some(Event::Close));

    // the close callback fired exactly once
    assert!(timeout(Duration::from_secs(1), events.recv()).await.is_err());

    // and the session is gone
    let (status, body) = send_req(
        4804,
        format!("transport=polling&sid={sid}"),
        Method::GET,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "unknown session id");
}

#[tokio::test]
async fn unknown_sid_is_rejected() {
    let _events = create_server(4805).await;
    create_polling_connection(4805).await;

    let bogus = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef";
    let (status, body) = send_req(
        4805,
        format!("transport=polling&sid={bogus}"),
        Method::POST,
        Some("6:4hello".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "unknown session id");

    let (status, body) = send_req(
        4805,
        "transport=polling&sid=nonsense".to_string(),
        Method::GET,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "unknown session id");
}

#[tokio::test]
async fn malformed_payload_is_rejected_without_teardown() {
    let _events = create_server(4806).await;
    let open = create_polling_connection(4806).await;
    let sid = open.sid;

    let (status, _) = send_req(
        4806,
        format!("transport=polling&sid={sid}"),
        Method::POST,
        Some("8:4aaa".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    // the session survived the decode error
    let (status, body) = send_req(
        4806,
        format!("transport=polling&sid={sid}"),
        Method::POST,
        Some("6:4hello".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn jsonp_roundtrip() {
    let _events = create_server(4808).await;

    let (status, body) = send_req(
        4808,
        "transport=polling&j=0".to_string(),
        Method::GET,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // the open frame is wrapped in a jsonp callback invocation
    let inner = body
        .strip_prefix("___eio[0](\"")
        .and_then(|rest| rest.strip_suffix("\");"))
        .expect("jsonp wrapper");
    let unescaped = inner.replace("\\\"", "\"").replace("\\\\", "\\");
    let open = fixture::parse_open_packet(&unescaped);
    let sid = open.sid;

    // park a poll, then write through a form-encoded post body
    let poll = tokio::spawn(send_req(
        4808,
        format!("transport=polling&sid={sid}&j=0"),
        Method::GET,
        None,
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, body) = send_req(
        4808,
        format!("transport=polling&sid={sid}&j=0"),
        Method::POST,
        Some("d=6%3A4hello".to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let (status, body) = timeout(Duration::from_secs(2), poll).await.unwrap().unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "___eio[0](\"6:4hello\");");
}

#[tokio::test]
async fn handshake_requires_get() {
    let _events = create_server(4807).await;
    let (status, _) = send_req(4807, "transport=polling".to_string(), Method::POST, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

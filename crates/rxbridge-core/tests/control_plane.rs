//! Control-plane client against a mock control service.

mod support;

use rxbridge_core::control::{ControlMsg, ControlReply, ReplyMsg};
use rxbridge_core::control::message::KvGetRes;
use rxbridge_core::protocol::{Meta, Status};
use rxbridge_core::{
    BridgeError, ControlPlaneClient, Fields, InvocationContext, InvocationMeta, LogLevel, Native,
    SessionState, Value,
};
use std::time::Duration;
use support::MockControl;

const WAIT: Duration = Duration::from_secs(3);

async fn connected(mock: &MockControl) -> ControlPlaneClient {
    let client = ControlPlaneClient::start(&mock.config());
    assert!(
        client.wait_for_state(SessionState::Streaming, WAIT).await,
        "client never connected"
    );
    client
}

fn answer_kv_get_with_key(request: &rxbridge_core::control::ControlRequest) -> Option<ControlReply> {
    match &request.msg {
        ControlMsg::KvGet(get) => Some(ControlReply::kv_value(
            request.correlation.clone(),
            Value::S(get.key.clone()),
        )),
        _ => Some(ControlReply::ack(request.correlation.clone())),
    }
}

#[tokio::test]
async fn test_kv_get_returns_value() {
    let mock = MockControl::start().await;
    mock.set_responder(|request| match &request.msg {
        ControlMsg::KvGet(get) if get.bucket == "users" && get.key == "42" => Some(
            ControlReply::kv_value(request.correlation.clone(), Value::I64(42)),
        ),
        _ => None,
    });
    let client = connected(&mock).await;

    let value = client.kv_get("users", "42").await.unwrap();
    assert_eq!(value, Native::Int(42));
    assert_eq!(client.pending_count(), 0);

    client.stop().await;
}

#[tokio::test]
async fn test_kv_get_missing_value_is_null() {
    let mock = MockControl::start().await;
    mock.set_responder(|request| {
        Some(ControlReply {
            correlation: request.correlation.clone(),
            msg: ReplyMsg::KvGetRes(KvGetRes {
                status: Status::ok(),
                value: None,
            }),
        })
    });
    let client = connected(&mock).await;

    assert_eq!(client.kv_get("b", "k").await.unwrap(), Native::Null);
    client.stop().await;
}

#[tokio::test]
async fn test_remote_failure_surfaces_code_and_message() {
    let mock = MockControl::start().await;
    mock.set_responder(|request| match &request.msg {
        ControlMsg::KvGet(_) => Some(ControlReply {
            correlation: request.correlation.clone(),
            msg: ReplyMsg::KvGetRes(KvGetRes {
                status: Status::failed(5, "no such bucket"),
                value: None,
            }),
        }),
        _ => Some(ControlReply::common(
            request.correlation.clone(),
            Status::failed(9, ""),
        )),
    });
    let client = connected(&mock).await;

    match client.kv_get("nope", "k").await {
        Err(BridgeError::Remote { code, message }) => {
            assert_eq!(code, 5);
            assert_eq!(message, "no such bucket");
        }
        other => panic!("Expected remote error, got: {:?}", other),
    }
    match client.kv_del("nope", "k").await {
        Err(BridgeError::Remote { code, message }) => {
            assert_eq!(code, 9);
            assert_eq!(message, "kv_del failed");
        }
        other => panic!("Expected remote error, got: {:?}", other),
    }

    client.stop().await;
}

#[tokio::test]
async fn test_wrong_reply_kind_is_unexpected() {
    let mock = MockControl::start().await;
    mock.set_responder(|request| Some(ControlReply::ack(request.correlation.clone())));
    let client = connected(&mock).await;

    let result = client.kv_get("b", "k").await;
    assert!(matches!(
        result,
        Err(BridgeError::UnexpectedReply {
            expected: "kv_get_res",
            actual: "kv_common_res"
        })
    ));
    client.stop().await;
}

#[tokio::test]
async fn test_kv_put_timeout_sends_once() {
    let mock = MockControl::start().await;
    let config = mock.config().with_request_timeout(Duration::from_millis(200));
    let client = ControlPlaneClient::start(&config);
    assert!(client.wait_for_state(SessionState::Streaming, WAIT).await);

    let result = client
        .kv_put("cache", "k", &Native::from("v"), Some(Duration::from_secs(30)))
        .await;
    assert!(matches!(result, Err(BridgeError::Timeout(_))));
    assert_eq!(client.pending_count(), 0);

    let request = mock.next_request(WAIT).await.expect("kv_put should be sent");
    match &request.msg {
        ControlMsg::KvPut(put) => {
            assert_eq!(put.bucket, "cache");
            assert_eq!(put.value, Value::S("v".into()));
            assert_eq!(put.ttl_sec, 30);
        }
        other => panic!("Expected kv_put, got: {:?}", other),
    }
    assert!(mock.next_request(Duration::from_millis(300)).await.is_none());

    // A reply arriving after the deadline is dropped as unmatched.
    assert!(mock.reply(ControlReply::ack(request.correlation)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.state(), SessionState::Streaming);

    client.stop().await;
}

#[tokio::test]
async fn test_unmatched_reply_is_dropped() {
    let mock = MockControl::start().await;
    let client = connected(&mock).await;

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.kv_get("b", "k").await })
    };
    let request = mock.next_request(WAIT).await.unwrap();

    assert!(mock.reply(ControlReply::ack("nobody-is-waiting")).await);
    assert!(
        mock.reply(ControlReply::kv_value(request.correlation, Value::S("v".into())))
            .await
    );

    assert_eq!(call.await.unwrap().unwrap(), Native::from("v"));
    client.stop().await;
}

#[tokio::test]
async fn test_concurrent_calls_resolve_by_correlation() {
    let mock = MockControl::start().await;
    let client = connected(&mock).await;

    let calls: Vec<_> = (0..5)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let key = format!("k{}", i);
                (key.clone(), client.kv_get("b", &key).await)
            })
        })
        .collect();

    let mut requests = Vec::new();
    for _ in 0..5 {
        requests.push(mock.next_request(WAIT).await.expect("request"));
    }
    assert_eq!(client.pending_count(), 5);

    // Answer in reverse arrival order; each answer echoes the request key.
    for request in requests.into_iter().rev() {
        let reply = answer_kv_get_with_key(&request).unwrap();
        assert!(mock.reply(reply).await);
    }

    for call in calls {
        let (key, result) = call.await.unwrap();
        assert_eq!(result.unwrap(), Native::Text(key));
    }
    assert_eq!(client.pending_count(), 0);

    client.stop().await;
}

#[tokio::test]
async fn test_stream_failure_fails_pending_then_reconnects() {
    let mock = MockControl::start().await;
    let client = connected(&mock).await;

    let calls: Vec<_> = (0..3)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.kv_get("b", &format!("k{}", i)).await })
        })
        .collect();
    for _ in 0..3 {
        mock.next_request(WAIT).await.expect("request");
    }

    mock.drop_connection().await;

    for call in calls {
        let result = tokio::time::timeout(WAIT, call)
            .await
            .expect("pending call should fail promptly")
            .unwrap();
        assert!(
            matches!(result, Err(BridgeError::Transport { .. })),
            "got {:?}",
            result
        );
    }
    assert_eq!(client.pending_count(), 0);

    assert!(mock.wait_for_connections(2, WAIT).await, "client never reconnected");
    assert!(client.wait_for_state(SessionState::Streaming, WAIT).await);

    mock.set_responder(answer_kv_get_with_key);
    assert_eq!(client.kv_get("b", "again").await.unwrap(), Native::from("again"));

    client.stop().await;
}

#[tokio::test]
async fn test_logs_keep_order_and_emit_carries_meta() {
    let mock = MockControl::start().await;
    mock.set_responder(|request| match &request.msg {
        ControlMsg::Log(_) => None,
        _ => Some(ControlReply::ack(request.correlation.clone())),
    });
    let client = connected(&mock).await;

    let meta = Meta {
        trace_id: "trace-1".into(),
        ..Meta::default()
    };
    for i in 0..3 {
        let mut fields = Fields::new();
        fields.insert("seq".into(), Native::from(i as i64));
        client.log(LogLevel::Info, &format!("line {}", i), &fields, Some(&meta));
    }
    let mut data = Fields::new();
    data.insert("score".into(), Native::from(0.5));
    client.emit("sentiment.scored", &data, Some(&meta)).await.unwrap();

    for i in 0..3 {
        let request = mock.next_request(WAIT).await.unwrap();
        match request.msg {
            ControlMsg::Log(log) => {
                assert_eq!(log.msg, format!("line {}", i));
                assert_eq!(log.level, LogLevel::Info);
                assert_eq!(log.fields.get("seq"), Some(&Value::I64(i)));
            }
            other => panic!("Expected log, got: {:?}", other),
        }
    }
    let emit = mock.next_request(WAIT).await.unwrap();
    assert_eq!(emit.meta.as_ref().map(|m| m.trace_id.as_str()), Some("trace-1"));
    match emit.msg {
        ControlMsg::Emit(emit) => {
            assert_eq!(emit.topic, "sentiment.scored");
            assert_eq!(emit.data.get("score"), Some(&Value::F64(0.5)));
        }
        other => panic!("Expected emit, got: {:?}", other),
    }

    client.stop().await;
}

#[tokio::test]
async fn test_context_log_adds_run_id() {
    let mock = MockControl::start().await;
    let client = connected(&mock).await;
    let ctx = InvocationContext::new(client.clone(), InvocationMeta::with_run_id("run-1"));

    ctx.info("started", Fields::new());
    let mut explicit = Fields::new();
    explicit.insert("runId".into(), Native::from("override"));
    ctx.warn("explicit", explicit);

    let first = mock.next_request(WAIT).await.unwrap();
    match first.msg {
        ControlMsg::Log(log) => {
            assert_eq!(log.fields.get("runId"), Some(&Value::S("run-1".into())))
        }
        other => panic!("Expected log, got: {:?}", other),
    }
    assert_eq!(
        first.meta.unwrap().baggage.get("run_id").map(String::as_str),
        Some("run-1")
    );

    let second = mock.next_request(WAIT).await.unwrap();
    match second.msg {
        ControlMsg::Log(log) => {
            assert_eq!(log.level, LogLevel::Warn);
            assert_eq!(log.fields.get("runId"), Some(&Value::S("override".into())))
        }
        other => panic!("Expected log, got: {:?}", other),
    }

    client.stop().await;
}

#[tokio::test]
async fn test_stop_fails_in_flight_and_later_calls() {
    let mock = MockControl::start().await;
    let client = connected(&mock).await;

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.kv_get("b", "k").await })
    };
    mock.next_request(WAIT).await.unwrap();

    client.stop().await;
    client.stop().await;
    assert_eq!(client.state(), SessionState::Stopped);

    assert!(matches!(
        call.await.unwrap(),
        Err(BridgeError::Transport { .. })
    ));
    assert!(matches!(
        client.kv_put("b", "k", &Native::Null, None).await,
        Err(BridgeError::Transport { .. })
    ));

    // Logging after stop is silently dropped.
    client.log(LogLevel::Info, "late", &Fields::new(), None);
    assert!(mock.next_request(Duration::from_millis(200)).await.is_none());
}

#[tokio::test]
async fn test_unreachable_service_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = rxbridge_core::BridgeConfig::default()
        .with_control_target(addr.to_string())
        .with_request_timeout(Duration::from_millis(200))
        .with_reconnect_delay(Duration::from_millis(50));
    let client = ControlPlaneClient::start(&config);

    let result = client.kv_get("b", "k").await;
    assert!(matches!(result, Err(BridgeError::Timeout(_))), "got {:?}", result);
    assert_eq!(client.pending_count(), 0);
    assert_ne!(client.state(), SessionState::Streaming);

    client.stop().await;
    assert_eq!(client.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_queued_requests_flush_on_reconnect_except_expired() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = rxbridge_core::BridgeConfig::default()
        .with_control_target(addr.to_string())
        .with_request_timeout(Duration::from_secs(1))
        .with_reconnect_delay(Duration::from_millis(50))
        .with_connect_timeout(Duration::from_millis(500));
    let client = ControlPlaneClient::start(&config);

    // Gives up while nothing is listening.
    let stale = client.kv_get("b", "stale").await;
    assert!(matches!(stale, Err(BridgeError::Timeout(_))), "got {:?}", stale);

    let live = {
        let client = client.clone();
        tokio::spawn(async move { client.kv_get("b", "live").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mock = MockControl::start_on(addr).await;
    mock.set_responder(answer_kv_get_with_key);

    let result = tokio::time::timeout(WAIT, live).await.unwrap().unwrap();
    assert_eq!(result.unwrap(), Native::from("live"));

    let mut seen = Vec::new();
    while let Some(request) = mock.next_request(Duration::from_millis(300)).await {
        match request.msg {
            ControlMsg::KvGet(get) => seen.push(get.key),
            other => panic!("Expected kv_get, got: {:?}", other),
        }
    }
    assert_eq!(seen, vec!["live".to_string()]);
    assert_eq!(client.pending_count(), 0);

    client.stop().await;
}

#[tokio::test]
async fn test_malformed_reply_fails_its_waiter() {
    let mock = MockControl::start().await;
    let client = connected(&mock).await;

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.kv_get("b", "k").await })
    };
    let request = mock.next_request(WAIT).await.expect("kv_get should be sent");
    let sent_at = std::time::Instant::now();
    assert!(
        mock.reply_raw(serde_json::json!({
            "correlation": request.correlation,
            "msg": {"kv_frobnicate_res": {}}
        }))
        .await
    );

    let result = tokio::time::timeout(WAIT, call).await.unwrap().unwrap();
    assert!(
        matches!(result, Err(BridgeError::UnexpectedReply { .. })),
        "got {:?}",
        result
    );
    assert!(sent_at.elapsed() < Duration::from_secs(1));
    assert_eq!(client.pending_count(), 0);
    assert_eq!(client.state(), SessionState::Streaming);

    client.stop().await;
}

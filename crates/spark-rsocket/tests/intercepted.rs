//! 拦截包装端到端行为：获取、使用、释放三阶段在各交互类型上的表现。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use parking_lot::Mutex;
use spark_rsocket::{
    AfterChain, Attributes, BeforeChain, Exchange, InteractionKind, Interceptor,
    InterceptorPipeline, PeerInfo, Payload, RSocket, RSocketError, keys,
    test_stubs::{HookLog, RecordingInterceptor, StubRSocket},
};

fn pipeline(log: &HookLog, names: &[&str]) -> InterceptorPipeline {
    names
        .iter()
        .fold(InterceptorPipeline::builder(), |builder, name| {
            builder.register(RecordingInterceptor::new(*name, log.clone()))
        })
        .build()
}

async fn wait_for_events(log: &HookLog, expected: usize) {
    for _ in 0..200 {
        if log.len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("等待钩子超时，当前记录：{:?}", log.sequence());
}

#[tokio::test(flavor = "multi_thread")]
async fn request_response_success_runs_before_forward_and_after_reversed() {
    let log = HookLog::default();
    let stub = Arc::new(StubRSocket::new());
    let rsocket = pipeline(&log, &["X", "Y"]).wrap(stub.clone());

    let response = rsocket
        .request_response(Payload::from_data("ping"))
        .await
        .expect("回显调用应成功");

    assert_eq!(response.data().as_ref(), b"ping");
    assert_eq!(log.sequence(), ["before:X", "before:Y", "after:Y", "after:X"]);
    assert_eq!(stub.calls(), [InteractionKind::RequestResponse]);

    let events = log.events();
    assert!(events[0].has_message, "Before 阶段应携带请求消息");
    assert!(!events[2].has_message, "完成态 Exchange 不携带消息");
    assert!(events.iter().all(|event| event.failure.is_none()));
}

#[tokio::test(flavor = "multi_thread")]
async fn before_failure_skips_delegate_and_reaches_release_hooks() {
    let log = HookLog::default();
    let denied = RSocketError::interceptor("auth", "missing credentials");
    let pipeline = InterceptorPipeline::builder()
        .register(RecordingInterceptor::new("outer", log.clone()))
        .register(RecordingInterceptor::new("auth", log.clone()).failing_before(denied.clone()))
        .build();
    let stub = Arc::new(StubRSocket::new());
    let rsocket = pipeline.wrap(stub.clone());

    let err = rsocket
        .fire_and_forget(Payload::from_data("event"))
        .await
        .expect_err("Before 失败必须传播给调用方");

    assert_eq!(err, denied);
    assert!(stub.calls().is_empty(), "Before 失败后底层操作不得执行");
    assert_eq!(
        log.sequence(),
        [
            "before:outer",
            "before:auth",
            "after:auth",
            "after:outer",
            "unexpected:auth",
            "unexpected:outer"
        ]
    );
    assert!(
        log.events()[2..]
            .iter()
            .all(|event| event.failure.as_ref() == Some(&denied))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn delegate_failure_is_carried_into_after_and_unexpected() {
    let log = HookLog::default();
    let failure = RSocketError::Application {
        detail: "order not found".to_owned(),
    };
    let stub = Arc::new(StubRSocket::new().failing(failure.clone()));
    let rsocket = pipeline(&log, &["X", "Y"]).wrap(stub);

    let err = rsocket
        .request_response(Payload::from_data("order-42"))
        .await
        .expect_err("底层失败应传播");

    assert_eq!(err, failure);
    assert_eq!(log.stage("after"), ["Y", "X"]);
    assert_eq!(log.stage("unexpected"), ["Y", "X"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_runs_after_then_unexpected_with_cancelled() {
    let log = HookLog::default();
    let stub = Arc::new(StubRSocket::new().pending());
    let rsocket = pipeline(&log, &["X"]).wrap(stub.clone());

    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        rsocket.request_response(Payload::from_data("slow")),
    )
    .await;
    assert!(timed_out.is_err(), "挂起的调用应被超时取消");

    wait_for_events(&log, 3).await;
    let events = log.events();
    assert_eq!(log.sequence(), ["before:X", "after:X", "unexpected:X"]);
    assert!(events[1].failure.is_none(), "取消时 After 视为无失败的完成");
    assert_eq!(events[2].failure, Some(RSocketError::Cancelled));
}

#[tokio::test(flavor = "multi_thread")]
async fn after_hook_error_is_not_masked() {
    let log = HookLog::default();
    let broken = RSocketError::interceptor("audit", "sink unavailable");
    let pipeline = InterceptorPipeline::builder()
        .register(RecordingInterceptor::new("audit", log.clone()).failing_after(broken.clone()))
        .build();
    let rsocket = pipeline.wrap(Arc::new(StubRSocket::new()));

    let err = rsocket
        .metadata_push(Payload::from_data("meta"))
        .await
        .expect_err("After 钩子错误必须传播给调用方");
    assert_eq!(err, broken);
}

#[tokio::test(flavor = "multi_thread")]
async fn request_stream_releases_once_after_completion() {
    let log = HookLog::default();
    let stub = Arc::new(StubRSocket::new().with_stream_len(3));
    let rsocket = pipeline(&log, &["X", "Y"]).wrap(stub.clone());

    let items: Vec<_> = rsocket
        .request_stream(Payload::from_data("tick"))
        .collect()
        .await;

    assert_eq!(items.len(), 3);
    assert!(items.iter().all(Result::is_ok));
    assert_eq!(log.sequence(), ["before:X", "before:Y", "after:Y", "after:X"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unsubscribed_stream_has_no_side_effects() {
    let log = HookLog::default();
    let stub = Arc::new(StubRSocket::new());
    let rsocket = pipeline(&log, &["X"]).wrap(stub.clone());

    drop(rsocket.request_stream(Payload::from_data("never")));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(log.is_empty());
    assert!(stub.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_a_stream_mid_flight_is_a_cancellation() {
    let log = HookLog::default();
    let rsocket = pipeline(&log, &["X"]).wrap(Arc::new(StubRSocket::new().with_stream_len(5)));

    let mut responses = rsocket.request_stream(Payload::from_data("tick"));
    responses
        .next()
        .await
        .expect("流应至少产出一条")
        .expect("回显成功");
    drop(responses);

    wait_for_events(&log, 3).await;
    assert_eq!(log.sequence(), ["before:X", "after:X", "unexpected:X"]);
    assert_eq!(log.events()[2].failure, Some(RSocketError::Cancelled));
}

#[tokio::test(flavor = "multi_thread")]
async fn request_channel_runs_before_once_on_first_upstream_payload() {
    let log = HookLog::default();
    let stub = Arc::new(StubRSocket::new());
    let rsocket = pipeline(&log, &["X"]).wrap(stub.clone());

    let upstream = stream::iter(["a", "b", "c"].map(Payload::from_data)).boxed();
    let echoed: Vec<_> = rsocket
        .request_channel(upstream)
        .map(|item| item.expect("回显成功").data().clone())
        .collect()
        .await;

    assert_eq!(echoed, ["a", "b", "c"]);
    assert_eq!(log.sequence(), ["before:X", "after:X"]);
    assert_eq!(stub.calls(), [InteractionKind::RequestChannel]);
}

#[tokio::test(flavor = "multi_thread")]
async fn request_channel_without_upstream_payload_is_invalid() {
    let log = HookLog::default();
    let stub = Arc::new(StubRSocket::new());
    let rsocket = pipeline(&log, &["X"]).wrap(stub.clone());

    let items: Vec<_> = rsocket.request_channel(stream::empty().boxed()).collect().await;

    assert_eq!(items.len(), 1);
    assert!(items[0].as_ref().is_err_and(RSocketError::is_invalid_argument));
    assert!(log.is_empty());
    assert!(stub.calls().is_empty());
}

/// 在 Before 写入属性并在 After 读取，验证同一交互内的属性共享与交互后的清理。
struct StopwatchInterceptor {
    seen_in_after: Arc<Mutex<Vec<Option<u64>>>>,
    bags: Arc<Mutex<Vec<Attributes>>>,
}

#[async_trait]
impl Interceptor for StopwatchInterceptor {
    async fn intercept_before(
        &self,
        exchange: &Exchange,
        chain: &BeforeChain,
    ) -> Result<(), RSocketError> {
        exchange.attributes().insert("test.started", 7_u64);
        self.bags.lock().push(exchange.attributes().clone());
        chain.next(exchange).await
    }

    async fn intercept_after(
        &self,
        exchange: &Exchange,
        chain: &AfterChain,
    ) -> Result<(), RSocketError> {
        let started = exchange.attributes().get::<u64>("test.started").map(|v| *v);
        self.seen_in_after.lock().push(started);
        chain.next(exchange).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn attributes_flow_from_before_to_after_and_are_discarded() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let bags = Arc::new(Mutex::new(Vec::new()));
    let pipeline = InterceptorPipeline::builder()
        .register(StopwatchInterceptor {
            seen_in_after: seen.clone(),
            bags: bags.clone(),
        })
        .build();
    let rsocket = pipeline.wrap(Arc::new(
        StubRSocket::new().with_peer(PeerInfo::new("10.0.0.9", 7878)),
    ));

    rsocket
        .request_response(Payload::from_data("first"))
        .await
        .expect("first call");
    rsocket
        .request_response(Payload::from_data("second"))
        .await
        .expect("second call");

    assert_eq!(*seen.lock(), [Some(7), Some(7)]);
    let bags = bags.lock();
    assert_eq!(bags.len(), 2);
    assert!(bags.iter().all(Attributes::is_empty), "交互结束后属性袋必须清空");
}

struct PeerProbe {
    peers: Arc<Mutex<Vec<Option<PeerInfo>>>>,
    routes: Arc<Mutex<Vec<Option<String>>>>,
}

#[async_trait]
impl Interceptor for PeerProbe {
    async fn intercept_before(
        &self,
        exchange: &Exchange,
        chain: &BeforeChain,
    ) -> Result<(), RSocketError> {
        self.peers
            .lock()
            .push(exchange.peer().map(|peer| (*peer).clone()));
        self.routes
            .lock()
            .push(exchange.route().map(|route| (*route).clone()));
        chain.next(exchange).await
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn peer_info_and_route_are_acquired_before_hooks_run() {
    let peers = Arc::new(Mutex::new(Vec::new()));
    let routes = Arc::new(Mutex::new(Vec::new()));
    let pipeline = InterceptorPipeline::builder()
        .register(PeerProbe {
            peers: peers.clone(),
            routes: routes.clone(),
        })
        .route_extractor(|_kind: InteractionKind, payload: &Payload| {
            payload
                .metadata()
                .map(|metadata| String::from_utf8_lossy(metadata).into_owned())
        })
        .build();
    let stub = Arc::new(StubRSocket::new().with_peer(PeerInfo::new("10.0.0.9", 7878)));
    let rsocket = pipeline.wrap(stub.clone());

    for _ in 0..3 {
        rsocket
            .request_response(Payload::new("body", Some("orders.find".into())))
            .await
            .expect("call succeeds");
    }

    assert_eq!(stub.peer_resolutions(), 1, "对端信息每个连接只解析一次");
    assert!(
        peers
            .lock()
            .iter()
            .all(|peer| peer.as_ref() == Some(&PeerInfo::new("10.0.0.9", 7878)))
    );
    assert!(
        routes
            .lock()
            .iter()
            .all(|route| route.as_deref() == Some("orders.find"))
    );
    assert_eq!(keys::ROUTE, "spark.rsocket.route");
}

#[tokio::test(flavor = "multi_thread")]
async fn dispose_evicts_peer_cache_and_disposes_delegate() {
    let pipeline = InterceptorPipeline::builder().build();
    let stub = Arc::new(StubRSocket::new().with_peer(PeerInfo::new("10.0.0.1", 1)));
    let rsocket = pipeline.wrap(stub.clone());

    rsocket
        .fire_and_forget(Payload::from_data("hi"))
        .await
        .expect("fire and forget");
    assert_eq!(pipeline.peers().len(), 1);

    rsocket.dispose();
    assert!(rsocket.is_disposed());
    assert!(pipeline.peers().is_empty());
    assert_eq!(stub.dispose_calls(), 1);
}

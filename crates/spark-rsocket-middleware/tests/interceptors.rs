//! 日志与指标拦截器装配到管线后的端到端行为。

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use spark_rsocket::{
    InteractionKind, InterceptorPipeline, MimeType, Payload, RSocket, RSocketError,
    test_stubs::StubRSocket,
};
use spark_rsocket_middleware::{
    LoggingInterceptor, LoggingInterceptorConfig, MetricsInterceptor, MetricsInterceptorConfig,
};
use tracing::Level;
use tracing_test::traced_test;

fn metrics_pipeline(metrics: &MetricsInterceptor) -> InterceptorPipeline {
    InterceptorPipeline::builder()
        .register(metrics.clone())
        .build()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("条件未在超时前满足");
}

#[tokio::test(flavor = "multi_thread")]
async fn metrics_count_successful_exchanges_per_kind() {
    let metrics = MetricsInterceptor::default();
    let rsocket = metrics_pipeline(&metrics).wrap(Arc::new(StubRSocket::new()));

    rsocket
        .request_response(Payload::from_data("ping"))
        .await
        .expect("回显");
    rsocket
        .fire_and_forget(Payload::from_data("fire"))
        .await
        .expect("单向");
    let items: Vec<_> = rsocket
        .request_stream(Payload::from_data("stream"))
        .collect()
        .await;
    assert_eq!(items.len(), 3);

    let snapshot = metrics.snapshot();
    for kind in [
        InteractionKind::RequestResponse,
        InteractionKind::FireAndForget,
        InteractionKind::RequestStream,
    ] {
        let counts = snapshot.kind(kind);
        assert_eq!(counts.started, 1, "{kind}");
        assert_eq!(counts.succeeded, 1, "{kind}");
        assert_eq!(counts.in_flight(), 0, "{kind}");
    }
    assert_eq!(snapshot.kind(InteractionKind::MetadataPush).started, 0);
    assert_eq!(snapshot.total_started(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn metrics_count_failures() {
    let metrics = MetricsInterceptor::default();
    let failure = RSocketError::Application {
        detail: "boom".to_owned(),
    };
    let rsocket = metrics_pipeline(&metrics).wrap(Arc::new(StubRSocket::new().failing(failure.clone())));

    let err = rsocket
        .request_response(Payload::from_data("ping"))
        .await
        .expect_err("底层失败");

    assert_eq!(err, failure);
    let counts = metrics.snapshot().kind(InteractionKind::RequestResponse);
    assert_eq!(counts.started, 1);
    assert_eq!(counts.failed, 1);
    assert_eq!(counts.succeeded, 0);
    assert_eq!(counts.cancelled, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn metrics_count_cancellations_separately_from_success() {
    let metrics = MetricsInterceptor::default();
    let rsocket = metrics_pipeline(&metrics).wrap(Arc::new(StubRSocket::new().pending()));

    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        rsocket.request_response(Payload::from_data("slow")),
    )
    .await;
    assert!(timed_out.is_err(), "挂起的调用应超时");

    wait_until(|| {
        metrics
            .snapshot()
            .kind(InteractionKind::RequestResponse)
            .cancelled
            == 1
    })
    .await;
    let counts = metrics.snapshot().kind(InteractionKind::RequestResponse);
    assert_eq!(counts.started, 1);
    assert_eq!(counts.succeeded, 0);
    assert_eq!(counts.failed, 0);
}

#[tokio::test]
async fn setup_is_not_counted() {
    let metrics = MetricsInterceptor::default();
    let pipeline = metrics_pipeline(&metrics);

    pipeline
        .intercept_setup(
            Payload::from_data("setup"),
            MimeType::APPLICATION_JSON,
            MimeType::COMPOSITE_METADATA,
        )
        .await
        .expect("SETUP 放行");

    assert_eq!(metrics.snapshot().total_started(), 0);
}

#[tokio::test]
#[traced_test]
async fn logging_records_start_and_completion() {
    let pipeline = InterceptorPipeline::builder()
        .register(LoggingInterceptor::default())
        .route_extractor(|_kind: InteractionKind, _payload: &Payload| Some("users.find".to_owned()))
        .build();
    let rsocket = pipeline.wrap(Arc::new(StubRSocket::new()));

    rsocket
        .request_response(Payload::from_data("ping"))
        .await
        .expect("回显");

    assert!(logs_contain("rsocket exchange started"));
    assert!(logs_contain("users.find"));
    assert!(logs_contain("data_bytes=4"));
    assert!(logs_contain("rsocket exchange completed"));
    assert!(!logs_contain("rsocket exchange failed"));
}

#[tokio::test]
#[traced_test]
async fn logging_reports_failures_with_error_code() {
    let pipeline = InterceptorPipeline::builder()
        .register(LoggingInterceptor::default())
        .build();
    let rsocket = pipeline.wrap(Arc::new(StubRSocket::new().failing(RSocketError::transport(
        "request_response",
        "connection reset",
    ))));

    rsocket
        .request_response(Payload::from_data("ping"))
        .await
        .expect_err("底层失败");

    assert!(logs_contain("rsocket exchange failed"));
    assert!(logs_contain("rsocket.transport"));
}

#[tokio::test]
#[traced_test]
async fn logging_uses_the_configured_level_and_skips_setup() {
    let config = LoggingInterceptorConfig {
        level: Level::DEBUG,
        log_payload_sizes: false,
        ..LoggingInterceptorConfig::default()
    };
    let pipeline = InterceptorPipeline::builder()
        .register(LoggingInterceptor::new(config))
        .build();

    pipeline
        .intercept_setup(
            Payload::from_data("setup"),
            MimeType::APPLICATION_JSON,
            MimeType::COMPOSITE_METADATA,
        )
        .await
        .expect("SETUP 放行");
    assert!(!logs_contain("rsocket exchange started"));

    pipeline
        .wrap(Arc::new(StubRSocket::new()))
        .metadata_push(Payload::from_data("meta"))
        .await
        .expect("元数据推送");

    logs_assert(|lines: &[&str]| {
        match lines
            .iter()
            .find(|line| line.contains("rsocket exchange started"))
        {
            Some(line) if line.contains("DEBUG") && !line.contains("data_bytes") => Ok(()),
            Some(line) => Err(format!("级别或字段不符：{line}")),
            None => Err("缺少开始日志".to_owned()),
        }
    });
}

#[test]
fn interceptors_expose_descriptors_in_pipeline_order() {
    let metrics = MetricsInterceptor::new(MetricsInterceptorConfig {
        order: -200,
        ..MetricsInterceptorConfig::default()
    });
    let pipeline = InterceptorPipeline::builder()
        .register(LoggingInterceptor::default())
        .register(metrics)
        .build();

    let names: Vec<String> = pipeline
        .descriptors()
        .iter()
        .map(|descriptor| descriptor.name().to_owned())
        .collect();
    assert_eq!(names, ["spark.rsocket.metrics", "spark.rsocket.logging"]);
}

//! Slack channel tests against a mock Slack Web API.

use notify::{ChannelError, NotifyChannel, NotifyEvent, SlackChannel};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn violation() -> NotifyEvent {
    NotifyEvent::ResourcePolicyViolation {
        kind: "Deployment".to_string(),
        name: "web".to_string(),
        namespace: "prod".to_string(),
        containers: vec!["app".to_string()],
        timestamp: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn posts_message_text_to_configured_channel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat.postMessage"))
        .and(header("authorization", "Bearer xoxb-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let channel = SlackChannel::new("xoxb-test", "C0ALERTS").with_api_url(server.uri());
    channel.send(&violation()).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    assert_eq!(body["channel"], "C0ALERTS");
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("Deployment *web*"));
    assert!(text.contains("namespace *prod*"));
    assert!(text.contains("(1). *Container Name*: app"));
}

#[tokio::test]
async fn api_level_failure_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat.postMessage"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "ok": false, "error": "channel_not_found" })),
        )
        .mount(&server)
        .await;

    let channel = SlackChannel::new("xoxb-test", "C0MISSING").with_api_url(server.uri());
    let err = channel.send(&violation()).await.unwrap_err();

    match err {
        ChannelError::Api { service, message } => {
            assert_eq!(service, "slack");
            assert_eq!(message, "channel_not_found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn rate_limit_reports_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat.postMessage"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let channel = SlackChannel::new("xoxb-test", "C0ALERTS").with_api_url(server.uri());
    let err = channel.send(&violation()).await.unwrap_err();

    assert!(matches!(
        err,
        ChannelError::RateLimited {
            retry_after_secs: 7
        }
    ));
}

#[tokio::test]
async fn server_error_is_reported_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat.postMessage"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let channel = SlackChannel::new("xoxb-test", "C0ALERTS").with_api_url(server.uri());
    let err = channel.send(&violation()).await.unwrap_err();

    assert!(err.to_string().contains("503"));
}

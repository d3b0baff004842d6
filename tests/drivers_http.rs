//! HTTP drivers against a mock server.

use std::time::Duration;

use ai_chat_rust::{
    BackendConfig, BackendKind, ChatClient, DeliveryUnit, Error, FunctionDefinition,
    StandardErrorCode, TransportConfig,
};
use futures::StreamExt;
use mockito::{Matcher, Server};
use serde_json::json;

fn messages_client(url: &str) -> ChatClient {
    let transport = TransportConfig::new(url)
        .with_api_key("test-key")
        .with_auth("x-api-key", None);
    let mut config = BackendConfig::new(BackendKind::Messages, transport);
    config.models = vec!["claude-a".into(), "claude-b".into()];
    config.inference = config.inference.clone().with_model("claude-a");
    ChatClient::from_config(&config).unwrap()
}

fn gateway_client(url: &str) -> ChatClient {
    let transport = TransportConfig::new(url).with_api_key("gw-token");
    ChatClient::from_config(&BackendConfig::new(BackendKind::Gateway, transport)).unwrap()
}

fn sse(events: &[serde_json::Value]) -> String {
    events
        .iter()
        .map(|e| {
            format!(
                "event: {}\ndata: {}\n\n",
                e["type"].as_str().unwrap_or("message"),
                e
            )
        })
        .collect()
}

#[tokio::test]
async fn test_messages_sync_turn() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/messages")
        .match_header("x-api-key", "test-key")
        .match_header("anthropic-version", "2023-06-01")
        .match_body(Matcher::PartialJson(json!({
            "model": "claude-a",
            "system": "You are terse.",
            "stream": false,
            "messages": [{"role": "user", "content": [{"type": "text", "text": "hi"}]}],
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "content": [{"type": "text", "text": "hello"}],
                "usage": {"input_tokens": 9, "output_tokens": 3}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = messages_client(&server.url());
    let mut chat = client.start_chat("You are terse.");
    let reply = chat.send("hi").await.unwrap();

    mock.assert_async().await;
    assert_eq!(reply.text(), "hello");
    let usage = reply.usage.unwrap();
    assert_eq!(usage.total_tokens, 12);
    assert_eq!(usage.backend, "messages");
    assert_eq!(usage.model, "claude-a");
    assert_eq!(chat.history().len(), 2);
}

#[tokio::test]
async fn test_messages_sends_tools() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/messages")
        .match_body(Matcher::PartialJson(json!({
            "tools": [{"name": "kubectl", "description": "run kubectl"}],
            "tool_choice": {"type": "auto"},
        })))
        .with_status(200)
        .with_body(
            json!({
                "content": [{
                    "type": "tool_use", "id": "toolu_1", "name": "kubectl",
                    "input": {"command": "get pods"}
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let mut chat = messages_client(&server.url()).start_chat("");
    chat.set_functions(vec![FunctionDefinition::new("kubectl", "run kubectl")])
        .unwrap();
    let reply = chat.send("pods?").await.unwrap();

    mock.assert_async().await;
    let calls = reply.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "toolu_1");
    assert_eq!(calls[0].arguments["command"], "get pods");
}

#[tokio::test]
async fn test_messages_rate_limit_is_overloaded() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/messages")
        .with_status(429)
        .with_header("retry-after", "2")
        .with_body(
            json!({"type": "error", "error": {"type": "rate_limit_error", "message": "slow down"}})
                .to_string(),
        )
        .create_async()
        .await;

    let mut chat = messages_client(&server.url()).start_chat("");
    let err = chat.send("hi").await.unwrap_err();

    assert!(matches!(err, Error::Overloaded { .. }));
    assert!(err.is_retryable());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    assert_eq!(err.standard_code(), Some(StandardErrorCode::RateLimited));
    let ctx = err.context().unwrap();
    assert_eq!(ctx.status_code, Some(429));
    assert_eq!(ctx.backend.as_deref(), Some("messages"));
    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn test_messages_bad_request_is_rejected() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/messages")
        .with_status(400)
        .with_body(
            json!({"error": {"type": "invalid_request_error", "message": "roles must alternate"}})
                .to_string(),
        )
        .create_async()
        .await;

    let mut chat = messages_client(&server.url()).start_chat("");
    let err = chat.send("hi").await.unwrap_err();
    assert!(matches!(err, Error::Rejected { .. }));
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("roles must alternate"));
}

#[tokio::test]
async fn test_messages_server_error_is_transport() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/messages")
        .with_status(500)
        .with_body("upstream exploded")
        .create_async()
        .await;

    let mut chat = messages_client(&server.url()).start_chat("");
    let err = chat.send("hi").await.unwrap_err();
    assert!(matches!(err, Error::Transport { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_messages_streaming_turn() {
    let mut server = Server::new_async().await;
    let body = sse(&[
        json!({"type": "message_start", "message": {"usage": {"input_tokens": 12, "output_tokens": 1}}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "ping"}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Let me "}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "check"}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "kubectl", "input": {}}}),
        json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"command\":"}}),
        json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"get pods\"}"}}),
        json!({"type": "content_block_stop", "index": 1}),
        json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 20}}),
        json!({"type": "message_stop"}),
    ]);
    server
        .mock("POST", "/messages")
        .match_header("accept", "text/event-stream")
        .match_body(Matcher::PartialJson(json!({"stream": true})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let mut chat = messages_client(&server.url()).start_chat("");
    let units: Vec<DeliveryUnit> = chat
        .send_streaming("pods?")
        .await
        .unwrap()
        .map(|u| u.unwrap())
        .collect()
        .await;

    assert_eq!(units.len(), 4);
    assert_eq!(units[0], DeliveryUnit::TextDelta("Let me ".into()));
    assert_eq!(units[1], DeliveryUnit::TextDelta("check".into()));
    match &units[2] {
        DeliveryUnit::CompletedToolCall(call) => {
            assert_eq!(call.id, "toolu_1");
            assert_eq!(call.arguments["command"], "get pods");
        }
        other => panic!("expected tool call, got {:?}", other),
    }
    match &units[3] {
        DeliveryUnit::UsageReport(u) => assert_eq!(u.total_tokens, 32),
        other => panic!("expected usage, got {:?}", other),
    }

    let assistant = &chat.history()[1];
    assert_eq!(assistant.text(), "Let me check");
    assert_eq!(assistant.tool_calls().count(), 1);
}

#[tokio::test]
async fn test_messages_stream_error_event() {
    let mut server = Server::new_async().await;
    let body = sse(&[
        json!({"type": "message_start", "message": {}}),
        json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
    ]);
    server
        .mock("POST", "/messages")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let mut chat = messages_client(&server.url()).start_chat("");
    let units: Vec<_> = chat.send_streaming("hi").await.unwrap().collect().await;

    assert_eq!(units.len(), 1);
    let err = units[0].as_ref().unwrap_err();
    assert!(matches!(err, Error::Overloaded { .. }));
    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn test_messages_truncated_stream_commits_nothing() {
    let mut server = Server::new_async().await;
    let body = sse(&[
        json!({"type": "message_start", "message": {"usage": {"input_tokens": 5, "output_tokens": 1}}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "The answer is"}}),
    ]);
    server
        .mock("POST", "/messages")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let mut chat = messages_client(&server.url()).start_chat("");
    let items: Vec<_> = chat.send_streaming("question").await.unwrap().collect().await;

    assert_eq!(items.len(), 2);
    assert_eq!(
        items[0].as_ref().unwrap(),
        &DeliveryUnit::TextDelta("The answer is".into())
    );
    assert!(matches!(items[1], Err(Error::Transport { .. })));
    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn test_gateway_sync_turn() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/chat")
        .match_query(Matcher::UrlEncoded("model".into(), "claude-sonnet-4".into()))
        .match_header("authorization", "Bearer gw-token")
        .match_body(Matcher::Json(json!({
            "messages": [
                {"role": "system", "content": "be kind"},
                {"role": "user", "content": "hi"}
            ]
        })))
        .with_status(200)
        .with_body(
            json!({"message": "hello!", "metadata": {"usage": {"inputTokens": 4, "outputTokens": 2}}})
                .to_string(),
        )
        .create_async()
        .await;

    let mut chat = gateway_client(&server.url()).start_chat("be kind");
    let reply = chat.send("hi").await.unwrap();

    mock.assert_async().await;
    assert_eq!(reply.text(), "hello!");
    assert_eq!(reply.usage.unwrap().total_tokens, 6);
}

#[tokio::test]
async fn test_gateway_streaming_lines() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat")
        .match_query(Matcher::Any)
        .match_header("accept", "text/plain")
        .with_status(200)
        .with_header("content-type", "text/plain")
        .with_body("first line\nsecond line\n")
        .create_async()
        .await;

    let mut chat = gateway_client(&server.url()).start_chat("");
    let response = chat
        .send_streaming("hi")
        .await
        .unwrap()
        .collect_response()
        .await
        .unwrap();

    assert_eq!(response.text(), "first line\nsecond line");
    assert!(response.usage.is_none());
    assert_eq!(chat.history()[1].text(), "first line\nsecond line");
}

#[tokio::test]
async fn test_gateway_unavailable_is_overloaded() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/chat")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body(json!({"message": "ServiceUnavailable"}).to_string())
        .create_async()
        .await;

    let mut chat = gateway_client(&server.url()).start_chat("");
    let err = chat.send("hi").await.unwrap_err();
    assert!(matches!(err, Error::Overloaded { .. }));
    assert!(chat.is_retryable(&err));
}

#[tokio::test]
async fn test_config_from_yaml() {
    let yaml = r#"
kind: gateway
transport:
  base_url: "http://127.0.0.1:9/api"
  api_key: token
models: [claude-sonnet-4, claude-haiku]
streaming: false
retry:
  max_attempts: 2
"#;
    let config = BackendConfig::from_yaml_str(yaml).unwrap();
    let client = ChatClient::from_config(&config).unwrap();
    assert_eq!(client.list_models(), vec!["claude-sonnet-4", "claude-haiku"]);
    assert!(!client.backend().supports_streaming());

    let mut chat = client.start_chat("");
    assert!(matches!(
        chat.send_streaming("hi").await,
        Err(Error::Capability { .. })
    ));
}

//! End-to-end session behavior against scripted backends.

mod common;

use std::sync::{Arc, Mutex};

use ai_chat_rust::types::{MessageSource, RawEvent, StoredKind};
use ai_chat_rust::{
    ChatClient, Content, ContentBlock, DeliveryUnit, Error, FunctionDefinition, Message,
    MessageRole, StoredMessage, ToolCall, ToolResult,
};
use common::{streaming_backend, sync_backend, transport_error, ScriptedBackend, StreamScript};
use futures::StreamExt;
use serde_json::{json, Map};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_send_commits_user_and_assistant() {
    let stub = ScriptedBackend::new();
    stub.reply_text("4");
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("");

    let reply = chat.send("What is 2+2?").await.unwrap();

    assert_eq!(reply.text(), "4");
    let history = chat.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0], Message::user("What is 2+2?"));
    assert_eq!(history[1], Message::assistant("4"));
}

#[tokio::test]
async fn test_failed_send_rolls_back() {
    let stub = ScriptedBackend::new();
    stub.fail(transport_error());
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("");

    let err = chat.send("bad").await.unwrap_err();

    assert!(matches!(err, Error::Transport { .. }));
    assert!(chat.is_retryable(&err));
    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn test_rollback_keeps_earlier_turns() {
    let stub = ScriptedBackend::new();
    stub.reply_text("first answer");
    stub.fail(transport_error());
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("");

    chat.send("one").await.unwrap();
    let before = chat.history().to_vec();
    assert!(chat.send("two").await.is_err());
    assert_eq!(chat.history(), before.as_slice());
}

#[tokio::test]
async fn test_streaming_text_turn() {
    let stub = ScriptedBackend::new();
    stub.stream(vec![
        RawEvent::open_text(0),
        RawEvent::text(0, "Hel"),
        RawEvent::text(0, "lo"),
        RawEvent::close(0),
        RawEvent::complete(Some(json!({"input_tokens": 5, "output_tokens": 2}))),
    ]);
    let mut chat = ChatClient::new(streaming_backend(&stub)).start_chat("");

    let mut stream = chat.send_streaming("Hi").await.unwrap();
    let mut units = Vec::new();
    while let Some(unit) = stream.next().await {
        units.push(unit.unwrap());
    }
    drop(stream);

    assert_eq!(units.len(), 3);
    assert_eq!(units[0], DeliveryUnit::TextDelta("Hel".into()));
    assert_eq!(units[1], DeliveryUnit::TextDelta("lo".into()));
    match &units[2] {
        DeliveryUnit::UsageReport(u) => {
            assert_eq!((u.input_tokens, u.output_tokens, u.total_tokens), (5, 2, 7));
        }
        other => panic!("expected usage, got {:?}", other),
    }

    let history = chat.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1], Message::assistant("Hello"));
}

#[tokio::test]
async fn test_streaming_tool_call_turn() {
    let stub = ScriptedBackend::new();
    stub.stream(vec![
        RawEvent::open_tool_call(0, "t1", "kubectl"),
        RawEvent::arguments(0, r#"{"comman"#),
        RawEvent::arguments(0, r#"d":"get pods"}"#),
        RawEvent::close(0),
        RawEvent::complete(None),
    ]);
    let mut chat = ChatClient::new(streaming_backend(&stub)).start_chat("");

    let units: Vec<_> = chat
        .send_streaming("list pods")
        .await
        .unwrap()
        .collect()
        .await;

    let mut args = Map::new();
    args.insert("command".into(), json!("get pods"));
    let expected = ToolCall::new("t1", "kubectl", args);
    assert_eq!(units.len(), 1);
    assert_eq!(
        units[0].as_ref().unwrap(),
        &DeliveryUnit::CompletedToolCall(expected.clone())
    );

    let assistant = &chat.history()[1];
    assert_eq!(assistant.role, MessageRole::Assistant);
    assert_eq!(assistant.content, vec![ContentBlock::ToolCall(expected)]);
}

#[tokio::test]
async fn test_mixed_content_is_rejected_before_invocation() {
    let stub = ScriptedBackend::new();
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("");

    let err = chat
        .send(vec![
            Content::from("plain"),
            Content::from(ToolResult::new("t1", json!("ok"))),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Usage { .. }));
    assert!(!chat.is_retryable(&err));
    assert_eq!(stub.calls(), 0);
    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn test_orphan_tool_call_is_not_committed() {
    let stub = ScriptedBackend::new();
    stub.stream(vec![
        RawEvent::open_text(1),
        RawEvent::text(1, "checking"),
        RawEvent::close(1),
        RawEvent::open_tool_call(0, "t9", "kubectl"),
        RawEvent::arguments(0, "{}"),
        RawEvent::complete(None),
    ]);
    let mut chat = ChatClient::new(streaming_backend(&stub)).start_chat("");

    let response = chat
        .send_streaming("go")
        .await
        .unwrap()
        .collect_response()
        .await
        .unwrap();

    assert!(response.tool_calls().is_empty());
    assert_eq!(chat.history()[1].content, vec![ContentBlock::text("checking")]);
}

#[tokio::test]
async fn test_tool_result_round_trip() {
    let stub = ScriptedBackend::new();
    let call = ToolCall::new("t1", "kubectl", Map::new());
    stub.reply(
        Message::with_blocks(MessageRole::Assistant, vec![ContentBlock::ToolCall(call.clone())]),
        None,
    );
    stub.reply_text("3 pods running");
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("You are an SRE.");

    let first = chat.send("how many pods?").await.unwrap();
    let requested = first.tool_calls()[0].clone();
    let second = chat
        .send(ToolResult::for_call(&requested, json!({"pods": 3})))
        .await
        .unwrap();
    assert_eq!(second.text(), "3 pods running");

    let roles: Vec<_> = chat.history().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::User,
            MessageRole::Assistant
        ]
    );
    let seen = stub.seen();
    assert_eq!(seen[1].system_prompt.as_deref(), Some("You are an SRE."));
    assert_eq!(seen[1].history.len(), 3);
}

#[tokio::test]
async fn test_unknown_call_id_is_usage_error() {
    let stub = ScriptedBackend::new();
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("");

    let err = chat
        .send(ToolResult::new("missing", json!(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Usage { .. }));

    let err = chat.send(ToolResult::new("", json!(1))).await.unwrap_err();
    assert!(matches!(err, Error::Usage { .. }));
    assert_eq!(stub.calls(), 0);
}

#[tokio::test]
async fn test_empty_content_is_usage_error() {
    let stub = ScriptedBackend::new();
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("");

    assert!(matches!(
        chat.send(Vec::<Content>::new()).await,
        Err(Error::Usage { .. })
    ));
    assert!(matches!(chat.send("").await, Err(Error::Usage { .. })));
    assert_eq!(stub.calls(), 0);
}

#[tokio::test]
async fn test_text_fragments_are_joined() {
    let stub = ScriptedBackend::new();
    stub.reply_text("ok");
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("");

    chat.send(vec!["get", "pods"]).await.unwrap();
    assert_eq!(chat.history()[0].text(), "get pods");
}

#[tokio::test]
async fn test_empty_fragments_keep_their_separators() {
    let stub = ScriptedBackend::new();
    stub.reply_text("ok");
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("");

    chat.send(vec!["a", "", "b"]).await.unwrap();
    assert_eq!(chat.history()[0].text(), "a  b");

    assert!(matches!(
        chat.send(vec!["", ""]).await,
        Err(Error::Usage { .. })
    ));
    assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn test_streaming_error_commits_nothing() {
    let stub = ScriptedBackend::new();
    stub.stream_script(StreamScript::Events(vec![
        Ok(RawEvent::open_text(0)),
        Ok(RawEvent::text(0, "partial")),
        Err(transport_error()),
    ]));
    let mut chat = ChatClient::new(streaming_backend(&stub)).start_chat("");

    let mut stream = chat.send_streaming("hi").await.unwrap();
    assert_eq!(
        stream.next().await.unwrap().unwrap(),
        DeliveryUnit::TextDelta("partial".into())
    );
    assert!(stream.next().await.unwrap().is_err());
    assert!(stream.next().await.is_none());
    drop(stream);

    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn test_abandoned_stream_commits_nothing() {
    let stub = ScriptedBackend::new();
    stub.stream(vec![
        RawEvent::open_text(0),
        RawEvent::text(0, "a"),
        RawEvent::text(0, "b"),
        RawEvent::close(0),
        RawEvent::complete(None),
    ]);
    let mut chat = ChatClient::new(streaming_backend(&stub)).start_chat("");

    {
        let mut stream = chat.send_streaming("hi").await.unwrap();
        stream.next().await.unwrap().unwrap();
    }
    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn test_stream_setup_failure_leaves_history() {
    let stub = ScriptedBackend::new();
    stub.stream_script(StreamScript::SetupError(transport_error()));
    let mut chat = ChatClient::new(streaming_backend(&stub)).start_chat("");

    assert!(matches!(
        chat.send_streaming("hi").await,
        Err(Error::Transport { .. })
    ));
    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn test_streaming_on_sync_backend_is_capability_error() {
    let stub = ScriptedBackend::new();
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("");

    assert!(matches!(
        chat.send_streaming("hi").await,
        Err(Error::Capability { .. })
    ));
    assert_eq!(stub.calls(), 0);
}

#[tokio::test]
async fn test_cancelled_send_rolls_back() {
    let stub = ScriptedBackend::new();
    stub.reply_text("never seen");
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = chat.send_with_cancel("hi", &cancel).await.unwrap_err();
    assert!(matches!(err, Error::Cancelled { .. }));
    assert!(!chat.is_retryable(&err));
    assert!(chat.history().is_empty());
}

#[tokio::test]
async fn test_usage_callback_fires_for_streaming() {
    let stub = ScriptedBackend::new();
    stub.stream(vec![
        RawEvent::open_text(0),
        RawEvent::text(0, "x"),
        RawEvent::close(0),
        RawEvent::complete(Some(json!({"prompt_tokens": 10, "completion_tokens": 1}))),
    ]);
    let totals = Arc::new(Mutex::new(Vec::new()));
    let sink = totals.clone();
    let backend =
        streaming_backend(&stub).with_usage_callback(move |u| sink.lock().unwrap().push(u.total_tokens));
    let mut chat = ChatClient::new(backend).start_chat("");

    let response = chat
        .send_streaming("hi")
        .await
        .unwrap()
        .collect_response()
        .await
        .unwrap();
    assert_eq!(response.usage.unwrap().backend, "scripted");
    assert_eq!(*totals.lock().unwrap(), vec![11]);
}

#[tokio::test]
async fn test_set_functions_forwards_and_validates() {
    let stub = ScriptedBackend::new();
    stub.reply_text("ok");
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("");

    let dup = vec![
        FunctionDefinition::new("kubectl", "run kubectl"),
        FunctionDefinition::new("kubectl", "again"),
    ];
    assert!(matches!(chat.set_functions(dup), Err(Error::Usage { .. })));
    assert!(chat.functions().is_empty());

    chat.set_functions(vec![FunctionDefinition::new("kubectl", "run kubectl")])
        .unwrap();
    chat.send("hi").await.unwrap();
    assert_eq!(stub.seen()[0].functions, vec!["kubectl"]);

    chat.set_functions(Vec::new()).unwrap();
    assert!(chat.functions().is_empty());
}

#[tokio::test]
async fn test_initialize_from_stored_messages() {
    let stub = ScriptedBackend::new();
    stub.reply_text("welcome back");
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("be brief");

    chat.initialize(&[
        StoredMessage::text(MessageSource::User, "hello"),
        StoredMessage::text(MessageSource::Agent, "hi"),
        StoredMessage {
            source: MessageSource::Model,
            kind: StoredKind::ToolCallRequest,
            payload: json!({"name": "kubectl"}),
        },
    ])
    .unwrap();
    assert_eq!(chat.history().len(), 2);

    chat.send("again").await.unwrap();
    assert_eq!(chat.history().len(), 4);

    let transcript = chat.transcript();
    assert_eq!(transcript[0], Message::system("be brief"));
    assert_eq!(transcript.len(), 5);
}

#[tokio::test]
async fn test_empty_reply_keeps_user_message() {
    let stub = ScriptedBackend::new();
    stub.reply(Message::with_blocks(MessageRole::Assistant, Vec::new()), None);
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("");

    let reply = chat.send("hi").await.unwrap();
    assert!(reply.message.is_empty());
    assert_eq!(chat.history(), &[Message::user("hi")]);
}

#[tokio::test]
async fn test_id_less_tool_calls_are_dropped() {
    let stub = ScriptedBackend::new();
    stub.reply(
        Message::with_blocks(
            MessageRole::Assistant,
            vec![
                ContentBlock::text("running"),
                ContentBlock::ToolCall(ToolCall::new("", "kubectl", Map::new())),
            ],
        ),
        None,
    );
    let mut chat = ChatClient::new(sync_backend(&stub)).start_chat("");

    let reply = chat.send("hi").await.unwrap();
    assert!(reply.tool_calls().is_empty());
    assert_eq!(chat.history()[1], Message::assistant("running"));
}

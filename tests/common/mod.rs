//! Scripted backends shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use ai_chat_rust::drivers::{
    AdapterReply, RawEventStream, StreamingAdapter, SyncAdapter, TurnRequest,
};
use ai_chat_rust::types::RawEvent;
use ai_chat_rust::{Backend, Error, ErrorContext, Message, Result};
use async_trait::async_trait;
use futures::stream;
use serde_json::Value;

/// One scripted streaming call.
pub enum StreamScript {
    SetupError(Error),
    Events(Vec<Result<RawEvent>>),
}

/// What the backend saw on one call.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub model: String,
    pub history: Vec<Message>,
    pub system_prompt: Option<String>,
    pub functions: Vec<String>,
}

/// Backend that replays queued replies and records every request.
#[derive(Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<AdapterReply>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl std::fmt::Debug for ScriptedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedBackend").finish()
    }
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply_text(&self, text: &str) {
        self.reply(Message::assistant(text), None);
    }

    pub fn reply(&self, message: Message, raw_usage: Option<Value>) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Ok(AdapterReply { message, raw_usage }));
    }

    pub fn fail(&self, err: Error) {
        self.replies.lock().unwrap().push_back(Err(err));
    }

    pub fn stream(&self, events: Vec<RawEvent>) {
        self.streams
            .lock()
            .unwrap()
            .push_back(StreamScript::Events(events.into_iter().map(Ok).collect()));
    }

    pub fn stream_script(&self, script: StreamScript) {
        self.streams.lock().unwrap().push_back(script);
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    fn record(&self, request: &TurnRequest<'_>) {
        self.seen.lock().unwrap().push(SeenRequest {
            model: request.model.to_string(),
            history: request.history.to_vec(),
            system_prompt: request.system_prompt.map(str::to_string),
            functions: request.functions.iter().map(|f| f.name.clone()).collect(),
        });
    }
}

#[async_trait]
impl SyncAdapter for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }

    async fn invoke(&self, request: TurnRequest<'_>) -> Result<AdapterReply> {
        self.record(&request);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::usage("no scripted reply left")))
    }
}

#[async_trait]
impl StreamingAdapter for ScriptedBackend {
    async fn open_stream(&self, request: TurnRequest<'_>) -> Result<RawEventStream> {
        self.record(&request);
        let script = self.streams.lock().unwrap().pop_front();
        match script {
            Some(StreamScript::SetupError(e)) => Err(e),
            Some(StreamScript::Events(events)) => Ok(Box::pin(stream::iter(events))),
            None => Err(Error::usage("no scripted stream left")),
        }
    }
}

pub fn sync_backend(stub: &Arc<ScriptedBackend>) -> Backend {
    Backend::sync_only(stub.clone())
}

pub fn streaming_backend(stub: &Arc<ScriptedBackend>) -> Backend {
    Backend::with_streaming(stub.clone(), stub.clone())
}

pub fn transport_error() -> Error {
    Error::transport_with_context("connection reset by peer", ErrorContext::new())
}

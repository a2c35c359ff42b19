//! In-memory backend that answers every document with canned messages.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use judgelet::sandbox::{
    BackendCapabilities, ControllerOptions, CorrelationId, ExecutionController, SandboxBackend,
    SandboxChannel, SandboxDocument, SandboxEvent, SandboxInfo,
};
use judgelet::Result;
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub const HOST: &str = "judgelet://host";

type Responder = Box<dyn Fn(&SandboxDocument) -> Vec<Value> + Send + Sync>;

/// Replies with the message payloads returned by the responder, then exits.
pub struct CannedBackend {
    respond: Responder,
    pub documents: Mutex<Vec<String>>,
}

impl CannedBackend {
    pub fn new(respond: impl Fn(&SandboxDocument) -> Vec<Value> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            documents: Mutex::new(Vec::new()),
        })
    }

    pub fn last_document(&self) -> String {
        self.documents.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl SandboxBackend for CannedBackend {
    fn name(&self) -> &str {
        "canned"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    async fn load(&self, document: &SandboxDocument) -> Result<SandboxChannel> {
        self.documents.lock().unwrap().push(document.source.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (control_tx, _control_rx) = mpsc::unbounded_channel();
        for data in (self.respond)(document) {
            let line = json!({"origin": "null", "targetOrigin": HOST, "data": data}).to_string();
            let _ = events_tx.send(SandboxEvent::Line(line));
        }
        let _ = events_tx.send(SandboxEvent::Exited {
            status: Some(0),
            stderr: String::new(),
        });
        Ok(SandboxChannel {
            events: events_rx,
            control: control_tx,
        })
    }

    async fn unload(&self) -> Result<()> {
        Ok(())
    }

    fn info(&self) -> SandboxInfo {
        SandboxInfo {
            backend_type: "canned".to_string(),
            instance_id: None,
            running: false,
            metadata: HashMap::new(),
        }
    }
}

/// A successful completion payload with `extra` merged in.
pub fn completion(id: CorrelationId, extra: Value) -> Value {
    let mut data = json!({
        "type": "execution-complete",
        "correlationId": id,
        "success": true,
        "cancelled": false,
        "logs": []
    });
    if let (Some(data), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            data.insert(k.clone(), v.clone());
        }
    }
    data
}

pub fn controller(backend: Arc<CannedBackend>) -> ExecutionController {
    ExecutionController::new(backend, ControllerOptions::default())
}

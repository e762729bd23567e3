//! Per-invocation handle given to handlers.
//!
//! An `InvocationContext` is a thin wrapper over the shared control-plane
//! client that stamps every outbound call with the invocation's metadata.
//! It is created by the dispatcher for one call and dropped when the handler
//! returns.

use crate::control::{ControlPlaneClient, LogLevel};
use crate::protocol::Meta;
use crate::value::{Fields, Native};
use crate::Result;
use std::collections::BTreeMap;
use std::time::Duration;

/// Baggage key carrying the orchestrator's run id.
pub const RUN_ID_KEY: &str = "run_id";

/// Field name the run id is logged under.
pub const RUN_ID_FIELD: &str = "runId";

/// Metadata of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationMeta {
    pub trace_id: String,
    pub span_id: String,
    pub tenant: String,
    pub baggage: BTreeMap<String, String>,
    pub run_id: Option<String>,
}

impl InvocationMeta {
    /// Metadata with only a run id set. Mostly useful in tests.
    pub fn with_run_id(run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        let mut baggage = BTreeMap::new();
        baggage.insert(RUN_ID_KEY.to_string(), run_id.clone());
        Self {
            baggage,
            run_id: Some(run_id),
            ..Self::default()
        }
    }

    /// Wire form sent along with log and emit calls.
    pub fn to_wire(&self) -> Meta {
        Meta::from(self.clone())
    }
}

impl From<Meta> for InvocationMeta {
    fn from(meta: Meta) -> Self {
        let run_id = meta
            .baggage
            .get(RUN_ID_KEY)
            .filter(|id| !id.is_empty())
            .cloned();
        Self {
            trace_id: meta.trace_id,
            span_id: meta.span_id,
            tenant: meta.tenant,
            baggage: meta.baggage,
            run_id,
        }
    }
}

impl From<InvocationMeta> for Meta {
    fn from(meta: InvocationMeta) -> Self {
        let mut baggage = meta.baggage;
        if let Some(run_id) = meta.run_id {
            baggage.entry(RUN_ID_KEY.to_string()).or_insert(run_id);
        }
        Self {
            trace_id: meta.trace_id,
            span_id: meta.span_id,
            tenant: meta.tenant,
            baggage,
        }
    }
}

/// Handle a handler uses to log, emit events and reach the key-value store.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    control: ControlPlaneClient,
    meta: InvocationMeta,
    wire_meta: Meta,
}

impl InvocationContext {
    pub fn new(control: ControlPlaneClient, meta: InvocationMeta) -> Self {
        let wire_meta = meta.to_wire();
        Self {
            control,
            meta,
            wire_meta,
        }
    }

    pub fn meta(&self) -> &InvocationMeta {
        &self.meta
    }

    pub fn run_id(&self) -> Option<&str> {
        self.meta.run_id.as_deref()
    }

    /// Forward a log line. Adds `runId` unless the caller already set it.
    pub fn log(&self, level: LogLevel, message: &str, fields: Fields) {
        let mut fields = fields;
        if let Some(run_id) = &self.meta.run_id {
            fields
                .entry(RUN_ID_FIELD.to_string())
                .or_insert_with(|| Native::Text(run_id.clone()));
        }
        self.control
            .log(level, message, &fields, Some(&self.wire_meta));
    }

    pub fn info(&self, message: &str, fields: Fields) {
        self.log(LogLevel::Info, message, fields);
    }

    pub fn warn(&self, message: &str, fields: Fields) {
        self.log(LogLevel::Warn, message, fields);
    }

    pub fn error(&self, message: &str, fields: Fields) {
        self.log(LogLevel::Error, message, fields);
    }

    pub async fn emit(&self, topic: &str, data: &Fields) -> Result<()> {
        self.control.emit(topic, data, Some(&self.wire_meta)).await
    }

    pub async fn kv_get(&self, bucket: &str, key: &str) -> Result<Native> {
        self.control.kv_get(bucket, key).await
    }

    pub async fn kv_put(
        &self,
        bucket: &str,
        key: &str,
        value: impl Into<Native>,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.control.kv_put(bucket, key, &value.into(), ttl).await
    }

    pub async fn kv_del(&self, bucket: &str, key: &str) -> Result<()> {
        self.control.kv_del(bucket, key).await
    }
}

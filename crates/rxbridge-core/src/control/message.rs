//! Control-plane message shapes.
//!
//! Requests flow from the bridge to the control service; replies flow back
//! over the same stream and are paired with their request by `correlation`.

use crate::protocol::{Meta, Status};
use crate::value::{Value, ValueMap};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity attached to a forwarded log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Message sent to the control service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub correlation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    pub msg: ControlMsg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMsg {
    Log(LogReq),
    Emit(EmitReq),
    KvGet(KvGetReq),
    KvPut(KvPutReq),
    KvDel(KvDelReq),
}

impl ControlMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMsg::Log(_) => "log",
            ControlMsg::Emit(_) => "emit",
            ControlMsg::KvGet(_) => "kv_get",
            ControlMsg::KvPut(_) => "kv_put",
            ControlMsg::KvDel(_) => "kv_del",
        }
    }

    /// Log lines are fire-and-forget; everything else is acknowledged.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, ControlMsg::Log(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogReq {
    pub level: LogLevel,
    pub msg: String,
    #[serde(default)]
    pub fields: ValueMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitReq {
    pub topic: String,
    #[serde(default)]
    pub data: ValueMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvGetReq {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvPutReq {
    pub bucket: String,
    pub key: String,
    pub value: Value,
    /// Zero means no expiry.
    #[serde(default)]
    pub ttl_sec: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvDelReq {
    pub bucket: String,
    pub key: String,
}

/// Message received from the control service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReply {
    /// Empty when the service sends an uncorrelated message; those are ignored.
    #[serde(default)]
    pub correlation: String,
    pub msg: ReplyMsg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMsg {
    KvGetRes(KvGetRes),
    KvCommonRes(KvCommonRes),
}

impl ReplyMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            ReplyMsg::KvGetRes(_) => "kv_get_res",
            ReplyMsg::KvCommonRes(_) => "kv_common_res",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KvGetRes {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvCommonRes {
    pub status: Status,
}

impl ControlReply {
    /// Successful `kv_get` reply carrying `value`.
    pub fn kv_value(correlation: impl Into<String>, value: Value) -> Self {
        Self {
            correlation: correlation.into(),
            msg: ReplyMsg::KvGetRes(KvGetRes {
                status: Status::ok(),
                value: Some(value),
            }),
        }
    }

    /// Successful acknowledgement for emit, put and delete.
    pub fn ack(correlation: impl Into<String>) -> Self {
        Self::common(correlation, Status::ok())
    }

    pub fn common(correlation: impl Into<String>, status: Status) -> Self {
        Self {
            correlation: correlation.into(),
            msg: ReplyMsg::KvCommonRes(KvCommonRes { status }),
        }
    }
}

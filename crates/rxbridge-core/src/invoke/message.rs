//! Invoke endpoint request and response bodies.

use crate::protocol::{Meta, Status};
use crate::value::ValueMap;
use serde::{Deserialize, Serialize};

/// One call into a registered handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    #[serde(default)]
    pub correlation: String,
    pub handler_name: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub input: ValueMap,
    #[serde(default)]
    pub meta: Meta,
}

/// Outcome of one call. `output` is empty whenever `status` is not ok.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub correlation: String,
    pub status: Status,
    #[serde(default)]
    pub output: ValueMap,
}

impl InvokeResponse {
    pub fn success(correlation: impl Into<String>, output: ValueMap) -> Self {
        Self {
            correlation: correlation.into(),
            status: Status::ok(),
            output,
        }
    }

    pub fn failure(correlation: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            correlation: correlation.into(),
            status: Status::failed(code, message),
            output: ValueMap::new(),
        }
    }
}

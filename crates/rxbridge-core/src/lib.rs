//! rxbridge core - host business-logic handlers as peers of an orchestrator.
//!
//! Inbound, the bridge exposes an invoke endpoint that runs named handlers
//! and returns their output as typed values. Outbound, every handler gets an
//! [`InvocationContext`] whose log, emit and key-value calls are multiplexed
//! over one long-lived stream to the orchestrator's control service.
//!
//! # Example
//!
//! ```rust,ignore
//! use rxbridge_core::{serve, BridgeConfig, Fields, HandlerRegistry, Native};
//!
//! #[tokio::main]
//! async fn main() -> rxbridge_core::Result<()> {
//!     let registry = HandlerRegistry::new().register_async("greet", |call| async move {
//!         call.ctx.info("greeting", Fields::new());
//!         let mut out = Fields::new();
//!         out.insert("reply".into(), Native::from("hello"));
//!         Ok(out)
//!     });
//!
//!     let app = serve(BridgeConfig::from_env()?, registry).await?;
//!     app.wait().await
//! }
//! ```

pub mod app;
pub mod cancel;
pub mod config;
pub mod context;
pub mod control;
pub mod correlation;
pub mod error;
pub mod invoke;
pub mod protocol;
pub mod value;

// Re-export commonly used types
pub use app::{serve, BridgeApp};
pub use cancel::{CancellationToken, CancelledError};
pub use config::{BridgeConfig, ControlConfig, EnvConfig, InvokeConfig};
pub use context::{InvocationContext, InvocationMeta};
pub use control::{ControlPlaneClient, LogLevel, SessionState};
pub use correlation::CorrelationId;
pub use error::{BridgeError, Result};
pub use invoke::{
    Completion, Dispatcher, Handler, HandlerCall, HandlerRegistry, InvokeRequest, InvokeResponse,
    InvokeServer, InvokeServerHandle,
};
pub use protocol::{Meta, Status};
pub use value::{decode, encode, encode_serializable, Fields, Native, Value, ValueMap};

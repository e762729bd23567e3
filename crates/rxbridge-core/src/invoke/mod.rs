//! Inbound side of the bridge: handlers, dispatch and the HTTP endpoint.

pub mod dispatcher;
pub mod handler;
pub mod message;
pub mod server;

pub use dispatcher::Dispatcher;
pub use handler::{AsyncHandler, Completion, Handler, HandlerCall, HandlerRegistry, SyncHandler};
pub use message::{InvokeRequest, InvokeResponse};
pub use server::{InvokeServer, InvokeServerHandle};

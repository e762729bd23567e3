//! Invocation dispatcher.
//!
//! Turns one `InvokeRequest` into one `InvokeResponse`: resolve the handler,
//! decode its input, run it on its own task under a worker permit, and
//! encode whatever it produced. Handler errors and panics become non-zero
//! statuses; they never take the dispatcher down.

use super::handler::{completion, panic_message, HandlerCall, HandlerRegistry};
use super::message::{InvokeRequest, InvokeResponse};
use crate::config::InvokeConfig;
use crate::context::{InvocationContext, InvocationMeta};
use crate::control::ControlPlaneClient;
use crate::value::{decode_fields, encode_fields};
use crate::BridgeError;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    control: ControlPlaneClient,
    workers: Arc<Semaphore>,
    worker_count: usize,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("workers", &self.worker_count)
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher running at most `workers` handlers at once.
    pub fn new(registry: HandlerRegistry, control: ControlPlaneClient, workers: usize) -> Self {
        let worker_count = workers.max(1);
        Self {
            registry: Arc::new(registry),
            control,
            workers: Arc::new(Semaphore::new(worker_count)),
            worker_count,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn control(&self) -> &ControlPlaneClient {
        &self.control
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Workers not currently running a handler.
    pub fn idle_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Run one invocation to completion.
    pub async fn dispatch(&self, request: InvokeRequest) -> InvokeResponse {
        let InvokeRequest {
            correlation,
            handler_name,
            method,
            input,
            meta,
        } = request;

        let Some(handler) = self.registry.get(&handler_name) else {
            let err = BridgeError::HandlerNotFound(handler_name);
            warn!(correlation = %correlation, "{}", err);
            return InvokeResponse::failure(correlation, err.status_code(), err.to_string());
        };

        let meta = InvocationMeta::from(meta);
        let call = HandlerCall {
            method,
            input: decode_fields(&input),
            ctx: InvocationContext::new(self.control.clone(), meta.clone()),
            meta,
        };

        let permit = match self.workers.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return InvokeResponse::failure(
                    correlation,
                    InvokeConfig::HANDLER_FAULT_CODE,
                    "worker pool closed",
                );
            }
        };

        debug!(correlation = %correlation, handler = %handler_name, "dispatching invocation");

        let task = tokio::spawn(async move {
            let _permit = permit;
            completion(handler, call).await
        });

        match task.await {
            Ok(Ok(output)) => InvokeResponse::success(correlation, encode_fields(&output)),
            Ok(Err(err)) => {
                let message = format!("{:#}", err);
                let code = match err.downcast_ref::<BridgeError>() {
                    Some(bridge_err) => {
                        if bridge_err.is_transient() {
                            warn!(correlation = %correlation, "handler failed: {}", message);
                        } else {
                            error!(correlation = %correlation, "handler failed: {}", message);
                        }
                        bridge_err.status_code()
                    }
                    None => {
                        error!(correlation = %correlation, "handler failed: {}", message);
                        InvokeConfig::HANDLER_FAULT_CODE
                    }
                };
                InvokeResponse::failure(correlation, code, message)
            }
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "handler task cancelled".to_string()
                };
                error!(correlation = %correlation, "handler panicked: {}", message);
                InvokeResponse::failure(correlation, InvokeConfig::HANDLER_FAULT_CODE, message)
            }
        }
    }
}

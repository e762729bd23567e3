//! Wiring of a complete bridge instance.

use crate::config::BridgeConfig;
use crate::control::ControlPlaneClient;
use crate::invoke::{Dispatcher, HandlerRegistry, InvokeServer, InvokeServerHandle};
use crate::{BridgeError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// A running bridge: the invoke endpoint plus its control-plane client.
#[derive(Debug)]
pub struct BridgeApp {
    control: ControlPlaneClient,
    server: InvokeServerHandle,
}

/// Start serving `registry` according to `config`.
///
/// The control client starts connecting in the background; invocations are
/// accepted as soon as this returns.
pub async fn serve(config: BridgeConfig, registry: HandlerRegistry) -> Result<BridgeApp> {
    if registry.is_empty() {
        return Err(BridgeError::Config {
            message: "at least one handler is required".to_string(),
        });
    }
    let config = config.validated()?;

    let control = ControlPlaneClient::start(&config);
    let names = registry.names().join(", ");
    let dispatcher = Arc::new(Dispatcher::new(registry, control.clone(), config.workers));

    let server = match InvokeServer::start(config.bind, dispatcher).await {
        Ok(server) => server,
        Err(e) => {
            control.stop().await;
            return Err(e);
        }
    };

    info!(
        workers = config.workers,
        "Bridge serving [{}] on {}", names, server.addr()
    );
    Ok(BridgeApp { control, server })
}

impl BridgeApp {
    /// Address of the invoke endpoint.
    pub fn addr(&self) -> SocketAddr {
        self.server.addr()
    }

    pub fn control(&self) -> &ControlPlaneClient {
        &self.control
    }

    /// Resolve once the invoke endpoint has stopped.
    pub async fn wait(&self) -> Result<()> {
        self.server.wait().await
    }

    /// Stop the control client, then drain and stop the endpoint.
    pub async fn stop(&self) -> Result<()> {
        self.control.stop().await;
        self.server.shutdown();
        self.server.wait().await
    }
}

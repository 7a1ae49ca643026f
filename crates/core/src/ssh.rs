// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Portvault Contributors

// russh-backed forwarding engine
//
// One handle owns one SSH session plus the local accept loop that feeds
// direct-tcpip channels. Host keys are logged and accepted; known-hosts
// policy belongs to the operator's SSH setup, not the session vault.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh::Disconnect;
use russh_keys::key::PublicKey;
use tokio::io::copy_bidirectional;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::forward::{ForwardHandle, Forwarder};
use crate::net::format_host_port;
use crate::tunnel::TunnelSpec;

struct AcceptingClient;

#[async_trait]
impl client::Handler for AcceptingClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        debug!("Accepting server host key: {}", key.fingerprint());
        Ok(true)
    }
}

/// Production [`Forwarder`] on the russh client stack.
#[derive(Default)]
pub struct RusshForwarder;

impl RusshForwarder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Forwarder for RusshForwarder {
    async fn open(&self, spec: &TunnelSpec) -> Result<Box<dyn ForwardHandle>> {
        let config = Arc::new(client::Config::default());

        let mut session = client::connect(
            config,
            (spec.server_ip.as_str(), spec.server_port),
            AcceptingClient,
        )
        .await
        .map_err(|e| connection_error(spec, format!("SSH connect failed: {e}")))?;

        let authenticated = session
            .authenticate_password(spec.user.clone(), spec.password.clone())
            .await
            .map_err(|e| connection_error(spec, format!("authentication error: {e}")))?;
        if !authenticated {
            return Err(connection_error(spec, "server rejected password".to_string()));
        }

        let listener = TcpListener::bind((spec.local_ip.as_str(), spec.local_port))
            .await
            .map_err(|e| {
                connection_error(
                    spec,
                    format!(
                        "cannot bind {}: {e}",
                        format_host_port(&spec.local_ip, spec.local_port)
                    ),
                )
            })?;

        let session = Arc::new(session);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            session.clone(),
            spec.host_ip.clone(),
            spec.host_port,
            spec.name.clone(),
        ));

        debug!("Forwarding engine up for '{}'", spec.name);
        Ok(Box::new(RusshHandle {
            name: spec.name.clone(),
            session,
            accept_task,
        }))
    }
}

fn connection_error(spec: &TunnelSpec, reason: String) -> Error {
    Error::Connection {
        name: spec.name.clone(),
        reason,
    }
}

/// Accept local connections and bridge each one onto a direct-tcpip channel.
/// Runs until the listener errors or the owning handle aborts it.
async fn accept_loop(
    listener: TcpListener,
    session: Arc<client::Handle<AcceptingClient>>,
    host_ip: String,
    host_port: u16,
    name: String,
) {
    loop {
        let (mut local, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Tunnel '{}': accept failed, shutting down listener: {}", name, e);
                break;
            }
        };
        let channel = match session
            .channel_open_direct_tcpip(
                host_ip.clone(),
                u32::from(host_port),
                peer.ip().to_string(),
                u32::from(peer.port()),
            )
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                warn!(
                    "Tunnel '{}': cannot reach {}: {}",
                    name,
                    format_host_port(&host_ip, host_port),
                    e
                );
                continue;
            }
        };
        tokio::spawn(async move {
            let mut remote = channel.into_stream();
            let _ = copy_bidirectional(&mut local, &mut remote).await;
        });
    }
}

struct RusshHandle {
    name: String,
    session: Arc<client::Handle<AcceptingClient>>,
    accept_task: JoinHandle<()>,
}

#[async_trait]
impl ForwardHandle for RusshHandle {
    fn is_active(&self) -> bool {
        !self.accept_task.is_finished() && !self.session.is_closed()
    }

    async fn close(&mut self, force: bool) -> Result<()> {
        self.accept_task.abort();
        match self
            .session
            .disconnect(Disconnect::ByApplication, "tunnel closed", "en")
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if force => {
                debug!("Tunnel '{}': ignoring disconnect error on forced close: {}", self.name, e);
                Ok(())
            }
            Err(e) => Err(Error::Connection {
                name: self.name.clone(),
                reason: format!("disconnect failed: {e}"),
            }),
        }
    }
}

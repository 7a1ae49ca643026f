// Tunnel entity: a forwarding configuration plus its live connection state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::forward::{ForwardHandle, Forwarder};
use crate::net::format_host_port;

/// A named local-port-forwarding configuration.
///
/// Field names map one-to-one onto the keys of the persisted JSON objects.
/// New fields must carry serde defaults so older session files stay
/// loadable; `server_ip` keeps an empty-string default because its real
/// fallback (`host_ip`) is cross-field and filled in by [`normalize`].
///
/// [`normalize`]: TunnelSpec::normalize
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct TunnelSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_local_ip")]
    pub local_ip: String,
    pub local_port: u16,
    pub host_ip: String,
    pub host_port: u16,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub server_ip: String,
}

fn default_local_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    22
}

impl TunnelSpec {
    /// Build a spec from user-supplied field values.
    ///
    /// An unset or empty `server_ip` falls back to `host_ip`, so a
    /// constructed spec always carries a concrete SSH endpoint.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        local_ip: impl Into<String>,
        local_port: u16,
        host_ip: impl Into<String>,
        host_port: u16,
        server_ip: Option<String>,
        server_port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let host_ip = host_ip.into();
        let server_ip = match server_ip {
            Some(ip) if !ip.is_empty() => ip,
            _ => host_ip.clone(),
        };
        let spec = Self {
            name: name.into(),
            local_ip: local_ip.into(),
            local_port,
            host_ip,
            host_port,
            server_port,
            user: user.into(),
            password: password.into(),
            server_ip,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check the port-range invariant. Everything else (address syntax,
    /// reachability, credentials) is the caller's or the network's problem.
    pub fn validate(&self) -> Result<()> {
        if self.local_port == 0 {
            return Err(Error::InvalidSpec("local_port must be in 1-65535".into()));
        }
        if self.host_port == 0 {
            return Err(Error::InvalidSpec("host_port must be in 1-65535".into()));
        }
        if self.server_port == 0 {
            return Err(Error::InvalidSpec("server_port must be in 1-65535".into()));
        }
        Ok(())
    }

    /// Fill the cross-field `server_ip` default serde cannot express, then
    /// re-check invariants. Applied to every spec read from a session file.
    pub(crate) fn normalize(&mut self) -> Result<()> {
        if self.server_ip.is_empty() {
            self.server_ip = self.host_ip.clone();
        }
        self.validate()
    }
}

/// A [`TunnelSpec`] plus its runtime forwarding state.
///
/// The connection handle is exclusively owned here: `None` means inactive,
/// `Some` means a forwarding connection exists (which may itself have died;
/// see [`Tunnel::is_active`]). Handles are never shared and never persisted.
pub struct Tunnel {
    spec: TunnelSpec,
    forwarder: Arc<dyn Forwarder>,
    handle: Option<Box<dyn ForwardHandle>>,
}

impl Tunnel {
    /// Wrap a spec with the forwarding capability it will connect through.
    /// A fresh tunnel is always inactive.
    pub fn new(spec: TunnelSpec, forwarder: Arc<dyn Forwarder>) -> Self {
        Self {
            spec,
            forwarder,
            handle: None,
        }
    }

    pub fn spec(&self) -> &TunnelSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Start forwarding. A live handle is reused (the call is a no-op); a
    /// dead or missing handle is replaced by a freshly opened one. On
    /// failure the tunnel stays inactive.
    pub async fn start(&mut self) -> Result<()> {
        if let Some(handle) = &self.handle {
            if handle.is_active() {
                debug!("Tunnel already active: {}", self);
                return Ok(());
            }
        }

        // A dead handle is never restarted in place; drop it first so a
        // failed open leaves the tunnel cleanly inactive.
        self.handle = None;

        debug!("Starting tunnel: {}", self);
        let handle = self.forwarder.open(&self.spec).await?;
        self.handle = Some(handle);
        info!("Tunnel started: {}", self);
        Ok(())
    }

    /// Stop forwarding. Best-effort: teardown errors are logged and
    /// swallowed, and the tunnel always ends up inactive. Calling this on an
    /// inactive tunnel is a no-op.
    pub async fn stop(&mut self) {
        let Some(mut handle) = self.handle.take() else {
            debug!("Tunnel already stopped: {}", self);
            return;
        };
        debug!("Stopping tunnel: {}", self);
        if let Err(e) = handle.close(true).await {
            warn!("Tunnel '{}' teardown reported an error: {}", self.spec.name, e);
        }
        info!("Tunnel stopped: {}", self);
    }

    /// Liveness of the underlying connection; `false` with no handle.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_active()).unwrap_or(false)
    }

    /// One-line human-readable summary of all fields and activity state.
    /// For logs and listings only; never parsed, never shows the password.
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunnel")
            .field("spec", &self.spec)
            .field("active", &self.handle.is_some())
            .finish()
    }
}

impl fmt::Display for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} -> {} ~ {}@{} | active: {}",
            self.spec.name,
            format_host_port(&self.spec.local_ip, self.spec.local_port),
            format_host_port(&self.spec.host_ip, self.spec.host_port),
            self.spec.user,
            format_host_port(&self.spec.server_ip, self.spec.server_port),
            self.is_active()
        )
    }
}

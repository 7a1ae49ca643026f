// Forwarding capability seam
//
// The tunnel entity drives port forwarding through these traits so the
// lifecycle logic can be exercised against a stub transport in tests. The
// production implementation lives in `crate::ssh`.

use async_trait::async_trait;

use crate::error::Result;
use crate::tunnel::TunnelSpec;

/// Factory for live forwarding handles.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Open a listener on `(spec.local_ip, spec.local_port)` forwarding to
    /// `(spec.host_ip, spec.host_port)` through the SSH server described by
    /// `spec`. Returns [`crate::Error::Connection`] when the server is
    /// unreachable, rejects the credentials, or the local bind fails.
    async fn open(&self, spec: &TunnelSpec) -> Result<Box<dyn ForwardHandle>>;
}

/// A live forwarding connection, owned by exactly one tunnel.
#[async_trait]
pub trait ForwardHandle: Send + Sync {
    /// Whether the underlying connection still reports as alive.
    fn is_active(&self) -> bool;

    /// Tear the connection down. `force` suppresses teardown errors that
    /// only matter for a graceful goodbye.
    async fn close(&mut self, force: bool) -> Result<()>;
}

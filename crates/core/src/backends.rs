// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Concrete backends: the local OS, a loopback-reachable TCP backend, and a
//! USB-tether stub. Selected per platform by [`Service::default_preset`];
//! each one is otherwise opaque behind [`Backend`].

use std::any::Any;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::split;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::info;

use crate::attach_manager::{AttachHooks, AttachManager};
use crate::backend::Backend;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::host_session::HostSession;
use crate::provider::{ProcessInfo, Provider, ProviderKind};
use crate::rpc::{BoxedReader, BoxedWriter};
use crate::service::Service;
use crate::signal::Signal;

/// Subscribe to `manager`'s own `agent_session_closed` signal and re-emit
/// every event through `provider`'s, for as long as `provider` stays alive.
fn forward_agent_session_closed(manager: Arc<AttachManager>, provider: Arc<Provider>) {
    let mut closed = manager.agent_session_closed().subscribe();
    tokio::spawn(async move {
        while let Ok((id, error)) = closed.recv().await {
            provider.notify_agent_session_closed(id, error);
        }
    });
}

/// The always-present local-machine backend. Publishes exactly one
/// [`ProviderKind::LocalSystem`] provider on `start()` and retracts it on
/// `stop()`.
pub struct LocalBackend {
    config: Config,
    current: Mutex<Option<Arc<Provider>>>,
    available: Signal<Arc<Provider>>,
    unavailable: Signal<Arc<Provider>>,
}

impl LocalBackend {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            current: Mutex::new(None),
            available: Signal::new(),
            unavailable: Signal::new(),
        })
    }
}

impl Backend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    fn start(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let manager = Arc::new(AttachManager::new(self.config, false));
            let session = manager.clone();
            let provider = Arc::new(Provider::new("Local System", None, ProviderKind::LocalSystem, move || {
                session.clone() as Arc<dyn HostSession>
            }));
            forward_agent_session_closed(manager, provider.clone());
            *self.current.lock().await = Some(provider.clone());
            self.available.emit(provider);
            Ok(())
        })
    }

    fn stop(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(provider) = self.current.lock().await.take() {
                self.unavailable.emit(provider);
            }
            Ok(())
        })
    }

    fn provider_available(&self) -> &Signal<Arc<Provider>> {
        &self.available
    }

    fn provider_unavailable(&self) -> &Signal<Arc<Provider>> {
        &self.unavailable
    }
}

/// USB-tether backend stub. A real tether backend watches for device
/// attach/detach over USB and publishes one [`ProviderKind::LocalTether`]
/// provider per connected device; that requires real USB hardware access,
/// which this workspace has no collaborator for. Kept as a real, selectable
/// `Backend` so [`Service::default_preset`]'s platform-conditional preset has
/// something concrete to hold on non-Linux hosts; it simply never sees a
/// device and never emits.
pub struct TetherBackend {
    available: Signal<Arc<Provider>>,
    unavailable: Signal<Arc<Provider>>,
}

impl TetherBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { available: Signal::new(), unavailable: Signal::new() })
    }
}

impl Backend for TetherBackend {
    fn name(&self) -> &str {
        "tether"
    }

    fn start(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn stop(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn provider_available(&self) -> &Signal<Arc<Provider>> {
        &self.available
    }

    fn provider_unavailable(&self) -> &Signal<Arc<Provider>> {
        &self.unavailable
    }
}

/// A fixed set of remote hosts reachable over TCP, each exposed as a
/// [`ProviderKind::RemoteSystem`] provider. There is no discovery protocol
/// that would advertise these automatically; hosts are supplied up front by
/// the caller.
pub struct TcpBackend {
    config: Config,
    hosts: Vec<SocketAddr>,
    current: Mutex<Vec<Arc<Provider>>>,
    available: Signal<Arc<Provider>>,
    unavailable: Signal<Arc<Provider>>,
}

impl TcpBackend {
    /// No configured hosts: a backend that is always present in the default
    /// preset but never publishes anything until hosts are known.
    pub fn new(config: Config) -> Arc<Self> {
        Self::with_hosts(config, Vec::new())
    }

    pub fn with_hosts(config: Config, hosts: Vec<SocketAddr>) -> Arc<Self> {
        Arc::new(Self {
            config,
            hosts,
            current: Mutex::new(Vec::new()),
            available: Signal::new(),
            unavailable: Signal::new(),
        })
    }
}

impl Backend for TcpBackend {
    fn name(&self) -> &str {
        "tcp"
    }

    fn start(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut published = Vec::with_capacity(self.hosts.len());
            for addr in &self.hosts {
                let config = self.config;
                let addr = *addr;
                let manager =
                    Arc::new(AttachManager::with_hooks(config, false, Arc::new(TcpAttachHooks { addr })));
                let session = manager.clone();
                let provider = Arc::new(Provider::new(addr.to_string(), None, ProviderKind::RemoteSystem, move || {
                    session.clone() as Arc<dyn HostSession>
                }));
                forward_agent_session_closed(manager, provider.clone());
                info!(%addr, "tcp backend publishing remote provider");
                self.available.emit(provider.clone());
                published.push(provider);
            }
            *self.current.lock().await = published;
            Ok(())
        })
    }

    fn stop(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for provider in self.current.lock().await.drain(..) {
                self.unavailable.emit(provider);
            }
            Ok(())
        })
    }

    fn provider_available(&self) -> &Signal<Arc<Provider>> {
        &self.available
    }

    fn provider_unavailable(&self) -> &Signal<Arc<Provider>> {
        &self.unavailable
    }
}

/// `AttachHooks` for a `RemoteSystem` provider: `perform_attach_to` dials
/// `addr` directly and treats the resulting TCP stream as the host↔agent
/// pipe. Process enumeration/spawn/resume/kill would need a separate remote
/// host-session control protocol that doesn't exist here, so those surface
/// `Failed` rather than silently no-op-ing.
struct TcpAttachHooks {
    addr: SocketAddr,
}

impl AttachHooks for TcpAttachHooks {
    fn enumerate_processes(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ProcessInfo>>> + Send + '_>> {
        Box::pin(async { Err(Error::failed("process enumeration is not supported over the TCP backend")) })
    }

    fn spawn(
        &self,
        _program: String,
        _argv: Vec<String>,
        _envp: Vec<(String, String)>,
    ) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>> {
        Box::pin(async { Err(Error::failed("spawn is not supported over the TCP backend")) })
    }

    fn resume(&self, _pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Err(Error::failed("resume is not supported over the TCP backend")) })
    }

    fn kill(&self, _pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Err(Error::failed("kill is not supported over the TCP backend")) })
    }

    fn perform_attach_to(
        &self,
        _pid: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(BoxedReader, BoxedWriter, Box<dyn Any + Send + Sync>)>> + Send + '_>>
    {
        let addr = self.addr;
        Box::pin(async move {
            let stream = TcpStream::connect(addr).await.map_err(|e| Error::failed(e.to_string()))?;
            let (reader, writer) = split(stream);
            Ok((
                Box::new(reader) as BoxedReader,
                Box::new(writer) as BoxedWriter,
                Box::new(()) as Box<dyn Any + Send + Sync>,
            ))
        })
    }
}

impl Service {
    /// Local + (USB tether when not on Linux) + TCP with no preconfigured
    /// hosts.
    pub fn default_preset(config: Config) -> Self {
        let mut service = Service::new();
        service.add_backend(LocalBackend::new(config));
        #[cfg(not(target_os = "linux"))]
        service.add_backend(TetherBackend::new());
        service.add_backend(TcpBackend::new(config));
        service
    }

    /// Only the local-machine backend.
    pub fn local_only(config: Config) -> Self {
        let mut service = Service::new();
        service.add_backend(LocalBackend::new(config));
        service
    }

    /// Only the TCP backend, optionally with a fixed set of remote hosts
    /// known up front.
    pub fn tcp_only(config: Config, hosts: Vec<SocketAddr>) -> Self {
        let mut service = Service::new();
        service.add_backend(TcpBackend::with_hosts(config, hosts));
        service
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_backend_publishes_and_retracts_one_provider() {
        let backend = LocalBackend::new(Config::default());
        let mut available = backend.provider_available().subscribe();
        let mut unavailable = backend.provider_unavailable().subscribe();

        backend.start().await.unwrap();
        let provider = available.recv().await.unwrap();
        assert_eq!(provider.kind(), ProviderKind::LocalSystem);

        backend.stop().await.unwrap();
        let retracted = unavailable.recv().await.unwrap();
        assert_eq!(retracted.name(), provider.name());
    }

    #[tokio::test]
    async fn tcp_backend_with_no_hosts_publishes_nothing() {
        let backend = TcpBackend::new(Config::default());
        let mut available = backend.provider_available().subscribe();

        backend.start().await.unwrap();
        assert!(available.try_recv().is_err());
        backend.stop().await.unwrap();
    }

    #[tokio::test]
    async fn tether_backend_start_stop_are_no_ops() {
        let backend = TetherBackend::new();
        backend.start().await.unwrap();
        backend.stop().await.unwrap();
    }

    #[tokio::test]
    async fn default_preset_service_with_no_providers_reachable_starts_and_stops_cleanly() {
        // TCP-only reachability (no hosts configured) plus the always-empty
        // local/tether backends still brings the whole service up and down.
        let service = Service::tcp_only(Config::default(), Vec::new());
        let mut available = service.provider_available().subscribe();

        service.start().await.unwrap();
        assert!(available.try_recv().is_err());
        service.stop().await.unwrap();
    }
}

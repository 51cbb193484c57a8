// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios against the public `tether-core` API.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tether_core::attach_manager::AttachHooks;
use tether_core::rpc::{BoxedReader, BoxedWriter};
use tether_core::{AttachManager, Config, Error, ProcessInfo, ProviderKind, Result, RpcConnection, Service};
use tokio::io::{duplex, split};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// A service backed only by the (empty) TCP backend reaches zero
/// providers; start/stop both complete cleanly.
#[tokio::test]
async fn tcp_only_with_no_reachable_providers() {
    let service = Service::tcp_only(Config::default(), Vec::new());
    let mut available = service.provider_available().subscribe();

    service.start().await.unwrap();
    assert!(available.try_recv().is_err());
    service.stop().await.unwrap();
}

/// `attach_to(pid)` called twice in sequence returns the same id, and
/// exactly one entry ends up registered.
#[tokio::test]
async fn repeated_attach_returns_the_same_id() {
    let manager = Arc::new(AttachManager::new(Config::default(), false));
    let pid = std::process::id();

    let first = manager.clone().attach_to(pid).await.unwrap();
    let second = manager.clone().attach_to(pid).await.unwrap();
    assert_eq!(first, second);
}

/// A hook whose agent-side serve task can be torn down out of band, to
/// simulate a vanished peer without needing real process injection:
/// aborting the task drops its owned half of the duplex pipe, which the
/// host's reader observes as an unexpected EOF.
struct VanishableHook {
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl VanishableHook {
    fn new() -> Arc<Self> {
        Arc::new(Self { handle: Mutex::new(None) })
    }

    async fn vanish(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }
}

impl AttachHooks for VanishableHook {
    fn enumerate_processes(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ProcessInfo>>> + Send + '_>> {
        Box::pin(async { Ok(Vec::new()) })
    }
    fn spawn(
        &self,
        _program: String,
        _argv: Vec<String>,
        _envp: Vec<(String, String)>,
    ) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>> {
        Box::pin(async { Err(Error::failed("unsupported")) })
    }
    fn resume(&self, _pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
    fn kill(&self, _pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
    fn perform_attach_to(
        &self,
        _pid: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(BoxedReader, BoxedWriter, Box<dyn Any + Send + Sync>)>> + Send + '_>>
    {
        Box::pin(async move {
            let (host, agent) = duplex(64 * 1024);

            let engine = Arc::new(tether_core::ScriptEngine::new());
            let (agent_reader, agent_writer) = split(agent);
            let handle = tokio::spawn(async move {
                let _ = tether_core::rpc::serve_script_engine(engine, agent_reader, agent_writer).await;
            });
            *self.handle.lock().await = Some(handle);

            let (host_reader, host_writer) = split(host);
            Ok((
                Box::new(host_reader) as BoxedReader,
                Box::new(host_writer) as BoxedWriter,
                Box::new(()) as Box<dyn Any + Send + Sync>,
            ))
        })
    }
}

/// Attach succeeds; the agent side vanishes → `agent_session_closed`
/// fires once, and `obtain_agent_session` then fails `NotFound`.
#[tokio::test]
async fn vanished_peer_emits_one_close_event_then_not_found() {
    let hook = VanishableHook::new();
    let manager = Arc::new(AttachManager::with_hooks(Config::default(), false, hook.clone()));

    let mut closed = manager.agent_session_closed().subscribe();
    let id = manager.clone().attach_to(1234).await.unwrap();

    hook.vanish().await;

    let (closed_id, error) = closed.recv().await.unwrap();
    assert_eq!(closed_id, id);
    assert!(error.is_some());

    let err = manager.obtain_agent_session(id).await.unwrap_err();
    assert_eq!(err, Error::NotFound);
}

/// `create_script(None, "...")` twice yields ids 1 and 2.
#[tokio::test]
async fn default_script_ids_are_monotonic() {
    let engine = tether_core::ScriptEngine::new();
    let first = engine.create_script(None, "1 + 1".into()).await.unwrap();
    let second = engine.create_script(None, "2 + 2".into()).await.unwrap();
    assert_eq!(first.value(), 1);
    assert_eq!(second.value(), 2);
}

/// In forwarding mode, a loopback TCP client can attach to the
/// re-exported session and drive it exactly like an in-process caller
/// would, using the same public `RpcConnection` API.
#[tokio::test]
async fn forwarded_session_is_reachable_over_loopback_tcp() {
    let base_port = tether_specs::free_port().unwrap();
    let config = Config::default().with_base_port(base_port);
    let manager = Arc::new(AttachManager::new(config, true));

    let id = manager.clone().attach_to(std::process::id()).await.unwrap();
    assert_eq!(id.value() as u16, base_port);

    let stream = TcpStream::connect(("127.0.0.1", id.value() as u16)).await.unwrap();
    let (reader, writer) = split(stream);
    let client = RpcConnection::open(Box::new(reader), Box::new(writer)).await.unwrap();

    let sid = client.create_script(None, "console.log(1)".into()).await.unwrap();
    assert_eq!(sid, 1);
}

/// A `perform_attach_to` hook whose stream never speaks the RPC
/// handshake causes `attach_to` to fail with `TimedOut`, leaving no entry
/// behind for a later, independent attach to conflict with.
struct SilentHook;

impl AttachHooks for SilentHook {
    fn enumerate_processes(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ProcessInfo>>> + Send + '_>> {
        Box::pin(async { Ok(Vec::new()) })
    }
    fn spawn(
        &self,
        _program: String,
        _argv: Vec<String>,
        _envp: Vec<(String, String)>,
    ) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>> {
        Box::pin(async { Err(Error::failed("unsupported")) })
    }
    fn resume(&self, _pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
    fn kill(&self, _pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
    fn perform_attach_to(
        &self,
        _pid: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(BoxedReader, BoxedWriter, Box<dyn Any + Send + Sync>)>> + Send + '_>>
    {
        Box::pin(async {
            let (a, _never_read) = duplex(16);
            let (reader, writer) = split(a);
            Ok((
                Box::new(reader) as BoxedReader,
                Box::new(writer) as BoxedWriter,
                Box::new(()) as Box<dyn Any + Send + Sync>,
            ))
        })
    }
}

#[tokio::test]
async fn bring_up_without_handshake_times_out() {
    let config = Config::default().with_attach_timeout(Duration::from_millis(50));
    let manager = Arc::new(AttachManager::with_hooks(config, false, Arc::new(SilentHook)));

    let err = manager.clone().attach_to(1).await.unwrap_err();
    assert_eq!(err, Error::TimedOut);
}

#[test]
fn provider_kinds_are_distinct() {
    assert_ne!(ProviderKind::LocalSystem, ProviderKind::RemoteSystem);
    assert_ne!(ProviderKind::LocalSystem, ProviderKind::LocalTether);
}

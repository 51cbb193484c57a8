// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `AttachManager`: the state machine at the center of this crate.
//!
//! Owns the session table, brings up RPC over whatever transport a backend's
//! [`AttachHooks::perform_attach_to`] hands it, allocates ids, optionally
//! re-exports, and tears everything down on any failure path. Backends
//! supply only `AttachHooks`; this type implements [`HostSession`] once and
//! is embedded by value rather than subclassed, per the design notes.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::{duplex, split};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::host_session::HostSession;
use crate::ids::AgentSessionId;
use crate::provider::ProcessInfo;
use crate::rpc::{serve_script_engine, BoxedReader, BoxedWriter, ConnectionClosed, RpcConnection};
use crate::script_engine::ScriptEngine;
use crate::session_entry::SessionEntry;
use crate::signal::Signal;

/// The per-backend hook `AttachManager` delegates the actual target-specific
/// mechanics to: enumerate/spawn/resume/kill plus the transport acquisition
/// at the heart of `attach_to`. Object-safe so `AttachManager` can hold one
/// as `Arc<dyn AttachHooks>` without a generic parameter leaking out to
/// every caller of `HostSession`.
pub trait AttachHooks: Send + Sync {
    fn enumerate_processes(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ProcessInfo>>> + Send + '_>>;

    fn spawn(
        &self,
        program: String,
        argv: Vec<String>,
        envp: Vec<(String, String)>,
    ) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>>;

    fn resume(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn kill(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Acquire a bidirectional byte stream to the in-target agent for `pid`,
    /// plus an opaque owner whose lifetime must equal or exceed the
    /// stream's. The returned reader/writer are expected to speak the
    /// `Hello`/`HelloAck` handshake in [`crate::rpc`].
    fn perform_attach_to(
        &self,
        pid: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(BoxedReader, BoxedWriter, Box<dyn Any + Send + Sync>)>> + Send + '_>>;
}

/// Default hook used by [`AttachManager::new`]: simulates a local attach by
/// spawning a fresh in-process [`ScriptEngine`] and wiring it to the host
/// side over an in-memory duplex pipe. Real process injection (dlopen +
/// `frida_agent_main` inside the target via the loader's handshake) is out
/// of this crate's scope; this stands in for "the agent is now reachable"
/// without requiring a real target binary. `enumerate_processes` reads
/// `/proc` on Linux; `spawn`/`resume`/`kill` use real OS primitives via
/// `tokio::process`/`nix`, since those don't depend on the injector.
pub struct LocalAttachHooks {
    drain_poll: std::time::Duration,
}

impl Default for LocalAttachHooks {
    fn default() -> Self {
        Self { drain_poll: Config::default().gc_drain_poll() }
    }
}

impl LocalAttachHooks {
    fn new(drain_poll: std::time::Duration) -> Self {
        Self { drain_poll }
    }
}

impl AttachHooks for LocalAttachHooks {
    fn enumerate_processes(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ProcessInfo>>> + Send + '_>> {
        Box::pin(async { Ok(read_proc_processes()) })
    }

    fn spawn(
        &self,
        program: String,
        argv: Vec<String>,
        envp: Vec<(String, String)>,
    ) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>> {
        Box::pin(async move {
            let mut command = tokio::process::Command::new(&program);
            command.args(&argv).envs(envp).kill_on_drop(false);
            let child = command.spawn().map_err(|e| Error::failed(e.to_string()))?;
            let pid = child.id().ok_or_else(|| Error::failed("spawned child has no pid"))?;
            // The child is intentionally leaked here (not awaited/killed): ownership
            // of the target process passes to the caller, which controls its
            // lifecycle from here on via `resume`/`kill`/`attach_to`.
            std::mem::forget(child);
            Ok(pid)
        })
    }

    fn resume(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            kill(Pid::from_raw(pid as i32), Signal::SIGCONT).map_err(|e| Error::failed(e.to_string()))
        })
    }

    fn kill(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            kill(Pid::from_raw(pid as i32), Signal::SIGKILL).map_err(|e| Error::failed(e.to_string()))
        })
    }

    fn perform_attach_to(
        &self,
        pid: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(BoxedReader, BoxedWriter, Box<dyn Any + Send + Sync>)>> + Send + '_>>
    {
        Box::pin(async move {
            use nix::sys::signal::kill;
            use nix::unistd::Pid;
            // Signal 0: existence probe only, per kill(2).
            kill(Pid::from_raw(pid as i32), None).map_err(|_| Error::failed("no such process"))?;

            let (host_stream, agent_stream) = duplex(64 * 1024);
            let engine = Arc::new(ScriptEngine::with_capabilities(
                Box::new(crate::script::NullCompiler),
                Arc::new(crate::script::IdleTracer),
                self.drain_poll,
            ));
            let (agent_reader, agent_writer) = split(agent_stream);
            tokio::spawn(async move {
                if let Err(error) = serve_script_engine(engine, agent_reader, agent_writer).await {
                    debug!(%error, pid, "simulated agent connection ended");
                }
            });

            let (host_reader, host_writer) = split(host_stream);
            let reader: BoxedReader = Box::new(host_reader);
            let writer: BoxedWriter = Box::new(host_writer);
            Ok((reader, writer, Box::new(()) as Box<dyn Any + Send + Sync>))
        })
    }
}

#[cfg(target_os = "linux")]
fn read_proc_processes() -> Vec<ProcessInfo> {
    let mut processes = Vec::new();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return processes;
    };
    for entry in entries.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<u32>() else {
            continue;
        };
        let comm_path = entry.path().join("comm");
        let Ok(name) = std::fs::read_to_string(&comm_path) else {
            continue;
        };
        processes.push(ProcessInfo::new(pid, name.trim_end().to_string()));
    }
    processes
}

#[cfg(not(target_os = "linux"))]
fn read_proc_processes() -> Vec<ProcessInfo> {
    warn!("process enumeration is only implemented for /proc-based platforms");
    Vec::new()
}

/// The reusable `attach_to`/`obtain_agent_session`/`close` trio.
pub struct AttachManager {
    config: Config,
    forward_agent_sessions: bool,
    hooks: Arc<dyn AttachHooks>,
    entries: Mutex<HashMap<AgentSessionId, Arc<SessionEntry>>>,
    /// One in-flight `attach_to(pid)` future per pid, so concurrent callers
    /// for the same pid observe the same result without racing a second
    /// transport into existence.
    pending: Mutex<HashMap<u32, Arc<OnceCell<Result<AgentSessionId>>>>>,
    next_port: AtomicU32,
    agent_session_closed: Signal<(AgentSessionId, Option<String>)>,
}

impl AttachManager {
    /// Build a manager backed by [`LocalAttachHooks`]. Covers the common
    /// case (and every caller in this crate's own tests); backends that need
    /// different transport acquisition use [`Self::with_hooks`].
    pub fn new(config: Config, forward_agent_sessions: bool) -> Self {
        let hooks = Arc::new(LocalAttachHooks::new(config.gc_drain_poll()));
        Self::with_hooks(config, forward_agent_sessions, hooks)
    }

    pub fn with_hooks(config: Config, forward_agent_sessions: bool, hooks: Arc<dyn AttachHooks>) -> Self {
        let base_port = config.base_port() as u32;
        Self {
            config,
            forward_agent_sessions,
            hooks,
            entries: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_port: AtomicU32::new(base_port),
            agent_session_closed: Signal::new(),
        }
    }

    /// Fires whenever an attached session terminates, successfully or not.
    /// A `Provider` wraps this and re-emits it on its own signal of the same
    /// name.
    pub fn agent_session_closed(&self) -> &Signal<(AgentSessionId, Option<String>)> {
        &self.agent_session_closed
    }

    async fn find_id_by_pid(&self, pid: u32) -> Option<AgentSessionId> {
        self.entries.lock().await.values().find(|e| e.pid() == pid).map(|e| e.id())
    }

    /// Acquires the transport, brings up RPC, allocates an id, registers the
    /// entry, and optionally re-exports it — run under the per-pid
    /// `OnceCell` so only one caller ever executes this for a given pid
    /// concurrently.
    async fn do_attach(self: Arc<Self>, pid: u32) -> Result<AgentSessionId> {
        let timeout = self.config.attach_timeout();
        let bring_up = async {
            let (reader, writer, transport) = self.hooks.perform_attach_to(pid).await?;
            let connection = RpcConnection::open(reader, writer).await?;
            Ok::<_, Error>((connection, transport))
        };
        let (connection, transport) = match tokio::time::timeout(timeout, bring_up).await {
            Ok(outcome) => outcome?,
            Err(_elapsed) => return Err(Error::TimedOut),
        };

        let id = self.allocate_id().await;
        let closed_rx = connection.closed().subscribe();

        let entry = Arc::new(SessionEntry::new(id, pid, transport, connection, self.forward_agent_sessions));

        if self.forward_agent_sessions {
            if let Err(error) = entry.serve(id.value() as u16).await {
                entry.close().await;
                return Err(Error::failed(error.to_string()));
            }
        }

        self.entries.lock().await.insert(id, entry);

        let manager = self.clone();
        tokio::spawn(async move { manager.route_connection_closed(id, closed_rx).await });

        debug!(id = %id, pid, forwarding = self.forward_agent_sessions, "session entry registered");
        Ok(id)
    }

    async fn route_connection_closed(
        self: Arc<Self>,
        id: AgentSessionId,
        mut closed_rx: tokio::sync::broadcast::Receiver<ConnectionClosed>,
    ) {
        let Ok(event) = closed_rx.recv().await else {
            return;
        };

        let closed_by_us = !event.remote_peer_vanished && event.error.is_none();
        if closed_by_us {
            return;
        }

        let entry = self.entries.lock().await.remove(&id);
        let Some(entry) = entry else {
            // A closed callback firing with no matching entry is a
            // programming error in this implementation.
            if cfg!(debug_assertions) {
                #[allow(clippy::panic)]
                {
                    panic!("connection closed callback fired with no matching session entry (id={id})");
                }
            }
            return;
        };

        entry.close().await;
        warn!(id = %id, pid = entry.pid(), error = ?event.error, "agent session vanished");
        self.agent_session_closed.emit((id, event.error));
    }

    /// Allocate the next id: a bare counter in identifier-only mode, or the
    /// smallest free-and-bindable loopback port in forwarding mode.
    async fn allocate_id(&self) -> AgentSessionId {
        if !self.forward_agent_sessions {
            return AgentSessionId::new(self.next_port.fetch_add(1, Ordering::SeqCst));
        }

        let mut port = self.config.base_port() as u32;
        loop {
            let taken = self.entries.lock().await.keys().any(|id| id.value() == port);
            if taken {
                port += 1;
                continue;
            }

            match probe_bindable(port as u16).await {
                ProbeOutcome::Bindable => return AgentSessionId::new(port),
                ProbeOutcome::AddressInUse => port += 1,
                // Preserved quirk (see DESIGN.md): a non-AddressInUse probe
                // error is treated as "port available" rather than advancing.
                ProbeOutcome::OtherError => return AgentSessionId::new(port),
            }
        }
    }
}

enum ProbeOutcome {
    Bindable,
    AddressInUse,
    OtherError,
}

async fn probe_bindable(port: u16) -> ProbeOutcome {
    match TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => {
            drop(listener);
            ProbeOutcome::Bindable
        }
        Err(error) if error.kind() == std::io::ErrorKind::AddrInUse => ProbeOutcome::AddressInUse,
        Err(error) => {
            warn!(port, %error, "port probe failed for a reason other than AddressInUse");
            ProbeOutcome::OtherError
        }
    }
}

impl HostSession for AttachManager {
    fn enumerate_processes(&self) -> Pin<Box<dyn Future<Output = Result<Vec<ProcessInfo>>> + Send + '_>> {
        self.hooks.enumerate_processes()
    }

    fn spawn(
        &self,
        program: String,
        argv: Vec<String>,
        envp: Vec<(String, String)>,
    ) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>> {
        self.hooks.spawn(program, argv, envp)
    }

    fn resume(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.hooks.resume(pid)
    }

    fn kill(&self, pid: u32) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.hooks.kill(pid)
    }

    fn attach_to(self: Arc<Self>, pid: u32) -> Pin<Box<dyn Future<Output = Result<AgentSessionId>> + Send>> {
        Box::pin(async move {
            if let Some(id) = self.find_id_by_pid(pid).await {
                return Ok(id);
            }

            let cell = {
                let mut pending = self.pending.lock().await;
                pending.entry(pid).or_insert_with(|| Arc::new(OnceCell::new())).clone()
            };

            let manager = self.clone();
            let result = cell.get_or_init(|| async move { manager.do_attach(pid).await }).await.clone();

            // Drop the in-flight slot so a later retry (after failure, or
            // after the entry it produced has since closed) starts fresh
            // rather than replaying a stale cached outcome.
            self.pending.lock().await.remove(&pid);

            result
        })
    }

    fn obtain_agent_session(
        &self,
        id: AgentSessionId,
    ) -> Pin<Box<dyn Future<Output = Result<RpcConnection>> + Send + '_>> {
        Box::pin(async move {
            self.entries
                .lock()
                .await
                .get(&id)
                .map(|entry| entry.connection().clone())
                .ok_or(Error::NotFound)
        })
    }

    fn close(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let entries: Vec<Arc<SessionEntry>> = {
                let mut table = self.entries.lock().await;
                table.drain().map(|(_, entry)| entry).collect()
            };

            let mut handles = Vec::with_capacity(entries.len());
            for entry in entries {
                handles.push(tokio::spawn(async move { entry.close().await }));
            }
            for handle in handles {
                let _ = handle.await;
            }
        })
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `SessionEntry` owns one attached session's transport, RPC
//! connection, and (optionally) its re-export server and accepted clients.
//! `close()` is the idempotent teardown at the center of the whole
//! lifecycle.

use std::any::Any;
use std::net::SocketAddr;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::ids::AgentSessionId;
use crate::reexport::{new_client_table, ClientTable, ReexportServer};
use crate::rpc::RpcConnection;

pub struct SessionEntry {
    id: AgentSessionId,
    pid: u32,
    /// Opaque owner returned by `perform_attach_to` alongside the stream.
    /// Never inspected, only held — it must outlive `connection`, which it
    /// does simply by being a sibling field dropped no earlier than the
    /// whole entry.
    transport: Box<dyn Any + Send + Sync>,
    connection: RpcConnection,
    /// Whether this entry re-exports, sampled once at `attach_to` time per
    /// the decision in the design notes: later flips of the manager-level
    /// flag never affect entries that already exist.
    forwarding: bool,
    server: Mutex<Option<ReexportServer>>,
    clients: ClientTable,
    closed: Mutex<bool>,
}

impl SessionEntry {
    pub(crate) fn new(id: AgentSessionId, pid: u32, transport: Box<dyn Any + Send + Sync>, connection: RpcConnection, forwarding: bool) -> Self {
        Self {
            id,
            pid,
            transport,
            connection,
            forwarding,
            server: Mutex::new(None),
            clients: new_client_table(),
            closed: Mutex::new(false),
        }
    }

    pub fn id(&self) -> AgentSessionId {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn forwarding(&self) -> bool {
        self.forwarding
    }

    pub(crate) fn connection(&self) -> &RpcConnection {
        &self.connection
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &(dyn Any + Send + Sync) {
        self.transport.as_ref()
    }

    /// Start the re-export listener at `127.0.0.1:<port>`. Called at most
    /// once, immediately after construction, before the entry is made
    /// visible to other callers.
    pub(crate) async fn serve(&self, port: u16) -> Result<SocketAddr> {
        let server = ReexportServer::bind(port, self.connection.clone(), self.clients.clone()).await?;
        let addr = server.local_addr();
        *self.server.lock().await = Some(server);
        Ok(addr)
    }

    /// Idempotent teardown. The first caller performs the work while
    /// holding `closed`; concurrent callers block on the same lock and,
    /// once it is released, see the flag already set and return immediately
    /// — functionally the same as all callers awaiting one shared
    /// completion.
    pub async fn close(&self) {
        let mut closed = self.closed.lock().await;
        if *closed {
            return;
        }

        if let Some(server) = self.server.lock().await.take() {
            server.stop();
        }

        let clients: Vec<_> = self.clients.lock().await.drain().collect();
        for (_, handle) in clients {
            handle.abort();
        }

        self.connection.close().await;

        debug!(id = %self.id, pid = self.pid, "session entry closed");
        *closed = true;
    }
}

impl Drop for SessionEntry {
    fn drop(&mut self) {
        if let Ok(closed) = self.closed.try_lock() {
            if !*closed {
                warn!(id = %self.id, "session entry dropped without being closed");
            }
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Re-export listener: when `forward_agent_sessions` is enabled, a
//! [`crate::session_entry::SessionEntry`] serves its `agent_session` proxy
//! to external TCP clients on `127.0.0.1:<id>`, one freshly generated GUID
//! per session.
//!
//! There is no real message-bus crate in this workspace's dependency set, so
//! "DBus-style server, anonymous authentication, well-known object path" is
//! realized concretely as: a loopback-only `TcpListener`, no handshake
//! beyond the same `Hello`/`HelloAck` bring-up every `RpcConnection` does,
//! and a per-client task that translates the wire protocol in
//! [`crate::rpc`] into calls against the shared connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::rpc::{
    read_frame, write_frame, BoxedReader, BoxedWriter, EventBody, Request, ResponseBody,
    RpcConnection, WireMessage,
};

/// Registration tokens for accepted client connections, shared between a
/// running [`ReexportServer`] and the owning entry's `close()`.
pub type ClientTable = Arc<Mutex<HashMap<u64, AbortHandle>>>;

pub fn new_client_table() -> ClientTable {
    Arc::new(Mutex::new(HashMap::new()))
}

/// A running re-export listener for one session.
pub struct ReexportServer {
    accept_loop: AbortHandle,
    local_addr: SocketAddr,
    guid: Uuid,
}

impl ReexportServer {
    /// Bind `127.0.0.1:port` and start accepting clients, each re-exporting
    /// `connection`. `clients` receives one entry per accepted connection so
    /// the owning [`crate::session_entry::SessionEntry`] can close them on
    /// teardown.
    pub async fn bind(port: u16, connection: RpcConnection, clients: ClientTable) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| Error::failed(e.to_string()))?;
        let local_addr = listener.local_addr().map_err(|e| Error::failed(e.to_string()))?;
        let guid = Uuid::new_v4();
        let next_token = Arc::new(AtomicU64::new(0));

        let accept_loop = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(error) => {
                        warn!(%error, "re-export accept failed");
                        continue;
                    }
                };
                debug!(%peer, "re-export client connected");

                let token = next_token.fetch_add(1, Ordering::SeqCst);
                let (reader, writer) = stream.into_split();
                let client_connection = connection.clone();
                let clients_on_exit = clients.clone();

                let handle = tokio::spawn(async move {
                    if let Err(error) =
                        serve_agent_session_proxy(client_connection, Box::new(reader), Box::new(writer)).await
                    {
                        debug!(%error, "re-export client connection ended");
                    }
                    clients_on_exit.lock().await.remove(&token);
                });
                clients.lock().await.insert(token, handle.abort_handle());
            }
        });

        Ok(Self { accept_loop: accept_loop.abort_handle(), local_addr, guid })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn guid(&self) -> Uuid {
        self.guid
    }

    pub fn stop(&self) {
        self.accept_loop.abort();
    }
}

/// Service one re-export client: bring up the same `Hello`/`HelloAck`
/// handshake `RpcConnection::open` performs, then forward every request to
/// `connection` and every event from it back out to the client.
async fn serve_agent_session_proxy(
    connection: RpcConnection,
    mut reader: BoxedReader,
    mut writer: BoxedWriter,
) -> Result<()> {
    match read_frame(&mut reader).await? {
        WireMessage::Hello => {}
        _ => return Err(Error::failed("expected Hello during re-export bring-up")),
    }
    write_frame(&mut writer, &WireMessage::HelloAck).await?;

    let mut script_messages = connection.message_from_script().subscribe();
    let mut debugger_messages = connection.message_from_debugger().subscribe();

    loop {
        tokio::select! {
            frame = read_frame(&mut reader) => {
                let WireMessage::Request { id, body } = frame? else {
                    return Err(Error::failed("expected Request frame"));
                };
                let response = dispatch(&connection, body).await;
                write_frame(&mut writer, &WireMessage::Response { id, body: response }).await?;
            }
            Ok((sid, message, data)) = script_messages.recv() => {
                write_frame(&mut writer, &WireMessage::Event(EventBody::ScriptMessage {
                    sid: sid.value(),
                    message,
                    data,
                })).await?;
            }
            Ok(message) = debugger_messages.recv() => {
                write_frame(&mut writer, &WireMessage::Event(EventBody::DebuggerMessage { message })).await?;
            }
        }
    }
}

async fn dispatch(connection: &RpcConnection, request: Request) -> ResponseBody {
    let result = match request {
        Request::CreateScript { name, source } => {
            return match connection.create_script(name, source).await {
                Ok(sid) => ResponseBody::ScriptId(sid),
                Err(error) => ResponseBody::Err {
                    kind: error.as_str().to_string(),
                    message: Some(error.to_string()),
                },
            };
        }
        Request::DestroyScript { sid } => connection.destroy_script(sid).await,
        Request::LoadScript { sid } => connection.load_script(sid).await,
        Request::PostMessageToScript { sid, message } => {
            connection.post_message_to_script(sid, message).await
        }
        Request::EnableDebugger => connection.enable_debugger().await,
        Request::DisableDebugger => connection.disable_debugger().await,
        Request::PostMessageToDebugger { message } => connection.post_message_to_debugger(message).await,
    };
    match result {
        Ok(()) => ResponseBody::Unit,
        Err(error) => ResponseBody::Err {
            kind: error.as_str().to_string(),
            message: Some(error.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script_engine::ScriptEngine;
    use tokio::io::duplex;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn re_exported_client_can_create_a_script() {
        let (host_stream, agent_stream) = duplex(4096);
        let engine = Arc::new(ScriptEngine::new());
        let (agent_reader, agent_writer) = tokio::io::split(agent_stream);
        tokio::spawn(crate::rpc::serve_script_engine(engine, agent_reader, agent_writer));

        let (host_reader, host_writer) = tokio::io::split(host_stream);
        let connection = RpcConnection::open(Box::new(host_reader), Box::new(host_writer))
            .await
            .unwrap();

        let clients = new_client_table();
        let server = ReexportServer::bind(0, connection, clients.clone()).await.unwrap();

        let client_stream = TcpStream::connect(server.local_addr()).await.unwrap();
        let (client_read_half, client_write_half) = client_stream.into_split();
        let mut client_reader: BoxedReader = Box::new(client_read_half);
        let mut client_writer: BoxedWriter = Box::new(client_write_half);

        write_frame(&mut client_writer, &WireMessage::Hello).await.unwrap();
        assert!(matches!(read_frame(&mut client_reader).await.unwrap(), WireMessage::HelloAck));

        write_frame(
            &mut client_writer,
            &WireMessage::Request { id: 1, body: Request::CreateScript { name: None, source: "x".into() } },
        )
        .await
        .unwrap();

        match read_frame(&mut client_reader).await.unwrap() {
            WireMessage::Response { id: 1, body: ResponseBody::ScriptId(sid) } => assert_eq!(sid, 1),
            other => panic!("unexpected response: {other:?}"),
        }

        assert_eq!(clients.lock().await.len(), 1);
        server.stop();
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire framing and the RPC substrate between a [`HostSession`](crate::host_session::HostSession)
//! and the in-target [`ScriptEngine`](crate::script_engine::ScriptEngine).
//!
//! The spec treats this as "an opaque bidirectional byte stream carrying
//! typed RPC" and is explicit that wire-format byte layout is out of scope —
//! any substrate satisfying that contract is compliant. This module picks a
//! concrete one: length-prefixed JSON frames (`u32` big-endian length
//! followed by a `serde_json`-encoded payload) over any `AsyncRead + AsyncWrite`
//! pair, which is what `perform_attach_to` hooks in this implementation
//! produce.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::ids::AgentScriptId;
use crate::signal::Signal;

/// Maximum frame payload size accepted on the RPC substrate. Guards against
/// a misbehaving peer forcing an unbounded allocation.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    CreateScript {
        name: Option<String>,
        source: String,
    },
    DestroyScript {
        sid: u32,
    },
    LoadScript {
        sid: u32,
    },
    PostMessageToScript {
        sid: u32,
        message: Value,
    },
    EnableDebugger,
    DisableDebugger,
    PostMessageToDebugger {
        message: Value,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub enum ResponseBody {
    Unit,
    ScriptId(u32),
    Err { kind: String, message: Option<String> },
}

#[derive(Debug, Serialize, Deserialize)]
pub enum EventBody {
    ScriptMessage {
        sid: u32,
        message: Value,
        data: Option<Vec<u8>>,
    },
    DebuggerMessage {
        message: Value,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum WireMessage {
    Hello,
    HelloAck,
    Request { id: u64, body: Request },
    Response { id: u64, body: ResponseBody },
    Event(EventBody),
}

pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &WireMessage) -> Result<()> {
    let bytes = serde_json::to_vec(message).map_err(|e| Error::failed(e.to_string()))?;
    let len = u32::try_from(bytes.len()).map_err(|_| Error::failed("frame too large"))?;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| Error::failed(e.to_string()))?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| Error::failed(e.to_string()))?;
    writer.flush().await.map_err(|e| Error::failed(e.to_string()))
}

pub(crate) async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<WireMessage> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| Error::failed(e.to_string()))?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(Error::failed("frame exceeds maximum length"));
    }
    let mut body = BytesMut::zeroed(len as usize);
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| Error::failed(e.to_string()))?;
    serde_json::from_slice(&body).map_err(|e| Error::failed(e.to_string()))
}

/// Notification describing why an [`RpcConnection`] closed, mirroring the
/// upstream "closed by us" vs "peer vanished" distinction.
#[derive(Debug, Clone)]
pub struct ConnectionClosed {
    pub remote_peer_vanished: bool,
    pub error: Option<String>,
}

/// Boxed half of the opaque bidirectional stream `perform_attach_to` hooks
/// produce. Concrete rather than generic so `RpcConnection` can sit behind
/// `dyn HostSession` without infecting every caller with a type parameter.
pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

struct Inner {
    writer: Mutex<BoxedWriter>,
    pending: Mutex<HashMap<u64, oneshot::Sender<ResponseBody>>>,
    next_id: AtomicU64,
    closing: std::sync::atomic::AtomicBool,
    message_from_script: Signal<(AgentScriptId, Value, Option<Vec<u8>>)>,
    message_from_debugger: Signal<Value>,
    closed: Signal<ConnectionClosed>,
}

/// The host-side handle to a bring-up'd RPC session: both the connection
/// (for close/closed-routing) and the typed session proxy live here, since
/// in this implementation they share the same writer and pending-request
/// table. Cloning an `RpcConnection` yields another handle to the same
/// underlying connection, used when a re-export client attaches.
#[derive(Clone)]
pub struct RpcConnection {
    inner: Arc<Inner>,
}

impl RpcConnection {
    /// Bring up RPC over `stream`, spawning a background task that reads
    /// `reader` until it ends. Returns once the peer's `HelloAck` is
    /// observed. Callers are expected to wrap this in a deadline.
    pub async fn open(reader: BoxedReader, mut writer: BoxedWriter) -> Result<Self> {
        write_frame(&mut writer, &WireMessage::Hello).await?;

        let inner = Arc::new(Inner {
            writer: Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closing: std::sync::atomic::AtomicBool::new(false),
            message_from_script: Signal::new(),
            message_from_debugger: Signal::new(),
            closed: Signal::new(),
        });

        let connection = Self { inner };
        connection.await_hello_ack_then_spawn_reader(reader).await?;
        Ok(connection)
    }

    async fn await_hello_ack_then_spawn_reader(&self, mut reader: BoxedReader) -> Result<()> {
        let first = read_frame(&mut reader).await?;
        if !matches!(first, WireMessage::HelloAck) {
            return Err(Error::failed("expected HelloAck during bring-up"));
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(WireMessage::Response { id, body }) => {
                        if let Some(tx) = inner.pending.lock().await.remove(&id) {
                            let _ = tx.send(body);
                        }
                    }
                    Ok(WireMessage::Event(EventBody::ScriptMessage { sid, message, data })) => {
                        inner
                            .message_from_script
                            .emit((AgentScriptId::new(sid), message, data));
                    }
                    Ok(WireMessage::Event(EventBody::DebuggerMessage { message })) => {
                        inner.message_from_debugger.emit(message);
                    }
                    Ok(_) => {
                        warn!("unexpected message on established RPC connection");
                    }
                    Err(error) => {
                        let was_closing = inner.closing.swap(true, Ordering::SeqCst);
                        if !was_closing {
                            debug!(%error, "agent connection ended unexpectedly");
                            inner.closed.emit(ConnectionClosed {
                                remote_peer_vanished: true,
                                error: Some(error.to_string()),
                            });
                        }
                        return;
                    }
                }
            }
        });

        Ok(())
    }

    pub fn closed(&self) -> &Signal<ConnectionClosed> {
        &self.inner.closed
    }

    pub fn message_from_script(&self) -> &Signal<(AgentScriptId, Value, Option<Vec<u8>>)> {
        &self.inner.message_from_script
    }

    pub fn message_from_debugger(&self) -> &Signal<Value> {
        &self.inner.message_from_debugger
    }

    /// Explicit, host-initiated close: suppresses the "peer vanished" close
    /// event the reader task would otherwise emit.
    pub async fn close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut writer = self.inner.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    async fn call(&self, body: Request) -> Result<ResponseBody> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);

        {
            let mut writer = self.inner.writer.lock().await;
            write_frame(&mut writer, &WireMessage::Request { id, body }).await?;
        }

        rx.await.map_err(|_| Error::failed("agent connection closed before replying"))
    }

    pub async fn create_script(&self, name: Option<String>, source: String) -> Result<u32> {
        match self.call(Request::CreateScript { name, source }).await? {
            ResponseBody::ScriptId(sid) => Ok(sid),
            ResponseBody::Err { message, .. } => Err(Error::failed(message.unwrap_or_default())),
            ResponseBody::Unit => Err(Error::failed("malformed create_script response")),
        }
    }

    pub async fn destroy_script(&self, sid: u32) -> Result<()> {
        self.expect_unit(self.call(Request::DestroyScript { sid }).await?)
    }

    pub async fn load_script(&self, sid: u32) -> Result<()> {
        self.expect_unit(self.call(Request::LoadScript { sid }).await?)
    }

    pub async fn post_message_to_script(&self, sid: u32, message: Value) -> Result<()> {
        self.expect_unit(self.call(Request::PostMessageToScript { sid, message }).await?)
    }

    pub async fn enable_debugger(&self) -> Result<()> {
        self.expect_unit(self.call(Request::EnableDebugger).await?)
    }

    pub async fn disable_debugger(&self) -> Result<()> {
        self.expect_unit(self.call(Request::DisableDebugger).await?)
    }

    pub async fn post_message_to_debugger(&self, message: Value) -> Result<()> {
        self.expect_unit(self.call(Request::PostMessageToDebugger { message }).await?)
    }

    fn expect_unit(&self, body: ResponseBody) -> Result<()> {
        match body {
            ResponseBody::Unit => Ok(()),
            ResponseBody::Err { message, .. } => Err(Error::failed(message.unwrap_or_default())),
            ResponseBody::ScriptId(_) => Err(Error::failed("malformed response")),
        }
    }
}

/// Agent-side counterpart: serve requests arriving on `reader`/`writer`
/// against a [`crate::script_engine::ScriptEngine`], until the connection
/// ends.
pub async fn serve_script_engine<R, W>(
    engine: Arc<crate::script_engine::ScriptEngine>,
    mut reader: R,
    mut writer: W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match read_frame(&mut reader).await? {
        WireMessage::Hello => {}
        _ => return Err(Error::failed("expected Hello during bring-up")),
    }
    write_frame(&mut writer, &WireMessage::HelloAck).await?;

    let mut script_messages = engine.message_from_script().subscribe();
    let mut debugger_messages = engine.message_from_debugger().subscribe();

    loop {
        tokio::select! {
            frame = read_frame(&mut reader) => {
                let WireMessage::Request { id, body } = frame? else {
                    return Err(Error::failed("expected Request frame"));
                };
                let response = dispatch(&engine, body).await;
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

async fn dispatch(engine: &Arc<crate::script_engine::ScriptEngine>, request: Request) -> ResponseBody {
    let result = match request {
        Request::CreateScript { name, source } => {
            return match engine.create_script(name, source).await {
                Ok(sid) => ResponseBody::ScriptId(sid.value()),
                Err(error) => ResponseBody::Err {
                    kind: error.as_str().to_string(),
                    message: Some(error.to_string()),
                },
            };
        }
        Request::DestroyScript { sid } => engine.destroy_script(AgentScriptId::new(sid)).await,
        Request::LoadScript { sid } => engine.load_script(AgentScriptId::new(sid)).await,
        Request::PostMessageToScript { sid, message } => {
            engine.post_message_to_script(AgentScriptId::new(sid), message).await
        }
        Request::EnableDebugger => {
            engine.enable_debugger();
            Ok(())
        }
        Request::DisableDebugger => {
            engine.disable_debugger();
            Ok(())
        }
        Request::PostMessageToDebugger { message } => {
            engine.post_message_to_debugger(message);
            Ok(())
        }
    };
    match result {
        Ok(()) => ResponseBody::Unit,
        Err(error) => ResponseBody::Err {
            kind: error.as_str().to_string(),
            message: Some(error.to_string()),
        },
    }
}

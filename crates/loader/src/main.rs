// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loader stub: a standalone binary representative of the native
//! injector/loader this system bootstraps into a target process. The real
//! loader is binary-specific, OS-specific, and largely mechanical, so it's
//! out of scope here. What this binary implements is its handshake with the
//! attach manager over the callback Unix-domain socket:
//!
//! 1. Connect to `<data_dir>/callback`.
//! 2. Send the loader's own pid as a decimal string, length-prefixed by a
//!    single `u8`.
//! 3. Receive one length-prefixed value: the host↔agent pipe address.
//! 4. "`dlopen` the agent image and invoke `frida_agent_main`" — simulated
//!    here as a logged no-op, since the concrete scripting runtime is out of
//!    scope.
//! 5. Receive one more length-prefixed value: permission to resume, then
//!    exit.
//!
//! All values on the callback socket are framed as `u8 length || bytes`.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, info};

/// Maximum length of a single framed value on the callback socket: the
/// frame's own length prefix is one byte, so 255 is the hard ceiling.
const MAX_FRAME_LEN: usize = 255;

#[derive(Parser, Debug)]
#[command(name = "tether-loader", about = "Injected-process loader stub")]
struct Args {
    /// Directory containing the `callback` Unix-domain socket. In a real
    /// injection this path is patched into the loader binary at injection
    /// time by overwriting a known magic string; here it's a plain CLI flag.
    #[arg(long, env = "TETHER_LOADER_DATA_DIR")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    run(&args.data_dir).await
}

async fn run(data_dir: &std::path::Path) -> Result<()> {
    let socket_path = data_dir.join("callback");
    debug!(path = %socket_path.display(), "connecting to callback socket");
    let mut stream = UnixStream::connect(&socket_path)
        .await
        .with_context(|| format!("connecting to {}", socket_path.display()))?;

    let pid = std::process::id();
    write_framed(&mut stream, pid.to_string().as_bytes()).await?;
    info!(pid, "sent pid to host");

    let pipe_address = read_framed(&mut stream).await?;
    let pipe_address = String::from_utf8(pipe_address).context("pipe address was not valid UTF-8")?;
    info!(%pipe_address, "received host-agent pipe address");

    // Real loader: dlopen(agent_image); frida_agent_main(pipe_address, NULL, 0)
    // on a dedicated worker thread, leaving the constructor free to return.
    // The concrete scripting runtime isn't present in this workspace, so
    // simulate the call as a logged no-op on a spawned thread, matching the
    // real loader's threading shape.
    let handle = std::thread::spawn(move || {
        debug!(%pipe_address, "simulated dlopen + frida_agent_main");
    });

    let permission = read_framed(&mut stream).await?;
    info!(bytes = permission.len(), "received permission to resume");

    handle.join().map_err(|_| anyhow::anyhow!("agent worker thread panicked"))?;
    Ok(())
}

async fn write_framed(stream: &mut UnixStream, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        bail!("payload of {} bytes exceeds the single-byte length prefix", payload.len());
    }
    stream.write_all(&[payload.len() as u8]).await?;
    stream.write_all(payload).await?;
    Ok(())
}

async fn read_framed(stream: &mut UnixStream) -> Result<Vec<u8>> {
    let mut len = [0u8; 1];
    stream.read_exact(&mut len).await?;
    let mut buf = vec![0u8; len[0] as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn performs_the_full_callback_handshake() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("callback");
        let listener = UnixListener::bind(&socket_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();

            let pid_bytes = read_framed(&mut conn).await.unwrap();
            let pid: u32 = String::from_utf8(pid_bytes).unwrap().parse().unwrap();
            assert_eq!(pid, std::process::id());

            write_framed(&mut conn, b"pipe:abcdef").await.unwrap();
            write_framed(&mut conn, b"resume").await.unwrap();
        });

        run(dir.path()).await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn missing_socket_is_a_clean_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(dir.path()).await.unwrap_err();
        assert!(err.to_string().contains("connecting to"));
    }
}

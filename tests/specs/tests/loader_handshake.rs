// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Spawns the real `tether-loader` binary and drives it through its
//! callback handshake over a real Unix-domain socket.

use std::time::Duration;

use tokio::net::UnixListener;

const TIMEOUT: Duration = Duration::from_secs(10);

async fn read_framed(stream: &mut tokio::net::UnixStream) -> anyhow::Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;
    let mut len = [0u8; 1];
    stream.read_exact(&mut len).await?;
    let mut buf = vec![0u8; len[0] as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_framed(stream: &mut tokio::net::UnixStream, payload: &[u8]) -> anyhow::Result<()> {
    use tokio::io::AsyncWriteExt;
    stream.write_all(&[payload.len() as u8]).await?;
    stream.write_all(payload).await?;
    Ok(())
}

#[tokio::test]
async fn loader_binary_completes_the_callback_handshake() -> anyhow::Result<()> {
    let binary = tether_specs::loader_binary();
    if !binary.exists() {
        // Not yet built by this workspace's own test run; skip rather than
        // fail, matching how the harness treats a missing companion binary.
        eprintln!("skipping: {} not built", binary.display());
        return Ok(());
    }

    let dir = tempfile::tempdir()?;
    let socket_path = dir.path().join("callback");
    let listener = UnixListener::bind(&socket_path)?;

    let mut child = tokio::process::Command::new(&binary)
        .arg("--data-dir")
        .arg(dir.path())
        .kill_on_drop(true)
        .spawn()?;

    let accept = tokio::time::timeout(TIMEOUT, listener.accept());
    let (mut conn, _addr) = accept.await??;

    let pid_bytes = tokio::time::timeout(TIMEOUT, read_framed(&mut conn)).await??;
    let pid: u32 = String::from_utf8(pid_bytes)?.parse()?;
    assert!(pid > 0);

    write_framed(&mut conn, b"pipe:loopback").await?;
    write_framed(&mut conn, b"resume").await?;

    let status = tokio::time::timeout(TIMEOUT, child.wait()).await??;
    assert!(status.success());

    Ok(())
}

#[tokio::test]
async fn loader_binary_exits_with_error_when_socket_is_missing() -> anyhow::Result<()> {
    let binary = tether_specs::loader_binary();
    if !binary.exists() {
        eprintln!("skipping: {} not built", binary.display());
        return Ok(());
    }

    let dir = tempfile::tempdir()?;
    let status = tokio::time::timeout(
        TIMEOUT,
        tokio::process::Command::new(&binary).arg("--data-dir").arg(dir.path()).status(),
    )
    .await??;

    assert!(!status.success());
    Ok(())
}

//! The Unix socket listener and the per-connection session tasks.
//!
//! Each accepted connection gets a reader and a writer task. The reader decodes length-framed
//! requests and forwards them to the dispatcher tagged with the session's client id; whatever
//! ends it (EOF, a broken frame, an IO error) is turned into a final Goodbye so teardown always
//! flows through the dispatcher. The writer drains the session's outbound queue until the
//! dispatcher closes it.

use crate::dispatch::Request;
use crate::state::SharedState;

use libhirc_common::ClientId;
use libhirc_wire as wire;
use libhirc_wire::DaemonMsg;

use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixListener;
use tokio::sync::mpsc;

/// Bind the daemon socket, creating the enclosing directory and replacing a stale socket file
/// from an earlier run.
pub(crate) fn bind(socket_path: &Path) -> Result<UnixListener, std::io::Error> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    UnixListener::bind(socket_path)
}

pub(crate) async fn task(
    listener: UnixListener,
    state: SharedState,
    snd_req: mpsc::UnboundedSender<Request>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let (client_id, rcv_out) = state.accept_client();
                info!("accepted local {}", client_id);
                let (read_half, write_half) = stream.into_split();
                tokio::task::spawn_local(reader_task(client_id, read_half, snd_req.clone()));
                tokio::task::spawn_local(writer_task(client_id, write_half, rcv_out));
            }
            Err(err) => {
                warn!("accept failed: {}", err);
            }
        }
    }
}

async fn reader_task(
    client_id: ClientId,
    mut read_half: OwnedReadHalf,
    snd_req: mpsc::UnboundedSender<Request>,
) {
    let mut parse_buf: Vec<u8> = Vec::with_capacity(1024);
    let mut read_buf: [u8; 1024] = [0; 1024];

    'session: loop {
        match read_half.read(&mut read_buf).await {
            Err(err) => {
                debug!("{}: read error: {}", client_id, err);
                break;
            }
            Ok(0) => {
                debug!("{}: EOF", client_id);
                break;
            }
            Ok(bytes) => {
                parse_buf.extend_from_slice(&read_buf[0..bytes]);
                while let Some(req) = wire::parse_daemon_request(&mut parse_buf) {
                    match req {
                        Err(err) => {
                            // Malformed envelope: no resync attempt, the session is over.
                            warn!("{}: bad envelope: {}", client_id, err);
                            break 'session;
                        }
                        Ok(req) => {
                            if req.source != client_id {
                                debug!(
                                    "{}: envelope claims to be from client {}",
                                    client_id, req.source.0
                                );
                            }
                            if snd_req.send((client_id, req.msg)).is_err() {
                                break 'session;
                            }
                        }
                    }
                }
            }
        }
    }

    // Implicit goodbye: whatever ended the reader ends the session.
    let _ = snd_req.send((client_id, DaemonMsg::Goodbye));
}

async fn writer_task(
    client_id: ClientId,
    mut write_half: OwnedWriteHalf,
    mut rcv_out: mpsc::UnboundedReceiver<wire::ClientMsg>,
) {
    while let Some(msg) = rcv_out.recv().await {
        let frame = wire::encode_client_msg(&msg);
        if let Err(err) = write_half.write_all(&frame).await {
            debug!("{}: write error: {}", client_id, err);
            break;
        }
    }
    // Queue closed (teardown) or the socket broke; either way the session is done.
    let _ = write_half.shutdown().await;
}

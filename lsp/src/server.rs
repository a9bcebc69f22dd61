//! Stdio transport and session supervisor.
//!
//! A reader task decodes frames into [`Message`]s, a writer task frames
//! whatever the session emits, and the supervisor runs one [`Session`] after
//! another until the client exits. A restarted session inherits the client
//! connection, the initialize handshake and the client's latest settings.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::codec::{FrameReader, FrameWriter};
use crate::protocol::Message;
use crate::session::{EngineOptions, Session, SessionExit};
use crate::toolchain::Toolchain;

const CLIENT_CHANNEL_CAPACITY: usize = 64;

const WRITER_CHANNEL_CAPACITY: usize = 256;

/// Serve one client over `input`/`output` until it exits.
///
/// Returns the process exit code: `0` after `shutdown` + `exit`, `1` when the
/// client exits without `shutdown` or the stream ends.
pub async fn serve<R, W>(input: R, output: W, toolchain: Toolchain, options: EngineOptions) -> i32
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let options = Arc::new(options);

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Value>(WRITER_CHANNEL_CAPACITY);
    let writer_handle = tokio::spawn(async move {
        let mut writer = FrameWriter::new(output);
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = writer.write_frame(&frame).await {
                tracing::warn!("client write error: {e}");
                break;
            }
        }
    });

    let (client_tx, mut client_rx) = mpsc::channel::<Message>(CLIENT_CHANNEL_CAPACITY);
    let reader_handle = tokio::spawn(async move {
        let mut reader = FrameReader::new(input);
        loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => match Message::from_value(frame) {
                    Ok(message) => {
                        if client_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("ignoring frame: {e}"),
                },
                Ok(None) => {
                    tracing::info!("client closed stdin");
                    break;
                }
                Err(e) => {
                    tracing::error!("client read error: {e:#}");
                    break;
                }
            }
        }
    });

    let mut session = Session::new(toolchain.clone(), Arc::clone(&options), outbound_tx.clone());
    let code = loop {
        match session.run(&mut client_rx).await {
            SessionExit::Exit { code } => break code,
            SessionExit::Restart { reason, handshake } => {
                tracing::warn!(%reason, "session restarted");
                session = Session::restore(
                    handshake,
                    toolchain.clone(),
                    Arc::clone(&options),
                    outbound_tx.clone(),
                );
            }
        }
    };

    // Let the writer drain what the last session queued.
    drop(outbound_tx);
    if let Err(e) = writer_handle.await {
        tracing::warn!("writer task failed: {e}");
    }
    reader_handle.abort();
    code
}

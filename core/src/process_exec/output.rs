use nospace_protocol::SessionId;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::mpsc;

use crate::OutputStream;

const READ_CHUNK_BYTES: usize = 8 * 1024;

pub(super) type OutputChunk = (OutputStream, String);

/// Decodes a byte stream as UTF-8 across chunk boundaries. A multi-byte
/// character split between two reads is held back until it is complete;
/// invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub(super) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(super) fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut decoded = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    self.pending.clear();
                    return decoded;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid_up_to);
                            return decoded;
                        }
                        Some(invalid) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + invalid);
                        }
                    }
                }
            }
        }
    }

    /// Flushes whatever is left at end of stream.
    pub(super) fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Forwards one child pipe to the supervisor until EOF, a read error, or
/// the supervisor going away.
pub(super) fn spawn_reader<R>(
    mut reader: R,
    stream: OutputStream,
    session_id: SessionId,
    tx: mpsc::UnboundedSender<OutputChunk>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut decoder = Utf8Decoder::default();
        let mut buf = vec![0u8; READ_CHUNK_BYTES];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let text = decoder.push(&buf[..n]);
                    if !text.is_empty() && tx.send((stream, text)).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    tracing::debug!(%session_id, %stream, error = %err, "[process_exec] pipe read failed");
                    break;
                }
            }
        }
        let rest = decoder.finish();
        if !rest.is_empty() {
            let _ = tx.send((stream, rest));
        }
    });
}

/// Feeds queued input to the child. Ends when the session closes its side
/// of the channel, which closes the child's stdin.
pub(super) fn spawn_stdin_writer(
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    session_id: SessionId,
) {
    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            let written = match stdin.write_all(&bytes).await {
                Ok(()) => stdin.flush().await,
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                tracing::debug!(%session_id, error = %err, "[process_exec] stdin write failed, dropping input");
                break;
            }
        }
    });
}

//! Writer task for the shell's stdin.
//!
//! The single writer consumes statement payloads in the order the control
//! loop dispatched them and follows each with its marker command.

use log::{debug, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ShellError, ShellResult};
use crate::protocol::Marker;

const TARGET: &str = "shelldb::writer";

/// Capacity of the control loop to writer queue.
pub(crate) const WRITE_QUEUE_CAPACITY: usize = 1;

/// A statement and the marker that must follow it.
pub(crate) type Outbound = (Vec<u8>, Marker);

/// Write queued statements until the queue closes or the lifetime ends.
///
/// On queue closure stdin is shut down so the shell sees end of input and
/// exits. A failed write ends the connection's lifetime.
pub(crate) async fn writer_loop<W>(
    mut stdin: W,
    mut queue: mpsc::Receiver<Outbound>,
    lifetime: CancellationToken,
) -> ShellResult<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            item = queue.recv() => item,
            _ = lifetime.cancelled() => {
                debug!(target: TARGET, "Writer task cancelled, shutting down");
                return Ok(());
            }
        };
        let Some((mut payload, marker)) = next else {
            break;
        };
        payload.extend_from_slice(&marker.command());

        let written = tokio::select! {
            result = stdin.write_all(&payload) => result,
            _ = lifetime.cancelled() => return Ok(()),
        };
        if let Err(e) = written {
            warn!(target: TARGET, "Write to shell failed: {}", e);
            lifetime.cancel();
            return Err(ShellError::Write(e));
        }
    }

    debug!(target: TARGET, "Write queue closed, closing shell input");
    let _ = stdin.shutdown().await;
    Ok(())
}

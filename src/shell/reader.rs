//! Reader task for the shell's merged output.
//!
//! The reader owns the output buffer and one [`Framer`]. Everything before
//! the active request's marker line belongs to that request. At the marker
//! the request is completed and the next one is taken from the registration
//! queue before any remaining buffered bytes are looked at.

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ShellError, ShellResult};
use crate::protocol::{Framer, Marker, Scan};

use super::job::Active;

const TARGET: &str = "shelldb::reader";

/// Capacity of the control loop to reader registration queue.
pub(crate) const REGISTRATION_CAPACITY: usize = 1;

pub(crate) async fn reader_loop<R>(
    mut output: R,
    mut registrations: mpsc::Receiver<Active>,
    lifetime: CancellationToken,
    read_chunk: usize,
) -> ShellResult<()>
where
    R: AsyncRead + Unpin,
{
    let read_chunk = read_chunk.max(1);
    let mut buf: Vec<u8> = Vec::with_capacity(read_chunk);
    let mut framer = Framer::new(&Marker::inert());

    loop {
        let next = tokio::select! {
            biased;
            _ = lifetime.cancelled() => None,
            active = registrations.recv() => active,
        };
        let Some(active) = next else {
            debug!(target: TARGET, "No more requests, reader exiting");
            return Ok(());
        };
        framer.expect(&active.marker);

        // scan what is buffered, reading more until the marker shows up
        loop {
            let mut boundary = false;
            while buf.len() > framer.pending() {
                match framer.scan(&buf) {
                    Scan::Data(n) => {
                        active.forward(&buf[..n]);
                        buf.drain(..n);
                        break;
                    }
                    Scan::Boundary { data, consumed } => {
                        active.forward(&buf[..data]);
                        buf.drain(..consumed);
                        boundary = true;
                        break;
                    }
                }
            }
            if boundary {
                active.complete();
                break;
            }

            if buf.capacity() - buf.len() < read_chunk * 3 / 4 {
                buf.reserve(read_chunk);
            }
            let read = tokio::select! {
                biased;
                _ = lifetime.cancelled() => {
                    debug!(target: TARGET, "Reader task cancelled, abandoning request");
                    return Ok(());
                }
                read = output.read_buf(&mut buf) => read,
            };
            match read {
                Ok(0) => {
                    warn!(target: TARGET, "Shell output closed with a request in flight");
                    lifetime.cancel();
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(target: TARGET, "Read from shell failed: {}", e);
                    lifetime.cancel();
                    return Err(ShellError::Read(e));
                }
            }
        }
    }
}

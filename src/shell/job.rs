//! Requests as they travel from the caller through the control loop to the
//! reader task.

use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::coordinator::LockHold;
use crate::protocol::Marker;

/// Output delivered to the caller of one request.
#[derive(Debug)]
pub(crate) enum Output {
    /// Bytes that precede the request's marker
    Data(Vec<u8>),
    /// The marker was seen; no more output follows
    End,
}

/// A request queued on a connection's inbox.
pub(crate) struct Job {
    /// Answered with the shared lock (if any) when the control loop takes
    /// the job, so the caller's lock choice is consistent with suspension.
    pub ticket: oneshot::Sender<Option<Arc<RwLock<()>>>>,
    /// Statement text, sent once the caller holds the lock
    pub payload: oneshot::Receiver<Vec<u8>>,
    pub request: Active,
}

/// The part of a request the reader task needs.
///
/// Dropping it without [`Active::complete`] closes the output without an
/// end event, which the caller sees as a lost connection.
pub(crate) struct Active {
    pub marker: Marker,
    output: mpsc::UnboundedSender<Output>,
    /// Cancelled when the caller stops listening
    token: CancellationToken,
    /// Cancelled once the request is over, whatever the outcome
    done: CancellationToken,
    hold: LockHold,
}

impl Active {
    pub fn new(
        marker: Marker,
        output: mpsc::UnboundedSender<Output>,
        token: CancellationToken,
        hold: LockHold,
    ) -> Self {
        Self {
            marker,
            output,
            token,
            done: CancellationToken::new(),
            hold,
        }
    }

    pub fn done_token(&self) -> CancellationToken {
        self.done.clone()
    }

    /// Deliver request data unless the caller has gone away.
    pub fn forward(&self, data: &[u8]) {
        if data.is_empty() || self.token.is_cancelled() {
            return;
        }
        let _ = self.output.send(Output::Data(data.to_vec()));
    }

    /// The marker was seen.
    pub fn complete(self) {
        let _ = self.output.send(Output::End);
    }
}

impl Drop for Active {
    fn drop(&mut self) {
        self.token.cancel();
        self.hold.release();
        self.done.cancel();
    }
}

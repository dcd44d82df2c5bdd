//! Per-connection control loop.
//!
//! The control loop is the only place requests enter a connection. It hands
//! each job's statement to the writer and then registers the job with the
//! reader, one job at a time, and it is where a suspend request from the
//! coordinator turns into lock activation.

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::coordinator::LockSlot;

use super::job::{Active, Job};
use super::writer::Outbound;

const TARGET: &str = "shelldb::control";

/// Capacity of the connection's request inbox.
pub(crate) const INBOX_CAPACITY: usize = 1;

pub(crate) struct ControlLoop {
    pub inbox: mpsc::Receiver<Job>,
    pub suspend: oneshot::Receiver<()>,
    pub writer: mpsc::Sender<Outbound>,
    pub reader: mpsc::Sender<Active>,
    pub lifetime: CancellationToken,
    pub slot: Arc<LockSlot>,
}

enum Flow {
    Continue,
    Stop,
}

impl ControlLoop {
    pub async fn run(self) {
        let ControlLoop {
            mut inbox,
            suspend,
            writer,
            reader,
            lifetime,
            slot,
        } = self;
        let mut suspend = Some(suspend);
        // completion of the most recently dispatched request
        let mut in_flight: Option<CancellationToken> = None;

        loop {
            tokio::select! {
                biased;
                _ = lifetime.cancelled() => break,
                signal = wait_suspend(&mut suspend) => {
                    suspend = None;
                    if signal.is_ok() {
                        debug!(target: TARGET, "Suspending for lock activation");
                        if let Some(done) = in_flight.take() {
                            tokio::select! {
                                _ = done.cancelled() => {}
                                // the reader abandons the request as it unwinds
                                _ = lifetime.cancelled() => {}
                            }
                        }
                        slot.activate();
                    }
                }
                job = inbox.recv() => {
                    let Some(job) = job else {
                        debug!(target: TARGET, "Inbox closed");
                        break;
                    };
                    let done = job.request.done_token();
                    match dispatch(job, &writer, &reader, &lifetime, &slot).await {
                        Flow::Continue => in_flight = Some(done),
                        Flow::Stop => break,
                    }
                }
            }
        }

        // a suspend that raced with shutdown must still activate the lock,
        // or the joining sibling would wait forever
        if let Some(mut rx) = suspend.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                slot.activate();
            }
        }
        lifetime.cancel();
        debug!(target: TARGET, "Control loop exiting");
    }
}

async fn wait_suspend(
    suspend: &mut Option<oneshot::Receiver<()>>,
) -> Result<(), oneshot::error::RecvError> {
    match suspend {
        Some(rx) => rx.await,
        None => std::future::pending().await,
    }
}

/// Forward one job to the writer and the reader.
async fn dispatch(
    job: Job,
    writer: &mpsc::Sender<Outbound>,
    reader: &mpsc::Sender<Active>,
    lifetime: &CancellationToken,
    slot: &LockSlot,
) -> Flow {
    let Job {
        ticket,
        payload,
        request,
    } = job;

    if ticket.send(slot.current()).is_err() {
        debug!(target: TARGET, "Caller left before dispatch");
        return Flow::Continue;
    }

    let payload = tokio::select! {
        biased;
        _ = lifetime.cancelled() => return Flow::Stop,
        payload = payload => match payload {
            Ok(payload) => payload,
            Err(_) => {
                debug!(target: TARGET, "Caller gave up before sending its statement");
                return Flow::Continue;
            }
        },
    };

    let sent = tokio::select! {
        biased;
        _ = lifetime.cancelled() => return Flow::Stop,
        sent = writer.send((payload, request.marker.clone())) => sent,
    };
    if sent.is_err() {
        warn!(target: TARGET, "Writer task is gone");
        return Flow::Stop;
    }

    let registered = tokio::select! {
        biased;
        _ = lifetime.cancelled() => return Flow::Stop,
        registered = reader.send(request) => registered,
    };
    if registered.is_err() {
        warn!(target: TARGET, "Reader task is gone");
        return Flow::Stop;
    }
    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::LockHold;
    use crate::protocol::Marker;
    use crate::shell::job::Output;
    use std::time::Duration;

    struct Harness {
        inbox: mpsc::Sender<Job>,
        suspend: Option<oneshot::Sender<()>>,
        writes: mpsc::Receiver<Outbound>,
        registrations: mpsc::Receiver<Active>,
        lifetime: CancellationToken,
        slot: Arc<LockSlot>,
        task: tokio::task::JoinHandle<()>,
    }

    fn harness() -> Harness {
        let (inbox, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (suspend, suspend_rx) = oneshot::channel();
        let (writer, writes) = mpsc::channel(1);
        let (reader, registrations) = mpsc::channel(1);
        let lifetime = CancellationToken::new();
        let slot = Arc::new(LockSlot::new());
        let task = tokio::spawn(
            ControlLoop {
                inbox: inbox_rx,
                suspend: suspend_rx,
                writer,
                reader,
                lifetime: lifetime.clone(),
                slot: slot.clone(),
            }
            .run(),
        );
        Harness {
            inbox,
            suspend: Some(suspend),
            writes,
            registrations,
            lifetime,
            slot,
            task,
        }
    }

    struct Caller {
        ticket: oneshot::Receiver<Option<Arc<tokio::sync::RwLock<()>>>>,
        payload: oneshot::Sender<Vec<u8>>,
        output: mpsc::UnboundedReceiver<Output>,
    }

    fn job() -> (Job, Caller) {
        let (ticket_tx, ticket) = oneshot::channel();
        let (payload, payload_rx) = oneshot::channel();
        let (out_tx, output) = mpsc::unbounded_channel();
        let request = Active::new(
            Marker::inert(),
            out_tx,
            CancellationToken::new(),
            LockHold::default(),
        );
        (
            Job {
                ticket: ticket_tx,
                payload: payload_rx,
                request,
            },
            Caller {
                ticket,
                payload,
                output,
            },
        )
    }

    #[tokio::test]
    async fn writes_before_registering() {
        let mut h = harness();
        let (job, caller) = job();
        h.inbox.send(job).await.unwrap();
        assert!(caller.ticket.await.unwrap().is_none());
        caller.payload.send(b"select 1;".to_vec()).unwrap();

        let (payload, marker) = h.writes.recv().await.unwrap();
        assert_eq!(payload, b"select 1;".to_vec());
        assert_eq!(marker, Marker::inert());
        let active = h.registrations.recv().await.unwrap();
        active.complete();
        drop(h.inbox);
        h.task.await.unwrap();
        assert!(h.lifetime.is_cancelled());
    }

    #[tokio::test]
    async fn abandoned_payload_writes_nothing() {
        let mut h = harness();
        let (job, caller) = job();
        h.inbox.send(job).await.unwrap();
        let Caller {
            ticket,
            payload,
            mut output,
        } = caller;
        ticket.await.unwrap();
        drop(payload);
        assert!(output.recv().await.is_none());
        drop(h.inbox);
        h.task.await.unwrap();
        assert!(h.writes.recv().await.is_none());
    }

    #[tokio::test]
    async fn suspend_waits_for_in_flight_request() {
        let mut h = harness();
        let (job, caller) = job();
        h.inbox.send(job).await.unwrap();
        caller.ticket.await.unwrap();
        caller.payload.send(Vec::new()).unwrap();
        h.writes.recv().await.unwrap();
        let active = h.registrations.recv().await.unwrap();

        h.suspend.take().unwrap().send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!h.slot.is_active(), "lock must wait for the request");

        active.complete();
        tokio::time::timeout(Duration::from_secs(1), h.slot.wait_active())
            .await
            .expect("lock activated after completion");
    }

    #[tokio::test]
    async fn ticket_carries_active_lock() {
        let h = harness();
        h.suspend.unwrap().send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), h.slot.wait_active())
            .await
            .unwrap();
        let (job, caller) = job();
        h.inbox.send(job).await.unwrap();
        assert!(caller.ticket.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn lifetime_cancel_abandons_pending_job() {
        let h = harness();
        let (job, caller) = job();
        h.inbox.send(job).await.unwrap();
        let Caller {
            ticket,
            payload: _payload,
            mut output,
        } = caller;
        ticket.await.unwrap();
        h.lifetime.cancel();
        assert!(output.recv().await.is_none(), "no end event");
        h.task.await.unwrap();
    }
}

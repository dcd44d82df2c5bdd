//! Connections and prepared statements.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::debug;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::connector::Connector;
use crate::coordinator::{LockHold, LockMode};
use crate::error::{ShellError, ShellResult};
use crate::protocol::{Marker, RowDecoder, Step};
use crate::rows::Rows;
use crate::shell::control::{ControlLoop, INBOX_CAPACITY};
use crate::shell::job::{Active, Job, Output};
use crate::shell::process::{self, ShellProcess};
use crate::shell::reader::{REGISTRATION_CAPACITY, reader_loop};
use crate::shell::writer::{WRITE_QUEUE_CAPACITY, writer_loop};
use crate::sql::Statement;
use crate::value::Value;

/// The background tasks of one connection.
struct Tasks {
    control: JoinHandle<()>,
    writer: JoinHandle<ShellResult<()>>,
    reader: JoinHandle<ShellResult<()>>,
    process: JoinHandle<ShellResult<()>>,
}

impl Tasks {
    /// Wait for every task and return the first error, in the order
    /// process, write, read.
    async fn join(self) -> ShellResult<()> {
        let control = self.control.await;
        let writer = flatten(self.writer.await);
        let reader = flatten(self.reader.await);
        let process = flatten(self.process.await);
        process?;
        writer?;
        reader?;
        control?;
        Ok(())
    }
}

fn flatten(joined: Result<ShellResult<()>, tokio::task::JoinError>) -> ShellResult<()> {
    joined.map_err(ShellError::from).and_then(|result| result)
}

/// One shell process serving requests one at a time.
///
/// Requests on a connection never overlap: each statement's output ends
/// before the next one's begins. Dropping a connection without
/// [`close`](Connection::close) kills its shell.
pub struct Connection {
    id: u64,
    connector: Connector,
    inbox: Option<mpsc::Sender<Job>>,
    lifetime: CancellationToken,
    closing: Arc<AtomicBool>,
    tasks: Option<Tasks>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("target", &self.connector.name())
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl Connection {
    /// Start the tasks for a freshly spawned shell.
    ///
    /// Returns the connection and the sender the coordinator uses to ask it
    /// to suspend.
    pub(crate) fn start(
        connector: Connector,
        id: u64,
        shell: ShellProcess,
    ) -> (Self, oneshot::Sender<()>) {
        let ShellProcess {
            child,
            stdin,
            output,
        } = shell;
        let lifetime = CancellationToken::new();
        let closing = Arc::new(AtomicBool::new(false));

        let (inbox, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let (register_tx, register_rx) = mpsc::channel(REGISTRATION_CAPACITY);
        let (suspend_tx, suspend_rx) = oneshot::channel();

        let read_chunk = connector.settings().read_chunk;
        let tasks = Tasks {
            writer: tokio::spawn(writer_loop(stdin, write_rx, lifetime.clone())),
            reader: tokio::spawn(reader_loop(
                output,
                register_rx,
                lifetime.clone(),
                read_chunk,
            )),
            process: tokio::spawn(process::wait_loop(
                child,
                lifetime.clone(),
                closing.clone(),
            )),
            control: tokio::spawn(
                ControlLoop {
                    inbox: inbox_rx,
                    suspend: suspend_rx,
                    writer: write_tx,
                    reader: register_tx,
                    lifetime: lifetime.clone(),
                    slot: connector.slot(),
                }
                .run(),
            ),
        };

        let connection = Self {
            id,
            connector,
            inbox: Some(inbox),
            lifetime,
            closing,
            tasks: Some(tasks),
        };
        (connection, suspend_tx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name of the database this connection was opened against.
    pub fn target(&self) -> &str {
        self.connector.name()
    }

    /// Whether the connection can still serve requests.
    pub fn is_valid(&self) -> bool {
        self.inbox.is_some() && !self.lifetime.is_cancelled()
    }

    /// Resolves when the connection stops being usable.
    pub(crate) fn lifetime(&self) -> &CancellationToken {
        &self.lifetime
    }

    /// Scan `sql` for later execution.
    pub fn prepare(&self, sql: &str) -> ShellResult<PreparedStatement<'_>> {
        Ok(PreparedStatement {
            connection: self,
            statement: Statement::parse(sql)?,
        })
    }

    /// Run a statement for its effect.
    ///
    /// Rows the statement produces are discarded. Once the database is
    /// shared with another connection, the statement runs exclusively.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        params: &[Value],
    ) -> ShellResult<()> {
        let text = Statement::parse(sql)?.bind(params)?;
        self.execute_text(cancel, text).await
    }

    /// Run a statement and stream its rows.
    ///
    /// Returns once the column names are known (or the statement produced
    /// no output at all).
    pub async fn query(
        &self,
        cancel: &CancellationToken,
        sql: &str,
        params: &[Value],
    ) -> ShellResult<Rows> {
        let text = Statement::parse(sql)?.bind(params)?;
        self.query_text(cancel, text).await
    }

    /// Round-trip an empty request through the shell.
    pub async fn ping(&self, cancel: &CancellationToken) -> ShellResult<()> {
        let mut request = self.submit(cancel, Vec::new(), LockMode::Unlocked).await?;
        while request.recv().await?.is_some() {}
        Ok(())
    }

    /// Stop the shell and wait for every task to finish.
    ///
    /// Returns the first error recorded during the connection's life, in
    /// the order process exit, write, read.
    pub async fn close(mut self) -> ShellResult<()> {
        debug!(target: "shelldb::control", "Closing connection {}", self.id);
        // a connection that already failed keeps its exit status as an error
        if !self.lifetime.is_cancelled() {
            self.closing.store(true, Ordering::Release);
        }
        self.inbox.take();
        let result = match self.tasks.take() {
            Some(tasks) => tasks.join().await,
            None => Ok(()),
        };
        self.connector.leave(self.id);
        result
    }

    async fn execute_text(&self, cancel: &CancellationToken, text: String) -> ShellResult<()> {
        let mut request = self
            .submit(cancel, text.into_bytes(), LockMode::Exclusive)
            .await?;
        let mut decoder = RowDecoder::new();
        while let Some(data) = request.recv().await? {
            decoder.push(&data);
            loop {
                match decoder.step()? {
                    Step::NeedInput => break,
                    Step::Failure { kind, message } => {
                        return Err(ShellError::shell(kind, message));
                    }
                    Step::Header | Step::Row(_) => {}
                }
            }
        }
        decoder.finish()?;
        Ok(())
    }

    async fn query_text(&self, cancel: &CancellationToken, text: String) -> ShellResult<Rows> {
        let request = self
            .submit(cancel, text.into_bytes(), LockMode::Shared)
            .await?;
        Rows::start(request).await
    }

    /// Queue a request and hand over its statement once any lock is held.
    async fn submit(
        &self,
        cancel: &CancellationToken,
        payload: Vec<u8>,
        mode: LockMode,
    ) -> ShellResult<Request> {
        let inbox = match &self.inbox {
            Some(inbox) if !self.lifetime.is_cancelled() => inbox,
            _ => return Err(ShellError::ConnectionLost),
        };
        if cancel.is_cancelled() {
            return Err(ShellError::Cancelled);
        }

        let settings = self.connector.settings();
        let token = cancel.child_token();
        let hold = LockHold::default();
        let (output_tx, output) = mpsc::unbounded_channel();
        let (ticket_tx, ticket) = oneshot::channel();
        let (payload_tx, payload_rx) = oneshot::channel();

        let request = Request {
            output,
            token: token.clone(),
            hold: hold.clone(),
            deadline: settings.statement_timeout_ms.map(Deadline::after),
            finished: false,
        };
        let job = Job {
            ticket: ticket_tx,
            payload: payload_rx,
            request: Active::new(
                Marker::for_mode(settings.marker),
                output_tx,
                token,
                hold.clone(),
            ),
        };

        self.guard(&request, inbox.send(job))
            .await?
            .map_err(|_| ShellError::ConnectionLost)?;
        let lock = self
            .guard(&request, ticket)
            .await?
            .map_err(|_| ShellError::ConnectionLost)?;
        if let Some(lock) = lock {
            let guard = self.guard(&request, mode.acquire(lock)).await?;
            hold.set(guard);
        }
        payload_tx
            .send(payload)
            .map_err(|_| ShellError::ConnectionLost)?;
        Ok(request)
    }

    /// Run `fut` unless the request is cancelled, times out, or the
    /// connection goes away first.
    async fn guard<F: Future>(&self, request: &Request, fut: F) -> ShellResult<F::Output> {
        tokio::select! {
            biased;
            _ = request.token.cancelled() => Err(ShellError::Cancelled),
            _ = self.lifetime.cancelled() => Err(ShellError::ConnectionLost),
            _ = Deadline::sleep(request.deadline) => Err(request.timeout_error()),
            out = fut => Ok(out),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.tasks.is_some() {
            debug!(
                target: "shelldb::control",
                "Connection {} dropped without close, killing shell",
                self.id
            );
            self.lifetime.cancel();
            self.connector.leave(self.id);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    at: Instant,
    ms: u64,
}

impl Deadline {
    fn after(ms: u64) -> Self {
        Self {
            at: Instant::now() + Duration::from_millis(ms),
            ms,
        }
    }

    async fn sleep(deadline: Option<Deadline>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline.at).await,
            None => std::future::pending().await,
        }
    }
}

/// The caller's side of one in-flight request.
pub(crate) struct Request {
    output: mpsc::UnboundedReceiver<Output>,
    /// Child of the caller's token; cancelling it stops delivery
    token: CancellationToken,
    hold: LockHold,
    deadline: Option<Deadline>,
    finished: bool,
}

impl Request {
    /// Next piece of output, or `None` at the marker.
    pub(crate) async fn recv(&mut self) -> ShellResult<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        tokio::select! {
            biased;
            out = self.output.recv() => match out {
                Some(Output::Data(data)) => Ok(Some(data)),
                Some(Output::End) => {
                    self.finished = true;
                    Ok(None)
                }
                None => {
                    self.finished = true;
                    Err(ShellError::ConnectionLost)
                }
            },
            _ = self.token.cancelled() => Err(ShellError::Cancelled),
            _ = Deadline::sleep(self.deadline) => {
                self.token.cancel();
                Err(self.timeout_error())
            }
        }
    }

    /// Let other connections at the shared lock.
    pub(crate) fn release_lock(&self) {
        self.hold.release();
    }

    fn timeout_error(&self) -> ShellError {
        ShellError::Timeout(self.deadline.map_or(0, |d| d.ms))
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// A statement scanned once and executed with different parameters.
///
/// The full text is sent to the shell on every execution.
#[derive(Debug)]
pub struct PreparedStatement<'a> {
    connection: &'a Connection,
    statement: Statement,
}

impl PreparedStatement<'_> {
    pub fn param_count(&self) -> usize {
        self.statement.param_count()
    }

    pub fn text(&self) -> &str {
        self.statement.text()
    }

    pub async fn execute(&self, cancel: &CancellationToken, params: &[Value]) -> ShellResult<()> {
        let text = self.statement.bind(params)?;
        self.connection.execute_text(cancel, text).await
    }

    pub async fn query(&self, cancel: &CancellationToken, params: &[Value]) -> ShellResult<Rows> {
        let text = self.statement.bind(params)?;
        self.connection.query_text(cancel, text).await
    }
}

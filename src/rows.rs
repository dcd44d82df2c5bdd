//! Streaming query results.

use std::sync::Arc;

use crate::connection::Request;
use crate::error::{ShellError, ShellResult};
use crate::protocol::{RowDecoder, Step};
use crate::row::{Columns, Row};
use crate::value::Value;

enum Event {
    Header,
    Row(Vec<Value>),
    End,
}

/// Rows of one query, decoded as the shell produces them.
///
/// Dropping `Rows` before the end cancels the request; the connection
/// discards the rest of its output and stays usable.
pub struct Rows {
    request: Request,
    decoder: RowDecoder,
    columns: Arc<Columns>,
    done: bool,
}

impl std::fmt::Debug for Rows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rows")
            .field("columns", &self.columns.names())
            .field("rows_read", &self.decoder.data_rows())
            .field("done", &self.done)
            .finish()
    }
}

impl Rows {
    /// Wait for the header (or the end of an empty result).
    pub(crate) async fn start(request: Request) -> ShellResult<Self> {
        let mut rows = Self {
            request,
            decoder: RowDecoder::new(),
            columns: Arc::new(Columns::default()),
            done: false,
        };
        match rows.advance().await? {
            Event::Header => Ok(rows),
            Event::End => Ok(rows),
            Event::Row(_) => Err(ShellError::internal("row decoded before header")),
        }
    }

    /// Column names; empty when the statement returned no result set.
    pub fn columns(&self) -> &Columns {
        &self.columns
    }

    /// The next row, or `None` once the result set is exhausted.
    pub async fn next(&mut self) -> ShellResult<Option<Row>> {
        loop {
            match self.advance().await? {
                Event::Row(values) => return Ok(Some(Row::new(self.columns.clone(), values))),
                Event::End => return Ok(None),
                Event::Header => {}
            }
        }
    }

    /// Read every remaining row.
    pub async fn collect_all(mut self) -> ShellResult<Vec<Row>> {
        let mut out = Vec::new();
        while let Some(row) = self.next().await? {
            out.push(row);
        }
        Ok(out)
    }

    async fn advance(&mut self) -> ShellResult<Event> {
        if self.done {
            return Ok(Event::End);
        }
        let result = self.decode().await;
        match &result {
            Ok(Event::Header) => {
                self.columns = Arc::new(Columns::new(self.decoder.columns().to_vec()));
                self.request.release_lock();
            }
            Ok(Event::Row(_)) => {}
            Ok(Event::End) | Err(_) => {
                self.done = true;
                self.request.release_lock();
            }
        }
        result
    }

    async fn decode(&mut self) -> ShellResult<Event> {
        loop {
            match self.decoder.step()? {
                Step::Header => return Ok(Event::Header),
                Step::Row(values) => return Ok(Event::Row(values)),
                Step::Failure { kind, message } => return Err(ShellError::shell(kind, message)),
                Step::NeedInput => match self.request.recv().await? {
                    Some(data) => self.decoder.push(&data),
                    None => {
                        self.decoder.finish()?;
                        return Ok(Event::End);
                    }
                },
            }
        }
    }
}

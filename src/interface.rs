//! The contract shared by all resource kinds, and the threaded reader behind
//! every query.
//!
//! A query runs on its own worker thread which hands rows over a rendezvous
//! channel, so the worker never runs ahead of the consumer. The consumer owns
//! the deadline. When it expires, or when the reader is closed early, the
//! consumer performs the abort handshake from [`crate::retry`] and waits for
//! the worker's reply instead of abandoning it.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, select};
use rusqlite::Row;
use tracing::{debug, warn};

use crate::compose::Statement;
use crate::construct::{QueryParams, Resource, ResourceKind};
use crate::datatype::Id;
use crate::error::{CodingError, Result};
use crate::metric::MetricStore;
use crate::node::NodeStore;
use crate::persist::Database;
use crate::scale::ScaleStore;
use crate::retry::{AbortReply, Backoff, request_abort};

/// A resource as read from a result row. Decoding happens in two steps so the
/// row can be released before the (possibly retried) conversion runs.
pub trait Record: Into<Resource> + Sized + Send + 'static {
    const KIND: ResourceKind;
    /// Column values copied out of the row.
    type Raw: Send;
    fn fetch(row: &Row<'_>) -> rusqlite::Result<Self::Raw>;
    fn scan(raw: &Self::Raw) -> Result<Self>;
}

/// CRUD and query over one resource kind.
pub trait Controller: Send + Sync {
    fn kind(&self) -> ResourceKind;
    /// An empty resource of this controller's kind, to decode input into.
    fn new_resource(&self) -> Resource {
        Resource::blank(self.kind())
    }
    fn query(&self, params: &QueryParams) -> Box<dyn Reader>;
    /// Stores the resource and overwrites it with what was stored.
    fn create(&self, resource: &mut Resource) -> Result<()>;
    fn read(&self, id: Id) -> Result<Resource>;
    /// Replaces the stored resource and overwrites it with what was stored.
    fn update(&self, resource: &mut Resource) -> Result<()>;
    fn delete(&self, id: Id) -> Result<()>;
}

/// A stream of query results.
pub trait Reader: Send {
    /// Reads the next result into `resource`. `Ok(false)` marks the end.
    /// Once an error is returned, every later call returns it again.
    fn read(&mut self, resource: &mut Resource) -> Result<bool>;
    /// Stops the query and releases its cursor.
    fn close(&mut self) -> Result<()>;
}

/// Drains a reader.
pub fn read_all(reader: &mut dyn Reader, kind: ResourceKind) -> Result<Vec<Resource>> {
    let mut found = Vec::new();
    let mut resource = Resource::blank(kind);
    while reader.read(&mut resource)? {
        found.push(resource.clone());
    }
    reader.close()?;
    Ok(found)
}

/// Runs `statement` and sends every row as an `R`, in cursor order, until the
/// rows run out, the consumer goes away, or an abort is requested.
///
/// Opening a connection, preparing, binding, decoding and converting are each
/// retried through `backoff`. A failed step ends the cursor, so the query is
/// run again from the top and the rows already delivered are skipped; the
/// statement must therefore order its rows. An abort while waiting to retry is
/// answered with the last error, an abort while handing over a row with
/// `None`. Either way the function then returns `Ok(())`.
pub fn stream_rows<R: Record>(
    database: &Database,
    statement: &Statement,
    backoff: Backoff,
    results: &Sender<R>,
    abort: &Receiver<AbortReply>,
) -> Result<()> {
    let Some(connection) = backoff.run(abort, || database.read_connection()) else {
        return Ok(());
    };
    let connection = &connection;
    let mut delivered = 0usize;
    let mut failed_steps: u32 = 0;
    'query: loop {
        let Some(mut prepared) = backoff.run(abort, move || Ok(connection.prepare(statement.sql())?)) else {
            return Ok(());
        };
        let bound = backoff.run(abort, || {
            for (name, value) in statement.params() {
                let index = prepared
                    .parameter_index(name)?
                    .ok_or_else(|| CodingError::Persistence(format!("no parameter {name} in query")))?;
                prepared.raw_bind_parameter(index, value)?;
            }
            Ok(())
        });
        if bound.is_none() {
            return Ok(());
        }
        let mut rows = prepared.raw_query();
        let mut position = 0usize;
        loop {
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => {
                    debug!(kind = %R::KIND, delivered, "query exhausted");
                    return Ok(());
                }
                Err(error) => {
                    if !backoff.wait(abort, failed_steps, error.into()) {
                        return Ok(());
                    }
                    failed_steps = failed_steps.saturating_add(1);
                    debug!(kind = %R::KIND, delivered, "rerunning query after a failed step");
                    continue 'query;
                }
            };
            position += 1;
            if position <= delivered {
                continue;
            }
            let Some(raw) = backoff.run(abort, || Ok(R::fetch(row)?)) else {
                return Ok(());
            };
            let Some(record) = backoff.run(abort, || R::scan(&raw)) else {
                return Ok(());
            };
            select! {
                send(results, record) -> sent => {
                    if sent.is_err() {
                        return Ok(());
                    }
                    delivered += 1;
                    failed_steps = 0;
                }
                recv(abort) -> request => {
                    debug!(kind = %R::KIND, delivered, "abort requested between rows");
                    if let Ok(reply) = request {
                        let _ = reply.send(None);
                    }
                    return Ok(());
                }
            }
        }
    }
}

/// The [`Reader`] behind every query: one worker thread, a deadline, and the
/// abort handshake.
pub struct StreamReader<R: Record> {
    results: Option<Receiver<R>>,
    abort: Option<Sender<AbortReply>>,
    worker: Option<JoinHandle<Result<()>>>,
    deadline: Instant,
    error: Option<CodingError>,
}

impl<R: Record> StreamReader<R> {
    /// Starts `work` on a new thread. It receives the sending half of the
    /// results channel and the receiving half of the abort channel.
    pub fn spawn<F>(timeout: Duration, work: F) -> Self
    where
        F: FnOnce(Sender<R>, Receiver<AbortReply>) -> Result<()> + Send + 'static,
    {
        let (results_tx, results_rx) = bounded(0);
        let (abort_tx, abort_rx) = bounded(1);
        let worker = std::thread::spawn(move || work(results_tx, abort_rx));
        Self {
            results: Some(results_rx),
            abort: Some(abort_tx),
            worker: Some(worker),
            deadline: Instant::now() + timeout,
            error: None,
        }
    }
    /// A reader that fails with `error` on first read, without running anything.
    pub fn failed(error: CodingError) -> Self {
        Self {
            results: None,
            abort: None,
            worker: None,
            deadline: Instant::now(),
            error: Some(error),
        }
    }
    fn fail<T>(&mut self, error: CodingError) -> Result<T> {
        self.error = Some(error.clone());
        Err(error)
    }
    /// Waits for the worker and surfaces an error it returned.
    fn join(&mut self) -> Result<()> {
        self.results = None;
        self.abort = None;
        match self.worker.take() {
            Some(worker) => match worker.join() {
                Ok(result) => result,
                Err(_) => Err(CodingError::Persistence(format!("{} query worker panicked", R::KIND))),
            },
            None => Ok(()),
        }
    }
    /// Performs the abort handshake if the worker is still running.
    fn abort(&mut self) -> Option<CodingError> {
        let reply = self.abort.as_ref().and_then(request_abort);
        let _ = self.join();
        reply
    }
}

impl<R: Record> Reader for StreamReader<R> {
    fn read(&mut self, resource: &mut Resource) -> Result<bool> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if resource.kind() != R::KIND {
            return Err(CodingError::Unsupported { expected: R::KIND, found: resource.kind() });
        }
        let received = match &self.results {
            Some(results) => results.recv_deadline(self.deadline),
            None => return Ok(false),
        };
        match received {
            Ok(record) => {
                *resource = record.into();
                Ok(true)
            }
            Err(RecvTimeoutError::Disconnected) => match self.join() {
                Ok(()) => Ok(false),
                Err(error) => self.fail(error),
            },
            Err(RecvTimeoutError::Timeout) => {
                let error = self.abort().unwrap_or(CodingError::Aborted);
                warn!(kind = %R::KIND, %error, "query deadline passed");
                self.fail(error)
            }
        }
    }
    fn close(&mut self) -> Result<()> {
        if self.worker.is_some() {
            if let Some(error) = self.abort() {
                debug!(kind = %R::KIND, %error, "query closed while retrying");
            }
        }
        Ok(())
    }
}

impl<R: Record> Drop for StreamReader<R> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// The controllers of all resource kinds over one database.
pub struct Controllers {
    nodes: NodeStore,
    scales: ScaleStore,
    metrics: MetricStore,
}

impl Controllers {
    pub fn new(database: Arc<Database>) -> Self {
        Self {
            nodes: NodeStore::new(Arc::clone(&database)),
            scales: ScaleStore::new(Arc::clone(&database)),
            metrics: MetricStore::new(database),
        }
    }
    pub fn get(&self, kind: ResourceKind) -> &dyn Controller {
        match kind {
            ResourceKind::Node => &self.nodes,
            ResourceKind::Scale => &self.scales,
            ResourceKind::Metric => &self.metrics,
        }
    }
    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }
    pub fn scales(&self) -> &ScaleStore {
        &self.scales
    }
    pub fn metrics(&self) -> &MetricStore {
        &self.metrics
    }
}

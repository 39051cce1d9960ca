//! File-backed producers: a JSON-lines change log replayed as a live stream,
//! and a JSON-lines snapshot of existing rows.
//!
//! Change log lines look like
//! `{"lsn":"0/16B3748","txid":7,"op":"insert","schema":"public","table":"users","new":{"id":1}}`
//! and must appear in non-decreasing LSN order. Snapshot lines look like
//! `{"schema":"public","table":"users","row":{"id":1}}`.
//!
//! Once the end of the change log is reached the stream keeps watching the
//! file for appended lines until stopped. The last change in the file is
//! delivered once a line with a higher LSN follows it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};
use walbridge_core::{
    BackendFactory, BoundaryMarker, CancellationToken, ChangeEvent, Emitter, Enqueued, Error, Lsn,
    Operation, ProducerMode, RecordsProducer, Result, RowEvent, RowMap, SourceInfo, SourceOffset,
    SourcePartition, SourceRecord,
};

/// Upper bound on how long `stop` waits for a worker to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn default_schema() -> String {
    "public".to_string()
}

/// One line of the change log.
#[derive(Debug, Deserialize)]
struct ChangeLine {
    lsn: Lsn,
    #[serde(default)]
    txid: Option<u64>,
    #[serde(default)]
    ts_usec: Option<i64>,
    op: Operation,
    #[serde(default = "default_schema")]
    schema: String,
    table: String,
    #[serde(default)]
    new: Option<RowMap>,
    #[serde(default)]
    old: Option<RowMap>,
}

impl ChangeLine {
    fn into_record(self, partition: &SourcePartition) -> SourceRecord {
        let offset = SourceOffset::streaming(self.lsn)
            .with_txid(self.txid)
            .with_ts_usec(self.ts_usec);
        SourceRecord::new(
            partition.clone(),
            offset,
            RowEvent {
                op: self.op,
                schema: self.schema,
                table: self.table,
                new: self.new,
                old: self.old,
            },
        )
    }
}

/// One line of a snapshot file.
#[derive(Debug, Deserialize)]
struct SnapshotLine {
    #[serde(default = "default_schema")]
    schema: String,
    table: String,
    row: RowMap,
}

#[derive(Debug, Deserialize)]
struct LsnOnly {
    lsn: Lsn,
}

/// Reads complete lines, leaving a trailing partial line for the next call.
struct LineReader {
    path: PathBuf,
    reader: BufReader<File>,
    buf: String,
    line_no: usize,
}

impl LineReader {
    async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).await.map_err(|e| {
            Error::Connection(format!("failed to open {}: {}", path.display(), e))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            buf: String::new(),
            line_no: 0,
        })
    }

    /// Next non-blank line, or `None` at the current end of the file.
    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            let read = self.reader.read_line(&mut self.buf).await.map_err(|e| {
                Error::Backend(format!("failed to read {}: {}", self.path.display(), e))
            })?;
            if read == 0 || !self.buf.ends_with('\n') {
                return Ok(None);
            }
            self.line_no += 1;
            let line = std::mem::take(&mut self.buf);
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
    }

    fn parse<T: DeserializeOwned>(&self, line: &str) -> Result<T> {
        serde_json::from_str(line).map_err(|e| {
            Error::Protocol(format!("{}:{}: {}", self.path.display(), self.line_no, e))
        })
    }
}

/// Highest LSN currently in the change log.
pub async fn current_position(changes: &Path) -> Result<Lsn> {
    let mut reader = LineReader::open(changes).await?;
    let mut position = Lsn::ZERO;
    while let Some(line) = reader.next_line().await? {
        let entry: LsnOnly = reader.parse(&line)?;
        position = position.max(entry.lsn);
    }
    Ok(position)
}

async fn emit(emitter: &Emitter, stop: &CancellationToken, event: ChangeEvent) -> Enqueued {
    tokio::select! {
        _ = stop.cancelled() => Enqueued::Cancelled,
        outcome = emitter.emit(event) => outcome,
    }
}

/// Replay changes after `resume`, then follow the file until stopped.
///
/// The newest change is held until a change at a later LSN is read, since
/// more lines at its LSN may still be appended. A held change is never
/// committed, so a restart replays it.
async fn stream_changes(
    mut reader: LineReader,
    partition: SourcePartition,
    resume: Option<Lsn>,
    follow_interval: Duration,
    emitter: Emitter,
    stop: CancellationToken,
) -> Result<()> {
    info!(resume = ?resume.map(|l| l.to_string()), "streaming changes");
    let mut last_lsn = resume;
    let mut marker = BoundaryMarker::new();

    loop {
        if stop.is_cancelled() {
            return Ok(());
        }

        let Some(line) = reader.next_line().await? else {
            tokio::select! {
                _ = stop.cancelled() => {
                    let held = marker.held_lsn().map(|l| l.to_string());
                    debug!(held = ?held, "stopping change stream");
                    return Ok(());
                }
                _ = tokio::time::sleep(follow_interval) => {}
            }
            continue;
        };

        let change: ChangeLine = reader.parse(&line)?;
        if resume.is_some_and(|r| change.lsn <= r) {
            continue;
        }
        if last_lsn.is_some_and(|l| change.lsn < l) {
            return Err(Error::Protocol(format!(
                "{}:{}: lsn {} goes backwards",
                reader.path.display(),
                reader.line_no,
                change.lsn
            )));
        }
        last_lsn = Some(change.lsn);

        if let Some(event) = marker.push(change.into_record(&partition)) {
            if emit(&emitter, &stop, event).await == Enqueued::Cancelled {
                return Ok(());
            }
        }
    }
}

/// Emit every snapshot row at `position`; the final row closes the snapshot.
async fn emit_snapshot(
    mut reader: LineReader,
    partition: &SourcePartition,
    position: Lsn,
    emitter: &Emitter,
    stop: &CancellationToken,
) -> Result<Option<u64>> {
    let ts_usec = Some(chrono::Utc::now().timestamp_micros());
    let mut rows = 0u64;
    let mut pending: Option<SnapshotLine> = None;

    loop {
        let line = reader.next_line().await?;
        let last = line.is_none();
        let next = match line {
            Some(line) => Some(reader.parse::<SnapshotLine>(&line)?),
            None => None,
        };

        if let Some(row) = std::mem::replace(&mut pending, next) {
            let offset = SourceOffset::snapshot(position, last).with_ts_usec(ts_usec);
            let record = SourceRecord::new(
                partition.clone(),
                offset,
                RowEvent {
                    op: Operation::Read,
                    schema: row.schema,
                    table: row.table,
                    new: Some(row.row),
                    old: None,
                },
            );
            // Snapshot rows are not resumed individually, so each one is a boundary.
            if emit(emitter, stop, ChangeEvent::new(record, true)).await == Enqueued::Cancelled {
                return Ok(None);
            }
            rows += 1;
        }

        if last {
            return Ok(Some(rows));
        }
    }
}

/// A spawned producer loop and the token that stops it.
struct Worker {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn<F>(emitter: Emitter, stop: CancellationToken, work: F) -> Self
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(
            async move {
                if let Err(e) = work.await {
                    emitter.fail(e);
                }
            }
            .in_current_span(),
        );
        Self { stop, handle }
    }

    async fn shutdown(mut self) {
        self.stop.cancel();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut self.handle)
            .await
            .is_err()
        {
            warn!("producer did not stop in time, aborting");
            self.handle.abort();
        }
    }
}

/// Tracks the position the consumer has confirmed.
#[derive(Debug, Default)]
struct Confirmed(Lsn);

impl Confirmed {
    fn advance(&mut self, lsn: Lsn, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Interrupted);
        }
        if lsn > self.0 {
            debug!(lsn = %lsn, previous = %self.0, "confirmed flush position");
            self.0 = lsn;
        }
        Ok(())
    }
}

/// Streams the change log from the resume position.
pub struct FileStreamProducer {
    changes: PathBuf,
    source: SourceInfo,
    follow_interval: Duration,
    confirmed: Confirmed,
    worker: Option<Worker>,
}

impl FileStreamProducer {
    pub fn new(changes: PathBuf, source: SourceInfo, follow_interval: Duration) -> Self {
        Self {
            changes,
            source,
            follow_interval,
            confirmed: Confirmed::default(),
            worker: None,
        }
    }

    pub fn confirmed_lsn(&self) -> Lsn {
        self.confirmed.0
    }
}

#[async_trait]
impl RecordsProducer for FileStreamProducer {
    async fn start(&mut self, emitter: Emitter) -> Result<()> {
        let reader = LineReader::open(&self.changes).await?;
        let stop = emitter.cancellation().child_token();
        let work = stream_changes(
            reader,
            self.source.partition.clone(),
            self.source.resume_lsn(),
            self.follow_interval,
            emitter.clone(),
            stop.clone(),
        );
        self.worker = Some(Worker::spawn(emitter, stop, work));
        Ok(())
    }

    async fn acknowledge(&mut self, lsn: Lsn, cancel: &CancellationToken) -> Result<()> {
        self.confirmed.advance(lsn, cancel)
    }

    async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
            info!(
                changes = %self.changes.display(),
                confirmed = %self.confirmed_lsn(),
                "stream producer stopped"
            );
        }
    }
}

/// Emits a snapshot of existing rows, then optionally streams the change log.
pub struct FileSnapshotProducer {
    snapshot: Option<PathBuf>,
    changes: PathBuf,
    source: SourceInfo,
    stream_afterwards: bool,
    follow_interval: Duration,
    confirmed: Confirmed,
    worker: Option<Worker>,
}

impl FileSnapshotProducer {
    pub fn new(
        snapshot: Option<PathBuf>,
        changes: PathBuf,
        source: SourceInfo,
        stream_afterwards: bool,
        follow_interval: Duration,
    ) -> Self {
        Self {
            snapshot,
            changes,
            source,
            stream_afterwards,
            follow_interval,
            confirmed: Confirmed::default(),
            worker: None,
        }
    }
}

#[async_trait]
impl RecordsProducer for FileSnapshotProducer {
    async fn start(&mut self, emitter: Emitter) -> Result<()> {
        let Some(snapshot) = &self.snapshot else {
            return Err(Error::Configuration(
                "a snapshot is required but no snapshot file was given".to_string(),
            ));
        };

        let snapshot_reader = LineReader::open(snapshot).await?;
        let changes_reader = LineReader::open(&self.changes).await?;
        let position = current_position(&self.changes).await?;
        info!(snapshot = %snapshot.display(), %position, "starting snapshot");

        let partition = self.source.partition.clone();
        let stream_afterwards = self.stream_afterwards;
        let follow_interval = self.follow_interval;
        let stop = emitter.cancellation().child_token();
        let work = {
            let emitter = emitter.clone();
            let stop = stop.clone();
            async move {
                let Some(rows) =
                    emit_snapshot(snapshot_reader, &partition, position, &emitter, &stop).await?
                else {
                    return Ok(());
                };
                info!(rows, "snapshot completed");

                if !stream_afterwards {
                    return Ok(());
                }
                stream_changes(
                    changes_reader,
                    partition,
                    Some(position),
                    follow_interval,
                    emitter,
                    stop,
                )
                .await
            }
        };
        self.worker = Some(Worker::spawn(emitter, stop, work));
        Ok(())
    }

    async fn acknowledge(&mut self, lsn: Lsn, cancel: &CancellationToken) -> Result<()> {
        self.confirmed.advance(lsn, cancel)
    }

    async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
            info!(confirmed = %self.confirmed.0, "snapshot producer stopped");
        }
    }
}

/// Creates file-backed producers.
#[derive(Debug, Clone)]
pub struct FileBackendFactory {
    changes: PathBuf,
    snapshot: Option<PathBuf>,
    follow_interval: Duration,
}

impl FileBackendFactory {
    pub fn new(changes: PathBuf, snapshot: Option<PathBuf>, follow_interval: Duration) -> Self {
        Self {
            changes,
            snapshot,
            follow_interval,
        }
    }
}

#[async_trait]
impl BackendFactory for FileBackendFactory {
    async fn server_info(&self) -> Result<String> {
        let position = current_position(&self.changes).await?;
        Ok(format!(
            "change log {} at position {}",
            self.changes.display(),
            position
        ))
    }

    fn create(&self, mode: ProducerMode, source: SourceInfo) -> Box<dyn RecordsProducer> {
        match mode {
            ProducerMode::Streaming => Box::new(FileStreamProducer::new(
                self.changes.clone(),
                source,
                self.follow_interval,
            )),
            ProducerMode::Snapshot { stream_afterwards } => Box::new(FileSnapshotProducer::new(
                self.snapshot.clone(),
                self.changes.clone(),
                source,
                stream_afterwards,
                self.follow_interval,
            )),
        }
    }
}

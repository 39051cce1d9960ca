//! Drives a connector task the way a polling framework would: poll, hand
//! records downstream, periodically commit and persist the acknowledged offset.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walbridge_core::{
    ConnectorTask, OffsetStorageWriter, SourceOffset, SourcePartition, SourceRecord, TaskSettings,
};

use crate::offsets::FileOffsetStore;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Commit after this many polls; 0 commits only on shutdown.
    pub commit_every: u64,
    /// Stop after this many polls.
    pub max_polls: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            commit_every: 1,
            max_polls: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub polls: u64,
    pub records: u64,
    /// Last offset written to the offset store.
    pub committed: Option<SourceOffset>,
}

/// Run `task` until `shutdown` fires, the poll limit is reached or the task fails.
///
/// Records are written to `out` as JSON lines. The task is always stopped
/// before returning.
pub async fn run_task<W: Write>(
    task: Arc<ConnectorTask>,
    settings: &TaskSettings,
    store: &FileOffsetStore,
    options: &RunOptions,
    shutdown: CancellationToken,
    out: &mut W,
) -> Result<RunSummary> {
    task.start(settings, store)
        .await
        .context("Failed to start connector task")?;

    let partition = settings.partition();
    let mut summary = RunSummary::default();

    let result = drive(&task, &partition, store, options, &shutdown, out, &mut summary).await;

    // Final commit before stopping; commit is a no-op once stopped.
    let committed = match commit(&task, &partition, store).await {
        Ok(offset) => offset,
        Err(e) => {
            warn!(error = %e, "final commit failed");
            None
        }
    };
    if committed.is_some() {
        summary.committed = committed;
    }
    task.stop().await;

    result?;
    info!(
        polls = summary.polls,
        records = summary.records,
        committed = ?summary.committed.as_ref().map(|o| o.lsn.to_string()),
        "run finished"
    );
    Ok(summary)
}

async fn drive<W: Write>(
    task: &ConnectorTask,
    partition: &SourcePartition,
    store: &FileOffsetStore,
    options: &RunOptions,
    shutdown: &CancellationToken,
    out: &mut W,
    summary: &mut RunSummary,
) -> Result<()> {
    while task.is_running() {
        if options.max_polls.is_some_and(|max| summary.polls >= max) {
            debug!(polls = summary.polls, "poll limit reached");
            break;
        }

        let records = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("shutdown requested");
                break;
            }
            records = task.poll() => records.context("Poll failed")?,
        };
        summary.polls += 1;
        summary.records += records.len() as u64;
        write_records(&records, out)?;

        if options.commit_every > 0 && summary.polls % options.commit_every == 0 {
            if let Some(offset) = commit(task, partition, store).await? {
                summary.committed = Some(offset);
            }
        }
    }
    Ok(())
}

fn write_records<W: Write>(records: &[SourceRecord], out: &mut W) -> Result<()> {
    for record in records {
        serde_json::to_writer(&mut *out, record)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

/// Commit and persist the acknowledged offset.
async fn commit(
    task: &ConnectorTask,
    partition: &SourcePartition,
    store: &FileOffsetStore,
) -> Result<Option<SourceOffset>> {
    match task.commit().await {
        Ok(Some(offset)) => {
            store
                .write(partition, &offset)
                .context("Failed to persist offset")?;
            Ok(Some(offset))
        }
        Ok(None) => Ok(None),
        Err(e) if e.is_interrupted() => {
            debug!("commit interrupted by shutdown");
            Ok(None)
        }
        Err(e) => Err(e).context("Commit failed"),
    }
}

/// Cancel `shutdown` on Ctrl-C.
pub fn shutdown_on_ctrl_c(shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for Ctrl-C");
                    return;
                }
                info!("received Ctrl-C, stopping");
                shutdown.cancel();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::FileBackendFactory;
    use std::time::Duration;
    use tempfile::TempDir;
    use walbridge_core::{Lsn, Operation, SnapshotMode, Value};

    fn settings(mode: SnapshotMode) -> TaskSettings {
        let mut settings = TaskSettings::new("inventory");
        settings.snapshot_mode = mode;
        settings.max_queue_size = 16;
        settings.max_batch_size = 4;
        settings.poll_interval = Duration::from_millis(10);
        settings.return_control_interval = Duration::from_millis(50);
        settings
    }

    fn change(lsn: u64, id: i64) -> String {
        format!(
            "{{\"lsn\":{},\"op\":\"insert\",\"table\":\"items\",\"new\":{{\"id\":{}}}}}\n",
            lsn, id
        )
    }

    fn append(path: &std::path::Path, content: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    fn parse_output(out: &[u8]) -> Vec<SourceRecord> {
        String::from_utf8_lossy(out)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    async fn run_once(
        factory: FileBackendFactory,
        settings: &TaskSettings,
        store: &FileOffsetStore,
        max_polls: u64,
    ) -> (RunSummary, Vec<SourceRecord>) {
        let task = Arc::new(ConnectorTask::new(Arc::new(factory)));
        let options = RunOptions {
            commit_every: 1,
            max_polls: Some(max_polls),
        };
        let mut out = Vec::new();
        let summary = run_task(
            task.clone(),
            settings,
            store,
            &options,
            CancellationToken::new(),
            &mut out,
        )
        .await
        .unwrap();
        assert!(!task.is_running());
        (summary, parse_output(&out))
    }

    #[tokio::test]
    async fn test_resumed_run_skips_committed_changes() {
        let dir = TempDir::new().unwrap();
        let changes = dir.path().join("changes.jsonl");
        append(&changes, &(change(1, 1) + &change(2, 2) + &change(3, 3)));
        let store = FileOffsetStore::new(dir.path().join("offsets.json"));
        let settings = settings(SnapshotMode::Never);
        let factory = FileBackendFactory::new(changes.clone(), None, Duration::from_millis(5));

        // lsn 3 is the newest line and stays held back.
        let (summary, records) = run_once(factory.clone(), &settings, &store, 5).await;
        let lsns: Vec<u64> = records.iter().map(|r| r.offset.lsn.as_u64()).collect();
        assert_eq!(lsns, vec![1, 2]);
        assert_eq!(summary.committed.map(|o| o.lsn), Some(Lsn::new(2)));

        append(&changes, &change(4, 4));
        let (_, records) = run_once(factory, &settings, &store, 5).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].offset.lsn, Lsn::new(3));
        assert_eq!(records[0].event.op, Operation::Insert);

        let stored = store.load_all().unwrap();
        assert_eq!(stored["inventory"].lsn, Lsn::new(3));
    }

    #[tokio::test]
    async fn test_rows_appended_at_same_lsn_survive_restart() {
        let dir = TempDir::new().unwrap();
        let changes = dir.path().join("changes.jsonl");
        append(&changes, &change(8, 1));
        let store = FileOffsetStore::new(dir.path().join("offsets.json"));
        let settings = settings(SnapshotMode::Never);
        let factory = FileBackendFactory::new(changes.clone(), None, Duration::from_millis(5));

        let (summary, records) = run_once(factory.clone(), &settings, &store, 3).await;
        assert!(records.is_empty());
        assert!(summary.committed.is_none());

        append(&changes, &(change(8, 2) + &change(9, 3)));
        let (summary, records) = run_once(factory, &settings, &store, 5).await;
        let rows: Vec<(u64, Option<Value>)> = records
            .iter()
            .map(|r| {
                let id = r.event.new.as_ref().and_then(|row| row.get("id")).cloned();
                (r.offset.lsn.as_u64(), id)
            })
            .collect();
        assert_eq!(
            rows,
            vec![(8, Some(Value::Int(1))), (8, Some(Value::Int(2)))]
        );
        assert_eq!(summary.committed.map(|o| o.lsn), Some(Lsn::new(8)));
    }

    #[tokio::test]
    async fn test_snapshot_then_resume_streaming() {
        let dir = TempDir::new().unwrap();
        let changes = dir.path().join("changes.jsonl");
        let snapshot = dir.path().join("snapshot.jsonl");
        append(&changes, &change(5, 1));
        append(
            &snapshot,
            "{\"table\":\"items\",\"row\":{\"id\":1}}\n{\"table\":\"items\",\"row\":{\"id\":2}}\n",
        );
        let store = FileOffsetStore::new(dir.path().join("offsets.json"));
        let settings = settings(SnapshotMode::Initial);
        let factory =
            FileBackendFactory::new(changes.clone(), Some(snapshot), Duration::from_millis(5));

        let (_, records) = run_once(factory.clone(), &settings, &store, 5).await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.event.op == Operation::Read));

        let stored = store.load_all().unwrap();
        let offset = &stored["inventory"];
        assert_eq!(offset.lsn, Lsn::new(5));
        assert!(offset.snapshot);
        assert!(offset.last_snapshot_record);

        append(&changes, &(change(6, 3) + &change(7, 4)));
        let (_, records) = run_once(factory, &settings, &store, 5).await;
        let lsns: Vec<u64> = records.iter().map(|r| r.offset.lsn.as_u64()).collect();
        assert_eq!(lsns, vec![6]);
        assert!(!records[0].offset.snapshot);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_polls_nothing() {
        let dir = TempDir::new().unwrap();
        let changes = dir.path().join("changes.jsonl");
        append(&changes, &change(1, 1));
        let store = FileOffsetStore::new(dir.path().join("offsets.json"));
        let factory = FileBackendFactory::new(changes, None, Duration::from_millis(5));
        let task = Arc::new(ConnectorTask::new(Arc::new(factory)));

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let mut out = Vec::new();
        let summary = run_task(
            task.clone(),
            &settings(SnapshotMode::Never),
            &store,
            &RunOptions::default(),
            shutdown,
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(summary.polls, 0);
        assert!(out.is_empty());
        assert!(!task.is_running());
    }
}

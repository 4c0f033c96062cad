//! Command recorder
//!
//! Sessions hand every audited command to a [`CommandRecorder`]; a
//! background task batches them into [`CommandStorage::bulk_save`] calls.
//! A batch is flushed when it reaches `batch_size`, on every
//! `flush_interval` tick, and on close. A failed batch stays buffered and
//! is retried on the next tick.
//!
//! Memory is bounded twice over by `max_pending`: the hand-off channel holds
//! at most that many commands (newer ones are dropped while it is full), and
//! so does the retry buffer (older ones are dropped).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, warn};

use super::CommandStorage;
use crate::model::Command;

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Capacity of the hand-off channel and of the retry buffer
    pub max_pending: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval: Duration::from_secs(10),
            max_pending: 1000,
        }
    }
}

/// Handle to the background batching task
pub struct CommandRecorder {
    tx: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl CommandRecorder {
    pub fn spawn(storage: Arc<dyn CommandStorage>, config: RecorderConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.max_pending.max(1));
        let task = tokio::spawn(run(storage, config, rx));
        Self { tx, task }
    }

    /// Queue a command without waiting. Sessions are never held up by a
    /// slow storage: when the channel is full the command is dropped.
    pub fn record(&self, command: Command) {
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => warn!(
                "Command recorder is backed up, dropping command of session {}",
                command.session_id
            ),
            Err(TrySendError::Closed(_)) => {
                error!("Command recorder task is gone, command dropped")
            }
        }
    }

    /// Flush what is buffered and stop the task
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            error!("Command recorder task failed: {}", e);
        }
    }
}

struct Batcher {
    storage: Arc<dyn CommandStorage>,
    config: RecorderConfig,
    pending: VecDeque<Command>,
    /// Set after a failed flush; size-triggered flushes wait for the next tick
    backing_off: bool,
}

impl Batcher {
    fn push(&mut self, command: Command) {
        if self.pending.len() >= self.config.max_pending {
            self.pending.pop_front();
            warn!(
                "Command buffer full ({}), dropping oldest command",
                self.config.max_pending
            );
        }
        self.pending.push_back(command);
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let batch = self.pending.make_contiguous();
        match self.storage.bulk_save(batch).await {
            Ok(()) => {
                debug!(
                    "Saved {} commands to {} storage",
                    batch.len(),
                    self.storage.type_name()
                );
                self.pending.clear();
                self.backing_off = false;
            }
            Err(e) => {
                warn!(
                    "Saving {} commands to {} storage failed: {}",
                    batch.len(),
                    self.storage.type_name(),
                    e
                );
                self.backing_off = true;
            }
        }
    }
}

async fn run(
    storage: Arc<dyn CommandStorage>,
    config: RecorderConfig,
    mut rx: mpsc::Receiver<Command>,
) {
    let mut ticker = interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick
    ticker.tick().await;

    let mut batcher = Batcher {
        storage,
        config,
        pending: VecDeque::new(),
        backing_off: false,
    };

    loop {
        tokio::select! {
            biased;

            received = rx.recv() => match received {
                Some(command) => {
                    batcher.push(command);
                    if !batcher.backing_off && batcher.pending.len() >= batcher.config.batch_size {
                        batcher.flush().await;
                    }
                }
                None => {
                    batcher.flush().await;
                    if !batcher.pending.is_empty() {
                        error!("Dropping {} unsaved commands on close", batcher.pending.len());
                    }
                    break;
                }
            },
            _ = ticker.tick() => batcher.flush().await,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::recorder::StorageError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    pub(crate) fn command(input: &str) -> Command {
        Command {
            session_id: "s-1".to_string(),
            org_id: "ORG".to_string(),
            input: input.to_string(),
            output: String::new(),
            user: "alice".to_string(),
            asset: "db-01".to_string(),
            system_user: "root".to_string(),
            timestamp: 1_714_552_200,
            risk_level: Default::default(),
        }
    }

    /// Records every attempted batch; the first `failures` attempts fail
    #[derive(Default)]
    struct MockStorage {
        attempts: Mutex<Vec<Vec<String>>>,
        failures: Mutex<usize>,
    }

    impl MockStorage {
        fn failing(failures: usize) -> Self {
            Self {
                failures: Mutex::new(failures),
                ..Self::default()
            }
        }

        fn attempts(&self) -> Vec<Vec<String>> {
            self.attempts.lock().clone()
        }
    }

    #[async_trait]
    impl CommandStorage for MockStorage {
        async fn bulk_save(&self, commands: &[Command]) -> Result<(), StorageError> {
            self.attempts
                .lock()
                .push(commands.iter().map(|c| c.input.clone()).collect());
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(StorageError::Obs {
                    status: 503,
                    body: String::new(),
                });
            }
            Ok(())
        }

        fn type_name(&self) -> &str {
            "mock"
        }
    }

    fn inputs(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| i.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batches_flush_immediately() {
        let storage = Arc::new(MockStorage::default());
        let recorder = CommandRecorder::spawn(storage.clone(), RecorderConfig::default());

        for i in 0..12 {
            recorder.record(command(&i.to_string()));
        }
        recorder.close().await;

        assert_eq!(storage.attempts(), vec![inputs(0..10), inputs(10..12)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_flushes_on_tick() {
        let storage = Arc::new(MockStorage::default());
        let recorder = CommandRecorder::spawn(storage.clone(), RecorderConfig::default());

        for i in 0..3 {
            recorder.record(command(&i.to_string()));
        }
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(storage.attempts(), vec![inputs(0..3)]);

        recorder.close().await;
        assert_eq!(storage.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batch_is_retried_on_tick() {
        let storage = Arc::new(MockStorage::failing(1));
        let recorder = CommandRecorder::spawn(storage.clone(), RecorderConfig::default());

        for i in 0..12 {
            recorder.record(command(&i.to_string()));
        }
        tokio::time::sleep(Duration::from_secs(11)).await;
        recorder.close().await;

        assert_eq!(storage.attempts(), vec![inputs(0..10), inputs(0..12)]);
    }

    fn bounded(max_pending: usize) -> RecorderConfig {
        RecorderConfig {
            batch_size: 100,
            max_pending,
            ..RecorderConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_is_bounded() {
        let storage = Arc::new(MockStorage::default());
        let recorder = CommandRecorder::spawn(storage.clone(), bounded(5));

        // the task drains the channel after every command, so the retry
        // buffer is what overflows
        for i in 0..7 {
            recorder.record(command(&i.to_string()));
            tokio::task::yield_now().await;
        }
        recorder.close().await;

        assert_eq!(storage.attempts(), vec![inputs(2..7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_is_bounded() {
        let storage = Arc::new(MockStorage::default());
        let recorder = CommandRecorder::spawn(storage.clone(), bounded(5));

        // nothing drains the channel in between, so the newest are refused
        for i in 0..7 {
            recorder.record(command(&i.to_string()));
        }
        recorder.close().await;

        assert_eq!(storage.attempts(), vec![inputs(0..5)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_with_nothing_recorded() {
        let storage = Arc::new(MockStorage::default());
        CommandRecorder::spawn(storage.clone(), RecorderConfig::default())
            .close()
            .await;
        assert!(storage.attempts().is_empty());
    }
}

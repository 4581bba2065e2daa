use crossbeam_channel::{bounded, select};
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

use crate::error::ReplayError;

/// Aggregate outcome of a block-range run.
#[derive(Debug, Clone, Copy)]
pub struct RangeSummary {
    pub blocks: i64,
    pub txs: i64,
    pub elapsed: Duration,
}

impl RangeSummary {
    pub fn log(&self, what: &str) {
        let seconds = self.elapsed.as_secs_f64().max(f64::EPSILON);
        info!("{what}: total #block = {}", self.blocks);
        info!("{what}: total #tx    = {}", self.txs);
        info!(
            "{what}: {:.2} blk/s, {:.2} tx/s",
            self.blocks as f64 / seconds,
            self.txs as f64 / seconds
        );
        info!("{what}: done in {:.3?}", self.elapsed);
    }
}

/// Worker-to-collector report: one message per block.
enum BlockDone {
    Progress(u64),
    Failure { block: u64, error: ReplayError },
}

const PROGRESS_INTERVAL: u64 = 10_000;

/// Drives `task` over the closed block range `[first, last]` with one
/// producer thread, `workers` worker threads and the calling thread as
/// collector.
///
/// Blocks are the unit of parallelism; the task runs one block's
/// transactions serially and returns the number it executed. The collector
/// receives completions in arrival order. On the first failure it signals
/// stop, lets the pipeline drain, and surfaces that error; the stop channel
/// holds one token per worker plus one for the producer.
pub fn run_block_range<T>(
    first: u64,
    last: u64,
    workers: usize,
    task: &T,
) -> Result<RangeSummary, ReplayError>
where
    T: Fn(u64) -> Result<i64, ReplayError> + Sync,
{
    if first > last {
        return Err(ReplayError::VmConfig(format!(
            "first block {first} is larger than last block {last}"
        )));
    }
    let workers = workers.max(1);
    let start = Instant::now();

    let total_blocks = AtomicI64::new(0);
    let total_txs = AtomicI64::new(0);

    let (work_sender, work_receiver) = bounded::<u64>(workers * 10);
    let (done_sender, done_receiver) = bounded::<BlockDone>(workers * 10);
    let (stop_sender, stop_receiver) = bounded::<()>(workers + 1);

    let result = thread::scope(|scope| {
        for _ in 0..workers {
            let work_receiver = work_receiver.clone();
            let done_sender = done_sender.clone();
            let stop_receiver = stop_receiver.clone();
            let total_blocks = &total_blocks;
            let total_txs = &total_txs;
            scope.spawn(move || {
                loop {
                    select! {
                        recv(work_receiver) -> block => {
                            let Ok(block) = block else { return };
                            let done = match task(block) {
                                Ok(txs) => {
                                    total_txs.fetch_add(txs, Ordering::Relaxed);
                                    BlockDone::Progress(block)
                                }
                                Err(error) => BlockDone::Failure { block, error },
                            };
                            total_blocks.fetch_add(1, Ordering::Relaxed);
                            if done_sender.send(done).is_err() {
                                return;
                            }
                        }
                        recv(stop_receiver) -> _ => return,
                    }
                }
            });
        }
        drop(done_sender);

        {
            let stop_receiver = stop_receiver.clone();
            scope.spawn(move || {
                for block in first..=last {
                    select! {
                        send(work_sender, block) -> sent => {
                            if sent.is_err() {
                                return;
                            }
                        }
                        recv(stop_receiver) -> _ => return,
                    }
                }
            });
        }

        let mut failure: Option<ReplayError> = None;
        let mut last_instant = start;
        let mut last_blocks = 0i64;
        let mut last_txs = 0i64;

        for _ in first..=last {
            match done_receiver.recv() {
                Ok(BlockDone::Progress(block)) => {
                    if block % PROGRESS_INTERVAL == 0 {
                        let now = Instant::now();
                        let seconds = (now - last_instant).as_secs_f64().max(f64::EPSILON);
                        let blocks = total_blocks.load(Ordering::Relaxed);
                        let txs = total_txs.load(Ordering::Relaxed);
                        info!(
                            "elapsed time: {:.3?}, number = {block}",
                            start.elapsed()
                        );
                        info!(
                            "{:.2} blk/s, {:.2} tx/s",
                            (blocks - last_blocks) as f64 / seconds,
                            (txs - last_txs) as f64 / seconds
                        );
                        last_instant = now;
                        last_blocks = blocks;
                        last_txs = txs;
                    }
                }
                Ok(BlockDone::Failure { block, error }) => {
                    failure = Some(match error {
                        error @ ReplayError::Tx { .. } => error,
                        other => ReplayError::Tx {
                            block_tx: format!("{block}"),
                            source: Box::new(other),
                        },
                    });
                    break;
                }
                // every worker hung up before the range completed
                Err(_) => break,
            }
        }

        // stop workers and the producer, then unblock any worker still
        // trying to report by dropping our end of the done channel
        for _ in 0..=workers {
            let _ = stop_sender.try_send(());
        }
        drop(done_receiver);

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    });

    result?;

    Ok(RangeSummary {
        blocks: total_blocks.load(Ordering::Acquire),
        txs: total_txs.load(Ordering::Acquire),
        elapsed: start.elapsed(),
    })
}

//! Multi-board sequence execution.
//!
//! A sequence runs on several boards at once. The first board is the master:
//! it adds the synchronization delay to its program and starts the run, and
//! the other boards are slaves that wait for its trigger. The boards are
//! loaded concurrently, the slaves are started before the master, and the
//! timing data of all the boards is collected concurrently.

use crate::board::Board;
use crate::error::{Error, Result};
use crate::registers::Role;
use crate::runner::SequenceRunner;
use crate::transport::PacketTransport;
use futures::future::try_join_all;
use std::collections::BTreeMap;

/// Board taking part in a sequence, together with its runner.
#[derive(Debug)]
pub struct Job<'a, T> {
    /// Board.
    pub board: &'a mut Board<T>,
    /// Runner with the program and SRAM of the board.
    pub runner: SequenceRunner,
}

/// Runs a sequence on several boards.
///
/// The first job is the master. Returns the timing results of the boards
/// whose names prefix an entry of `timing_order`, keyed by board name. The
/// timing data of the other boards is read and discarded.
#[tracing::instrument(level = "debug", skip_all, fields(boards = jobs.len()))]
pub async fn run_sequence<T: PacketTransport, S: AsRef<str>>(
    mut jobs: Vec<Job<'_, T>>,
    timing_order: &[S],
) -> Result<BTreeMap<String, Vec<u16>>> {
    if jobs.is_empty() {
        return Err(Error::invalid_argument("a sequence needs at least one board"));
    }
    for job in &jobs {
        if job.runner.board() != job.board.name() {
            return Err(Error::invalid_argument(format!(
                "runner for {} given to board {}",
                job.runner.board(),
                job.board.name()
            )));
        }
    }

    try_join_all(jobs.iter_mut().enumerate().map(|(j, job)| async move {
        job.board.load(&mut job.runner, 0, j == 0).await
    }))
    .await?;
    tracing::debug!("boards loaded");

    // slaves first, so that they are waiting for the master trigger
    for (j, job) in jobs.iter_mut().enumerate().rev() {
        let role = if j == 0 { Role::Master } else { Role::Slave };
        let sync = job.board.variant().default_sync();
        let frame = job.runner.run_packet(0, role, 0, sync)?;
        job.board.send_registers(&frame).await?;
    }

    // the timing data of all the boards arrives within the longest sequence
    let timeout = jobs
        .iter()
        .map(|job| job.runner.seq_time())
        .max()
        .unwrap_or_default();
    tracing::debug!(?timeout, "boards started");
    let collected = try_join_all(jobs.iter_mut().map(|job| async move {
        job.board.collect(job.runner.n_packets(), timeout).await
    }))
    .await?;

    let mut results = BTreeMap::new();
    for (job, packets) in jobs.iter().zip(collected) {
        if job.runner.keeps_timing(timing_order) {
            results.insert(job.board.name().to_string(), job.runner.extract(&packets)?);
        }
    }
    Ok(results)
}

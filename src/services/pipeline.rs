//! Drives enumeration of both partitions and fans processing units out
//! under a fixed admission bound.
//!
//! ## Run states
//! `Idle → Enumerating(label) → Dispatching → Joining → Done | Failed`
//!
//! Enumeration and dispatch interleave: descriptors are admitted as they
//! are listed, one permit per unit. Once a fatal unit error is observed no
//! further units are admitted, but every admitted unit is awaited before
//! the run settles. Rows persisted by other units are never rolled back.

use super::{analyzer::Analyzer, enumerator::Enumerator, fetcher::Fetcher, hasher, persister::Persister};
use crate::{
    errors::PipelineError,
    models::{Label, MetaCandidate, ObjectDescriptor, Partition},
};
use futures::{StreamExt, pin_mut};
use std::{fmt, sync::Arc};
use tokio::{
    fs,
    sync::Semaphore,
    task::{JoinError, JoinSet},
};
use tracing::{debug, error, info};

/// Reference admission bound.
pub const DEFAULT_CONCURRENCY: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Enumerating(Label),
    Dispatching,
    Joining,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Enumerating(label) => write!(f, "enumerating({})", label),
            RunState::Dispatching => f.write_str("dispatching"),
            RunState::Joining => f.write_str("joining"),
            RunState::Done => f.write_str("done"),
            RunState::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub malicious: Partition,
    pub clean: Partition,
    pub page_size: usize,
    pub concurrency: usize,
}

/// Counters of a run that reached `Done`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub listed: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

/// Split a total budget evenly across the two partitions.
///
/// Integer division: for odd totals the remainder is dropped.
pub fn split_budget(total: usize) -> (usize, usize) {
    (total / 2, total / 2)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UnitOutcome {
    Inserted,
    Duplicate,
}

/// Fetch → (hash, analyze) → persist for one descriptor.
struct UnitWorker {
    fetcher: Fetcher,
    analyzer: Analyzer,
    persister: Persister,
}

impl UnitWorker {
    async fn process(&self, descriptor: ObjectDescriptor) -> Result<UnitOutcome, PipelineError> {
        debug!("Processing item: {:?}", descriptor);
        let sample = self.fetcher.fetch(&descriptor).await?;

        let (fingerprint, attributes) = tokio::join!(
            hasher::digest_file(sample.path()),
            self.analyzer.analyze(sample.path()),
        );
        sample.discard().await;

        let fingerprint = fingerprint.map_err(|source| PipelineError::Hash {
            key: descriptor.key.clone(),
            source,
        })?;
        let candidate = MetaCandidate::new(&descriptor, fingerprint, &attributes);
        if self.persister.persist(&candidate).await? {
            Ok(UnitOutcome::Inserted)
        } else {
            Ok(UnitOutcome::Duplicate)
        }
    }
}

#[derive(Default)]
struct Tally {
    summary: RunSummary,
    failed_units: usize,
    first_error: Option<PipelineError>,
}

impl Tally {
    fn fail(&mut self, err: PipelineError) {
        error!("{}", error_chain(&err));
        self.failed_units += 1;
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
    }

    fn record(&mut self, joined: Result<Result<UnitOutcome, PipelineError>, JoinError>) {
        match joined {
            Ok(Ok(UnitOutcome::Inserted)) => self.summary.inserted += 1,
            Ok(Ok(UnitOutcome::Duplicate)) => self.summary.duplicates += 1,
            Ok(Err(err)) => self.fail(err),
            Err(join_err) => self.fail(PipelineError::UnitPanicked(join_err.to_string())),
        }
    }

    /// Record every unit that already finished, without waiting.
    fn reap(&mut self, units: &mut JoinSet<Result<UnitOutcome, PipelineError>>) {
        while let Some(joined) = units.try_join_next() {
            self.record(joined);
        }
    }

    fn has_failed(&self) -> bool {
        self.first_error.is_some()
    }
}

pub struct Pipeline {
    enumerator: Enumerator,
    worker: Arc<UnitWorker>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        enumerator: Enumerator,
        fetcher: Fetcher,
        analyzer: Analyzer,
        persister: Persister,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            enumerator,
            worker: Arc::new(UnitWorker {
                fetcher,
                analyzer,
                persister,
            }),
            settings,
        }
    }

    /// Process up to `total` objects, half from each partition.
    ///
    /// Returns the first fatal error once every admitted unit has settled.
    pub async fn run(&self, total: usize) -> Result<RunSummary, PipelineError> {
        let mut state = RunState::Idle;
        fs::create_dir_all(self.worker.fetcher.scratch_dir())
            .await
            .map_err(PipelineError::Scratch)?;

        let (malicious_budget, clean_budget) = split_budget(total);
        info!(
            "Run of {} items: {} malicious, {} clean, concurrency {}",
            total, malicious_budget, clean_budget, self.settings.concurrency
        );

        let admission = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut units: JoinSet<Result<UnitOutcome, PipelineError>> = JoinSet::new();
        let mut tally = Tally::default();

        let passes = [
            (&self.settings.malicious, malicious_budget),
            (&self.settings.clean, clean_budget),
        ];
        'passes: for (partition, budget) in passes {
            state = transition(state, RunState::Enumerating(partition.label));
            let listing = self
                .enumerator
                .list(partition, budget, self.settings.page_size);
            pin_mut!(listing);

            while let Some(listed) = listing.next().await {
                tally.reap(&mut units);
                if tally.has_failed() {
                    break 'passes;
                }

                let descriptor = match listed {
                    Ok(descriptor) => descriptor,
                    Err(err) => {
                        tally.fail(err.into());
                        break 'passes;
                    }
                };
                tally.summary.listed += 1;

                let Ok(permit) = admission.clone().acquire_owned().await else {
                    break 'passes;
                };
                // A unit may have failed while we waited for its permit.
                tally.reap(&mut units);
                if tally.has_failed() {
                    break 'passes;
                }
                if state != RunState::Dispatching {
                    state = transition(state, RunState::Dispatching);
                }
                let worker = Arc::clone(&self.worker);
                units.spawn(async move {
                    let _permit = permit;
                    worker.process(descriptor).await
                });
            }
        }

        state = transition(state, RunState::Joining);
        while let Some(joined) = units.join_next().await {
            tally.record(joined);
        }

        match tally.first_error {
            Some(err) => {
                transition(state, RunState::Failed);
                error!(
                    "Run failed: {} unit(s) failed, {} inserted before settling",
                    tally.failed_units, tally.summary.inserted
                );
                Err(err)
            }
            None => {
                transition(state, RunState::Done);
                info!(
                    "Run done: {} listed, {} inserted, {} duplicates",
                    tally.summary.listed, tally.summary.inserted, tally.summary.duplicates
                );
                Ok(tally.summary)
            }
        }
    }
}

fn transition(from: RunState, to: RunState) -> RunState {
    debug!("run state {} -> {}", from, to);
    to
}

/// Render an error with its whole source chain on one line.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_budget_drops_remainder() {
        assert_eq!(split_budget(7), (3, 3));
        assert_eq!(split_budget(8), (4, 4));
        assert_eq!(split_budget(1), (0, 0));
        assert_eq!(split_budget(0), (0, 0));
    }
}

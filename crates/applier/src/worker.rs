//! Block execution: the synchronous loop and the worker pool.
//!
//! Every worker builds one operator through the factory and keeps it, with
//! its own [`WorkerState`], for all blocks it claims. Blocks are claimed
//! from a shared counter in row-major order; completion order is free.

use crate::config::ApplierConfig;
use crate::context::{BlockContext, RunSetup, WorkerState};
use crate::error::{ApplierError, Result};
use crate::operator::Operator;
use crate::writer::CommandSink;
use geo_common::Subgrid;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, error};

/// Run one block and forward its write commands.
fn process_block<O: Operator>(
    setup: RunSetup<'_>,
    config: &ApplierConfig,
    operator: &mut O,
    state: &mut WorkerState,
    subgrid: &Subgrid,
    sink: &mut impl CommandSink,
) -> Result<O::Output> {
    let percent = subgrid.index() as f64 / subgrid.n() as f64 * 100.0;
    debug!(
        block = subgrid.index(),
        blocks = subgrid.n(),
        progress = format!("{:.1}%", percent),
        "processing block"
    );
    config.report_progress(percent);

    let mut ctx = BlockContext::new(setup, subgrid, state);
    let output = operator.apply(&mut ctx)?;
    for command in ctx.take_commands() {
        sink.send(command)?;
    }
    Ok(output)
}

/// Process all blocks in the calling thread.
pub(crate) fn run_sync<F, O>(
    setup: RunSetup<'_>,
    config: &ApplierConfig,
    subgrids: &[Subgrid],
    factory: &F,
    sink: &mut impl CommandSink,
) -> Result<Vec<O::Output>>
where
    F: Fn() -> Result<O>,
    O: Operator,
{
    let mut operator = factory()?;
    let mut state = WorkerState::new();
    subgrids
        .iter()
        .map(|subgrid| process_block(setup, config, &mut operator, &mut state, subgrid, &mut *sink))
        .collect()
}

/// Process all blocks on a pool of `workers` threads.
///
/// Each thread gets its own clone of `sink`. The first failing worker
/// stops the others from claiming further blocks; its error is returned.
pub(crate) fn run_pool<F, O, S>(
    setup: RunSetup<'_>,
    config: &ApplierConfig,
    subgrids: &[Subgrid],
    factory: &F,
    sink: &S,
    workers: usize,
) -> Result<Vec<O::Output>>
where
    F: Fn() -> Result<O> + Sync,
    O: Operator,
    S: CommandSink + Clone + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("applier-worker-{}", i))
        .build()
        .map_err(|e| ApplierError::config(format!("cannot build worker pool: {}", e)))?;

    let next = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);

    let per_worker: Vec<Result<Vec<(usize, O::Output)>>> = pool.broadcast(|ctx| {
        let mut sink = sink.clone();
        let result = catch_unwind(AssertUnwindSafe(|| {
            claim_blocks(setup, config, subgrids, factory, &next, &abort, &mut sink)
        }))
        .unwrap_or_else(|payload| Err(ApplierError::from_panic(payload)));
        match &result {
            Ok(done) => debug!(worker = ctx.index(), blocks = done.len(), "worker finished"),
            Err(e) => {
                abort.store(true, Ordering::SeqCst);
                error!(worker = ctx.index(), error = %e, "worker failed");
            }
        }
        result
    });

    let mut results = Vec::with_capacity(subgrids.len());
    let mut errors = Vec::new();
    for outcome in per_worker {
        match outcome {
            Ok(done) => results.extend(done),
            Err(e) => errors.push(e),
        }
    }
    if let Some(e) = first_error(errors) {
        return Err(e);
    }
    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, output)| output).collect())
}

fn claim_blocks<F, O>(
    setup: RunSetup<'_>,
    config: &ApplierConfig,
    subgrids: &[Subgrid],
    factory: &F,
    next: &AtomicUsize,
    abort: &AtomicBool,
    sink: &mut impl CommandSink,
) -> Result<Vec<(usize, O::Output)>>
where
    F: Fn() -> Result<O>,
    O: Operator,
{
    let mut operator = factory()?;
    let mut state = WorkerState::new();
    let mut done = Vec::new();
    while !abort.load(Ordering::SeqCst) {
        let index = next.fetch_add(1, Ordering::SeqCst);
        let Some(subgrid) = subgrids.get(index) else {
            break;
        };
        let output = process_block(setup, config, &mut operator, &mut state, subgrid, &mut *sink)?;
        done.push((index, output));
    }
    Ok(done)
}

/// The most telling error: a disconnected writer is only a symptom of a
/// failure reported elsewhere.
pub(crate) fn first_error(errors: impl IntoIterator<Item = ApplierError>) -> Option<ApplierError> {
    let mut fallback = None;
    for e in errors {
        if matches!(e, ApplierError::WriterDisconnected(_)) {
            fallback.get_or_insert(e);
        } else {
            return Some(e);
        }
    }
    fallback
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_prefers_root_cause() {
        let errors = vec![
            ApplierError::WriterDisconnected(1),
            ApplierError::operator("bad block"),
            ApplierError::contract("later"),
        ];
        assert!(matches!(first_error(errors), Some(ApplierError::Operator(_))));
    }

    #[test]
    fn test_first_error_falls_back_to_disconnect() {
        let errors = vec![ApplierError::WriterDisconnected(2)];
        assert!(matches!(
            first_error(errors),
            Some(ApplierError::WriterDisconnected(2))
        ));
        assert!(first_error(Vec::new()).is_none());
    }
}

//! Custom assertions for domain-specific testing.
//!
//! Checks the structural invariants every execution log must satisfy.

use crate::repair::{ExecutionLog, LoopPhase, LoopState};

/// Assert that iteration numbers run 1, 2, 3, ... without gaps.
///
/// # Panics
///
/// Panics naming the first out-of-sequence record.
pub fn assert_contiguous_iterations(log: &ExecutionLog) {
    for (index, record) in log.iter().enumerate() {
        assert_eq!(
            record.iteration_number as usize,
            index + 1,
            "Record at position {} has iteration number {}",
            index,
            record.iteration_number
        );
    }
}

/// Assert that successful records carry no repair data and only the last
/// record may succeed.
///
/// # Panics
///
/// Panics if a success record has implicated elements, a proposal, or
/// context, or if a success is followed by further records.
pub fn assert_success_records_clean(log: &ExecutionLog) {
    let last = log.len().saturating_sub(1);
    for (index, record) in log.iter().enumerate() {
        if !record.report.succeeded {
            continue;
        }
        assert_eq!(
            index, last,
            "Iteration {} succeeded but the log continues",
            record.iteration_number
        );
        assert!(
            record.implicated.is_none()
                && record.proposal.is_none()
                && record.context.is_empty()
                && !record.fix_applied,
            "Successful iteration {} carries repair data",
            record.iteration_number
        );
    }
}

/// Assert every invariant of a loop state at once.
///
/// # Panics
///
/// Panics if the log length differs from the iteration count, numbering is
/// broken, or the phase disagrees with the last record.
///
/// # Example
///
/// ```rust,ignore
/// let state = repair.tick(LoopState::new()).await?;
/// assert_state_consistent(&state, 10);
/// ```
pub fn assert_state_consistent(state: &LoopState, max_iterations: u32) {
    assert_eq!(
        state.log.len(),
        state.iteration as usize,
        "Log has {} records after {} iterations",
        state.log.len(),
        state.iteration
    );
    assert!(
        state.iteration <= max_iterations,
        "Ran {} iterations with a budget of {}",
        state.iteration,
        max_iterations
    );
    assert_contiguous_iterations(&state.log);
    assert_success_records_clean(&state.log);

    let last_succeeded = state.log.last().is_some_and(|r| r.report.succeeded);
    match state.phase {
        LoopPhase::Succeeded => assert!(last_succeeded, "Succeeded without a successful run"),
        LoopPhase::ExhaustedBudget => {
            assert!(!last_succeeded, "Exhausted budget after a successful run");
            assert_eq!(state.iteration, max_iterations, "Exhausted budget early");
        }
        LoopPhase::Running => assert!(!last_succeeded, "Still running after a successful run"),
    }
}

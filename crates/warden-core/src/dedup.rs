//! Presentation-only collapsing of repeated tool calls.
//!
//! Execution order and individual outcomes are never touched; this only
//! shapes what a transcript view shows.

use warden_contracts::tool::{ToolCallSummary, ToolOutcome};

/// Collapse runs of consecutive outcomes for the same tool into one entry
/// carrying the repetition count and each call's status.
pub fn collapse(outcomes: &[ToolOutcome]) -> Vec<ToolCallSummary> {
    let mut summaries: Vec<ToolCallSummary> = Vec::new();
    for outcome in outcomes {
        match summaries.last_mut() {
            Some(last) if last.tool_name == outcome.tool_name => {
                last.count += 1;
                last.statuses.push(outcome.status);
            }
            _ => summaries.push(ToolCallSummary {
                tool_name: outcome.tool_name.clone(),
                count: 1,
                statuses: vec![outcome.status],
            }),
        }
    }
    summaries
}

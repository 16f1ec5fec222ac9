//! Picks the winning candidate by test-split AUC.

use polars::prelude::DataFrame;
use salesabt_core::roc_auc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::search::{CandidateSearch, SearchOutcome};

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("no candidate produced a defined test AUC")]
    NoViableCandidate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Scored,
    SearchFailed,
    ScoringFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub candidate: String,
    pub test_auc: Option<f64>,
    pub status: EntryStatus,
    /// Why the candidate was excluded, if it was.
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Selection<'a> {
    /// Position of the winner in the searched candidate list.
    pub winner_index: usize,
    pub winner: &'a SearchOutcome,
    pub test_auc: f64,
    /// One entry per candidate, in declaration order.
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Score every completed search on the test split and keep the best.
///
/// Candidates are compared with a strict `>` in declaration order, so the
/// earliest one wins a tie. Failed searches and undefined AUCs are excluded.
pub fn select_best<'a>(
    searches: &'a [CandidateSearch],
    test_frame: &DataFrame,
    test_y: &[f64],
) -> Result<Selection<'a>, SelectionError> {
    let mut leaderboard = Vec::with_capacity(searches.len());
    let mut best: Option<(usize, &SearchOutcome, f64)> = None;

    for (i, search) in searches.iter().enumerate() {
        let outcome = match search {
            CandidateSearch::Completed(outcome) => outcome.as_ref(),
            CandidateSearch::Failed { candidate, reason } => {
                warn!(candidate = %candidate, %reason, "candidate excluded: search failed");
                leaderboard.push(LeaderboardEntry {
                    candidate: candidate.clone(),
                    test_auc: None,
                    status: EntryStatus::SearchFailed,
                    note: Some(reason.clone()),
                });
                continue;
            }
        };

        let scored = outcome
            .best_pipeline
            .predict_proba(test_frame)
            .map_err(|e| e.to_string())
            .and_then(|proba| roc_auc(test_y, &proba).map_err(|e| e.to_string()));
        match scored {
            Ok(auc) => {
                info!(candidate = %outcome.candidate, test_auc = auc, "candidate scored");
                leaderboard.push(LeaderboardEntry {
                    candidate: outcome.candidate.clone(),
                    test_auc: Some(auc),
                    status: EntryStatus::Scored,
                    note: None,
                });
                if best.map_or(true, |(_, _, top)| auc > top) {
                    best = Some((i, outcome, auc));
                }
            }
            Err(reason) => {
                warn!(candidate = %outcome.candidate, %reason, "candidate excluded: test AUC undefined");
                leaderboard.push(LeaderboardEntry {
                    candidate: outcome.candidate.clone(),
                    test_auc: None,
                    status: EntryStatus::ScoringFailed,
                    note: Some(reason),
                });
            }
        }
    }

    let (winner_index, winner, test_auc) = best.ok_or(SelectionError::NoViableCandidate)?;
    info!(candidate = %winner.candidate, test_auc, "candidate selected");
    Ok(Selection {
        winner_index,
        winner,
        test_auc,
        leaderboard,
    })
}

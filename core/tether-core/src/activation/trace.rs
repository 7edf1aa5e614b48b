use serde::{Deserialize, Serialize};

use super::policy::{Candidate, Rule, SelectionOutcome, SelectionPolicy};
use crate::types::ParentApp;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecisionTrace {
    pub prefer_tmux: bool,
    pub policy_order: Vec<String>,
    pub candidates: Vec<CandidateTrace>,
    pub selected_pid: Option<u32>,
    pub decided_by: Option<String>,
    /// True when the winner was separated from the runner-up only by the
    /// final pid rule.
    pub tie_break_decisive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CandidateTrace {
    pub pid: u32,
    pub cwd: String,
    pub tty: String,
    pub parent_app: ParentApp,
    pub is_live: bool,
    pub has_tmux: bool,
    pub match_type: String,
    pub match_rank: u8,
    pub updated_at: String,
    pub rank_key: Vec<String>,
}

impl DecisionTrace {
    pub fn from_outcome(policy: &SelectionPolicy, outcome: &SelectionOutcome<'_>) -> Self {
        Self {
            prefer_tmux: policy.prefer_tmux,
            policy_order: policy.policy_order(),
            candidates: outcome
                .ordered
                .iter()
                .map(|candidate| CandidateTrace::from_candidate(candidate, policy))
                .collect(),
            selected_pid: outcome.winner.as_ref().map(|c| c.pid),
            decided_by: outcome.decided_by.map(|rule| rule.as_str().to_string()),
            tie_break_decisive: outcome.decided_by == Some(Rule::Pid),
        }
    }

    /// Trace for a request that never reached ranking.
    pub fn empty(policy: &SelectionPolicy) -> Self {
        Self {
            prefer_tmux: policy.prefer_tmux,
            policy_order: policy.policy_order(),
            candidates: Vec::new(),
            selected_pid: None,
            decided_by: None,
            tie_break_decisive: false,
        }
    }
}

impl CandidateTrace {
    fn from_candidate(candidate: &Candidate<'_>, policy: &SelectionPolicy) -> Self {
        let match_rank = candidate.match_type.rank();
        let tmux_key = match (policy.prefer_tmux, candidate.has_tmux) {
            (false, _) => "tmux=ignored".to_string(),
            (true, has_tmux) => format!("tmux={}", has_tmux as u8),
        };
        let timestamp_key = format!(
            "updated_at={}",
            candidate
                .timestamp
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_else(|| "invalid".to_string())
        );

        Self {
            pid: candidate.pid,
            cwd: candidate.shell.cwd.clone(),
            tty: candidate.shell.tty.clone(),
            parent_app: candidate.shell.parent_app,
            is_live: candidate.is_live,
            has_tmux: candidate.has_tmux,
            match_type: candidate.match_type.label().to_string(),
            match_rank,
            updated_at: candidate.shell.updated_at.clone(),
            rank_key: vec![
                format!("live={}", candidate.is_live as u8),
                format!("path_rank={}", match_rank),
                tmux_key,
                format!("known_parent={}", candidate.has_known_parent as u8),
                timestamp_key,
                format!("pid={}", candidate.pid),
            ],
        }
    }
}

pub fn format_decision_trace(trace: &DecisionTrace) -> String {
    let mut lines: Vec<String> = Vec::new();
    let selected = trace
        .selected_pid
        .map(|pid| pid.to_string())
        .unwrap_or_else(|| "none".to_string());

    lines.push(format!(
        "ActivationTrace preferTmux={} selectedPid={} decidedBy={} tieBreak={}",
        trace.prefer_tmux,
        selected,
        trace.decided_by.as_deref().unwrap_or("none"),
        trace.tie_break_decisive
    ));
    lines.push(format!(
        "ActivationTrace policyOrder={}",
        trace.policy_order.join(" | ")
    ));

    for candidate in &trace.candidates {
        lines.push(format!(
            "ActivationTrace candidate pid={} match={} rank={} live={} tmux={} updatedAt={} parent={}",
            candidate.pid,
            candidate.match_type,
            candidate.match_rank,
            candidate.is_live,
            candidate.has_tmux,
            candidate.updated_at,
            candidate.parent_app.display_name()
        ));
        lines.push(format!(
            "ActivationTrace rankKey={}",
            candidate.rank_key.join(", ")
        ));
    }

    lines.join("\n")
}

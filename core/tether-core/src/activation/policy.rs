//! Deterministic ranking of shells for a target path.
//!
//! Rules are applied lexicographically; the first rule that separates two
//! candidates decides. The pid rule never ties, so every ranking is total.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::shell::{ShellEntry, ShellRegistry};
use crate::state::path_utils::normalize_path_for_matching;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMatch {
    Exact,
    /// Shell sits below the target path.
    Child,
    /// Shell sits above the target path.
    Parent,
}

impl PathMatch {
    pub fn rank(self) -> u8 {
        match self {
            Self::Exact => 2,
            Self::Child => 1,
            Self::Parent => 0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Child => "child",
            Self::Parent => "parent",
        }
    }
}

/// Ranking rules in the order they are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Liveness,
    PathSpecificity,
    TmuxPreference,
    KnownParent,
    Recency,
    Pid,
}

impl Rule {
    pub const ORDER: [Rule; 6] = [
        Rule::Liveness,
        Rule::PathSpecificity,
        Rule::TmuxPreference,
        Rule::KnownParent,
        Rule::Recency,
        Rule::Pid,
    ];

    pub fn describe(self) -> &'static str {
        match self {
            Rule::Liveness => "live shells beat dead shells",
            Rule::PathSpecificity => "path specificity: exact > child > parent",
            Rule::TmuxPreference => "tmux preference (only when a client is attached)",
            Rule::KnownParent => "terminal or IDE parent app beats unknown parent app",
            Rule::Recency => "most recent timestamp wins (invalid timestamps lose)",
            Rule::Pid => "higher PID breaks ties deterministically",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rule::Liveness => "liveness",
            Rule::PathSpecificity => "path_specificity",
            Rule::TmuxPreference => "tmux_preference",
            Rule::KnownParent => "known_parent",
            Rule::Recency => "recency",
            Rule::Pid => "pid",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub pid: u32,
    pub shell: &'a ShellEntry,
    pub is_live: bool,
    pub has_tmux: bool,
    pub has_known_parent: bool,
    pub match_type: PathMatch,
    pub timestamp: Option<DateTime<Utc>>,
}

impl<'a> Candidate<'a> {
    pub fn new(shell: &'a ShellEntry, match_type: PathMatch) -> Self {
        Self {
            pid: shell.pid,
            shell,
            is_live: shell.is_live,
            has_tmux: shell.has_tmux(),
            has_known_parent: shell.parent_app.is_terminal() || shell.parent_app.is_ide(),
            match_type,
            timestamp: shell.updated_at_utc(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SelectionPolicy {
    pub prefer_tmux: bool,
}

impl SelectionPolicy {
    pub fn new(prefer_tmux: bool) -> Self {
        Self { prefer_tmux }
    }

    pub fn policy_order(&self) -> Vec<String> {
        let mut rows: Vec<String> = Rule::ORDER
            .iter()
            .map(|rule| rule.describe().to_string())
            .collect();
        if !self.prefer_tmux {
            rows.push("tmux preference disabled (no attached client)".to_string());
        }
        rows
    }

    pub fn compare_by(&self, rule: Rule, a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
        match rule {
            Rule::Liveness => a.is_live.cmp(&b.is_live),
            Rule::PathSpecificity => a.match_type.rank().cmp(&b.match_type.rank()),
            Rule::TmuxPreference if self.prefer_tmux => a.has_tmux.cmp(&b.has_tmux),
            Rule::TmuxPreference => Ordering::Equal,
            Rule::KnownParent => a.has_known_parent.cmp(&b.has_known_parent),
            Rule::Recency => compare_timestamp(a.timestamp, b.timestamp),
            Rule::Pid => a.pid.cmp(&b.pid),
        }
    }

    /// `Greater` means `a` ranks above `b`.
    pub fn compare(&self, a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
        Rule::ORDER
            .iter()
            .map(|rule| self.compare_by(*rule, a, b))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// First rule that separates `a` from `b`.
    pub fn deciding_rule(&self, a: &Candidate<'_>, b: &Candidate<'_>) -> Option<Rule> {
        Rule::ORDER
            .iter()
            .copied()
            .find(|rule| self.compare_by(*rule, a, b).is_ne())
    }
}

#[derive(Debug, Clone)]
pub struct SelectionOutcome<'a> {
    pub winner: Option<Candidate<'a>>,
    /// Best first.
    pub ordered: Vec<Candidate<'a>>,
    /// Rule that put the winner above the runner-up. `None` with fewer than
    /// two candidates.
    pub decided_by: Option<Rule>,
}

/// Shells whose cwd equals, contains, or sits inside `project_path`.
///
/// `home_dir` is never accepted as a parent match: nearly every project lives
/// below it.
pub fn collect_candidates<'a>(
    registry: &'a ShellRegistry,
    project_path: &str,
    home_dir: Option<&str>,
) -> Vec<Candidate<'a>> {
    let target = normalize_path_for_matching(project_path);
    let home = home_dir.map(normalize_path_for_matching);

    registry
        .entries()
        .filter_map(|shell| {
            let shell_path = normalize_path_for_matching(&shell.cwd);
            match_type_excluding_home(&shell_path, &target, home.as_deref())
                .map(|match_type| Candidate::new(shell, match_type))
        })
        .collect()
}

pub fn select<'a>(mut candidates: Vec<Candidate<'a>>, policy: &SelectionPolicy) -> SelectionOutcome<'a> {
    candidates.sort_by(|a, b| policy.compare(b, a));
    let decided_by = match candidates.as_slice() {
        [first, second, ..] => policy.deciding_rule(first, second),
        _ => None,
    };
    SelectionOutcome {
        winner: candidates.first().cloned(),
        ordered: candidates,
        decided_by,
    }
}

fn compare_timestamp(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Both paths must already be normalized for matching.
pub fn match_type_excluding_home(
    shell_path: &str,
    project_path: &str,
    home_dir: Option<&str>,
) -> Option<PathMatch> {
    if shell_path == project_path {
        return Some(PathMatch::Exact);
    }

    if is_below(shell_path, project_path) {
        return Some(PathMatch::Child);
    }

    if home_dir == Some(shell_path) {
        return None;
    }
    is_below(project_path, shell_path).then_some(PathMatch::Parent)
}

fn is_below(path: &str, ancestor: &str) -> bool {
    if ancestor == "/" {
        return path.len() > 1 && path.starts_with('/');
    }
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

//! Line-level diff between two prompt texts.

use serde::{Deserialize, Serialize};

/// Upper bound on the LCS table; larger middles are reported as a full replacement.
const MAX_LCS_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Context,
    Added,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: DiffKind,
    pub text: String,
}

/// Line diff from a prior prompt text to the current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDiff {
    pub lines: Vec<DiffLine>,
    pub added: usize,
    pub removed: usize,
    /// `2 * common / (old_lines + new_lines)`, 1.0 for two empty texts.
    pub similarity: f64,
}

impl PromptDiff {
    pub fn between(old: &str, new: &str) -> Self {
        let old_lines: Vec<&str> = old.lines().collect();
        let new_lines: Vec<&str> = new.lines().collect();

        let prefix = old_lines
            .iter()
            .zip(&new_lines)
            .take_while(|(a, b)| a == b)
            .count();
        let max_suffix = old_lines.len().min(new_lines.len()) - prefix;
        let suffix = old_lines
            .iter()
            .rev()
            .zip(new_lines.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();

        let old_mid = &old_lines[prefix..old_lines.len() - suffix];
        let new_mid = &new_lines[prefix..new_lines.len() - suffix];

        let mut lines = Vec::with_capacity(old_lines.len().max(new_lines.len()));
        lines.extend(old_lines[..prefix].iter().map(|l| context(l)));
        lines.extend(diff_middle(old_mid, new_mid));
        lines.extend(
            old_lines[old_lines.len() - suffix..]
                .iter()
                .map(|l| context(l)),
        );

        let added = lines.iter().filter(|l| l.kind == DiffKind::Added).count();
        let removed = lines.iter().filter(|l| l.kind == DiffKind::Removed).count();
        let common = lines.iter().filter(|l| l.kind == DiffKind::Context).count();
        let total = old_lines.len() + new_lines.len();
        let similarity = if total == 0 {
            1.0
        } else {
            (2 * common) as f64 / total as f64
        };

        Self {
            lines,
            added,
            removed,
            similarity,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.removed == 0
    }

    /// Render as `+`/`-`/` ` prefixed lines, omitting context when `changes_only`.
    pub fn render(&self, changes_only: bool) -> String {
        let mut out = String::new();
        for line in &self.lines {
            let marker = match line.kind {
                DiffKind::Context if changes_only => continue,
                DiffKind::Context => ' ',
                DiffKind::Added => '+',
                DiffKind::Removed => '-',
            };
            out.push(marker);
            out.push_str(&line.text);
            out.push('\n');
        }
        out
    }
}

fn context(text: &str) -> DiffLine {
    DiffLine {
        kind: DiffKind::Context,
        text: text.to_string(),
    }
}

fn removed(text: &str) -> DiffLine {
    DiffLine {
        kind: DiffKind::Removed,
        text: text.to_string(),
    }
}

fn added(text: &str) -> DiffLine {
    DiffLine {
        kind: DiffKind::Added,
        text: text.to_string(),
    }
}

fn diff_middle(old: &[&str], new: &[&str]) -> Vec<DiffLine> {
    if old.is_empty() {
        return new.iter().map(|l| added(l)).collect();
    }
    if new.is_empty() {
        return old.iter().map(|l| removed(l)).collect();
    }
    if old.len().saturating_mul(new.len()) > MAX_LCS_CELLS {
        let mut out: Vec<DiffLine> = old.iter().map(|l| removed(l)).collect();
        out.extend(new.iter().map(|l| added(l)));
        return out;
    }

    // lcs[i][j] = LCS length of old[i..] and new[j..]
    let (n, m) = (old.len(), new.len());
    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            out.push(context(old[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            out.push(removed(old[i]));
            i += 1;
        } else {
            out.push(added(new[j]));
            j += 1;
        }
    }
    out.extend(old[i..].iter().map(|l| removed(l)));
    out.extend(new[j..].iter().map(|l| added(l)));
    out
}

//! Change-set artifacts and unified-diff parsing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Marker that opens every file section of a git patch.
pub const DIFF_HEADER: &str = "diff --git ";

/// How a file was affected by a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
}

impl ChangeType {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw git patch payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitPatch {
    /// Unified diff text, possibly covering many files.
    #[serde(default)]
    pub unidiff_patch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_commit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_commit_message: Option<String>,
}

/// A change-set artifact: a patch against a source repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSetArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub git_patch: GitPatch,
}

impl ChangeSetArtifact {
    /// Wrap a unified diff.
    #[must_use]
    pub fn from_patch(unidiff_patch: impl Into<String>) -> Self {
        Self {
            source: None,
            git_patch: GitPatch {
                unidiff_patch: unidiff_patch.into(),
                ..GitPatch::default()
            },
        }
    }

    /// The raw unified diff text.
    #[must_use]
    pub fn unidiff(&self) -> &str {
        &self.git_patch.unidiff_patch
    }

    /// Parse the patch into per-file statistics.
    #[must_use]
    pub fn parsed(&self) -> ParsedChangeSet {
        ParsedChangeSet::parse(self.unidiff())
    }
}

/// Per-file statistics from one patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFile {
    pub path: String,
    pub change_type: ChangeType,
    pub additions: u64,
    pub deletions: u64,
}

/// Aggregate counts over a file list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub total_files: usize,
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
}

impl ChangeSummary {
    /// Count change types.
    pub fn from_types<I>(types: I) -> Self
    where
        I: IntoIterator<Item = ChangeType>,
    {
        types.into_iter().fold(Self::default(), |mut summary, ty| {
            summary.total_files += 1;
            match ty {
                ChangeType::Created => summary.created += 1,
                ChangeType::Modified => summary.modified += 1,
                ChangeType::Deleted => summary.deleted += 1,
            }
            summary
        })
    }
}

/// Structured view of a unified diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedChangeSet {
    pub files: Vec<ParsedFile>,
    pub summary: ChangeSummary,
}

impl ParsedChangeSet {
    /// Parse a unified diff. Empty input yields an empty change-set.
    #[must_use]
    pub fn parse(patch: &str) -> Self {
        let files: Vec<ParsedFile> = split_sections(patch)
            .filter_map(parse_section)
            .collect();
        let summary = ChangeSummary::from_types(files.iter().map(|f| f.change_type));
        Self { files, summary }
    }
}

/// Iterate over `diff --git` sections, each including its header line.
pub fn split_sections(patch: &str) -> impl Iterator<Item = &str> {
    let mut starts: Vec<usize> = Vec::new();
    let mut offset = 0;
    for line in patch.split_inclusive('\n') {
        if line.starts_with(DIFF_HEADER) {
            starts.push(offset);
        }
        offset += line.len();
    }
    let ends: Vec<usize> = starts.iter().skip(1).copied().chain([patch.len()]).collect();
    starts
        .into_iter()
        .zip(ends)
        .map(move |(start, end)| &patch[start..end])
}

fn parse_section(section: &str) -> Option<ParsedFile> {
    let mut lines = section.lines();
    let header = lines.next()?.strip_prefix(DIFF_HEADER)?;
    let (mut old_path, mut new_path) = split_header_paths(header);

    let mut change_type = ChangeType::Modified;
    let mut additions = 0;
    let mut deletions = 0;
    let mut in_hunk = false;

    for line in lines {
        if in_hunk {
            if line.starts_with('+') {
                additions += 1;
            } else if line.starts_with('-') {
                deletions += 1;
            }
            continue;
        }

        if line.starts_with("@@") {
            in_hunk = true;
        } else if line.starts_with("new file mode") {
            change_type = ChangeType::Created;
        } else if line.starts_with("deleted file mode") {
            change_type = ChangeType::Deleted;
        } else if let Some(path) = line.strip_prefix("rename from ") {
            old_path = Some(path.to_string());
        } else if let Some(path) = line.strip_prefix("rename to ") {
            new_path = Some(path.to_string());
        } else if let Some(path) = line.strip_prefix("--- ") {
            if let Some(path) = path.strip_prefix("a/") {
                old_path = Some(path.to_string());
            }
        } else if let Some(path) = line.strip_prefix("+++ ") {
            if let Some(path) = path.strip_prefix("b/") {
                new_path = Some(path.to_string());
            }
        }
    }

    let path = match change_type {
        ChangeType::Deleted => old_path.or(new_path),
        _ => new_path.or(old_path),
    }?;

    Some(ParsedFile {
        path,
        change_type,
        additions,
        deletions,
    })
}

/// Split `a/<old> b/<new>` into its two paths.
#[must_use]
pub fn split_header_paths(header: &str) -> (Option<String>, Option<String>) {
    let header = header.trim_end();
    let Some(rest) = header.strip_prefix("a/") else {
        return (None, None);
    };
    match rest.rfind(" b/") {
        Some(idx) => (
            Some(rest[..idx].to_string()),
            Some(rest[idx + 3..].to_string()),
        ),
        None => (Some(rest.to_string()), None),
    }
}

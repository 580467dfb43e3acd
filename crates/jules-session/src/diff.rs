//! Slicing unified diffs per file.

use jules_core::change_set::{DIFF_HEADER, split_header_paths, split_sections};
use jules_core::{ChangeSetArtifact, ChangeSummary, ParsedFile};
use serde::{Deserialize, Serialize};

/// Diff text plus per-file stats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffView {
    pub unidiff_patch: String,
    pub files: Vec<ParsedFile>,
    pub summary: ChangeSummary,
}

/// The section of `patch` whose `a/` side is exactly `path`, trimmed.
///
/// Returns an empty string when no section matches.
#[must_use]
pub fn extract_file_diff(patch: &str, path: &str) -> String {
    split_sections(patch)
        .find(|section| {
            section
                .lines()
                .next()
                .and_then(|header| header.strip_prefix(DIFF_HEADER))
                .is_some_and(|header| split_header_paths(header).0.as_deref() == Some(path))
        })
        .map(|section| section.trim().to_string())
        .unwrap_or_default()
}

/// Diff view of a change-set, optionally narrowed to one file.
///
/// A missing change-set gives an empty view.
#[must_use]
pub fn extract_diff(change_set: Option<&ChangeSetArtifact>, file: Option<&str>) -> DiffView {
    let Some(change_set) = change_set else {
        return DiffView::default();
    };
    let parsed = change_set.parsed();

    match file {
        None => DiffView {
            unidiff_patch: change_set.unidiff().to_string(),
            files: parsed.files,
            summary: parsed.summary,
        },
        Some(path) => {
            let files: Vec<ParsedFile> = parsed
                .files
                .into_iter()
                .filter(|f| f.path == path)
                .collect();
            DiffView {
                unidiff_patch: extract_file_diff(change_set.unidiff(), path),
                summary: ChangeSummary::from_types(files.iter().map(|f| f.change_type)),
                files,
            }
        }
    }
}

//! Commit size analysis
//!
//! Decides whether a changeset can be reviewed in one call, must be skipped,
//! or must be split into chunks, and computes the split. Limits are checked
//! in a fixed priority order so callers always see the single most pressing
//! problem.

use crate::config::SizeLimits;
use crate::review::FileDescriptor;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What to do with a changeset that trips a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeStrategy {
    /// Review as-is.
    None,
    /// Do not review; the changeset cannot be usefully chunked.
    Skip,
    /// Partition into chunks and review each separately.
    Split,
}

/// Why a changeset needs handling. Only the first matching condition is
/// reported even when several hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeReason {
    TotalSizeExceeded,
    FileCountExceeded,
    TokenLimitExceeded,
    OversizedFiles,
}

impl SizeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeReason::TotalSizeExceeded => "total_size_exceeded",
            SizeReason::FileCountExceeded => "file_count_exceeded",
            SizeReason::TokenLimitExceeded => "token_limit_exceeded",
            SizeReason::OversizedFiles => "oversized_files",
        }
    }
}

/// Result of sizing up a changeset. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitSizeAnalysis {
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub estimated_tokens: u64,
    pub oversized_files: Vec<PathBuf>,
    pub needs_handling: bool,
    pub strategy: SizeStrategy,
    pub reason: Option<SizeReason>,
    pub message: Option<String>,
    pub recommendations: Vec<String>,
}

/// A size/count-bounded partition of the changeset, reviewed as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewChunk {
    pub files: Vec<FileDescriptor>,
    pub total_size: u64,
    pub estimated_tokens: u64,
    pub file_count: usize,
}

/// A file removed from review for exceeding the per-file size ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedFile {
    pub path: PathBuf,
    pub size: u64,
    pub reason: String,
    pub max_size: u64,
}

/// Result of [`filter_oversized`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterResult {
    pub included: Vec<FileDescriptor>,
    pub excluded: Vec<ExcludedFile>,
}

/// Format a byte count in MB for user-facing messages (1 MB = 1 MiB here,
/// matching the limit constants).
fn format_mb(bytes: u64) -> String {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    if (mb - mb.round()).abs() < 0.05 {
        format!("{} MB", mb.round() as u64)
    } else {
        format!("{:.1} MB", mb)
    }
}

/// Size up a changeset against the configured limits.
pub fn analyze(files: &[FileDescriptor], limits: &SizeLimits) -> CommitSizeAnalysis {
    let total_files = files.len();
    let total_size_bytes: u64 = files.iter().map(|f| f.size_bytes).sum();
    let estimated_tokens: u64 = files.iter().map(|f| f.estimated_tokens).sum();
    let oversized_files: Vec<PathBuf> = files
        .iter()
        .filter(|f| f.size_bytes > limits.max_file_size_bytes)
        .map(|f| f.path.clone())
        .collect();

    // Priority order: total size > file count > tokens > individual oversize.
    let (strategy, reason, message, recommendations) = if total_size_bytes
        > limits.max_total_size_bytes
    {
        (
            SizeStrategy::Skip,
            Some(SizeReason::TotalSizeExceeded),
            Some(format!(
                "Total changeset size {} exceeds the {} limit",
                format_mb(total_size_bytes),
                format_mb(limits.max_total_size_bytes)
            )),
            vec![
                "Break this change into smaller commits and review each separately".to_string(),
                "Exclude generated or vendored files from the changeset".to_string(),
            ],
        )
    } else if total_files > limits.max_files_per_review {
        (
            SizeStrategy::Split,
            Some(SizeReason::FileCountExceeded),
            Some(format!(
                "{} changed files exceed the {}-file review limit",
                total_files, limits.max_files_per_review
            )),
            vec![format!(
                "Review will be split into chunks of at most {} files",
                limits.max_files_per_review
            )],
        )
    } else if estimated_tokens > limits.max_tokens {
        (
            SizeStrategy::Split,
            Some(SizeReason::TokenLimitExceeded),
            Some(format!(
                "Estimated {} tokens exceed the {}-token review budget",
                estimated_tokens, limits.max_tokens
            )),
            vec!["Review will be split into token-bounded chunks".to_string()],
        )
    } else if !oversized_files.is_empty() {
        (
            SizeStrategy::Skip,
            Some(SizeReason::OversizedFiles),
            Some(format!(
                "{} file(s) exceed the {} per-file limit",
                oversized_files.len(),
                format_mb(limits.max_file_size_bytes)
            )),
            vec![
                "Exclude the oversized files and re-run the review".to_string(),
                "Large files are often generated; consider adding them to review ignores"
                    .to_string(),
            ],
        )
    } else {
        (SizeStrategy::None, None, None, Vec::new())
    };

    CommitSizeAnalysis {
        total_files,
        total_size_bytes,
        estimated_tokens,
        oversized_files,
        needs_handling: strategy != SizeStrategy::None,
        strategy,
        reason,
        message,
        recommendations,
    }
}

/// Partition files into review chunks.
///
/// Files are sorted ascending by size (bin-packing heuristic: small files
/// first maximizes files per chunk) and accumulated greedily. A new chunk
/// starts whenever adding the next file would exceed the total-size or token
/// budgets or reach the file-count cap. The first file placed in a chunk is
/// always kept even if it alone exceeds a budget, so no file starves.
pub fn split_into_chunks(files: &[FileDescriptor], limits: &SizeLimits) -> Vec<ReviewChunk> {
    let mut sorted: Vec<&FileDescriptor> = files.iter().collect();
    sorted.sort_by_key(|f| f.size_bytes);

    let mut chunks: Vec<ReviewChunk> = Vec::new();
    let mut current: Vec<FileDescriptor> = Vec::new();
    let mut current_size: u64 = 0;
    let mut current_tokens: u64 = 0;

    for file in sorted {
        let would_overflow = !current.is_empty()
            && (current_size + file.size_bytes > limits.max_total_size_bytes
                || current_tokens + file.estimated_tokens > limits.max_tokens
                || current.len() >= limits.max_files_per_review);

        if would_overflow {
            chunks.push(seal_chunk(std::mem::take(&mut current)));
            current_size = 0;
            current_tokens = 0;
        }

        current_size += file.size_bytes;
        current_tokens += file.estimated_tokens;
        current.push(file.clone());
    }

    if !current.is_empty() {
        chunks.push(seal_chunk(current));
    }

    chunks
}

fn seal_chunk(files: Vec<FileDescriptor>) -> ReviewChunk {
    ReviewChunk {
        total_size: files.iter().map(|f| f.size_bytes).sum(),
        estimated_tokens: files.iter().map(|f| f.estimated_tokens).sum(),
        file_count: files.len(),
        files,
    }
}

/// Remove files individually larger than the per-file ceiling.
pub fn filter_oversized(files: &[FileDescriptor], limits: &SizeLimits) -> FilterResult {
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    for file in files {
        if file.size_bytes > limits.max_file_size_bytes {
            excluded.push(ExcludedFile {
                path: file.path.clone(),
                size: file.size_bytes,
                reason: format!(
                    "File size {} exceeds the {} per-file limit",
                    format_mb(file.size_bytes),
                    format_mb(limits.max_file_size_bytes)
                ),
                max_size: limits.max_file_size_bytes,
            });
        } else {
            included.push(file.clone());
        }
    }
    FilterResult { included, excluded }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn file(path: &str, size: usize) -> FileDescriptor {
        FileDescriptor::new(path, "x".repeat(size))
    }

    fn files(count: usize, size: usize) -> Vec<FileDescriptor> {
        (0..count)
            .map(|i| file(&format!("src/file_{i}.rs"), size))
            .collect()
    }

    #[test]
    fn test_clean_changeset_needs_no_handling() {
        let limits = SizeLimits::default();
        let analysis = analyze(&files(3, 100), &limits);
        assert!(!analysis.needs_handling);
        assert_eq!(analysis.strategy, SizeStrategy::None);
        assert_eq!(analysis.reason, None);
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn test_file_count_exceeded_splits() {
        // 55 files against a 50-file limit -> split on file count.
        let limits = SizeLimits::default();
        let analysis = analyze(&files(55, 10), &limits);
        assert!(analysis.needs_handling);
        assert_eq!(analysis.strategy, SizeStrategy::Split);
        assert_eq!(analysis.reason, Some(SizeReason::FileCountExceeded));
    }

    #[test]
    fn test_total_size_exceeded_skips_with_mb_message() {
        // A single 6 MB file against a 5 MB total limit.
        let limits = SizeLimits::default();
        let input = vec![file("dist/bundle.js", 6 * 1024 * 1024)];
        let analysis = analyze(&input, &limits);
        assert_eq!(analysis.strategy, SizeStrategy::Skip);
        assert_eq!(analysis.reason, Some(SizeReason::TotalSizeExceeded));
        let message = analysis.message.unwrap();
        assert!(message.contains("6 MB"), "message was: {message}");
        assert!(message.contains("5 MB"), "message was: {message}");
    }

    #[test]
    fn test_total_size_takes_precedence_over_count() {
        let limits = SizeLimits {
            max_files_per_review: 2,
            max_total_size_bytes: 100,
            ..SizeLimits::default()
        };
        // Trips both total size and file count; total size must win.
        let analysis = analyze(&files(5, 50), &limits);
        assert_eq!(analysis.reason, Some(SizeReason::TotalSizeExceeded));
    }

    #[test]
    fn test_token_limit_reported_when_size_ok() {
        let limits = SizeLimits {
            max_tokens: 10,
            ..SizeLimits::default()
        };
        let analysis = analyze(&files(2, 100), &limits);
        assert_eq!(analysis.strategy, SizeStrategy::Split);
        assert_eq!(analysis.reason, Some(SizeReason::TokenLimitExceeded));
    }

    #[test]
    fn test_oversized_file_reported_last() {
        let limits = SizeLimits {
            max_file_size_bytes: 50,
            max_total_size_bytes: 10_000,
            max_tokens: 10_000,
            ..SizeLimits::default()
        };
        let analysis = analyze(&[file("big.rs", 60), file("small.rs", 10)], &limits);
        assert_eq!(analysis.strategy, SizeStrategy::Skip);
        assert_eq!(analysis.reason, Some(SizeReason::OversizedFiles));
        assert_eq!(analysis.oversized_files, vec![PathBuf::from("big.rs")]);
    }

    #[test]
    fn test_split_75_files_yields_50_and_25() {
        let limits = SizeLimits::default();
        let chunks = split_into_chunks(&files(75, 10), &limits);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].file_count, 50);
        assert_eq!(chunks[1].file_count, 25);
    }

    #[test]
    fn test_chunks_partition_the_input_exactly() {
        let limits = SizeLimits {
            max_files_per_review: 7,
            max_total_size_bytes: 500,
            max_tokens: 200,
            ..SizeLimits::default()
        };
        let input: Vec<FileDescriptor> = (0..20)
            .map(|i| file(&format!("f{i}.rs"), 17 * (i + 1)))
            .collect();
        let chunks = split_into_chunks(&input, &limits);

        let mut seen = HashSet::new();
        for chunk in &chunks {
            assert!(chunk.file_count <= limits.max_files_per_review || chunk.file_count == 1);
            for f in &chunk.files {
                assert!(seen.insert(f.path.clone()), "file placed twice: {:?}", f.path);
            }
        }
        let expected: HashSet<_> = input.iter().map(|f| f.path.clone()).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_chunk_first_file_never_starves() {
        let limits = SizeLimits {
            max_total_size_bytes: 100,
            max_file_size_bytes: 100,
            max_tokens: 10_000,
            ..SizeLimits::default()
        };
        // One file bigger than the whole chunk budget still gets a chunk.
        let input = vec![file("small.rs", 10), file("huge.rs", 150)];
        let chunks = split_into_chunks(&input, &limits);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].file_count, 1);
        assert_eq!(chunks[1].files[0].path, PathBuf::from("huge.rs"));
    }

    #[test]
    fn test_filter_oversized() {
        let limits = SizeLimits {
            max_file_size_bytes: 50,
            ..SizeLimits::default()
        };
        let result = filter_oversized(&[file("keep.rs", 10), file("drop.bin", 80)], &limits);
        assert_eq!(result.included.len(), 1);
        assert_eq!(result.included[0].path, PathBuf::from("keep.rs"));
        assert_eq!(result.excluded.len(), 1);
        assert_eq!(result.excluded[0].path, PathBuf::from("drop.bin"));
        assert_eq!(result.excluded[0].max_size, 50);
    }

    #[test]
    fn test_format_mb() {
        assert_eq!(format_mb(6 * 1024 * 1024), "6 MB");
        assert_eq!(format_mb(5 * 1024 * 1024), "5 MB");
        assert_eq!(format_mb(1_572_864), "1.5 MB");
    }
}

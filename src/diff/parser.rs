//! Unified diff format parser.
//!
//! Splits `git diff` output into per-file patches and walks hunk bodies to
//! recover the post-image line number of every added row.

use crate::constants::MAX_LINE_LEN;

/// One file section of a multi-file diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub old_path: String,
    pub new_path: String,
    pub is_binary: bool,
    /// Hunk headers and rows, starting at the first `@@` line.
    pub body: String,
}

impl FilePatch {
    /// Post-rename path when there is one, else the original path.
    pub fn path(&self) -> &str {
        if self.new_path.is_empty() || self.new_path == "/dev/null" {
            &self.old_path
        } else {
            &self.new_path
        }
    }
}

/// An added row, trimmed, with its 1-based post-image line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedLine<'a> {
    pub line_number: i64,
    pub content: &'a str,
}

/// Split `git diff` output into per-file patches.
pub fn split_file_patches(input: &str) -> Vec<FilePatch> {
    let mut files: Vec<FilePatch> = Vec::new();
    let mut lines = input.lines().peekable();

    while let Some(line) = lines.next() {
        if !line.starts_with("diff --git ") {
            continue;
        }

        let (old_path, mut new_path) = parse_diff_header(line);
        let mut is_binary = false;
        let mut body = String::new();

        // Extended headers until the first hunk
        while let Some(&next) = lines.peek() {
            if next.starts_with("diff --git ") || next.starts_with("@@") {
                break;
            }
            if next.starts_with("Binary files") {
                is_binary = true;
            } else if let Some(path) = next.strip_prefix("+++ ") {
                if path != "/dev/null" {
                    new_path = strip_diff_prefix(path.trim_end()).to_string();
                }
            }
            lines.next();
        }

        while let Some(&next) = lines.peek() {
            if next.starts_with("diff --git ") {
                break;
            }
            body.push_str(next);
            body.push('\n');
            lines.next();
        }

        files.push(FilePatch {
            old_path,
            new_path,
            is_binary,
            body,
        });
    }

    files
}

/// Walk a hunk body and collect the rows a diff scan should match against.
///
/// Only `+` rows are returned. `-` rows do not advance the post-image
/// counter; context rows do; `@@` re-seeds it. Rows before the first hunk
/// header and `\ No newline at end of file` markers are ignored. Added rows
/// longer than [`MAX_LINE_LEN`] bytes after trimming are skipped but still
/// occupy a line.
pub fn added_lines(patch: &str) -> Vec<AddedLine<'_>> {
    let mut out = Vec::new();
    let mut line_number: Option<i64> = None;

    for row in patch.lines() {
        if row.starts_with("@@") {
            line_number = parse_hunk_header(row);
            continue;
        }
        let Some(current) = line_number.as_mut() else {
            continue;
        };
        if row.starts_with('-') || row.starts_with('\\') {
            continue;
        }
        if let Some(content) = row.strip_prefix('+') {
            let content = content.trim();
            if content.len() <= MAX_LINE_LEN {
                out.push(AddedLine {
                    line_number: *current,
                    content,
                });
            }
        }
        *current += 1;
    }

    out
}

/// Parse the "diff --git a/path b/path" header line.
fn parse_diff_header(line: &str) -> (String, String) {
    let rest = line.strip_prefix("diff --git ").unwrap_or(line);

    // Paths are prefixed with a/ and b/ (default), or c/w/i/o/ when
    // git's diff.mnemonicPrefix is enabled.
    if let Some(b_idx) = find_second_prefix(rest) {
        let a_part = &rest[..b_idx];
        let b_part = &rest[b_idx + 1..];
        (
            strip_diff_prefix(a_part).to_string(),
            strip_diff_prefix(b_part).to_string(),
        )
    } else {
        let (a_part, b_part) = rest.split_once(' ').unwrap_or((rest, ""));
        (
            strip_diff_prefix(a_part).to_string(),
            strip_diff_prefix(b_part).to_string(),
        )
    }
}

/// Strip a single-character git diff prefix (`a/`, `b/`, `c/`, `w/`, `i/`, `o/`).
fn strip_diff_prefix(path: &str) -> &str {
    if path.len() >= 2 {
        let bytes = path.as_bytes();
        if bytes[1] == b'/' && matches!(bytes[0], b'a' | b'b' | b'c' | b'w' | b'i' | b'o') {
            return &path[2..];
        }
    }
    path
}

/// Find the position of the second path prefix separator in a diff header.
fn find_second_prefix(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    (1..bytes.len().saturating_sub(1)).find(|&i| {
        bytes[i] == b' '
            && bytes.get(i + 2) == Some(&b'/')
            && matches!(bytes.get(i + 1), Some(b'a' | b'b' | b'c' | b'w' | b'i' | b'o'))
    })
}

/// First new-side line number of a `@@ -L1(,N1)? +L2(,N2)? @@` header.
fn parse_hunk_header(line: &str) -> Option<i64> {
    let line = line.strip_prefix("@@ ")?;
    let end = line.find(" @@")?;
    let (_, new_range) = line[..end].split_once(' ')?;
    let new_range = new_range.strip_prefix('+')?;
    let start = new_range.split_once(',').map_or(new_range, |(s, _)| s);
    start.parse().ok()
}

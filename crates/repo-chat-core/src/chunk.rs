//! Line-based chunk extraction.
//!
//! Turns a file's text into [`Chunk`]s with stable identities and content
//! fingerprints. Small files become a single whole-file chunk; larger
//! files are split into fixed-size line segments.
//!
//! # Algorithm
//!
//! 1. Decode the file bytes. Files over `max_file_bytes`, files with a NUL
//!    byte in the first 8 KiB, and non-UTF-8 files are skipped.
//! 2. Count lines. Zero lines yields zero chunks.
//! 3. At most `whole_file_max_lines` lines: one [`ChunkKind::WholeFile`]
//!    chunk whose content is the exact file text.
//! 4. Otherwise: disjoint segments of `segment_lines` lines covering the
//!    file. Each segment's content starts up to `overlap_lines` lines
//!    before its own range so the embedding sees cross-boundary context.
//!    The overlap belongs to the content (and so to the hash), never to
//!    the identity range.
//!
//! Chunk ids are UUIDv5 over `(project, path, kind, start, end)`, so an
//! unchanged file always yields the same ids, and an edited line changes
//! the hash but not the id.
//!
//! # Example
//!
//! ```rust
//! use repo_chat_core::chunk::{ChunkExtractor, ChunkingParams};
//!
//! let extractor = ChunkExtractor::new(ChunkingParams::default()).unwrap();
//! let chunks = extractor.extract("proj", "src/main.rs", "fn main() {\n}\n");
//! assert_eq!(chunks.len(), 1);
//! assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 2));
//! assert_eq!(chunks[0].language.as_deref(), Some("rust"));
//! ```

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::RepoChatError;
use crate::models::{Chunk, ChunkKind, SourceFile};

/// How many leading bytes are inspected for NUL when sniffing binaries.
const BINARY_SNIFF_BYTES: usize = 8000;

/// Extraction tuning, decoupled from application config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkingParams {
    /// Files with at most this many lines become one whole-file chunk.
    pub whole_file_max_lines: u32,
    /// Lines per segment for larger files.
    pub segment_lines: u32,
    /// Context lines borrowed from the previous segment.
    pub overlap_lines: u32,
    /// Files larger than this are skipped.
    pub max_file_bytes: usize,
}

impl Default for ChunkingParams {
    fn default() -> Self {
        Self {
            whole_file_max_lines: 120,
            segment_lines: 60,
            overlap_lines: 8,
            max_file_bytes: 1024 * 1024,
        }
    }
}

impl ChunkingParams {
    pub fn validate(&self) -> Result<()> {
        if self.whole_file_max_lines == 0 {
            return Err(RepoChatError::validation("whole_file_max_lines must be > 0").into());
        }
        if self.segment_lines == 0 {
            return Err(RepoChatError::validation("segment_lines must be > 0").into());
        }
        if self.overlap_lines >= self.segment_lines {
            return Err(RepoChatError::validation(format!(
                "overlap_lines ({}) must be smaller than segment_lines ({})",
                self.overlap_lines, self.segment_lines
            ))
            .into());
        }
        if self.max_file_bytes == 0 {
            return Err(RepoChatError::validation("max_file_bytes must be > 0").into());
        }
        Ok(())
    }
}

/// Why a file produced no chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Binary,
    NotUtf8,
    TooLarge { bytes: usize, limit: usize },
    /// The path itself is not valid UTF-8 and has no stable identity.
    InvalidPath,
    /// Reading failed. The file may still exist, so its indexed chunks
    /// are kept until a run can read it again.
    Unreadable(String),
}

impl SkipReason {
    /// Whether chunks already indexed under this path survive the run.
    pub fn retains_index(&self) -> bool {
        matches!(self, SkipReason::Unreadable(_))
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Binary => f.write_str("binary content"),
            SkipReason::NotUtf8 => f.write_str("not valid UTF-8"),
            SkipReason::TooLarge { bytes, limit } => {
                write!(f, "file is {} bytes (limit {})", bytes, limit)
            }
            SkipReason::InvalidPath => f.write_str("path is not valid UTF-8"),
            SkipReason::Unreadable(err) => write!(f, "unreadable: {}", err),
        }
    }
}

/// A file that was reported instead of chunked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: String,
    pub reason: SkipReason,
}

/// Result of extracting a whole file set.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Ordered by file path, then by line range.
    pub chunks: Vec<Chunk>,
    pub skipped: Vec<SkippedFile>,
    pub files_scanned: usize,
}

/// Splits files into chunks according to [`ChunkingParams`].
#[derive(Debug, Clone)]
pub struct ChunkExtractor {
    params: ChunkingParams,
}

impl ChunkExtractor {
    pub fn new(params: ChunkingParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &ChunkingParams {
        &self.params
    }

    /// Chunk already-decoded text. Deterministic for a given input and
    /// parameter set.
    pub fn extract(&self, project_id: &str, file_path: &str, text: &str) -> Vec<Chunk> {
        let lines: Vec<&str> = text.lines().collect();
        let n = lines.len() as u32;
        if n == 0 {
            return Vec::new();
        }

        let language = infer_language(file_path).map(str::to_string);

        if n <= self.params.whole_file_max_lines {
            return vec![make_chunk(
                project_id,
                file_path,
                ChunkKind::WholeFile,
                (1, n),
                language,
                text,
            )];
        }

        let seg = self.params.segment_lines;
        let overlap = self.params.overlap_lines;
        let mut chunks = Vec::with_capacity(n.div_ceil(seg) as usize);
        let mut start = 1u32;

        while start <= n {
            let end = (start + seg - 1).min(n);
            let context_start = start.saturating_sub(overlap).max(1);
            let content = lines[(context_start - 1) as usize..end as usize].join("\n");
            chunks.push(make_chunk(
                project_id,
                file_path,
                ChunkKind::Segment,
                (start, end),
                language.clone(),
                &content,
            ));
            start = end + 1;
        }

        chunks
    }

    /// Decode and chunk one file from the file-set provider.
    pub fn extract_source(
        &self,
        project_id: &str,
        file: &SourceFile,
    ) -> std::result::Result<Vec<Chunk>, SkipReason> {
        if let Some(reason) = &file.skip {
            return Err(reason.clone());
        }
        let text = decode_source(&file.bytes, self.params.max_file_bytes)?;
        Ok(self.extract(project_id, &file.path, text))
    }

    /// Chunk a whole file set. Per-file failures are collected in
    /// [`Extraction::skipped`] and never abort the remaining files.
    /// Duplicate paths keep the last occurrence.
    pub fn extract_all(&self, project_id: &str, files: &[SourceFile]) -> Extraction {
        let by_path: BTreeMap<&str, &SourceFile> =
            files.iter().map(|f| (f.path.as_str(), f)).collect();

        let mut out = Extraction {
            files_scanned: by_path.len(),
            ..Default::default()
        };

        for (path, file) in by_path {
            match self.extract_source(project_id, file) {
                Ok(chunks) => out.chunks.extend(chunks),
                Err(reason) => {
                    tracing::warn!(file = path, %reason, "skipping file");
                    out.skipped.push(SkippedFile {
                        path: path.to_string(),
                        reason,
                    });
                }
            }
        }

        out
    }
}

/// Decode file bytes as text, rejecting binaries and oversized files.
pub fn decode_source(bytes: &[u8], max_bytes: usize) -> std::result::Result<&str, SkipReason> {
    if bytes.len() > max_bytes {
        return Err(SkipReason::TooLarge {
            bytes: bytes.len(),
            limit: max_bytes,
        });
    }
    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    if sniff.contains(&0) {
        return Err(SkipReason::Binary);
    }
    std::str::from_utf8(bytes).map_err(|_| SkipReason::NotUtf8)
}

/// Deterministic chunk identity.
pub fn chunk_id(project_id: &str, file_path: &str, kind: ChunkKind, start: u32, end: u32) -> String {
    let key = format!(
        "{}\0{}\0{}\0{}\0{}",
        project_id,
        file_path,
        kind.as_str(),
        start,
        end
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// SHA-256 hex digest of the exact text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Infer a language name from a file path's extension or well-known name.
pub fn infer_language(path: &str) -> Option<&'static str> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name {
        "Dockerfile" => return Some("dockerfile"),
        "Makefile" | "GNUmakefile" => return Some("make"),
        "CMakeLists.txt" => return Some("cmake"),
        _ => {}
    }

    let ext = file_name.rsplit_once('.').map(|(_, e)| e)?;
    let lang = match ext.to_ascii_lowercase().as_str() {
        "rs" => "rust",
        "py" | "pyi" => "python",
        "js" | "mjs" | "cjs" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "scala" => "scala",
        "sh" | "bash" | "zsh" => "shell",
        "sql" => "sql",
        "html" | "htm" => "html",
        "css" | "scss" => "css",
        "md" | "markdown" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        _ => return None,
    };
    Some(lang)
}

fn make_chunk(
    project_id: &str,
    file_path: &str,
    kind: ChunkKind,
    (start_line, end_line): (u32, u32),
    language: Option<String>,
    content: &str,
) -> Chunk {
    Chunk {
        id: chunk_id(project_id, file_path, kind, start_line, end_line),
        project_id: project_id.to_string(),
        file_path: file_path.to_string(),
        kind,
        start_line,
        end_line,
        language,
        content_hash: content_hash(content),
        content: content.to_string(),
    }
}

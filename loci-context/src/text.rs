//! Language-aware chunking of extracted file bodies.
//!
//! A file body is split into ordered [`TextChunk`]s whose boundaries follow the
//! structure of the content: top-level declarations for source code, headings
//! for markup, top-level keys for configuration formats. Content with no
//! recognizable structure falls back to fixed-size byte windows with a small
//! overlap. Structural splits never overlap; only window splits do.
//!
//! Each chunk records its byte range in the original body so callers can map
//! search hits back to file positions.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// No chunk may exceed this many bytes, regardless of configuration.
pub const HARD_CAP_BYTES: usize = 2000;

/// Category of content a chunk was produced from.
///
/// `Ocr`, `Annotation`, and `Gitlog` are never produced by the splitter
/// itself; they tag fragments built from extractor metadata blocks and from
/// user notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Code,
    Doc,
    Config,
    Ocr,
    Annotation,
    Gitlog,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Code => "code",
            ChunkKind::Doc => "doc",
            ChunkKind::Config => "config",
            ChunkKind::Ocr => "ocr",
            ChunkKind::Annotation => "annotation",
            ChunkKind::Gitlog => "gitlog",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code" => Some(ChunkKind::Code),
            "doc" => Some(ChunkKind::Doc),
            "config" => Some(ChunkKind::Config),
            "ocr" => Some(ChunkKind::Ocr),
            "annotation" => Some(ChunkKind::Annotation),
            "gitlog" => Some(ChunkKind::Gitlog),
            _ => None,
        }
    }
}

/// One ordered slice of a file body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextChunk {
    /// Position of this chunk within the file, starting at 0.
    pub sequence: usize,
    /// Byte offset of the start of the covered range in the original body.
    pub start: usize,
    /// Byte offset one past the end of the covered range.
    pub end: usize,
    /// The chunk text.
    pub text: String,
    pub kind: ChunkKind,
}

/// Size limits applied while splitting.
#[derive(Debug, Clone, Copy)]
pub struct ChunkConfig {
    pub max_bytes: usize,
    pub overlap_bytes: usize,
}

/// Default size limits for a file extension.
pub fn config_for_extension(ext: &str) -> ChunkConfig {
    match kind_for_extension(ext) {
        ChunkKind::Code => ChunkConfig {
            max_bytes: 1200,
            overlap_bytes: 200,
        },
        ChunkKind::Config => ChunkConfig {
            max_bytes: 600,
            overlap_bytes: 100,
        },
        _ => ChunkConfig {
            max_bytes: 800,
            overlap_bytes: 150,
        },
    }
}

/// Content category implied by a file extension.
pub fn kind_for_extension(ext: &str) -> ChunkKind {
    match ext {
        "rs" | "py" | "pyi" | "pyw" | "js" | "mjs" | "cjs" | "ts" | "mts" | "cts" | "jsx"
        | "tsx" | "go" | "java" | "kt" | "kts" | "scala" | "sc" | "groovy" | "gradle" | "clj"
        | "cljs" | "cljc" | "c" | "cpp" | "cc" | "cxx" | "h" | "hpp" | "hxx" | "hh" | "cs"
        | "fs" | "fsi" | "fsx" | "rb" | "erb" | "swift" | "m" | "mm" | "dart" | "php" | "pl"
        | "pm" | "lua" | "r" | "jl" | "ex" | "exs" | "erl" | "hrl" | "hs" | "lhs" | "ml"
        | "mli" | "elm" | "zig" | "nim" | "v" | "d" | "sol" | "sql" | "sh" | "bash" | "zsh"
        | "ps1" | "vue" | "svelte" | "astro" => ChunkKind::Code,
        "toml" | "yaml" | "yml" | "json" | "jsonc" | "json5" | "ini" | "cfg" | "conf" | "env"
        | "properties" | "tf" | "tfvars" | "hcl" | "nix" | "proto" | "graphql" | "gql" => {
            ChunkKind::Config
        }
        _ => ChunkKind::Doc,
    }
}

/// Regex matching the start of a top-level unit for the given extension.
///
/// Every pattern begins with `\n` so that a match locates the boundary line;
/// the split point is placed just after that newline, which keeps headings and
/// declaration lines at the top of the chunk that follows them.
fn boundary_pattern(ext: &str) -> Option<Regex> {
    let pattern = match ext {
        "rs" => r"\n(?:pub\s+)?(?:async\s+)?(?:fn |struct |enum |impl |trait |mod )",
        "py" | "pyi" | "pyw" => r"\n(?:class |def |async def )",
        "js" | "jsx" | "mjs" | "cjs" => {
            r"\n(?:function |class |export (?:default )?(?:function |class |const |let ))"
        }
        "ts" | "tsx" | "mts" | "cts" => {
            r"\n(?:(?:export )?(?:function |class |interface |type |const |enum |async function ))"
        }
        "go" => r"\n(?:func |type )",
        "java" | "cs" => {
            r"\n\s*(?:public |private |protected )?(?:static )?(?:class |interface |void |int |String )"
        }
        "kt" | "kts" => {
            r"\n(?:(?:override |suspend |private |internal |public )?(?:fun |class |object |interface |data class |sealed class |enum class ))"
        }
        "scala" | "sc" => {
            r"\n\s*(?:(?:private |protected )?(?:def |class |object |trait |case class |val |var ))"
        }
        "swift" => {
            r"\n\s*(?:(?:public |private |internal |open )?(?:func |class |struct |enum |protocol |extension ))"
        }
        "c" | "cpp" | "cc" | "cxx" | "h" | "hpp" | "hxx" | "hh" | "m" | "mm" => {
            r"\n(?:[a-zA-Z_][a-zA-Z0-9_*\s]+\([^)]*\)\s*\{)"
        }
        "rb" | "erb" => r"\n(?:class |module |def )",
        "php" => {
            r"\n\s*(?:(?:public |private |protected |static )?function |class |interface |trait )"
        }
        "lua" => r"\n(?:(?:local )?function )",
        "jl" => r"\n(?:function |macro |struct |module |abstract type )",
        "ex" | "exs" => r"\n\s*(?:def |defp |defmodule |defmacro )",
        "hs" | "lhs" => r"\n[a-z][a-zA-Z0-9_']*\s+::",
        "ml" | "mli" => r"\n(?:let |type |module |val )",
        "fs" | "fsi" | "fsx" => r"\n(?:let |type |module |member )",
        "zig" => r"\n(?:(?:pub )?(?:fn |const |var ))",
        "nim" => r"\n(?:proc |func |method |type |template |macro )",
        "sol" => r"\n\s*(?:function |contract |interface |library |event |modifier )",
        "pl" | "pm" => r"\n(?:sub |package )",
        "groovy" | "gradle" => r"\n\s*(?:def |class |interface )",
        "vue" | "svelte" | "astro" => r"\n<(?:template|script|style)",
        "md" | "markdown" => r"\n#{1,6} ",
        "rst" | "adoc" | "tex" => r"\n\n",
        "toml" | "ini" | "cfg" => r"\n\[",
        "yaml" | "yml" => r"\n[a-zA-Z_][a-zA-Z0-9_]*:",
        "tf" | "tfvars" | "hcl" => r"\n(?:resource |data |variable |output |module |locals )",
        "nix" => r"\n\s*[a-zA-Z_][a-zA-Z0-9_-]*\s*=",
        "proto" => r"\n(?:message |service |enum |rpc )",
        "graphql" | "gql" => r"\n(?:type |query |mutation |subscription |input |interface |enum )",
        _ => return None,
    };
    Regex::new(pattern).ok()
}

/// Splitter with optional size overrides.
#[derive(Debug, Clone, Default)]
pub struct TextChunker {
    max_bytes: Option<usize>,
    overlap_bytes: Option<usize>,
}

impl TextChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the per-kind chunk size. Clamped to `[100, HARD_CAP_BYTES]`.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Override the window overlap.
    pub fn with_overlap_bytes(mut self, overlap_bytes: usize) -> Self {
        self.overlap_bytes = Some(overlap_bytes);
        self
    }

    /// Split `text` into ordered chunks using boundaries appropriate for
    /// `ext`. Whitespace-only input produces no chunks.
    pub fn chunk(&self, text: &str, ext: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut config = config_for_extension(ext);
        if let Some(max) = self.max_bytes {
            config.max_bytes = max.clamp(100, HARD_CAP_BYTES);
        }
        config.max_bytes = config.max_bytes.min(HARD_CAP_BYTES);
        if let Some(overlap) = self.overlap_bytes {
            config.overlap_bytes = overlap.min(config.max_bytes / 2);
        }

        let kind = kind_for_extension(ext);
        let mut chunks = Vec::new();

        match boundary_pattern(ext) {
            Some(pattern) => {
                structural_chunks(text, &config, &pattern, kind, &mut chunks);
            }
            None => {
                window_chunks(text, 0, config.max_bytes, config.overlap_bytes, kind, &mut chunks);
            }
        }

        for (sequence, chunk) in chunks.iter_mut().enumerate() {
            chunk.sequence = sequence;
        }
        chunks
    }
}

/// Split at structural boundaries, accumulating adjacent segments up to the
/// size limit. A single segment larger than the limit falls back to window
/// splitting within itself; those windows are the only place overlap appears.
fn structural_chunks(
    text: &str,
    config: &ChunkConfig,
    pattern: &Regex,
    kind: ChunkKind,
    out: &mut Vec<TextChunk>,
) {
    let mut split_points: Vec<usize> = vec![0];
    for m in pattern.find_iter(text) {
        let pos = m.start();
        if pos == 0 {
            continue;
        }
        // The match begins at a newline; split just after it so the boundary
        // line opens the next chunk.
        let boundary = text[pos..]
            .find('\n')
            .map(|i| pos + i + 1)
            .unwrap_or(pos);
        if boundary > *split_points.last().unwrap_or(&0) && boundary < text.len() {
            split_points.push(boundary);
        }
    }
    split_points.push(text.len());
    split_points.dedup();

    let mut run_start: Option<usize> = None;
    let mut run_end = 0usize;

    for window in split_points.windows(2) {
        let (seg_start, seg_end) = (window[0], window[1]);
        let seg_len = seg_end - seg_start;

        if let Some(start) = run_start {
            if (run_end - start) + seg_len > config.max_bytes {
                flush_run(text, start, run_end, config, kind, out);
                run_start = Some(seg_start);
            }
        } else {
            run_start = Some(seg_start);
        }
        run_end = seg_end;
    }

    if let Some(start) = run_start {
        if !text[start..run_end].trim().is_empty() {
            flush_run(text, start, run_end, config, kind, out);
        }
    }
}

fn flush_run(
    text: &str,
    start: usize,
    end: usize,
    config: &ChunkConfig,
    kind: ChunkKind,
    out: &mut Vec<TextChunk>,
) {
    if end - start > config.max_bytes {
        window_chunks(
            &text[start..end],
            start,
            config.max_bytes,
            config.overlap_bytes,
            kind,
            out,
        );
    } else {
        out.push(TextChunk {
            sequence: 0,
            start,
            end,
            text: text[start..end].to_string(),
            kind,
        });
    }
}

/// Fixed-size windows over `text`, preferring to break at a newline, then a
/// sentence end, then a space. Consecutive windows overlap by up to
/// `overlap` bytes. `base` is added to all recorded offsets.
fn window_chunks(
    text: &str,
    base: usize,
    max_bytes: usize,
    overlap: usize,
    kind: ChunkKind,
    out: &mut Vec<TextChunk>,
) {
    let mut start = 0usize;

    while start < text.len() {
        let mut end = (start + max_bytes).min(text.len());
        while end < text.len() && !text.is_char_boundary(end) {
            end -= 1;
        }

        if end >= text.len() {
            out.push(TextChunk {
                sequence: 0,
                start: base + start,
                end: base + text.len(),
                text: text[start..].to_string(),
                kind,
            });
            break;
        }

        let slice = &text[start..end];
        let split_at = slice
            .rfind('\n')
            .or_else(|| slice.rfind(". "))
            .or_else(|| slice.rfind(' '))
            .map(|i| start + i + 1)
            .filter(|&i| i > start)
            .unwrap_or(end);

        out.push(TextChunk {
            sequence: 0,
            start: base + start,
            end: base + split_at,
            text: text[start..split_at].to_string(),
            kind,
        });

        let rewind = overlap.min(split_at - start);
        let mut next = split_at - rewind;
        while next > start && !text.is_char_boundary(next) {
            next += 1;
        }
        if next <= start {
            next = split_at;
        }
        start = next;
    }
}

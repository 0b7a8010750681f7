use std::path::Path;

use crate::ExtractError;

/// Bytes sniffed from the head of a file when checking for binary content.
const SNIFF_BYTES: usize = 8 * 1024;

/// NUL density above this fraction marks the content as binary.
const BINARY_NUL_RATIO: f64 = 0.01;

/// Built-in table of extensions treated as text.
pub fn is_text_extension(ext: &str) -> bool {
    matches!(
        ext,
        "txt" | "md" | "markdown" | "rst" | "adoc" | "tex" | "bib"
            | "rs" | "py" | "pyi" | "pyw" | "rb" | "erb" | "go" | "java" | "kt" | "kts"
            | "scala" | "sc" | "groovy" | "gradle" | "clj" | "cljs" | "cljc"
            | "c" | "cpp" | "cc" | "cxx" | "h" | "hpp" | "hxx" | "hh" | "cs" | "fs" | "fsi"
            | "fsx" | "vb" | "vbs" | "swift" | "m" | "mm" | "dart" | "php" | "pl" | "pm"
            | "lua" | "r" | "jl" | "ex" | "exs" | "erl" | "hrl" | "hs" | "lhs" | "ml" | "mli"
            | "elm" | "zig" | "nim" | "v" | "d" | "sol" | "move" | "wat" | "asm" | "s" | "pas"
            | "lisp" | "el" | "rkt"
            | "js" | "mjs" | "cjs" | "ts" | "mts" | "cts" | "jsx" | "tsx"
            | "html" | "htm" | "xml" | "svg" | "css" | "scss" | "sass" | "less" | "styl"
            | "vue" | "svelte" | "astro" | "pug" | "ejs" | "hbs"
            | "json" | "jsonc" | "json5" | "toml" | "yaml" | "yml" | "ini" | "cfg" | "conf"
            | "env" | "properties" | "tf" | "tfvars" | "hcl" | "nix" | "proto" | "graphql"
            | "gql" | "sql" | "sh" | "bash" | "zsh" | "fish" | "ps1" | "bat" | "cmd"
            | "csv" | "tsv" | "log" | "lock" | "cmake" | "dockerfile" | "makefile"
    )
}

/// True when the head of `bytes` looks like binary data.
pub fn sniff_is_binary(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(SNIFF_BYTES)];
    if head.is_empty() {
        return false;
    }
    let nuls = head.iter().filter(|&&b| b == 0).count();
    (nuls as f64 / head.len() as f64) > BINARY_NUL_RATIO
}

/// Read a file as UTF-8 with replacement, rejecting binary content.
pub fn read_text(path: &Path) -> Result<String, ExtractError> {
    let bytes =
        std::fs::read(path).map_err(|e| ExtractError::skipped(path, format!("read failed: {e}")))?;
    if sniff_is_binary(&bytes) {
        return Err(ExtractError::skipped(path, "binary content"));
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_extension_table() {
        assert!(is_text_extension("rs"));
        assert!(is_text_extension("tsx"));
        assert!(is_text_extension("sql"));
        assert!(is_text_extension("yml"));
        assert!(!is_text_extension("exe"));
        assert!(!is_text_extension("png"));
        assert!(!is_text_extension("pdf"));
    }

    #[test]
    fn sniff_flags_nul_heavy_heads() {
        assert!(sniff_is_binary(&[0u8; 1024]));

        let mut mostly_text = vec![b'a'; 1024];
        mostly_text[3] = 0;
        // one NUL in 1024 bytes is below the 1% threshold
        assert!(!sniff_is_binary(&mostly_text));

        assert!(!sniff_is_binary(b"plain ascii text"));
        assert!(!sniff_is_binary(&[]));
    }

    #[test]
    fn sniff_only_looks_at_the_head() {
        let mut bytes = vec![b'a'; SNIFF_BYTES];
        bytes.extend(std::iter::repeat(0u8).take(4096));
        assert!(!sniff_is_binary(&bytes));
    }

    #[test]
    fn read_text_replaces_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("latin1.txt");
        std::fs::write(&file, [b'c', b'a', b'f', 0xE9, b' ', b'x']).unwrap();
        let text = read_text(&file).unwrap();
        assert!(text.contains('\u{FFFD}'));
        assert!(text.starts_with("caf"));
    }
}

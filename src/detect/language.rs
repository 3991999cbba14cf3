//! Language mix detection by file-extension tally.
//!
//! Walks the working copy (pruning the standard exclude set and `.git`),
//! counts files per known extension, and reports the primary language plus
//! the full set ordered by file count.

use std::collections::HashMap;
use std::path::Path;

use walkdir::WalkDir;

use crate::constants::DEFAULT_EXCLUDED_DIRS;

/// Extension → language. Lowercased extensions except where case matters.
fn language_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "py" | "pyw" | "pyi" => "Python",
        "js" | "mjs" | "cjs" | "jsx" => "JavaScript",
        "ts" | "tsx" | "mts" | "cts" => "TypeScript",
        "go" => "Go",
        "rs" => "Rust",
        "java" => "Java",
        "c" | "h" => "C",
        "cpp" | "cc" | "cxx" | "hpp" | "hxx" => "C++",
        "cs" => "C#",
        "rb" | "rake" => "Ruby",
        "php" => "PHP",
        "swift" => "Swift",
        "kt" | "kts" => "Kotlin",
        "scala" => "Scala",
        "r" | "R" => "R",
        "jl" => "Julia",
        "sh" | "bash" | "zsh" => "Shell",
        "lua" => "Lua",
        "pl" | "pm" => "Perl",
        "ex" | "exs" => "Elixir",
        "hs" => "Haskell",
        "ml" | "mli" => "OCaml",
        "zig" => "Zig",
        _ => return None,
    })
}

fn is_excluded_dir(name: &str) -> bool {
    let lower = name.to_lowercase();
    DEFAULT_EXCLUDED_DIRS.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix('*') {
            lower.starts_with(prefix)
        } else {
            lower == *pattern
        }
    })
}

/// Detect `(primary language, all languages by file count)`.
pub fn detect_languages(repo_path: &Path) -> (Option<String>, Vec<String>) {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();

    let walker = WalkDir::new(repo_path)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            // depth 0 is the repo root; its own name never excludes it
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !(name == ".git" || is_excluded_dir(&name))
        });

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
            continue;
        };
        // R is the one case-sensitive extension; everything else lowercases
        let language = language_for_extension(ext)
            .or_else(|| language_for_extension(&ext.to_lowercase()));
        if let Some(language) = language {
            *counts.entry(language).or_insert(0) += 1;
        }
    }

    if counts.is_empty() {
        return (None, Vec::new());
    }

    let mut ordered: Vec<(&str, usize)> = counts.into_iter().collect();
    // by count descending, then name for a stable order
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    let primary = ordered.first().map(|(lang, _)| (*lang).to_string());
    let all = ordered.into_iter().map(|(lang, _)| lang.to_string()).collect();
    (primary, all)
}

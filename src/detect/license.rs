//! License identification from license file text.
//!
//! Reads the first 2KB of the first `LICENSE*`/`LICENCE*`/`COPYING` file
//! found and matches well-known phrases. This is a heuristic; `other` is a
//! valid answer.

use std::path::Path;

use crate::domain::LicenseInfo;

/// File names checked, in order.
const LICENSE_FILES: &[&str] = &[
    "LICENSE",
    "LICENSE.txt",
    "LICENSE.md",
    "LICENCE",
    "LICENCE.txt",
    "LICENCE.md",
    "COPYING",
];

/// How much of the file the heuristic looks at.
const HEAD_BYTES: usize = 2048;

/// Detect the license of a repository, if any license file exists.
pub fn detect_license(repo_path: &Path) -> Option<LicenseInfo> {
    for filename in LICENSE_FILES {
        let filepath = repo_path.join(filename);
        if !filepath.exists() {
            continue;
        }
        let Ok(bytes) = std::fs::read(&filepath) else {
            continue;
        };
        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(HEAD_BYTES)]).into_owned();
        let key = identify_license(&head);
        return Some(LicenseInfo {
            name: display_name(&key).map(str::to_string),
            key,
            file: Some((*filename).to_string()),
        });
    }
    None
}

/// Identify a license key from the head of a license file.
pub fn identify_license(content: &str) -> String {
    let content = content.to_lowercase();

    if content.contains("mit license")
        || content.contains("permission is hereby granted, free of charge")
    {
        return "mit".into();
    }
    if content.contains("apache license") && content.contains("version 2.0") {
        return "apache-2.0".into();
    }
    if content.contains("gnu lesser general public license") {
        return "lgpl".into();
    }
    if content.contains("gnu affero general public license") {
        return "agpl-3.0".into();
    }
    if content.contains("gnu general public license") {
        if content.contains("version 3") {
            return "gpl-3.0".into();
        }
        if content.contains("version 2") {
            return "gpl-2.0".into();
        }
        return "gpl".into();
    }
    if content.contains("bsd") {
        if content.contains("3-clause") || content.contains("three-clause") {
            return "bsd-3-clause".into();
        }
        if content.contains("2-clause") || content.contains("two-clause") {
            return "bsd-2-clause".into();
        }
        return "bsd".into();
    }
    if content.contains("mozilla public license") {
        return "mpl-2.0".into();
    }
    if content.contains("unlicense") {
        return "unlicense".into();
    }
    if content.contains("creative commons") {
        return "cc".into();
    }

    "other".into()
}

fn display_name(key: &str) -> Option<&'static str> {
    Some(match key {
        "mit" => "MIT License",
        "apache-2.0" => "Apache License 2.0",
        "gpl-3.0" => "GNU General Public License v3.0",
        "gpl-2.0" => "GNU General Public License v2.0",
        "gpl" => "GNU General Public License",
        "lgpl" => "GNU Lesser General Public License",
        "agpl-3.0" => "GNU Affero General Public License v3.0",
        "bsd-3-clause" => "BSD 3-Clause License",
        "bsd-2-clause" => "BSD 2-Clause License",
        "bsd" => "BSD License",
        "mpl-2.0" => "Mozilla Public License 2.0",
        "unlicense" => "The Unlicense",
        "cc" => "Creative Commons",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_identify_common_licenses() {
        assert_eq!(
            identify_license("MIT License\n\nPermission is hereby granted..."),
            "mit"
        );
        assert_eq!(
            identify_license("Apache License\nVersion 2.0, January 2004"),
            "apache-2.0"
        );
        assert_eq!(
            identify_license("GNU GENERAL PUBLIC LICENSE\nVersion 3, 29 June 2007"),
            "gpl-3.0"
        );
        assert_eq!(
            identify_license("BSD 3-Clause License\n\nRedistribution..."),
            "bsd-3-clause"
        );
        assert_eq!(identify_license("Mozilla Public License Version 2.0"), "mpl-2.0");
        assert_eq!(identify_license("random unrecognizable text"), "other");
    }

    #[test]
    fn test_detect_license_reads_first_file_found() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("LICENSE"),
            "MIT License\n\nPermission is hereby granted, free of charge...",
        )
        .unwrap();

        let license = detect_license(dir.path()).unwrap();
        assert_eq!(license.key, "mit");
        assert_eq!(license.file.as_deref(), Some("LICENSE"));
        assert_eq!(license.name.as_deref(), Some("MIT License"));
    }

    #[test]
    fn test_detect_license_copying_fallback() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("COPYING"),
            "GNU GENERAL PUBLIC LICENSE\nVersion 2, June 1991",
        )
        .unwrap();

        let license = detect_license(dir.path()).unwrap();
        assert_eq!(license.key, "gpl-2.0");
        assert_eq!(license.file.as_deref(), Some("COPYING"));
    }

    #[test]
    fn test_no_license_file() {
        let dir = TempDir::new().unwrap();
        assert!(detect_license(dir.path()).is_none());
    }

    #[test]
    fn test_only_first_2kb_considered() {
        let dir = TempDir::new().unwrap();
        let mut content = "x".repeat(4096);
        content.push_str("MIT License");
        std::fs::write(dir.path().join("LICENSE"), content).unwrap();

        let license = detect_license(dir.path()).unwrap();
        assert_eq!(license.key, "other");
    }
}

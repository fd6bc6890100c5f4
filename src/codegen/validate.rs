//! Validation of generated file sets
//!
//! The template tree supplies scaffolding; the model must still hand back a
//! manifest with build and start scripts and at least one page. Anything
//! less fails the run before a container is ever created.

use std::path::Path;

use thiserror::Error;

use super::GeneratedFiles;

/// Manifest the generated project must carry
const MANIFEST: &str = "package.json";

/// Extensions that count as page-level source
const PAGE_EXTENSIONS: [&str; 4] = ["js", "jsx", "ts", "tsx"];

/// Validation failures over a generated file set
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("manifest is not valid JSON: {0}")]
    InvalidManifest(String),

    #[error("manifest does not declare a \"{0}\" script")]
    MissingScript(String),

    #[error("no page-level source file in generated output")]
    NoPageSource,
}

/// Validate a generated file set before materialization
pub fn validate_files(files: &GeneratedFiles) -> Result<(), ValidationError> {
    let manifest = files
        .get(MANIFEST)
        .ok_or_else(|| ValidationError::MissingFile(MANIFEST.to_string()))?;

    let parsed: serde_json::Value = serde_json::from_str(manifest)
        .map_err(|e| ValidationError::InvalidManifest(e.to_string()))?;

    for script in ["build", "start"] {
        let declared = parsed
            .get("scripts")
            .and_then(|scripts| scripts.get(script))
            .and_then(|value| value.as_str())
            .is_some_and(|value| !value.trim().is_empty());
        if !declared {
            return Err(ValidationError::MissingScript(script.to_string()));
        }
    }

    if !files.keys().any(|path| is_page_source(path)) {
        return Err(ValidationError::NoPageSource);
    }

    Ok(())
}

/// A page-level source file lives under `app/` or `pages/` with a script
/// extension
fn is_page_source(path: &str) -> bool {
    let path = Path::new(path);

    let in_page_dir = path.components().any(|component| {
        matches!(
            component.as_os_str().to_str(),
            Some("app") | Some("pages") | Some("src")
        )
    });

    let has_extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| PAGE_EXTENSIONS.contains(&ext));

    in_page_dir && has_extension
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn files(pairs: &[(&str, &str)]) -> GeneratedFiles {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    const GOOD_MANIFEST: &str =
        r#"{"scripts": {"build": "next build", "start": "next start -p 3000"}}"#;

    #[test]
    fn test_valid_file_set() {
        let set = files(&[
            ("package.json", GOOD_MANIFEST),
            ("app/page.tsx", "export default function Page() {}"),
        ]);
        assert!(validate_files(&set).is_ok());
    }

    #[test]
    fn test_empty_set_reports_missing_file() {
        let err = validate_files(&HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("missing required file"));
    }

    #[test]
    fn test_manifest_must_parse() {
        let set = files(&[("package.json", "not json"), ("app/page.tsx", "x")]);
        assert!(matches!(
            validate_files(&set),
            Err(ValidationError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_both_scripts_required() {
        let set = files(&[
            ("package.json", r#"{"scripts": {"build": "next build"}}"#),
            ("app/page.tsx", "x"),
        ]);
        assert!(matches!(
            validate_files(&set),
            Err(ValidationError::MissingScript(script)) if script == "start"
        ));

        let set = files(&[
            ("package.json", r#"{"scripts": {"start": "next start"}}"#),
            ("app/page.tsx", "x"),
        ]);
        assert!(matches!(
            validate_files(&set),
            Err(ValidationError::MissingScript(script)) if script == "build"
        ));
    }

    #[test]
    fn test_page_source_required() {
        let set = files(&[("package.json", GOOD_MANIFEST), ("README.md", "docs")]);
        assert!(matches!(
            validate_files(&set),
            Err(ValidationError::NoPageSource)
        ));
    }

    #[test]
    fn test_page_source_locations() {
        assert!(is_page_source("app/page.tsx"));
        assert!(is_page_source("pages/index.jsx"));
        assert!(is_page_source("src/app/about/page.tsx"));
        assert!(!is_page_source("styles/globals.css"));
        assert!(!is_page_source("page.tsx"));
        assert!(!is_page_source("app/data.json"));
    }

    #[test]
    fn test_duplicate_filenames_last_wins() {
        // The gateway's wire format is a JSON object; serde keeps the last
        // occurrence of a duplicated key.
        let body = format!(
            r#"{{"package.json": "{{}}", "package.json": {}}}"#,
            serde_json::to_string(GOOD_MANIFEST).unwrap()
        );
        let parsed: GeneratedFiles = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed["package.json"], GOOD_MANIFEST);
    }
}

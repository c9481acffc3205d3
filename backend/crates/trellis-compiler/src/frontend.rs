//! The seam to the external compiler front-end.
//!
//! The front-end parses and type-checks the application source and dumps one
//! `*.ast.json` file per source unit in the [`crate::ast`] data model. This
//! module loads those dumps; anything about the source language itself stays
//! on the other side of the seam.

use crate::ast::{Program, Unit};
use crate::error::{CompilerError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Suffix of front-end dump files below the source root.
pub const AST_DUMP_SUFFIX: &str = ".ast.json";

/// Loads a parsed program from a source root.
pub trait Frontend {
    fn load(&self, root: &Path) -> Result<Program>;
}

/// Reads every `*.ast.json` file below the root, in path order.
#[derive(Debug, Default)]
pub struct JsonFrontend;

impl JsonFrontend {
    pub fn new() -> Self {
        JsonFrontend
    }

    fn collect_dumps(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::collect_dumps(&path, out)?;
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(AST_DUMP_SUFFIX))
                .unwrap_or(false)
            {
                out.push(path);
            }
        }
        Ok(())
    }
}

impl Frontend for JsonFrontend {
    fn load(&self, root: &Path) -> Result<Program> {
        if !root.is_dir() {
            return Err(CompilerError::SourceRoot(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut dumps = Vec::new();
        Self::collect_dumps(root, &mut dumps)
            .map_err(|e| CompilerError::SourceRoot(e.to_string()))?;
        dumps.sort();

        let mut units = Vec::new();
        for path in dumps {
            let raw = fs::read_to_string(&path).map_err(|e| CompilerError::MalformedUnit {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            let unit: Unit =
                serde_json::from_str(&raw).map_err(|e| CompilerError::MalformedUnit {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            log::debug!("Loaded unit {} from {}", unit.path, path.display());
            units.push(unit);
        }

        log::info!("Front-end produced {} unit(s)", units.len());
        Ok(Program { units })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loads_dumps_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("app");
        fs::create_dir(&nested).unwrap();
        fs::write(
            nested.join("main.ast.json"),
            r#"{ "path": "app/main.ts", "items": [] }"#,
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let program = JsonFrontend::new().load(dir.path()).unwrap();
        assert_eq!(program.units.len(), 1);
        assert_eq!(program.units[0].path, "app/main.ts");
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let err = JsonFrontend::new()
            .load(Path::new("/nonexistent/trellis-src"))
            .unwrap_err();
        assert!(matches!(err, CompilerError::SourceRoot(_)));
    }

    #[test]
    fn test_malformed_dump_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.ast.json"), "{ not json").unwrap();
        let err = JsonFrontend::new().load(dir.path()).unwrap_err();
        assert!(matches!(err, CompilerError::MalformedUnit { .. }));
    }
}

// src/tools/mapping.rs
// Survey question-hierarchy mapping files and the tool that reads them

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::Tool;
use crate::error::PipelineError;

/// Find the newest `question_mapping_<year>.json` under the mapping
/// directory. Returns the year and its file path.
pub fn latest_mapping_year(dir: &Path) -> Option<(i32, PathBuf)> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut latest: Option<(i32, PathBuf)> = None;

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(year) = stem
            .strip_prefix("question_mapping_")
            .and_then(|y| y.parse::<i32>().ok())
        else {
            continue;
        };
        if latest.as_ref().map(|(y, _)| year > *y).unwrap_or(true) {
            latest = Some((year, path));
        }
    }

    latest
}

fn read_mapping(dir: &Path, filename: Option<&str>) -> Result<Value, String> {
    let path = match filename {
        Some(name) => dir.join(name),
        None => {
            latest_mapping_year(dir)
                .map(|(_, path)| path)
                .ok_or_else(|| format!("no mapping files under {}", dir.display()))?
        }
    };

    let raw = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read mapping file {}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| format!("mapping file is not valid JSON: {}", e))
}

#[derive(Debug, Deserialize, Default)]
struct MappingRequest {
    #[serde(default)]
    filename: Option<String>,
}

/// Reads the question-hierarchy mapping file for the oral-health survey.
pub struct MappingFileTool {
    dir: PathBuf,
}

impl MappingFileTool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Tool for MappingFileTool {
    fn name(&self) -> &'static str {
        "sohea_mapping_file_reader"
    }

    fn description(&self) -> &'static str {
        "Reads the survey question mapping file. Input is a JSON object with an optional filename."
    }

    async fn call(&self, input: &str) -> Result<String, PipelineError> {
        // Input may be a JSON object or empty; either selects the latest file
        let request: MappingRequest = if input.trim().is_empty() {
            MappingRequest::default()
        } else {
            match serde_json::from_str(input) {
                Ok(r) => r,
                Err(e) => return Ok(format!("invalid request JSON: {}", e)),
            }
        };

        match read_mapping(&self.dir, request.filename.as_deref()) {
            Ok(mapping) => Ok(mapping.to_string()),
            Err(e) => Ok(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn latest_year_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("question_mapping_2023.json"), "{}").unwrap();
        fs::write(dir.path().join("question_mapping_2025.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let (year, path) = latest_mapping_year(dir.path()).unwrap();
        assert_eq!(year, 2025);
        assert!(path.ends_with("question_mapping_2025.json"));
    }

    #[tokio::test]
    async fn tool_reads_named_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("question_mapping_2024.json"),
            r#"{"Q1": {"children": ["Q1a"]}}"#,
        )
        .unwrap();

        let tool = MappingFileTool::new(dir.path());
        let out = tool
            .call(r#"{"filename": "question_mapping_2024.json"}"#)
            .await
            .unwrap();
        assert!(out.contains("Q1a"));

        // Missing files come back as an observation string
        let out = tool.call(r#"{"filename": "missing.json"}"#).await.unwrap();
        assert!(out.contains("cannot read mapping file"));
    }
}

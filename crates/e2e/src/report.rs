//! Allure-compatible result files
//!
//! Every scenario produces one `<uuid>-result.json` in the results directory,
//! plus one `<uuid>-attachment.<ext>` file per attachment. The layout is the
//! one `allure generate` reads.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::E2eResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Passed,
    Failed,
    Broken,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Running,
    Finished,
    Interrupted,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl StatusDetails {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            trace: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    /// File name of the attachment inside the results directory
    pub source: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub name: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_details: Option<StatusDetails>,
    pub stage: Stage,
    pub start: i64,
    pub stop: i64,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl StepRecord {
    pub fn started(name: String) -> Self {
        Self {
            name,
            status: Status::Passed,
            status_details: None,
            stage: Stage::Running,
            start: now_millis(),
            stop: 0,
            steps: Vec::new(),
            attachments: Vec::new(),
        }
    }
}

/// One scenario's result, as Allure expects it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllureResult {
    pub uuid: String,
    pub history_id: String,
    pub name: String,
    pub full_name: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_details: Option<StatusDetails>,
    pub stage: Stage,
    pub start: i64,
    pub stop: i64,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// Attachment bytes waiting to be written next to the result file
#[derive(Debug, Clone)]
pub struct AttachmentContent {
    pub source: String,
    pub bytes: Vec<u8>,
}

/// Writes result files into the results directory
pub struct ResultsWriter {
    dir: PathBuf,
}

impl ResultsWriter {
    pub fn new(dir: impl Into<PathBuf>) -> E2eResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a result and its attachments; returns the result file path
    pub fn write_result(
        &self,
        result: &AllureResult,
        contents: &[AttachmentContent],
    ) -> E2eResult<PathBuf> {
        for content in contents {
            std::fs::write(self.dir.join(&content.source), &content.bytes)?;
        }

        let path = self.dir.join(format!("{}-result.json", result.uuid));
        std::fs::write(&path, serde_json::to_string_pretty(result)?)?;
        debug!("Wrote {}", path.display());
        Ok(path)
    }

    /// Write `environment.properties` shown on the report overview
    pub fn write_environment(&self, entries: &[(&str, String)]) -> E2eResult<()> {
        let body: String = entries
            .iter()
            .map(|(key, value)| format!("{}={}\n", key, value))
            .collect();
        std::fs::write(self.dir.join("environment.properties"), body)?;
        Ok(())
    }

    /// Remove result files left by previous runs. Unrelated files stay.
    pub fn clean(&self) -> E2eResult<usize> {
        let mut removed = 0;

        for entry in walkdir::WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let name = entry.file_name().to_string_lossy();
            if is_report_file(&name) {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }

        if removed > 0 {
            info!("Removed {} stale result file(s) from {}", removed, self.dir.display());
        }
        Ok(removed)
    }
}

fn is_report_file(name: &str) -> bool {
    name.ends_with("-result.json")
        || name.ends_with("-container.json")
        || name.contains("-attachment.")
        || name == "environment.properties"
}

/// Stable identifier grouping runs of the same scenario across reports
pub fn history_id(full_name: &str) -> String {
    let digest = Sha256::digest(full_name.as_bytes());
    hex::encode(digest)
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// File extension used for an attachment of the given MIME type
pub fn attachment_extension(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "application/json" => "json",
        "text/html" => "html",
        _ => "txt",
    }
}

/// Where report files go and what extra artifacts to collect
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub results_dir: PathBuf,
    /// Attach a screenshot when a scenario fails
    pub screenshot_on_failure: bool,
    /// Remove stale result files before the run
    pub clean: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("allure-results"),
            screenshot_on_failure: true,
            clean: false,
        }
    }
}

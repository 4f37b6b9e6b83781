//! Loader for the RMI model-parameter artifact.
//!
//! The artifact is a self-describing text document produced by an external
//! training step:
//!
//! ```text
//! branch_factor: <int>
//! stage1: { slope: <f64>, intercept: <f64> }
//! stage2: [
//!   { slope: <f64>, intercept: <f64>, min_error: <int>, max_error: <int> },
//! ]
//! ```
//!
//! The parser is line-oriented and deliberately tolerant: field names may be
//! quoted, records may sit on one line or span several, whitespace and
//! trailing commas are ignored. What it is not tolerant of is structure:
//! missing fields, unterminated records, or a stage-2 record count that
//! disagrees with `branch_factor` all fail the load, leaving the consuming
//! engine in its unloaded state.

use crate::error::LoadError;
use crate::learned::LinearModel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One stage-2 record: a linear model plus the signed residual bounds
/// observed on the keys routed to it (`min_error <= 0 <= max_error`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StageModel {
    pub slope: f64,
    pub intercept: f64,
    pub min_error: i64,
    pub max_error: i64,
}

/// A fully parsed artifact: the stage-1 router model plus exactly
/// `branch_factor` stage-2 records.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RmiParams {
    pub branch_factor: usize,
    pub stage1: LinearModel,
    pub stage2: Vec<StageModel>,
}

/// Reads and parses an artifact from disk.
pub fn load_params(path: impl AsRef<Path>) -> Result<RmiParams, LoadError> {
    let text = fs::read_to_string(path)?;
    parse_params(&text)
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Preamble,
    Stage1,
    Stage2,
}

#[derive(Default)]
struct PartialRecord {
    slope: Option<f64>,
    intercept: Option<f64>,
    min_error: Option<f64>,
    max_error: Option<f64>,
}

impl PartialRecord {
    fn set(&mut self, name: &str, value: f64) {
        match name {
            "slope" => self.slope = Some(value),
            "intercept" => self.intercept = Some(value),
            "min_error" => self.min_error = Some(value),
            "max_error" => self.max_error = Some(value),
            _ => {}
        }
    }

    fn finish(self, line: usize) -> Result<StageModel, LoadError> {
        let require = |field: Option<f64>, name: &str| {
            field.ok_or_else(|| {
                LoadError::malformed(line, format!("stage2 record missing `{name}`"))
            })
        };
        Ok(StageModel {
            slope: require(self.slope, "slope")?,
            intercept: require(self.intercept, "intercept")?,
            min_error: require(self.min_error, "min_error")? as i64,
            max_error: require(self.max_error, "max_error")? as i64,
        })
    }
}

/// Parses the artifact text. See the module docs for the accepted shape.
pub fn parse_params(text: &str) -> Result<RmiParams, LoadError> {
    let mut branch_factor: Option<usize> = None;
    let mut stage1_slope: Option<f64> = None;
    let mut stage1_intercept: Option<f64> = None;
    let mut stage2: Vec<StageModel> = Vec::new();

    let mut section = Section::Preamble;
    let mut record: Option<PartialRecord> = None;
    let mut last_line = 0;

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        last_line = line;
        let mut rest = raw.trim();

        while !rest.is_empty() {
            // Structural punctuation carries no content except record
            // boundaries inside stage2.
            if let Some(stripped) = rest.strip_prefix(['[', ']', ',']) {
                rest = stripped.trim_start();
                continue;
            }
            if let Some(stripped) = rest.strip_prefix('{') {
                if section == Section::Stage2 && record.is_none() {
                    record = Some(PartialRecord::default());
                }
                rest = stripped.trim_start();
                continue;
            }
            if let Some(stripped) = rest.strip_prefix('}') {
                if section == Section::Stage2 {
                    if let Some(partial) = record.take() {
                        stage2.push(partial.finish(line)?);
                    }
                }
                rest = stripped.trim_start();
                continue;
            }

            let Some(colon) = rest.find(':') else {
                return Err(LoadError::malformed(
                    line,
                    format!("expected `name: value`, found {rest:?}"),
                ));
            };
            let name = rest[..colon].trim().trim_matches('"');
            rest = rest[colon + 1..].trim_start();

            // A sectioning marker: the "value" is a brace, a bracket, or
            // the rest of the document.
            if rest.is_empty() || rest.starts_with('{') || rest.starts_with('[') {
                section = match name {
                    "stage1" => Section::Stage1,
                    "stage2" => Section::Stage2,
                    _ => Section::Preamble,
                };
                continue;
            }

            let end = rest.find([',', '}', ']']).unwrap_or(rest.len());
            let value_str = rest[..end].trim();
            let value: f64 = value_str.parse().map_err(|_| {
                LoadError::malformed(line, format!("`{name}` is not a number: {value_str:?}"))
            })?;
            rest = &rest[end..];

            match section {
                Section::Preamble => {
                    if name == "branch_factor" {
                        branch_factor = Some(value as usize);
                    }
                }
                Section::Stage1 => match name {
                    "slope" => stage1_slope = Some(value),
                    "intercept" => stage1_intercept = Some(value),
                    _ => {}
                },
                Section::Stage2 => {
                    record
                        .get_or_insert_with(PartialRecord::default)
                        .set(name, value);
                }
            }
        }
    }

    if record.is_some() {
        return Err(LoadError::malformed(last_line, "unterminated stage2 record"));
    }

    let branch_factor = branch_factor.ok_or(LoadError::MissingField("branch_factor"))?;
    let stage1 = LinearModel::new(
        stage1_slope.ok_or(LoadError::MissingField("stage1.slope"))?,
        stage1_intercept.ok_or(LoadError::MissingField("stage1.intercept"))?,
    );
    if stage2.len() != branch_factor {
        return Err(LoadError::StageCountMismatch {
            expected: branch_factor,
            found: stage2.len(),
        });
    }

    Ok(RmiParams {
        branch_factor,
        stage1,
        stage2,
    })
}

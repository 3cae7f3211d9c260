use anyhow::Result;
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::providers::{InferenceRequest, InferenceResponse};

/// Identifies one stage of one pipeline run in logs and traces.
#[derive(Debug, Clone)]
pub struct RunScope {
    pub request_id: String,
    pub stage: &'static str,
}

impl std::fmt::Display for RunScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.request_id, self.stage)
    }
}

/// Appends one JSON line per model round-trip to `<dir>/<request_id>.jsonl`.
#[derive(Debug, Clone)]
pub struct TraceSink {
    dir: PathBuf,
}

impl TraceSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, request_id: &str) -> PathBuf {
        self.dir.join(format!("{request_id}.jsonl"))
    }

    pub fn append_turn(
        &self,
        scope: &RunScope,
        step: u32,
        request: &InferenceRequest,
        response: &InferenceResponse,
    ) -> Result<()> {
        append_turn_in_dir(&self.dir, scope, step, request, response)
    }
}

fn append_turn_in_dir(
    dir: &Path,
    scope: &RunScope,
    step: u32,
    request: &InferenceRequest,
    response: &InferenceResponse,
) -> Result<()> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    fs::create_dir_all(dir)?;
    let trace_file = dir.join(format!("{}.jsonl", scope.request_id));

    let record = json!({
        "timestamp": timestamp,
        "request_id": &scope.request_id,
        "stage": scope.stage,
        "step": step,
        "turn": {
            "request": {
                "model": request.model.as_str(),
                "messages": &request.messages,
                "tools": request.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                "max_tokens": request.max_tokens,
                "temperature": request.temperature,
            },
            "response": {
                "content": &response.content,
                "stop_reason": &response.stop_reason,
                "usage": &response.usage,
            }
        }
    });

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&trace_file)?;
    writeln!(file, "{}", serde_json::to_string(&record)?)?;

    Ok(())
}

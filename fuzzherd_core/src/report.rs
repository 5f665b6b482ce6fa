use crate::engine::RunResult;
use crate::target::Target;
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub const REPORT_FILENAME: &str = "fuzz-report.json";

/// Serializable view of one [`RunResult`].
#[derive(Serialize, Debug, Clone)]
pub struct ResultRecord {
    pub target: Target,
    pub duration_secs: f64,
    pub success: bool,
    pub error_message: String,
    pub crash_inputs: Vec<PathBuf>,
    pub new_corpus_items: usize,
    pub coverage: Option<f64>,
}

impl From<&RunResult> for ResultRecord {
    fn from(r: &RunResult) -> Self {
        Self {
            target: r.target.as_ref().clone(),
            duration_secs: r.duration.as_secs_f64(),
            success: r.success,
            error_message: r.error_message.clone(),
            crash_inputs: r.crash_inputs.clone(),
            new_corpus_items: r.new_corpus_items,
            coverage: r.coverage,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct CampaignReport {
    pub total: usize,
    pub failed: usize,
    pub crash_inputs: usize,
    pub results: Vec<ResultRecord>,
}

impl CampaignReport {
    pub fn from_results(results: &[RunResult]) -> Self {
        let records: Vec<ResultRecord> = results.iter().map(ResultRecord::from).collect();
        Self {
            total: records.len(),
            failed: records.iter().filter(|r| !r.success).count(),
            crash_inputs: records.iter().map(|r| r.crash_inputs.len()).sum(),
            results: records,
        }
    }

    /// Writes the report as pretty JSON to `<dir>/fuzz-report.json` and
    /// returns the file path.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf, anyhow::Error> {
        fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("Failed to create report directory {:?}: {}", dir, e))?;
        let path = dir.join(REPORT_FILENAME);
        let file = File::create(&path)
            .map_err(|e| anyhow::anyhow!("Failed to create report file {:?}: {}", path, e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize report to {:?}: {}", path, e))?;
        Ok(path)
    }
}

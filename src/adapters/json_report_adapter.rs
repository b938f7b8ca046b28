//! JSON result writer.

use crate::domain::engine::SimulationResult;
use crate::domain::error::SimError;
use crate::ports::report_port::ReportPort;
use std::fs;
use std::path::Path;

/// Writes the full `SimulationResult` as pretty-printed JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReportAdapter;

impl JsonReportAdapter {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, result: &SimulationResult) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(result)?)
    }
}

impl ReportPort for JsonReportAdapter {
    fn write(&self, result: &SimulationResult, output_path: &Path) -> Result<(), SimError> {
        let mut json = self.render(result)?;
        json.push('\n');
        fs::write(output_path, json)?;
        Ok(())
    }
}

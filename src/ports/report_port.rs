//! Report output port.

use crate::domain::engine::SimulationResult;
use crate::domain::error::SimError;
use std::path::Path;

/// Port for persisting a finished simulation.
pub trait ReportPort {
    fn write(&self, result: &SimulationResult, output_path: &Path) -> Result<(), SimError>;
}

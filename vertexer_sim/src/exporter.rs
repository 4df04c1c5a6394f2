//! JSON export of reconstructed events.
//!
//! Writes the final trajectories and vertices of a run so they can be
//! inspected or drawn offline.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use vertexer_core::{Slice, Trajectory, Vtx3Store, VtxStore};

use crate::error::SimError;
use crate::oracle::TruthEvent;

/// Compact view of one trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajSummary {
    pub id: u32,
    pub plane: u16,
    pub live: bool,

    /// (wire, time) of the first and last point with charge
    pub start: [f64; 2],
    pub end: [f64; 2],

    pub n_pts: usize,
    pub vtx_ids: [Option<u32>; 2],
    pub pdg_code: i32,
    pub mcs_mom: f64,

    /// Names of the algorithms that modified the trajectory
    pub alg_mod: Vec<String>,
}

impl TrajSummary {
    pub fn new(tj: &Trajectory) -> Self {
        let pos = |end: usize| {
            if tj.pts.is_empty() {
                [0.0, 0.0]
            } else {
                let p = tj.end_tp(end).pos;
                [p[0], p[1]]
            }
        };
        Self {
            id: tj.id.0,
            plane: tj.ctp.plane(),
            live: tj.is_live(),
            start: pos(0),
            end: pos(1),
            n_pts: tj.num_pts_with_charge(),
            vtx_ids: [tj.vtx_id[0].map(|v| v.0), tj.vtx_id[1].map(|v| v.0)],
            pdg_code: tj.pdg_code,
            mcs_mom: tj.mcs_mom,
            alg_mod: tj.alg_mod.iter().map(|f| format!("{:?}", f)).collect(),
        }
    }
}

/// Complete export of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    pub truth: TruthEvent,
    pub trajectories: Vec<TrajSummary>,
    pub vertices: Vec<VtxStore>,
    pub vertices_3d: Vec<Vtx3Store>,
}

impl SimExport {
    pub fn new(scenario: &str, seed: u64, truth: &TruthEvent, slc: &Slice) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            truth: truth.clone(),
            trajectories: slc.tjs.iter().map(TrajSummary::new).collect(),
            vertices: slc.vtxs.clone(),
            vertices_3d: slc.vtx3s.clone(),
        }
    }

    /// An export with nothing reconstructed, for runs that failed early.
    pub fn empty(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            truth: TruthEvent::default(),
            trajectories: Vec::new(),
            vertices: Vec::new(),
            vertices_3d: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, SimError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the export to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{EventOracle, TruthSegment};
    use vertexer_env::UniformGeometry;

    #[test]
    fn test_export_lists_reconstructed_objects() {
        let truth = TruthEvent::new().with_segment(TruthSegment::new(2, (10.0, 100.0), (30.0, 110.0)));
        let geom = UniformGeometry::with_defaults().unwrap();
        let slc = EventOracle::new(2).build_slice(&geom, &truth).unwrap();
        let export = SimExport::new("demo", 2, &truth, &slc);

        assert_eq!(export.trajectories.len(), 1);
        let tj = &export.trajectories[0];
        assert_eq!(tj.plane, 2);
        assert_eq!(tj.start[0], 10.0);
        assert_eq!(tj.end[0], 30.0);
        assert_eq!(tj.n_pts, 21);

        let value: serde_json::Value = serde_json::from_str(&export.to_json().unwrap()).unwrap();
        assert_eq!(value["scenario"], "demo");
        assert_eq!(value["trajectories"][0]["plane"], 2);
        assert!(value["vertices"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_write_to_file() {
        let path = std::env::temp_dir().join(format!("vertexer_sim_export_{}.json", std::process::id()));
        SimExport::empty("nothing", 9).write_to_file(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(text.contains("\"nothing\""));
    }
}

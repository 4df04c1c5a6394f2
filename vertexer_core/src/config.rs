//! Vertex engine configuration.
//!
//! Every cut is a named field; the reference positions of the tuned cut
//! arrays are noted next to each field so that existing tunes can be
//! transcribed.

use serde::{Deserialize, Serialize};

use crate::error::VertexError;

// ============================================================================
// 2D CUTS
// ============================================================================

/// Cuts for 2D vertex finding, attachment and scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Vertex2dCuts {
    /// [0] Trajectories shorter than this are short; <= 0 disables 2D vertexing
    pub max_short_tj_len: f64,

    /// [1] Max vertex - trajectory separation for short trajectories
    pub short_tj_sep: f64,

    /// [2] Max vertex - trajectory separation for long trajectories
    pub long_tj_sep: f64,

    /// [3] Max position pull for attaching a trajectory or merging vertices
    pub max_pull: f64,

    /// [4] Max allowed fitted position error
    pub max_pos_err: f64,

    /// [5] Min MCSMom of the long trajectory in hammer vertices
    pub min_mcs_mom: f64,

    /// [6] Min fraction of wires with signal between a trajectory end and a vertex
    pub min_signal_frac: f64,

    /// [7] Min score of a trusted vertex
    pub min_score: f64,

    /// [8] Min charge fraction near a merge point
    pub merge_chg_frac: f64,

    /// [9] Max MCSMom asymmetry for a merge
    pub mcs_mom_asym: f64,

    /// [10] Require charge between vertex and trajectory ends in induction planes
    pub require_ind_plane_chg: bool,
}

impl Default for Vertex2dCuts {
    fn default() -> Self {
        Self {
            max_short_tj_len: 6.0,
            short_tj_sep: 8.0,
            long_tj_sep: 45.0,
            max_pull: 3.0,
            max_pos_err: 2.0,
            min_mcs_mom: 100.0,
            min_signal_frac: 0.6,
            min_score: 0.0,
            merge_chg_frac: 0.8,
            mcs_mom_asym: 0.8,
            require_ind_plane_chg: true,
        }
    }
}

// ============================================================================
// 3D CUTS
// ============================================================================

/// Cuts for matching 2D vertices across planes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Vertex3dCuts {
    /// [0] Max drift-position difference (cm); negative disables 3D matching
    pub max_dx: f64,

    /// [1] Max wire-position difference (cm) in the third plane
    pub max_dw: f64,

    /// [2] Weight of the 2D-score term in candidate ranking; enables the newer ranking
    pub score_weight: Option<f64>,
}

impl Default for Vertex3dCuts {
    fn default() -> Self {
        Self {
            max_dx: 2.0,
            max_dw: 2.0,
            score_weight: None,
        }
    }
}

/// Cuts that tag long straight trajectories as muons.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MuonTag {
    /// Min number of points; <= 0 disables tagging
    pub min_pts: f64,

    pub min_mcs_mom: f64,
}

impl Default for MuonTag {
    fn default() -> Self {
        Self {
            min_pts: 40.0,
            min_mcs_mom: 500.0,
        }
    }
}

/// Direction in which trajectories were stepped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepDir {
    /// Toward increasing wire
    Forward,
    Backward,
}

impl StepDir {
    pub fn sign(self) -> i64 {
        match self {
            StepDir::Forward => 1,
            StepDir::Backward => -1,
        }
    }
}

/// Switches for the optional algorithms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgToggles {
    pub junk_vx: bool,
    pub vtx_tj: bool,
    pub vx_merge: bool,
    pub chk_vx_tj: bool,
    pub ham_vx: bool,
    pub ham_vx2: bool,
    pub split_tj_cvx: bool,
    pub comp_3d_vx: bool,
    pub comp_3d_vx_ig: bool,
    pub vtx_hits_swap: bool,
}

impl Default for AlgToggles {
    fn default() -> Self {
        Self {
            junk_vx: true,
            vtx_tj: true,
            vx_merge: true,
            chk_vx_tj: true,
            ham_vx: true,
            ham_vx2: true,
            split_tj_cvx: true,
            comp_3d_vx: true,
            comp_3d_vx_ig: true,
            vtx_hits_swap: true,
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Configuration for the VertexEngine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VertexConfig {
    pub vtx2d: Vertex2dCuts,

    pub vtx3d: Vertex3dCuts,

    /// Score weights: position error, 3D match, charge fraction, trajectory pairs
    pub score_weights: [f64; 4],

    /// Min crossing angle (radians) for hammer vertices
    pub kink_angle_cut: f64,

    pub muon_tag: MuonTag,

    pub step_dir: StepDir,

    /// Vertices scoring up to `min_score + kill_score_margin` are pruned
    pub kill_score_margin: f64,

    pub algs: AlgToggles,
}

impl Default for VertexConfig {
    fn default() -> Self {
        Self {
            vtx2d: Vertex2dCuts::default(),
            vtx3d: Vertex3dCuts::default(),
            score_weights: [1.0, 2.0, 10.0, 2.0],
            kink_angle_cut: 0.4,
            muon_tag: MuonTag::default(),
            step_dir: StepDir::Forward,
            kill_score_margin: 0.05,
            algs: AlgToggles::default(),
        }
    }
}

impl VertexConfig {
    /// Parses a JSON config; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, VertexError> {
        let config: Self = serde_json::from_str(json).map_err(|e| VertexError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), VertexError> {
        if self.vtx2d.max_pos_err <= 0.0 {
            return Err(VertexError::config("vtx2d.max_pos_err must be positive"));
        }
        if self.vtx3d.max_dx == 0.0 || (self.vtx3d.max_dx > 0.0 && self.vtx3d.max_dw <= 0.0) {
            return Err(VertexError::config("vtx3d cuts must be positive, or max_dx negative to disable"));
        }
        if self.kill_score_margin < 0.0 {
            return Err(VertexError::config("kill_score_margin must not be negative"));
        }
        if self.score_weights.iter().any(|w| !w.is_finite()) {
            return Err(VertexError::config("score weights must be finite"));
        }
        Ok(())
    }

    /// 2D vertexing is switched off by a non-positive short length.
    pub fn vertexing_2d_enabled(&self) -> bool {
        self.vtx2d.max_short_tj_len > 0.0
    }

    /// Score at or below which an unprotected vertex is pruned.
    pub fn kill_threshold(&self) -> f64 {
        self.vtx2d.min_score + self.kill_score_margin
    }

    /// Score given to topologies that skip the general score formula.
    pub fn fixed_score(&self) -> f64 {
        self.vtx2d.min_score + 0.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = VertexConfig::from_json_str(r#"{ "vtx2d": { "max_pull": 4.5 }, "step_dir": "Backward" }"#).unwrap();
        assert_eq!(config.vtx2d.max_pull, 4.5);
        assert_eq!(config.vtx2d.short_tj_sep, 8.0);
        assert_eq!(config.step_dir.sign(), -1);
        assert!(config.algs.ham_vx2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = VertexConfig::from_json_str(r#"{ "vtx2d": { "max_pos_err": 0.0 } }"#);
        assert!(matches!(err, Err(VertexError::ConfigError(_))));
        assert!(VertexConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_fixed_score_sits_above_kill_threshold() {
        let config = VertexConfig::default();
        assert!(config.fixed_score() > config.kill_threshold());
    }
}

//! Scenario runner - builds each event and drives the vertex chain over it.
//!
//! The chain runs in stages so every scenario can check the state it is
//! about right after the stage that produces it:
//!
//! 1. 2D vertexing: every pass over every plane, the final one as
//!    [`LAST_PASS`], then the per-plane consistency repairs
//! 2. vertex trajectories: new trajectories stepped from unused hits
//! 3. repair: junk vertices, trajectories split at crossing vertices
//! 4. 3D: matching, completion, scoring and pruning

use serde::Serialize;
use tracing::{debug, info, warn};
use vertexer_core::{Slice, Topo, VertexConfig, VertexEngine, VtxId, LAST_PASS};
use vertexer_env::{GeometryConfig, UniformGeometry};

use crate::error::SimError;
use crate::exporter::SimExport;
use crate::oracle::{EventOracle, TruthEvent, DEFAULT_TIME_NOISE};
use crate::scenarios::ScenarioId;
use crate::stepper::LineStepper;

/// Max distance (cm) between a found 3D vertex and the truth.
const MAX_3D_MISS: f64 = 3.0;

/// Max distance (wires) between a found 2D vertex and the truth.
const MAX_2D_MISS: f64 = 2.0;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Final reconstructed state
    pub export: SimExport,
}

impl ScenarioResult {
    fn errored(scenario: ScenarioId, seed: u64, err: SimError) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            failure_reason: Some(err.to_string()),
            metrics: ScenarioMetrics::default(),
            export: SimExport::empty(scenario.name(), seed),
        }
    }
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub n_hits: usize,

    /// Trajectories handed to the vertexer
    pub tjs_in: usize,

    /// Live trajectories at the end
    pub tjs_out: usize,

    /// Live 2D vertices after 2D vertexing
    pub vx2_after_2d: usize,

    pub vx2_final: usize,
    pub vx3_final: usize,

    /// Live 3D vertices with a 2D vertex in every plane
    pub vx3_complete: usize,

    /// Trajectories made by the vertex stepper
    pub recovered_tjs: usize,

    pub hammer_vertices: usize,
    pub completions: usize,
    pub gap_completions: usize,
    pub association_violations: usize,
}

impl ScenarioMetrics {
    fn record_final(&mut self, slc: &Slice) {
        let live_vtxs = || slc.vtxs.iter().filter(|v| v.is_live());
        self.tjs_out = slc.tjs.iter().filter(|tj| tj.is_live()).count();
        self.vx2_final = live_vtxs().count();
        self.hammer_vertices = live_vtxs().filter(|v| v.topo.is_hammer()).count();
        self.completions = live_vtxs().filter(|v| v.topo == Topo::Complete3d).count();
        self.gap_completions = live_vtxs().filter(|v| v.topo == Topo::Complete3dInGap).count();
        let live_vx3 = || slc.vtx3s.iter().filter(|v| v.is_live());
        self.vx3_final = live_vx3().count();
        self.vx3_complete = live_vx3().filter(|v| v.wire.is_none()).count();
        self.association_violations = slc.association_violations().len();
    }
}

/// An event ready to be reconstructed.
struct Event {
    truth: TruthEvent,
    geom: UniformGeometry,
}

/// Runs vertexing scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Number of 2D vertexing passes; the last one is [`LAST_PASS`]
    passes: u16,

    time_noise: f64,
    config: VertexConfig,
    geometry: GeometryConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            passes: 2,
            time_noise: DEFAULT_TIME_NOISE,
            config: VertexConfig::default(),
            geometry: GeometryConfig::default(),
        }
    }

    /// Sets the number of 2D passes (at least one).
    pub fn with_passes(mut self, passes: u16) -> Self {
        self.passes = passes.max(1);
        self
    }

    pub fn with_time_noise(mut self, sigma: f64) -> Self {
        self.time_noise = sigma;
        self
    }

    pub fn with_config(mut self, config: VertexConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_geometry(mut self, geometry: GeometryConfig) -> Self {
        self.geometry = geometry;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let outcome = match scenario {
            ScenarioId::ConvergingPair => self.run_converging_pair(),
            ScenarioId::Hammer => self.run_hammer(),
            ScenarioId::PoorVertex => self.run_poor_vertex(),
            ScenarioId::NeutrinoLike => self.run_neutrino_like(),
            ScenarioId::DeadGap => self.run_dead_gap(),
            ScenarioId::Crossing => self.run_crossing(),
        };
        outcome.unwrap_or_else(|e| ScenarioResult::errored(scenario, self.seed, e))
    }

    // ========================================================================
    // SCENARIOS
    // ========================================================================

    /// VTX-001: exactly one vertex where the pair converges.
    fn run_converging_pair(&self) -> Result<ScenarioResult, SimError> {
        let scenario = ScenarioId::ConvergingPair;
        let ev = self.event(scenario)?;
        let engine = VertexEngine::new(self.config.clone(), &ev.geom)?;
        let mut slc = self.slice(&ev)?;
        let mut metrics = ScenarioMetrics::default();
        self.record_input(&mut metrics, &slc);

        self.vertex_2d(&engine, &mut slc)?;
        metrics.vx2_after_2d = count_live(&slc);
        let mut failure = None;
        let near = vertices_near(&slc, &ev.truth, MAX_2D_MISS);
        if metrics.vx2_after_2d != 1 || near.len() != 1 {
            failure = Some(format!(
                "expected one vertex at the convergence point, found {} ({} near truth)",
                metrics.vx2_after_2d,
                near.len()
            ));
        }

        self.vertex_3d(&engine, &mut slc)?;
        Ok(self.finish(scenario, &ev, &slc, metrics, failure))
    }

    /// VTX-002: the struck trajectory is split at a hammer vertex.
    fn run_hammer(&self) -> Result<ScenarioResult, SimError> {
        let scenario = ScenarioId::Hammer;
        let ev = self.event(scenario)?;
        let engine = VertexEngine::new(self.config.clone(), &ev.geom)?;
        let mut slc = self.slice(&ev)?;
        let mut metrics = ScenarioMetrics::default();
        self.record_input(&mut metrics, &slc);

        self.vertex_2d(&engine, &mut slc)?;
        metrics.vx2_after_2d = count_live(&slc);
        let hammers: Vec<VtxId> = vertices_near(&slc, &ev.truth, MAX_2D_MISS)
            .into_iter()
            .filter(|&vid| slc.vtx(vid).is_some_and(|vx| vx.topo.is_hammer()))
            .collect();
        let mut failure = None;
        match hammers.first() {
            None => failure = Some("no hammer vertex at the crossing".to_string()),
            Some(&vid) if slc.count_vtx_tjs(vid) < 3 => {
                failure = Some(format!("hammer vertex {} has {} trajectories", vid, slc.count_vtx_tjs(vid)));
            }
            Some(_) => {}
        }

        self.vertex_3d(&engine, &mut slc)?;
        Ok(self.finish(scenario, &ev, &slc, metrics, failure))
    }

    /// VTX-003: vertices at the kill threshold go, those above it stay.
    fn run_poor_vertex(&self) -> Result<ScenarioResult, SimError> {
        let scenario = ScenarioId::PoorVertex;
        let ev = self.event(scenario)?;
        let engine = VertexEngine::new(self.config.clone(), &ev.geom)?;
        let mut slc = self.slice(&ev)?;
        let mut metrics = ScenarioMetrics::default();
        self.record_input(&mut metrics, &slc);

        self.vertex_2d(&engine, &mut slc)?;
        metrics.vx2_after_2d = count_live(&slc);
        let live = slc.live_vtx_ids();
        let Some((&keep, doomed)) = live.split_last() else {
            let failure = Some("no vertices to prune".to_string());
            return Ok(self.finish(scenario, &ev, &slc, metrics, failure));
        };
        if doomed.is_empty() {
            let failure = Some("only one vertex found".to_string());
            return Ok(self.finish(scenario, &ev, &slc, metrics, failure));
        }

        let threshold = engine.config().kill_threshold();
        for &vid in doomed {
            if let Some(vx) = slc.vtx_mut(vid) {
                vx.score = threshold;
            }
        }
        if let Some(vx) = slc.vtx_mut(keep) {
            vx.score = threshold + 0.5;
        }
        engine.kill_poor_vertices(&mut slc);

        let survivors: Vec<VtxId> = doomed.iter().copied().filter(|&vid| slc.live_vtx(vid).is_some()).collect();
        let failure = if !survivors.is_empty() {
            Some(format!("{} vertices at the threshold survived", survivors.len()))
        } else if slc.live_vtx(keep).is_none() {
            Some(format!("vertex {} above the threshold was killed", keep))
        } else {
            None
        };
        Ok(self.finish(scenario, &ev, &slc, metrics, failure))
    }

    /// VTX-004: the interaction is found in 3D and the missed prong recovered.
    fn run_neutrino_like(&self) -> Result<ScenarioResult, SimError> {
        let scenario = ScenarioId::NeutrinoLike;
        let ev = self.event(scenario)?;
        let engine = VertexEngine::new(self.config.clone(), &ev.geom)?;
        let mut slc = self.slice(&ev)?;
        let mut metrics = ScenarioMetrics::default();
        self.record_input(&mut metrics, &slc);

        self.vertex_2d(&engine, &mut slc)?;
        metrics.vx2_after_2d = count_live(&slc);
        metrics.recovered_tjs = self.recover_tjs(&engine, &mut slc);
        self.repair(&engine, &mut slc)?;
        self.vertex_3d(&engine, &mut slc)?;

        let failure = check_3d_vertex(&slc, &ev.truth);
        Ok(self.finish(scenario, &ev, &slc, metrics, failure))
    }

    /// VTX-005: the interaction is found in 3D with one plane dead at the vertex.
    fn run_dead_gap(&self) -> Result<ScenarioResult, SimError> {
        let scenario = ScenarioId::DeadGap;
        let ev = self.event(scenario)?;
        let engine = VertexEngine::new(self.config.clone(), &ev.geom)?;
        let mut slc = self.slice(&ev)?;
        let mut metrics = ScenarioMetrics::default();
        self.record_input(&mut metrics, &slc);

        self.vertex_2d(&engine, &mut slc)?;
        metrics.vx2_after_2d = count_live(&slc);
        self.repair(&engine, &mut slc)?;
        self.vertex_3d(&engine, &mut slc)?;

        let failure = check_3d_vertex(&slc, &ev.truth);
        Ok(self.finish(scenario, &ev, &slc, metrics, failure))
    }

    /// VTX-006: the trajectory passing through the vertex ends up attached to it.
    fn run_crossing(&self) -> Result<ScenarioResult, SimError> {
        let scenario = ScenarioId::Crossing;
        let ev = self.event(scenario)?;
        let engine = VertexEngine::new(self.config.clone(), &ev.geom)?;
        let mut slc = self.slice(&ev)?;
        let mut metrics = ScenarioMetrics::default();
        self.record_input(&mut metrics, &slc);

        self.vertex_2d(&engine, &mut slc)?;
        metrics.vx2_after_2d = count_live(&slc);
        self.repair(&engine, &mut slc)?;

        let best = vertices_near(&slc, &ev.truth, MAX_2D_MISS)
            .into_iter()
            .map(|vid| slc.count_vtx_tjs(vid))
            .max();
        let failure = match best {
            None => Some("no vertex at the crossing".to_string()),
            Some(n) if n < 3 => Some(format!("crossing vertex has only {} trajectories", n)),
            Some(_) => None,
        };

        self.vertex_3d(&engine, &mut slc)?;
        Ok(self.finish(scenario, &ev, &slc, metrics, failure))
    }

    // ========================================================================
    // STAGES
    // ========================================================================

    fn event(&self, scenario: ScenarioId) -> Result<Event, SimError> {
        let truth = scenario.truth();
        let geom = UniformGeometry::new(truth.geometry_config(&self.geometry))?;
        Ok(Event { truth, geom })
    }

    fn slice(&self, ev: &Event) -> Result<Slice, SimError> {
        let physics_seed = self.seed.wrapping_mul(0x9e3779b97f4a7c15);
        EventOracle::new(physics_seed)
            .with_time_noise(self.time_noise)
            .build_slice(&ev.geom, &ev.truth)
    }

    fn record_input(&self, metrics: &mut ScenarioMetrics, slc: &Slice) {
        metrics.n_hits = slc.hits.len();
        metrics.tjs_in = slc.tjs.len();
    }

    fn vertex_2d(&self, engine: &VertexEngine<'_>, slc: &mut Slice) -> Result<(), SimError> {
        for pass in 0..self.passes {
            let pass_no = if pass + 1 == self.passes { LAST_PASS } else { pass };
            for plane in 0..slc.n_planes() {
                engine.find_2d_vertices(slc, plane, pass_no)?;
            }
        }
        for plane in 0..slc.n_planes() {
            let ctp = slc.ctp(plane);
            engine.chk_vx_tjs(slc, ctp);
            engine.vtx_hits_swap(slc, ctp);
            if let Err(e) = engine.chk_vtx_associations(slc, ctp) {
                warn!(ctp = %ctp, "repaired associations: {}", e);
            }
        }
        debug!(vertices = count_live(slc), "2D vertexing done");
        Ok(())
    }

    fn recover_tjs(&self, engine: &VertexEngine<'_>, slc: &mut Slice) -> usize {
        let mut stepper = LineStepper::default();
        let made: usize = slc
            .live_vtx_ids()
            .into_iter()
            .map(|vid| engine.find_vtx_tjs(slc, vid, &mut stepper))
            .sum();
        debug!(made, "vertex trajectories stepped");
        made
    }

    fn repair(&self, engine: &VertexEngine<'_>, slc: &mut Slice) -> Result<(), SimError> {
        for plane in 0..slc.n_planes() {
            let ctp = slc.ctp(plane);
            engine.make_junk_vertices(slc, ctp)?;
            engine.split_traj_crossing_vertices(slc, ctp);
        }
        Ok(())
    }

    fn vertex_3d(&self, engine: &VertexEngine<'_>, slc: &mut Slice) -> Result<(), SimError> {
        engine.find_3d_vertices(slc)?;
        engine.kill_poor_vertices(slc);
        Ok(())
    }

    fn finish(
        &self,
        scenario: ScenarioId,
        ev: &Event,
        slc: &Slice,
        mut metrics: ScenarioMetrics,
        mut failure: Option<String>,
    ) -> ScenarioResult {
        metrics.record_final(slc);
        if failure.is_none() && metrics.association_violations > 0 {
            failure = Some(slc.association_violations().join("; "));
        }
        if let Some(reason) = &failure {
            warn!("Scenario {} failed: {}", scenario.name(), reason);
        }
        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure.is_none(),
            failure_reason: failure,
            metrics,
            export: SimExport::new(scenario.name(), self.seed, &ev.truth, slc),
        }
    }
}

fn count_live(slc: &Slice) -> usize {
    slc.vtxs.iter().filter(|v| v.is_live()).count()
}

/// Live 2D vertices within `max_miss` of any true 2D vertex in their plane.
fn vertices_near(slc: &Slice, truth: &TruthEvent, max_miss: f64) -> Vec<VtxId> {
    slc.vtxs
        .iter()
        .filter(|vx| vx.is_live())
        .filter(|vx| {
            truth.vertices_2d.iter().any(|(plane, pos)| {
                vx.ctp.plane() == *plane && (vx.pos - pos).norm() < max_miss
            })
        })
        .map(|vx| vx.id)
        .collect()
}

fn check_3d_vertex(slc: &Slice, truth: &TruthEvent) -> Option<String> {
    let truth_pos = truth.vertex?;
    let best = slc
        .vtx3s
        .iter()
        .filter(|v| v.is_live())
        .map(|v| (v.pos - truth_pos).norm())
        .min_by(f64::total_cmp);
    match best {
        None => Some("no 3D vertex".to_string()),
        Some(miss) if miss > MAX_3D_MISS => Some(format!("closest 3D vertex misses the truth by {:.1} cm", miss)),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_converging_pair_passes() {
        let result = ScenarioRunner::new(42).with_time_noise(0.0).run(ScenarioId::ConvergingPair);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.tjs_in, 2);
        assert_eq!(result.metrics.vx2_after_2d, 1);
    }

    #[test]
    fn test_poor_vertex_prunes_at_threshold() {
        let result = ScenarioRunner::new(42).with_time_noise(0.0).run(ScenarioId::PoorVertex);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.vx2_after_2d, 2);
        assert_eq!(result.metrics.vx2_final, 1);
    }

    #[test]
    fn test_bad_config_is_reported_not_panicked() {
        let mut geometry = GeometryConfig::default();
        geometry.planes.clear();
        let result = ScenarioRunner::new(1).with_geometry(geometry).run(ScenarioId::Hammer);
        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("Geometry"));
        assert!(result.export.trajectories.is_empty());
    }

    #[test]
    fn test_same_seed_same_result() {
        let a = ScenarioRunner::new(11).run(ScenarioId::NeutrinoLike);
        let b = ScenarioRunner::new(11).run(ScenarioId::NeutrinoLike);
        assert_eq!(a.passed, b.passed);
        assert_eq!(a.metrics.n_hits, b.metrics.n_hits);
        assert_eq!(a.metrics.vx2_final, b.metrics.vx2_final);
        assert_eq!(a.metrics.vx3_final, b.metrics.vx3_final);
        assert_eq!(a.export.vertices.len(), b.export.vertices.len());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_associations_hold_for_any_seed(seed in any::<u64>()) {
            for scenario in [ScenarioId::NeutrinoLike, ScenarioId::DeadGap, ScenarioId::Crossing] {
                let result = ScenarioRunner::new(seed).run(scenario);
                prop_assert_eq!(result.metrics.association_violations, 0);
            }
        }
    }
}

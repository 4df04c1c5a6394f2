//! Ground truth for simulated events.
//!
//! The [`EventOracle`] knows where every particle really went. It turns a
//! [`TruthEvent`] into the hits and reconstructed trajectories the stepping
//! engine would have handed to the vertexer:
//! - one hit per wire crossed, with Gaussian noise on the hit time
//! - log-normal spread on the deposited charge
//! - no hits on dead wires (the trajectory keeps a point without charge)
//!
//! Tracks flagged as not reconstructed leave only free hits behind, so the
//! vertex trajectory finder has something to recover.

use std::ops::Range;

use nalgebra::{Vector2, Vector3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, LogNormal, Normal};
use serde::{Deserialize, Serialize};
use tracing::debug;
use vertexer_core::{Slice, SliceHit, TrajPoint, Trajectory};
use vertexer_env::{DetectorGeometry, GeometryConfig, PlaneId, TpcId};

use crate::error::SimError;

/// Hit time noise in engine units (wire pitches).
pub const DEFAULT_TIME_NOISE: f64 = 0.05;

/// Sigma of the log-normal charge spread.
pub const DEFAULT_CHARGE_SPREAD: f64 = 0.1;

/// Hit RMS in ticks.
const HIT_RMS: f64 = 1.0;

// ============================================================================
// TRUTH
// ============================================================================

/// A straight charged track in the detector, in cm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruthTrack {
    pub start: Vector3<f64>,
    pub end: Vector3<f64>,

    /// Median charge per wire
    pub chg: f64,

    /// False if the stepping engine missed it
    pub reconstructed: bool,
}

impl TruthTrack {
    pub fn new(start: Vector3<f64>, end: Vector3<f64>) -> Self {
        Self { start, end, chg: 100.0, reconstructed: true }
    }

    /// Marks the track as missed by the stepping engine.
    pub fn missed(mut self) -> Self {
        self.reconstructed = false;
        self
    }
}

/// A track drawn directly in one plane, in engine units (wire, tick * units per tick).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruthSegment {
    pub plane: u16,
    pub from: Vector2<f64>,
    pub to: Vector2<f64>,
    pub chg: f64,
    pub reconstructed: bool,
}

impl TruthSegment {
    pub fn new(plane: u16, from: (f64, f64), to: (f64, f64)) -> Self {
        Self {
            plane,
            from: Vector2::new(from.0, from.1),
            to: Vector2::new(to.0, to.1),
            chg: 100.0,
            reconstructed: true,
        }
    }
}

/// Everything that really happened in one event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TruthEvent {
    /// True 3D interaction point, if the event has one
    pub vertex: Option<Vector3<f64>>,

    /// True 2D vertex positions as (plane, position)
    pub vertices_2d: Vec<(u16, Vector2<f64>)>,

    pub tracks: Vec<TruthTrack>,
    pub segments: Vec<TruthSegment>,

    /// Bad channels as (plane, wire)
    pub dead_wires: Vec<(u16, u32)>,
}

impl TruthEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vertex(mut self, pos: Vector3<f64>) -> Self {
        self.vertex = Some(pos);
        self
    }

    pub fn with_vertex_2d(mut self, plane: u16, pos: (f64, f64)) -> Self {
        self.vertices_2d.push((plane, Vector2::new(pos.0, pos.1)));
        self
    }

    pub fn with_track(mut self, track: TruthTrack) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn with_segment(mut self, segment: TruthSegment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn with_dead_wires(mut self, plane: u16, wires: Range<u32>) -> Self {
        self.dead_wires.extend(wires.map(|w| (plane, w)));
        self
    }

    /// `base` with this event's dead wires added.
    pub fn geometry_config(&self, base: &GeometryConfig) -> GeometryConfig {
        let mut config = base.clone();
        config.dead_wires.extend(self.dead_wires.iter().copied());
        config
    }
}

// ============================================================================
// ORACLE
// ============================================================================

/// One sampled point before the slice exists.
#[derive(Debug, Clone)]
struct PendingPoint {
    wire: u32,
    tick: f64,
    chg: f64,
}

/// One trajectory's worth of sampled points in one plane.
#[derive(Debug, Clone)]
struct PendingTraj {
    plane: u16,
    dir: Vector2<f64>,
    pts: Vec<PendingPoint>,
    reconstructed: bool,
}

/// Generates detector response from ground truth with seeded noise.
pub struct EventOracle {
    rng: ChaCha8Rng,
    time_noise: f64,
    charge_spread: f64,
}

impl EventOracle {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            time_noise: DEFAULT_TIME_NOISE,
            charge_spread: DEFAULT_CHARGE_SPREAD,
        }
    }

    pub fn with_time_noise(mut self, sigma: f64) -> Self {
        self.time_noise = sigma;
        self
    }

    pub fn with_charge_spread(mut self, sigma: f64) -> Self {
        self.charge_spread = sigma;
        self
    }

    /// Builds the slice the vertexer would see for `truth`.
    ///
    /// `geom` must already carry the event's dead wires.
    pub fn build_slice(&mut self, geom: &dyn DetectorGeometry, truth: &TruthEvent) -> Result<Slice, SimError> {
        let time_noise = Normal::new(0.0, self.time_noise).map_err(|e| SimError::config(e.to_string()))?;
        let chg_spread = LogNormal::new(0.0, self.charge_spread).map_err(|e| SimError::config(e.to_string()))?;
        let tpc = TpcId::new(0, 0);
        let upt = geom.units_per_tick();

        let mut pending = Vec::new();
        for track in &truth.tracks {
            for plane in 0..geom.n_planes(tpc) {
                let pid = tpc.plane(plane);
                let from = project(geom, pid, &track.start, upt);
                let to = project(geom, pid, &track.end, upt);
                if let Some(tj) = self.sample(geom, pid, from, to, track.chg, track.reconstructed, &time_noise, &chg_spread) {
                    pending.push(tj);
                }
            }
        }
        for seg in &truth.segments {
            let pid = tpc.plane(seg.plane);
            if let Some(tj) = self.sample(geom, pid, seg.from, seg.to, seg.chg, seg.reconstructed, &time_noise, &chg_spread) {
                pending.push(tj);
            }
        }

        let hits: Vec<SliceHit> = pending
            .iter()
            .flat_map(|tj| {
                tj.pts
                    .iter()
                    .filter(|pt| pt.chg > 0.0)
                    .map(move |pt| SliceHit::new(tj.plane, pt.wire, pt.tick, HIT_RMS, pt.chg))
            })
            .collect();
        let mut slc = Slice::new(geom, tpc, hits)?;

        // hits were re-sorted by the slice; find each point's hit again
        let mut claimed = vec![false; slc.hits.len()];
        for tj in pending.into_iter().filter(|tj| tj.reconstructed) {
            let ctp = tpc.plane(tj.plane).ctp();
            let mut tps = Vec::with_capacity(tj.pts.len());
            for (step, pt) in tj.pts.iter().enumerate() {
                let mut tp = TrajPoint::new(ctp, Vector2::new(pt.wire as f64, pt.tick * upt), tj.dir);
                tp.n_tps_fit = 10;
                tp.step = step as i32;
                if pt.chg > 0.0 {
                    let iht = slc
                        .hits_on_wire(tj.plane as usize, pt.wire)
                        .and_then(|mut range| range.find(|&i| !claimed[i] && slc.hits[i].peak_tick == pt.tick))
                        .ok_or_else(|| SimError::config(format!("lost hit on plane {} wire {}", tj.plane, pt.wire)))?;
                    claimed[iht] = true;
                    tp.chg = pt.chg;
                    tp.hits = vec![iht];
                    tp.use_hit = vec![true];
                }
                tps.push(tp);
            }
            let mut traj = Trajectory::new(ctp, tps);
            if traj.num_pts_with_charge() < 2 {
                continue;
            }
            traj.update_chg_properties();
            traj.mcs_mom = traj.mcs_mom_full();
            slc.store_trajectory(traj);
        }
        debug!(hits = slc.hits.len(), tjs = slc.tjs.len(), "built slice");
        Ok(slc)
    }

    /// One point per wire crossed, ordered by increasing wire.
    ///
    /// Returns `None` if the projection crosses fewer than two wires.
    #[allow(clippy::too_many_arguments)]
    fn sample(
        &mut self,
        geom: &dyn DetectorGeometry,
        plane: PlaneId,
        from: Vector2<f64>,
        to: Vector2<f64>,
        chg: f64,
        reconstructed: bool,
        time_noise: &Normal<f64>,
        chg_spread: &LogNormal<f64>,
    ) -> Option<PendingTraj> {
        let (from, to) = if from[0] <= to[0] { (from, to) } else { (to, from) };
        let w_lo = from[0].ceil() as i64;
        let w_hi = to[0].floor() as i64;
        if w_hi - w_lo < 1 {
            return None;
        }
        let upt = geom.units_per_tick();
        let span = to[0] - from[0];
        let mut pts = Vec::new();
        for w in w_lo..=w_hi {
            if !geom.has_wire(plane, w) {
                continue;
            }
            let f = (w as f64 - from[0]) / span;
            let t = from[1] + f * (to[1] - from[1]) + time_noise.sample(&mut self.rng);
            if t < 0.0 {
                continue;
            }
            let wire = w as u32;
            let q = if geom.is_dead_wire(plane, wire) { 0.0 } else { chg * chg_spread.sample(&mut self.rng) };
            pts.push(PendingPoint { wire, tick: t / upt, chg: q });
        }
        if pts.len() < 2 {
            return None;
        }
        Some(PendingTraj { plane: plane.plane, dir: to - from, pts, reconstructed })
    }
}

/// Projects a 3D point into a plane, in engine units.
pub fn project(geom: &dyn DetectorGeometry, plane: PlaneId, pos: &Vector3<f64>, upt: f64) -> Vector2<f64> {
    Vector2::new(geom.wire_coordinate(pos[1], pos[2], plane), geom.x_to_ticks(pos[0], plane) * upt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vertexer_env::UniformGeometry;

    fn two_track_event() -> TruthEvent {
        let vx = Vector3::new(100.0, 0.0, 150.0);
        TruthEvent::new()
            .with_vertex(vx)
            .with_track(TruthTrack::new(vx, Vector3::new(110.0, 10.0, 165.0)))
            .with_track(TruthTrack::new(vx, Vector3::new(92.0, -8.0, 170.0)).missed())
    }

    #[test]
    fn test_same_seed_same_slice() {
        let geom = UniformGeometry::with_defaults().unwrap();
        let truth = two_track_event();
        let a = EventOracle::new(7).build_slice(&geom, &truth).unwrap();
        let b = EventOracle::new(7).build_slice(&geom, &truth).unwrap();
        let c = EventOracle::new(8).build_slice(&geom, &truth).unwrap();

        assert_eq!(a.hits.len(), b.hits.len());
        for (ha, hb) in a.hits.iter().zip(&b.hits) {
            assert_eq!(ha.peak_tick, hb.peak_tick);
            assert_eq!(ha.integral, hb.integral);
        }
        assert!(a.hits.iter().zip(&c.hits).any(|(ha, hc)| ha.peak_tick != hc.peak_tick));
    }

    #[test]
    fn test_missed_track_leaves_free_hits() {
        let geom = UniformGeometry::with_defaults().unwrap();
        let slc = EventOracle::new(1).build_slice(&geom, &two_track_event()).unwrap();

        // one reconstructed trajectory per plane
        assert_eq!(slc.tjs.len(), 3);
        let free = slc.hits.iter().filter(|h| h.in_traj.is_none()).count();
        assert!(free > 0);
        for tj in &slc.tjs {
            for tp in &tj.pts {
                for iht in tp.used_hits() {
                    assert_eq!(slc.hits[iht].in_traj, Some(tj.id));
                    assert_eq!(slc.hits[iht].wire as f64, tp.pos[0]);
                }
            }
        }
    }

    #[test]
    fn test_dead_wires_leave_uncharged_points() {
        let truth = TruthEvent::new()
            .with_segment(TruthSegment::new(2, (100.0, 300.0), (130.0, 310.0)))
            .with_dead_wires(2, 110..115);
        let geom = UniformGeometry::new(truth.geometry_config(&GeometryConfig::default())).unwrap();
        let slc = EventOracle::new(3).build_slice(&geom, &truth).unwrap();

        assert_eq!(slc.tjs.len(), 1);
        let tj = &slc.tjs[0];
        assert_eq!(tj.pts.len(), 31);
        assert_eq!(tj.num_pts_with_charge(), 26);
        assert!(slc.hits.iter().all(|h| !(110..115).contains(&h.wire)));
        assert!(slc.is_dead_wire(2, 112));
    }

    #[test]
    fn test_steep_projection_is_skipped() {
        let geom = UniformGeometry::with_defaults().unwrap();
        // along the drift direction: every plane sees a single wire
        let truth = TruthEvent::new().with_track(TruthTrack::new(
            Vector3::new(50.0, 0.0, 150.0),
            Vector3::new(90.0, 0.0, 150.0),
        ));
        let slc = EventOracle::new(1).build_slice(&geom, &truth).unwrap();
        assert!(slc.tjs.is_empty());
        assert!(slc.hits.is_empty());
    }
}

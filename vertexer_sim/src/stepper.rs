//! A straight-line stepper for recovering trajectories near vertices.

use vertexer_core::{Slice, TrajPoint, Trajectory, TrajectoryStepper};

/// Follows unused hits along the line from the vertex through the seed hit.
///
/// Steps one wire at a time away from the vertex and takes the closest
/// unused hit within `max_delta` of the line. Gives up after `max_gap`
/// consecutive wires without a hit.
#[derive(Debug, Clone)]
pub struct LineStepper {
    pub max_delta: f64,
    pub max_gap: u32,
    pub min_pts: usize,

    /// Trajectories handed out so far
    pub n_stepped: usize,
}

impl Default for LineStepper {
    fn default() -> Self {
        Self {
            max_delta: 1.0,
            max_gap: 2,
            min_pts: 3,
            n_stepped: 0,
        }
    }
}

impl LineStepper {
    fn closest_unused(&self, slc: &Slice, plane: usize, wire: u32, pred: f64) -> Option<usize> {
        let range = slc.hits_on_wire(plane, wire)?;
        range
            .filter(|&i| slc.hits[i].in_traj.is_none())
            .map(|i| (i, (slc.hit_pos(i)[1] - pred).abs()))
            .filter(|&(_, d)| d < self.max_delta)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }
}

impl TrajectoryStepper for LineStepper {
    fn step_from(&mut self, slc: &Slice, start: &TrajPoint, seed_hit: usize) -> Option<Trajectory> {
        let dir = start.dir;
        if dir[0].abs() < 1e-3 {
            return None;
        }
        let plane = start.ctp.plane() as usize;
        let n_wires = slc.planes.get(plane)?.n_wires as i64;
        let sign = if dir[0] > 0.0 { 1 } else { -1 };
        let slope = dir[1] / dir[0];

        let mut pts = Vec::new();
        let mut wire = start.pos[0].round() as i64 + sign;
        let mut gap = 0;
        while (0..n_wires).contains(&wire) && gap <= self.max_gap {
            let pred = start.pos[1] + (wire as f64 - start.pos[0]) * slope;
            match self.closest_unused(slc, plane, wire as u32, pred) {
                Some(iht) => {
                    let mut tp = TrajPoint::new(start.ctp, slc.hit_pos(iht), dir);
                    tp.chg = slc.hits[iht].integral;
                    tp.hits = vec![iht];
                    tp.use_hit = vec![true];
                    tp.n_tps_fit = (pts.len() + 1) as u16;
                    tp.step = pts.len() as i32;
                    pts.push(tp);
                    gap = 0;
                }
                None => gap += 1,
            }
            wire += sign;
        }

        if pts.len() < self.min_pts || !pts.iter().any(|tp| tp.hits.contains(&seed_hit)) {
            return None;
        }
        self.n_stepped += 1;
        Some(Trajectory::new(start.ctp, pts))
    }
}

//! Plane geometry between trajectory points, lines and trajectories.

use nalgebra::Vector2;

use crate::trajectory::{TrajPoint, Trajectory};

/// Intersection of the direction lines through two trajectory points.
///
/// Returns `None` for parallel lines.
pub fn traj_intersection(tp1: &TrajPoint, tp2: &TrajPoint) -> Option<Vector2<f64>> {
    let arg1 = tp1.pos[0] * tp1.dir[1] - tp1.pos[1] * tp1.dir[0];
    let arg2 = tp2.pos[0] * tp1.dir[1] - tp2.pos[1] * tp1.dir[0];
    let arg3 = tp2.dir[0] * tp1.dir[1] - tp2.dir[1] * tp1.dir[0];
    if arg3 == 0.0 {
        return None;
    }
    let s = (arg1 - arg2) / arg3;
    Some(tp2.pos + s * tp2.dir)
}

/// Squared distance of closest approach of (wire, time) to the line through `tp`.
#[inline]
pub fn point_traj_doca2(wire: f64, time: f64, tp: &TrajPoint) -> f64 {
    let t = (wire - tp.pos[0]) * tp.dir[0] + (time - tp.pos[1]) * tp.dir[1];
    let dw = tp.pos[0] + t * tp.dir[0] - wire;
    let dt = tp.pos[1] + t * tp.dir[1] - time;
    dw * dw + dt * dt
}

#[inline]
pub fn point_traj_doca(wire: f64, time: f64, tp: &TrajPoint) -> f64 {
    point_traj_doca2(wire, time, tp).sqrt()
}

/// Unsigned angle between two directions folded into [0, pi/2].
#[inline]
pub fn delta_angle(ang1: f64, ang2: f64) -> f64 {
    let d = ang1 - ang2;
    let pi = std::f64::consts::PI;
    (d - pi * (d / pi).round()).abs()
}

#[inline]
pub fn pos_sep(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    (a - b).norm()
}

#[inline]
pub fn pos_sep2(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    (a - b).norm_squared()
}

/// A hitless point at `from.pos` pointing toward `to`.
pub fn make_bare_tp(from: &TrajPoint, to: &Vector2<f64>) -> Option<TrajPoint> {
    let d = to - from.pos;
    let norm = d.norm();
    if norm == 0.0 {
        return None;
    }
    Some(TrajPoint::new(from.ctp, from.pos, d / norm))
}

/// Slides `tp` along its direction until it sits on `wire`.
pub fn move_tp_to_wire(tp: &mut TrajPoint, wire: f64) {
    if tp.dir[0] == 0.0 {
        return;
    }
    let dw = wire - tp.pos[0];
    if dw.abs() < 0.01 {
        return;
    }
    tp.pos[0] = wire;
    tp.pos[1] += dw * tp.dir[1] / tp.dir[0];
}

/// Closest pair of points between two trajectories, if closer than `min_sep`.
///
/// Returns `(ipt1, ipt2, separation)`.
pub fn traj_traj_doca(tj1: &Trajectory, tj2: &Trajectory, min_sep: f64) -> Option<(usize, usize, f64)> {
    let mut best = min_sep * min_sep;
    let mut found = None;
    for i1 in tj1.end_pt[0]..=tj1.end_pt[1] {
        let p1 = &tj1.pts[i1].pos;
        for i2 in tj2.end_pt[0]..=tj2.end_pt[1] {
            let p2 = &tj2.pts[i2].pos;
            let dw = p1[0] - p2[0];
            if dw.abs() > min_sep {
                continue;
            }
            let dt = p1[1] - p2[1];
            if dt.abs() > min_sep {
                continue;
            }
            let dp2 = dw * dw + dt * dt;
            if dp2 < best {
                best = dp2;
                found = Some((i1, i2));
            }
        }
    }
    found.map(|(i1, i2)| (i1, i2, best.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use vertexer_env::Ctp;

    fn tp(pos: (f64, f64), dir: (f64, f64)) -> TrajPoint {
        TrajPoint::new(Ctp(0), Vector2::new(pos.0, pos.1), Vector2::new(dir.0, dir.1))
    }

    #[test]
    fn test_intersection_of_crossing_lines() {
        let a = tp((0.0, 0.0), (1.0, 1.0));
        let b = tp((10.0, 0.0), (-1.0, 1.0));
        let x = traj_intersection(&a, &b).unwrap();
        assert_relative_eq!(x[0], 5.0, epsilon = 1e-9);
        assert_relative_eq!(x[1], 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_parallel_lines_do_not_intersect() {
        let a = tp((0.0, 0.0), (1.0, 0.0));
        let b = tp((0.0, 3.0), (1.0, 0.0));
        assert!(traj_intersection(&a, &b).is_none());
    }

    #[test]
    fn test_doca_is_perpendicular_distance() {
        let line = tp((0.0, 0.0), (1.0, 0.0));
        assert_relative_eq!(point_traj_doca(7.0, 2.5, &line), 2.5);
        assert_relative_eq!(point_traj_doca(-3.0, -1.0, &line), 1.0);
    }

    #[test]
    fn test_delta_angle_folds_opposite_directions() {
        use std::f64::consts::PI;
        assert_relative_eq!(delta_angle(0.1, 0.1 + PI), 0.0, epsilon = 1e-12);
        assert_relative_eq!(delta_angle(0.0, PI / 2.0), PI / 2.0, epsilon = 1e-12);
        assert_relative_eq!(delta_angle(0.2, -0.2), 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_move_to_wire_follows_direction() {
        let mut p = tp((2.0, 4.0), (2.0, 1.0));
        move_tp_to_wire(&mut p, 6.0);
        assert_relative_eq!(p.pos[0], 6.0);
        assert_relative_eq!(p.pos[1], 6.0, epsilon = 1e-12);
    }
}

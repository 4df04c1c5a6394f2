//! Event topologies exercised by the simulation harness.

use std::fmt;
use std::str::FromStr;

use nalgebra::Vector3;

use crate::oracle::{TruthEvent, TruthSegment, TruthTrack};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// VTX-001: two trajectories converging on a common end point
    ConvergingPair,

    /// VTX-002: a straight track ending on the side of another
    Hammer,

    /// VTX-003: low-score vertices are pruned
    PoorVertex,

    /// VTX-004: three-prong interaction seen in all planes, one prong missed
    NeutrinoLike,

    /// VTX-005: interaction hidden behind dead wires in one plane
    DeadGap,

    /// VTX-006: a vertex sitting on a trajectory that passes through it
    Crossing,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::ConvergingPair,
            ScenarioId::Hammer,
            ScenarioId::PoorVertex,
            ScenarioId::NeutrinoLike,
            ScenarioId::DeadGap,
            ScenarioId::Crossing,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::ConvergingPair => "converging_pair",
            ScenarioId::Hammer => "hammer",
            ScenarioId::PoorVertex => "poor_vertex",
            ScenarioId::NeutrinoLike => "neutrino_like",
            ScenarioId::DeadGap => "dead_gap",
            ScenarioId::Crossing => "crossing",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::ConvergingPair => "Two trajectories meeting at one end make exactly one 2D vertex",
            ScenarioId::Hammer => "A stiff track ending on another splits it into a hammer vertex",
            ScenarioId::PoorVertex => "Vertices scoring below the kill threshold are removed",
            ScenarioId::NeutrinoLike => "Three prongs match in 3D and the missed prong is recovered",
            ScenarioId::DeadGap => "A 3D vertex is found when one plane is dead at the vertex",
            ScenarioId::Crossing => "A trajectory passing through a vertex is split and attached",
        }
    }

    /// True if the scenario builds 3D tracks rather than single-plane segments.
    pub fn is_3d(&self) -> bool {
        matches!(self, ScenarioId::NeutrinoLike | ScenarioId::DeadGap)
    }

    /// Ground truth for this scenario.
    pub fn truth(&self) -> TruthEvent {
        match self {
            ScenarioId::ConvergingPair => TruthEvent::new()
                .with_vertex_2d(2, (20.0, 102.5))
                .with_segment(TruthSegment::new(2, (10.0, 100.0), (19.0, 102.25)))
                .with_segment(TruthSegment::new(2, (10.0, 105.0), (19.0, 102.75))),

            ScenarioId::Hammer => TruthEvent::new()
                .with_vertex_2d(2, (25.0, 200.0))
                .with_segment(TruthSegment::new(2, (5.0, 180.0), (24.0, 199.0)))
                .with_segment(TruthSegment::new(2, (10.0, 200.0), (45.0, 200.0))),

            // two separated vees in the collection plane
            ScenarioId::PoorVertex => TruthEvent::new()
                .with_vertex_2d(2, (20.0, 102.5))
                .with_vertex_2d(2, (120.0, 302.5))
                .with_segment(TruthSegment::new(2, (10.0, 100.0), (19.0, 102.25)))
                .with_segment(TruthSegment::new(2, (10.0, 105.0), (19.0, 102.75)))
                .with_segment(TruthSegment::new(2, (110.0, 300.0), (119.0, 302.25)))
                .with_segment(TruthSegment::new(2, (110.0, 305.0), (119.0, 302.75))),

            ScenarioId::NeutrinoLike => {
                let vx = neutrino_vertex();
                TruthEvent::new()
                    .with_vertex(vx)
                    .with_track(prong(vx, Vector3::new(12.0, 9.0, 20.0)))
                    .with_track(prong(vx, Vector3::new(-10.0, -12.0, 18.0)))
                    .with_track(prong(vx, Vector3::new(6.0, 14.0, -16.0)).missed())
            }

            ScenarioId::DeadGap => {
                let vx = neutrino_vertex();
                // collection wire of the vertex is 500
                TruthEvent::new()
                    .with_vertex(vx)
                    .with_track(prong(vx, Vector3::new(12.0, 9.0, 20.0)))
                    .with_track(prong(vx, Vector3::new(-10.0, -12.0, -18.0)))
                    .with_dead_wires(2, 490..511)
            }

            ScenarioId::Crossing => TruthEvent::new()
                .with_vertex_2d(2, (50.0, 100.0))
                .with_segment(TruthSegment::new(2, (51.0, 101.0), (65.0, 115.0)))
                .with_segment(TruthSegment::new(2, (51.0, 99.0), (65.0, 85.0)))
                .with_segment(TruthSegment::new(2, (35.0, 100.0), (65.0, 100.0))),
        }
    }
}

fn neutrino_vertex() -> Vector3<f64> {
    Vector3::new(100.0, 0.0, 150.0)
}

/// A track leaving `vx` along `step`, starting half a centimetre out so
/// the prongs do not share hits at the vertex.
fn prong(vx: Vector3<f64>, step: Vector3<f64>) -> TruthTrack {
    let dir = step.normalize();
    TruthTrack::new(vx + 0.5 * dir, vx + step)
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "converging_pair" | "vee" | "vtx001" => Ok(ScenarioId::ConvergingPair),
            "hammer" | "vtx002" => Ok(ScenarioId::Hammer),
            "poor_vertex" | "kill" | "vtx003" => Ok(ScenarioId::PoorVertex),
            "neutrino_like" | "neutrino" | "vtx004" => Ok(ScenarioId::NeutrinoLike),
            "dead_gap" | "gap" | "vtx005" => Ok(ScenarioId::DeadGap),
            "crossing" | "vtx006" => Ok(ScenarioId::Crossing),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>(), Ok(id));
            assert_eq!(id.to_string(), id.name());
        }
        assert_eq!("Converging-Pair".parse::<ScenarioId>(), Ok(ScenarioId::ConvergingPair));
        assert_eq!("VTX005".parse::<ScenarioId>(), Ok(ScenarioId::DeadGap));
        assert!("nope".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_truth_kinds() {
        for id in ScenarioId::all() {
            let truth = id.truth();
            if id.is_3d() {
                assert!(truth.vertex.is_some());
                assert!(truth.segments.is_empty());
            } else {
                assert!(!truth.vertices_2d.is_empty());
                assert!(truth.tracks.is_empty());
            }
        }
        assert!(!ScenarioId::DeadGap.truth().dead_wires.is_empty());
    }
}

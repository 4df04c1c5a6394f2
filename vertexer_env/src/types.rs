//! Common identifier types for the detector environment.

use serde::{Deserialize, Serialize};

/// Number of plane slots reserved per TPC in a [`Ctp`] code.
pub const CTP_PLANE_STRIDE: u32 = 10;

/// Number of TPC slots reserved per cryostat in a [`Ctp`] code.
pub const CTP_TPC_STRIDE: u32 = 1000;

/// Identifies a TPC inside a cryostat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TpcId {
    pub cryostat: u32,
    pub tpc: u32,
}

impl TpcId {
    pub fn new(cryostat: u32, tpc: u32) -> Self {
        Self { cryostat, tpc }
    }

    /// Returns the plane identifier for `plane` in this TPC.
    pub fn plane(&self, plane: u16) -> PlaneId {
        PlaneId {
            cryostat: self.cryostat,
            tpc: self.tpc,
            plane,
        }
    }
}

impl std::fmt::Display for TpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C{}T{}", self.cryostat, self.tpc)
    }
}

/// Identifies a single wire plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlaneId {
    pub cryostat: u32,
    pub tpc: u32,
    pub plane: u16,
}

impl PlaneId {
    pub fn new(cryostat: u32, tpc: u32, plane: u16) -> Self {
        Self { cryostat, tpc, plane }
    }

    /// The TPC this plane belongs to.
    pub fn tpc_id(&self) -> TpcId {
        TpcId::new(self.cryostat, self.tpc)
    }

    /// Encodes this plane as a compact [`Ctp`].
    pub fn ctp(&self) -> Ctp {
        Ctp::encode(*self)
    }
}

impl std::fmt::Display for PlaneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "C{}T{}P{}", self.cryostat, self.tpc, self.plane)
    }
}

/// Compact (cryostat, TPC, plane) code.
///
/// Two objects are in the same view if and only if their codes are equal.
/// The encoding is `plane + tpc * 10 + cryostat * 1000` and round-trips
/// through [`Ctp::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ctp(pub u32);

impl Ctp {
    pub fn encode(plane: PlaneId) -> Self {
        Self(plane.plane as u32 + plane.tpc * CTP_PLANE_STRIDE + plane.cryostat * CTP_TPC_STRIDE)
    }

    pub fn decode(&self) -> PlaneId {
        let cryostat = self.0 / CTP_TPC_STRIDE;
        let rest = self.0 % CTP_TPC_STRIDE;
        PlaneId {
            cryostat,
            tpc: rest / CTP_PLANE_STRIDE,
            plane: (rest % CTP_PLANE_STRIDE) as u16,
        }
    }

    /// Plane index within the TPC.
    #[inline]
    pub fn plane(&self) -> u16 {
        self.decode().plane
    }

    #[inline]
    pub fn tpc_id(&self) -> TpcId {
        self.decode().tpc_id()
    }
}

impl From<PlaneId> for Ctp {
    fn from(plane: PlaneId) -> Self {
        Ctp::encode(plane)
    }
}

impl std::fmt::Display for Ctp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.decode())
    }
}

/// Fiducial bounds of a TPC in detector coordinates (cm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActiveVolume {
    pub x_lo: f64,
    pub x_hi: f64,
    pub y_lo: f64,
    pub y_hi: f64,
    pub z_lo: f64,
    pub z_hi: f64,
}

impl ActiveVolume {
    /// True if the (y, z) point lies inside the volume, edges included.
    pub fn contains_yz(&self, y: f64, z: f64) -> bool {
        y >= self.y_lo && y <= self.y_hi && z >= self.z_lo && z <= self.z_hi
    }
}

//! Enum-indexed flag sets for trajectories and vertices.
//!
//! Flags record cumulative history ("this algorithm touched it"), not
//! mutually exclusive states, so several can be set at once.

use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// A flag that can live in a [`FlagSet`].
pub trait Flag: Copy + std::fmt::Debug + 'static {
    /// Every variant, in bit order.
    const ALL: &'static [Self];

    /// Bit position of this flag (< 32).
    fn bit(self) -> u32;
}

/// Fixed-size bitset indexed by a [`Flag`] enum.
#[derive(Serialize, Deserialize)]
#[serde(transparent, bound = "")]
pub struct FlagSet<F> {
    bits: u32,
    #[serde(skip)]
    _marker: PhantomData<F>,
}

impl<F: Flag> FlagSet<F> {
    pub fn new() -> Self {
        Self { bits: 0, _marker: PhantomData }
    }

    #[inline]
    pub fn contains(&self, flag: F) -> bool {
        self.bits & (1 << flag.bit()) != 0
    }

    #[inline]
    pub fn insert(&mut self, flag: F) {
        self.bits |= 1 << flag.bit();
    }

    #[inline]
    pub fn remove(&mut self, flag: F) {
        self.bits &= !(1 << flag.bit());
    }

    /// Sets or clears `flag`.
    #[inline]
    pub fn set(&mut self, flag: F, on: bool) {
        if on {
            self.insert(flag);
        } else {
            self.remove(flag);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = F> + '_ {
        F::ALL.iter().copied().filter(move |f| self.contains(*f))
    }
}

impl<F: Flag> Default for FlagSet<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> Clone for FlagSet<F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<F> Copy for FlagSet<F> {}

impl<F> PartialEq for FlagSet<F> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<F> Eq for FlagSet<F> {}

impl<F: Flag> std::fmt::Debug for FlagSet<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<F: Flag> FromIterator<F> for FlagSet<F> {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        let mut set = Self::new();
        for flag in iter {
            set.insert(flag);
        }
        set
    }
}

macro_rules! flag_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl Flag for $name {
            const ALL: &'static [Self] = &[$($name::$variant),+];

            #[inline]
            fn bit(self) -> u32 {
                self as u32
            }
        }
    };
}

flag_enum! {
    /// Per-trajectory algorithm history.
    AlgMod {
        Killed,
        /// Halo of a shower; ignored by vertexing
        Halo,
        /// Irregular trajectory with unreliable direction
        Junk,
        ShowerLike,
        ShowerTj,
        /// End is not signal-connected to its vertex; excluded from fits
        Photon,
        DeltaRay,
        Merge,
        Split,
        JunkVx,
        VtxTj,
        ChkVxTj,
        VxMerge,
        HamVx,
        HamVx2,
        SplitTjCVx,
        Comp3DVx,
        Comp3DVxIG,
        VtxHitsSwap,
        /// Attached, directly or transitively, to a high-score 3D vertex
        TjHiVx3Score,
    }
}

flag_enum! {
    /// Per-end trajectory flags.
    EndFlag {
        Bragg,
        AtKink,
        /// This end is attached to its vertex but not used in the vertex fit
        NoFitVx,
    }
}

flag_enum! {
    /// 2D vertex status.
    VtxStat {
        /// Position may not be changed by a fit
        Fixed,
        OnDeadWire,
        HiVx3Score,
        /// FindVtxTjs already ran on this vertex
        VtxTrjTried,
        Merged,
        /// Created without requiring charge between the vertex and the trajectory ends
        IndPlnNoChg,
        Junk,
    }
}

pub type AlgModSet = FlagSet<AlgMod>;
pub type EndFlagSet = FlagSet<EndFlag>;
pub type VtxStatSet = FlagSet<VtxStat>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_cumulative() {
        let mut set = AlgModSet::new();
        set.insert(AlgMod::Split);
        set.insert(AlgMod::HamVx2);
        assert!(set.contains(AlgMod::Split));
        assert!(set.contains(AlgMod::HamVx2));
        assert!(!set.contains(AlgMod::Killed));

        set.set(AlgMod::Split, false);
        assert!(!set.contains(AlgMod::Split));
        assert!(set.contains(AlgMod::HamVx2));
    }

    #[test]
    fn test_iter_lists_set_flags_in_order() {
        let set: VtxStatSet = [VtxStat::Junk, VtxStat::Fixed].into_iter().collect();
        let flags: Vec<_> = set.iter().collect();
        assert_eq!(flags, vec![VtxStat::Fixed, VtxStat::Junk]);
    }

    #[test]
    fn test_serializes_as_bits() {
        let mut set = EndFlagSet::new();
        set.insert(EndFlag::NoFitVx);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, "4");
        let back: EndFlagSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}

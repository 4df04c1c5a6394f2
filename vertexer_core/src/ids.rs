//! Typed 1-based handles into the slice arenas.
//!
//! A handle has no dereference of its own; it is resolved against the
//! [`Slice`](crate::slice::Slice) on every use, so a split or merge that grows
//! an arena never leaves a dangling reference behind.

use serde::{Deserialize, Serialize};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// Handle of the element stored at arena position `index`.
            #[inline]
            pub fn from_index(index: usize) -> Self {
                Self(index as u32 + 1)
            }

            /// Arena position of this handle.
            #[inline]
            pub fn index(self) -> usize {
                (self.0 - 1) as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Trajectory handle.
    TjId,
    "T"
);
arena_id!(
    /// 2D vertex handle.
    VtxId,
    "2V"
);
arena_id!(
    /// 3D vertex handle.
    Vtx3Id,
    "3V"
);

/// Transient (index, value) pair used for ordering candidates.
#[derive(Debug, Clone, Copy)]
pub struct SortEntry {
    pub index: usize,
    pub val: f64,
}

/// Sorts entries by increasing value; ties keep their input order.
pub fn sort_increasing(entries: &mut [SortEntry]) {
    entries.sort_by(|a, b| a.val.total_cmp(&b.val));
}

/// Sorts entries by decreasing value; ties keep their input order.
pub fn sort_decreasing(entries: &mut [SortEntry]) {
    entries.sort_by(|a, b| b.val.total_cmp(&a.val));
}

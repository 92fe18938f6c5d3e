use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    pub struct MoleculeKey;
}

macro_rules! index_type {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub $inner);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

index_type!(
    /// Stable molecule identity. Allocated monotonically and never reused, unlike arena slots.
    MoleculeId(u64)
);
index_type!(SpeciesId(u32));
index_type!(VertexIndex(u32));
index_type!(WallIndex(u32));
index_type!(EdgeIndex(u32));
index_type!(TileIndex(u32));
index_type!(ObjectId(u32));
index_type!(RegionId(u32));
index_type!(SubpartIndex(u32));
index_type!(
    /// Identifier of a compartment in the counted-volume hierarchy.
    CountedVolumeId(u32)
);

impl CountedVolumeId {
    /// Space not enclosed by any counted object.
    pub const OUTSIDE_ALL: CountedVolumeId = CountedVolumeId(0);
    /// Space enclosed by counted objects whose meshes intersect, so no unique compartment exists.
    pub const INTERSECTS: CountedVolumeId = CountedVolumeId(1);
    pub(crate) const FIRST_OBJECT: u32 = 2;

    pub fn is_sentinel(self) -> bool {
        self == Self::OUTSIDE_ALL || self == Self::INTERSECTS
    }
}

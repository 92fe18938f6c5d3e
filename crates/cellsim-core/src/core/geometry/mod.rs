//! Triangle-mesh geometry: walls with local 2D frames, shared-edge transforms between
//! adjacent walls, per-wall tile grids, and the assembled [`mesh::GeometryModel`].

use crate::core::models::ids::{MoleculeId, TileIndex, VertexIndex, WallIndex};
use thiserror::Error;

pub mod closest;
pub mod edge;
pub mod grid;
pub mod mesh;
pub mod wall;

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("Wall with vertices {vertices:?} is degenerate (zero area)")]
    DegenerateWall { vertices: [VertexIndex; 3] },

    #[error("Object '{object}' references vertex {index} but only has {count} vertices")]
    VertexOutOfRange {
        object: String,
        index: usize,
        count: usize,
    },

    #[error("Object '{object}' has a triangle with a repeated vertex")]
    RepeatedVertex { object: String },

    #[error("Object '{0}' is defined more than once")]
    DuplicateObject(String),

    #[error("Region '{region}' of object '{object}' references wall {side} outside the object")]
    RegionWallOutOfRange {
        object: String,
        region: String,
        side: usize,
    },

    #[error("Tile {tile} on wall {wall} is already occupied by molecule {occupant}")]
    TileOccupied {
        wall: WallIndex,
        tile: TileIndex,
        occupant: MoleculeId,
    },

    #[error("Tile {tile} is out of range for a grid of {n_tiles} tiles")]
    TileOutOfRange { tile: TileIndex, n_tiles: u32 },

    #[error("Wall {0} does not exist")]
    WallOutOfRange(WallIndex),

    #[error(
        "No interior position found in tile {dst_tile} of wall {dst_wall} near tile {src_tile} of wall {src_wall}"
    )]
    NoClosestPosition {
        src_wall: WallIndex,
        src_tile: TileIndex,
        dst_wall: WallIndex,
        dst_tile: TileIndex,
    },

    #[error("Vertex displacement for {0} does not belong to the object being deformed")]
    ForeignVertex(VertexIndex),
}

use super::GeometryError;
use crate::core::models::ids::{MoleculeId, TileIndex, WallIndex};
use nalgebra::Vector2;

/// Decomposition of a tile index.
///
/// `strip` counts rows from the wall's vertex-2 apex (strip 0 holds a single tile),
/// `stripe` is the position within the row and `flip` distinguishes upright (0) from
/// inverted (1) tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCoords {
    pub strip: u32,
    pub stripe: u32,
    pub flip: u32,
}

/// Subdivision of a wall into `n²` congruent triangular tiles, each holding at most one
/// surface molecule.
#[derive(Debug, Clone)]
pub struct Grid {
    pub n: u32,
    pub n_tiles: u32,
    inv_strip_wid: f64,
    vert2_slope: f64,
    fullslope: f64,
    uv_vert1_u: f64,
    uv_vert2: Vector2<f64>,
    occupants: Vec<Option<MoleculeId>>,
    n_occupied: u32,
}

impl Grid {
    /// # Arguments
    ///
    /// * `area` - Wall area in µm².
    /// * `uv_vert1_u`, `uv_vert2` - The wall's 2D vertex layout.
    /// * `grid_density` - Tiles per µm².
    pub fn new(area: f64, uv_vert1_u: f64, uv_vert2: Vector2<f64>, grid_density: f64) -> Self {
        let n = ((area * grid_density).sqrt().ceil() as u32).max(1);
        let n_tiles = n * n;
        let mut grid = Self {
            n,
            n_tiles,
            inv_strip_wid: 0.0,
            vert2_slope: 0.0,
            fullslope: 0.0,
            uv_vert1_u,
            uv_vert2,
            occupants: vec![None; n_tiles as usize],
            n_occupied: 0,
        };
        grid.refresh_constants(uv_vert1_u, uv_vert2);
        grid
    }

    /// Recomputes the layout constants after the wall changed shape. The tile count stays
    /// fixed so occupants keep their tiles.
    pub fn refresh_constants(&mut self, uv_vert1_u: f64, uv_vert2: Vector2<f64>) {
        self.uv_vert1_u = uv_vert1_u;
        self.uv_vert2 = uv_vert2;
        self.inv_strip_wid = self.n as f64 / uv_vert2.y;
        self.vert2_slope = uv_vert2.x / uv_vert2.y;
        self.fullslope = uv_vert1_u / uv_vert2.y;
    }

    /// Tile containing the 2D wall point `uv`. Points slightly outside the wall are
    /// clamped to the nearest border tile.
    pub fn uv_to_tile(&self, uv: &Vector2<f64>) -> TileIndex {
        let n = self.n as f64;
        let striploc = (uv.y * self.inv_strip_wid).clamp(0.0, n - f64::EPSILON * n);
        let strip_from_bottom = striploc.floor();
        let striprem = striploc - strip_from_bottom;
        let strip = self.n - strip_from_bottom as u32 - 1;

        let u0 = uv.y * self.vert2_slope;
        let u1_u0 = self.uv_vert1_u - uv.y * self.fullslope;
        let row_len = (strip + 1) as f64 - striprem;
        let stripeloc = if u1_u0 > 0.0 {
            (((uv.x - u0) / u1_u0) * row_len).clamp(0.0, row_len)
        } else {
            0.0
        };
        let stripe = (stripeloc.floor() as u32).min(strip);
        let striperem = stripeloc - stripe as f64;

        let flip = if striperem < 1.0 - striprem || stripe == strip {
            0
        } else {
            1
        };
        let idx = strip * strip + 2 * stripe + flip;
        TileIndex(idx.min(self.n_tiles - 1))
    }

    pub fn coords(&self, tile: TileIndex) -> TileCoords {
        let idx = tile.0;
        let strip = (idx as f64).sqrt().floor() as u32;
        // Guard against floating point error near perfect squares.
        let strip = if (strip + 1) * (strip + 1) <= idx {
            strip + 1
        } else if strip * strip > idx {
            strip - 1
        } else {
            strip
        };
        let rem = idx - strip * strip;
        TileCoords {
            strip,
            stripe: rem / 2,
            flip: rem % 2,
        }
    }

    fn check(&self, tile: TileIndex) -> Result<(), GeometryError> {
        if tile.0 >= self.n_tiles {
            return Err(GeometryError::TileOutOfRange {
                tile,
                n_tiles: self.n_tiles,
            });
        }
        Ok(())
    }

    /// Center (centroid) of a tile in wall coordinates.
    pub fn tile_center(&self, tile: TileIndex) -> Vector2<f64> {
        let TileCoords {
            strip,
            stripe,
            flip,
        } = self.coords(tile);
        let n3 = 3.0 * self.n as f64;
        let k = (self.n - strip - 1) as f64;
        let j = stripe as f64;
        let i = flip as f64;
        let a = (3.0 * j + i + 1.0) / n3;
        let b = (3.0 * k + i + 1.0) / n3;
        Vector2::new(a * self.uv_vert1_u + b * self.uv_vert2.x, b * self.uv_vert2.y)
    }

    /// Lattice coordinates `(a, b)` of a tile's vertices, where the wall point is
    /// `a / n * V1 + b / n * V2`.
    pub fn tile_lattice_vertices(&self, tile: TileIndex) -> [(u32, u32); 3] {
        let TileCoords {
            strip,
            stripe,
            flip,
        } = self.coords(tile);
        let k = self.n - strip - 1;
        let j = stripe;
        if flip == 0 {
            [(j, k), (j + 1, k), (j, k + 1)]
        } else {
            [(j + 1, k), (j, k + 1), (j + 1, k + 1)]
        }
    }

    pub fn lattice_to_uv(&self, (a, b): (u32, u32)) -> Vector2<f64> {
        let v1 = Vector2::new(self.uv_vert1_u, 0.0);
        match (a, b) {
            (0, 0) => Vector2::zeros(),
            (a, 0) if a == self.n => v1,
            (0, b) if b == self.n => self.uv_vert2,
            _ => {
                let n = self.n as f64;
                v1 * (a as f64 / n) + self.uv_vert2 * (b as f64 / n)
            }
        }
    }

    pub fn tile_vertices(&self, tile: TileIndex) -> [Vector2<f64>; 3] {
        self.tile_lattice_vertices(tile)
            .map(|lattice| self.lattice_to_uv(lattice))
    }

    /// Neighbors sharing an edge with `tile` inside the same wall.
    pub fn neighbors_in_wall(&self, tile: TileIndex) -> Vec<TileIndex> {
        let TileCoords {
            strip,
            stripe,
            flip,
        } = self.coords(tile);
        let base = strip * strip;
        let mut out = Vec::with_capacity(3);
        if flip == 0 {
            if stripe > 0 {
                out.push(TileIndex(base + 2 * stripe - 1));
            }
            if stripe < strip {
                out.push(TileIndex(base + 2 * stripe + 1));
            }
            if strip + 1 < self.n {
                let below = (strip + 1) * (strip + 1);
                out.push(TileIndex(below + 2 * stripe + 1));
            }
        } else {
            out.push(TileIndex(base + 2 * stripe));
            out.push(TileIndex(base + 2 * stripe + 2));
            let above = (strip - 1) * (strip - 1);
            out.push(TileIndex(above + 2 * stripe));
        }
        out
    }

    /// Wall edges (0: V0-V1, 1: V1-V2, 2: V2-V0) that a tile touches with a full side.
    pub fn boundary_edges(&self, tile: TileIndex) -> Vec<usize> {
        let TileCoords {
            strip,
            stripe,
            flip,
        } = self.coords(tile);
        let mut out = Vec::new();
        if flip == 1 {
            return out;
        }
        if strip == self.n - 1 {
            out.push(0);
        }
        if stripe == strip {
            out.push(1);
        }
        if stripe == 0 {
            out.push(2);
        }
        out
    }

    /// Midpoint of the tile side lying on wall edge `edge`, if the tile has one.
    pub fn boundary_side_midpoint(&self, tile: TileIndex, edge: usize) -> Option<Vector2<f64>> {
        if !self.boundary_edges(tile).contains(&edge) {
            return None;
        }
        let [a, b, c] = self.tile_vertices(tile);
        Some(match edge {
            0 => (a + b) / 2.0,
            1 => (b + c) / 2.0,
            _ => (a + c) / 2.0,
        })
    }

    pub fn occupant(&self, tile: TileIndex) -> Option<MoleculeId> {
        self.occupants.get(tile.index()).copied().flatten()
    }

    pub fn is_occupied(&self, tile: TileIndex) -> bool {
        self.occupant(tile).is_some()
    }

    /// Claims a tile for a molecule.
    ///
    /// # Errors
    ///
    /// Fails with [`GeometryError::TileOccupied`] if another molecule holds the tile.
    pub fn occupy(
        &mut self,
        wall: WallIndex,
        tile: TileIndex,
        molecule: MoleculeId,
    ) -> Result<(), GeometryError> {
        self.check(tile)?;
        let slot = &mut self.occupants[tile.index()];
        match *slot {
            Some(occupant) if occupant != molecule => Err(GeometryError::TileOccupied {
                wall,
                tile,
                occupant,
            }),
            Some(_) => Ok(()),
            None => {
                *slot = Some(molecule);
                self.n_occupied += 1;
                Ok(())
            }
        }
    }

    /// Frees a tile, returning its previous occupant.
    pub fn release(&mut self, tile: TileIndex) -> Option<MoleculeId> {
        let previous = self.occupants.get_mut(tile.index())?.take();
        if previous.is_some() {
            self.n_occupied -= 1;
        }
        previous
    }

    pub fn n_occupied(&self) -> u32 {
        self.n_occupied
    }

    pub fn clear(&mut self) {
        self.occupants.iter_mut().for_each(|o| *o = None);
        self.n_occupied = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid(density: f64) -> Grid {
        // Wall with vertices (0,0), (2,0), (0.5,1.5): area 1.5.
        Grid::new(1.5, 2.0, Vector2::new(0.5, 1.5), density)
    }

    fn inside(tri: &[Vector2<f64>; 3], p: &Vector2<f64>) -> bool {
        let sign = |a: &Vector2<f64>, b: &Vector2<f64>| {
            (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
        };
        let s = [
            sign(&tri[0], &tri[1]),
            sign(&tri[1], &tri[2]),
            sign(&tri[2], &tri[0]),
        ];
        s.iter().all(|&v| v >= -1e-12) || s.iter().all(|&v| v <= 1e-12)
    }

    #[test]
    fn tile_count_is_square_of_ceiled_root() {
        let g = grid(6.0);
        assert_eq!(g.n, 3);
        assert_eq!(g.n_tiles, 9);
        assert_eq!(grid(1e-9).n, 1);
    }

    #[test]
    fn tile_center_maps_back_to_same_tile() {
        let g = grid(40.0);
        for t in 0..g.n_tiles {
            let center = g.tile_center(TileIndex(t));
            assert_eq!(g.uv_to_tile(&center), TileIndex(t), "tile {t}");
        }
    }

    #[test]
    fn tile_center_lies_inside_its_vertices() {
        let g = grid(40.0);
        for t in 0..g.n_tiles {
            let tri = g.tile_vertices(TileIndex(t));
            assert!(inside(&tri, &g.tile_center(TileIndex(t))));
            let centroid = (tri[0] + tri[1] + tri[2]) / 3.0;
            assert_relative_eq!(centroid, g.tile_center(TileIndex(t)), epsilon = 1e-12);
        }
    }

    #[test]
    fn corner_tiles_snap_to_wall_vertices() {
        let g = grid(40.0);
        let n = g.n;
        let apex = g.tile_vertices(TileIndex(0));
        assert_eq!(apex[2], Vector2::new(0.5, 1.5));
        let bottom_left = g.tile_vertices(TileIndex((n - 1) * (n - 1)));
        assert_eq!(bottom_left[0], Vector2::zeros());
        let bottom_right = g.tile_vertices(TileIndex(n * n - 1));
        assert_eq!(bottom_right[1], Vector2::new(2.0, 0.0));
    }

    #[test]
    fn occupying_an_occupied_tile_fails() {
        let mut g = grid(6.0);
        let w = WallIndex(0);
        g.occupy(w, TileIndex(4), MoleculeId(1)).unwrap();
        let err = g.occupy(w, TileIndex(4), MoleculeId(2)).unwrap_err();
        assert_eq!(
            err,
            GeometryError::TileOccupied {
                wall: w,
                tile: TileIndex(4),
                occupant: MoleculeId(1)
            }
        );
        assert_eq!(g.release(TileIndex(4)), Some(MoleculeId(1)));
        g.occupy(w, TileIndex(4), MoleculeId(2)).unwrap();
        assert_eq!(g.n_occupied(), 1);
    }

    #[test]
    fn out_of_range_tile_is_rejected() {
        let mut g = grid(6.0);
        assert!(matches!(
            g.occupy(WallIndex(0), TileIndex(9), MoleculeId(1)),
            Err(GeometryError::TileOutOfRange { .. })
        ));
    }

    #[test]
    fn in_wall_neighbors_share_two_vertices() {
        let g = grid(40.0);
        for t in 0..g.n_tiles {
            let mine = g.tile_lattice_vertices(TileIndex(t));
            for nb in g.neighbors_in_wall(TileIndex(t)) {
                let theirs = g.tile_lattice_vertices(nb);
                let shared = mine.iter().filter(|v| theirs.contains(v)).count();
                assert_eq!(shared, 2, "tiles {t} and {}", nb.0);
            }
        }
    }

    #[test]
    fn boundary_tiles_touch_wall_edges() {
        let g = grid(6.0);
        assert_eq!(g.boundary_edges(TileIndex(0)), vec![1, 2]);
        assert_eq!(g.boundary_edges(TileIndex(4)), vec![0, 2]);
        assert_eq!(g.boundary_edges(TileIndex(8)), vec![0, 1]);
        assert!(g.boundary_edges(TileIndex(5)).is_empty());
    }
}

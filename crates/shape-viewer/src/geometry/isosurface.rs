//! Iso-surface extraction by marching tetrahedra.
//!
//! Every grid cell is split into six tetrahedra sharing the cell diagonal
//! from corner 0 to corner 6. Neighbouring cells then split their shared faces
//! along the same diagonal, so the surface is closed across cells. Vertices on
//! shared grid edges are merged. Triangle winding is not normalized.

use super::{Mesh, Volume};
use crate::error::{Result, ViewerError};
use glam::DVec3;
use log::debug;
use std::collections::HashMap;

/// Cell corner offsets, in the usual hexahedron order.
const CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

const TETRAHEDRA: [[usize; 4]; 6] = [
    [0, 5, 1, 6],
    [0, 1, 2, 6],
    [0, 2, 3, 6],
    [0, 3, 7, 6],
    [0, 7, 4, 6],
    [0, 4, 5, 6],
];

struct Extractor<'a> {
    volume: &'a Volume,
    iso: f64,
    dims: [usize; 3],
    points: Vec<DVec3>,
    triangles: Vec<[u32; 3]>,
    edge_vertices: HashMap<(usize, usize), u32>,
}

impl<'a> Extractor<'a> {
    fn grid_id(&self, ijk: [usize; 3]) -> usize {
        ijk[0] + self.dims[0] * (ijk[1] + self.dims[1] * ijk[2])
    }

    fn world(&self, ijk: [usize; 3]) -> DVec3 {
        let extent = self.volume.extent();
        self.volume.index_to_world([
            extent[0][0] + ijk[0] as i64,
            extent[1][0] + ijk[1] as i64,
            extent[2][0] + ijk[2] as i64,
        ])
    }

    fn value(&self, ijk: [usize; 3]) -> f64 {
        self.volume.value(ijk[0], ijk[1], ijk[2])
    }

    /// Vertex where the iso-value crosses the grid edge `a`-`b`.
    fn edge_vertex(&mut self, a: [usize; 3], b: [usize; 3]) -> u32 {
        let (ia, ib) = (self.grid_id(a), self.grid_id(b));
        let key = if ia < ib { (ia, ib) } else { (ib, ia) };
        if let Some(&v) = self.edge_vertices.get(&key) {
            return v;
        }

        let (lo, hi) = if ia < ib { (a, b) } else { (b, a) };
        let (v0, v1) = (self.value(lo), self.value(hi));
        let t = if (v1 - v0).abs() > f64::EPSILON {
            ((self.iso - v0) / (v1 - v0)).clamp(0.0, 1.0)
        } else {
            0.5
        };
        let p = self.world(lo).lerp(self.world(hi), t);

        let id = self.points.len() as u32;
        self.points.push(p);
        self.edge_vertices.insert(key, id);
        id
    }

    fn tetrahedron(&mut self, corners: [[usize; 3]; 4]) {
        let mut inside = [0usize; 4];
        let mut outside = [0usize; 4];
        let (mut n_in, mut n_out) = (0, 0);
        for (slot, c) in corners.iter().enumerate() {
            if self.value(*c) > self.iso {
                inside[n_in] = slot;
                n_in += 1;
            } else {
                outside[n_out] = slot;
                n_out += 1;
            }
        }

        match n_in {
            1 => {
                let a = corners[inside[0]];
                let v = [
                    self.edge_vertex(a, corners[outside[0]]),
                    self.edge_vertex(a, corners[outside[1]]),
                    self.edge_vertex(a, corners[outside[2]]),
                ];
                self.triangles.push(v);
            }
            3 => {
                let o = corners[outside[0]];
                let v = [
                    self.edge_vertex(o, corners[inside[0]]),
                    self.edge_vertex(o, corners[inside[2]]),
                    self.edge_vertex(o, corners[inside[1]]),
                ];
                self.triangles.push(v);
            }
            2 => {
                let (a, b) = (corners[inside[0]], corners[inside[1]]);
                let (c, d) = (corners[outside[0]], corners[outside[1]]);
                let ac = self.edge_vertex(a, c);
                let ad = self.edge_vertex(a, d);
                let bd = self.edge_vertex(b, d);
                let bc = self.edge_vertex(b, c);
                self.triangles.push([ac, ad, bd]);
                self.triangles.push([ac, bd, bc]);
            }
            _ => {}
        }
    }
}

/// Extracts the surface where the volume crosses `iso`. Samples strictly above
/// `iso` are inside. Volumes thinner than two samples on any axis are rejected.
pub fn extract_isosurface(volume: &Volume, iso: f64) -> Result<Mesh> {
    let dims = volume.dimensions();
    if dims.iter().any(|&d| d < 2) {
        return Err(ViewerError::Geometry(format!(
            "cannot contour a volume of dimensions {:?}",
            dims
        )));
    }

    let mut ex = Extractor {
        volume,
        iso,
        dims,
        points: Vec::new(),
        triangles: Vec::new(),
        edge_vertices: HashMap::new(),
    };

    for k in 0..dims[2] - 1 {
        for j in 0..dims[1] - 1 {
            for i in 0..dims[0] - 1 {
                let cell = CORNERS.map(|o| [i + o[0], j + o[1], k + o[2]]);
                for tet in TETRAHEDRA {
                    ex.tetrahedron(tet.map(|c| cell[c]));
                }
            }
        }
    }

    debug!(
        "Iso-surface at {}: {} points, {} triangles",
        iso,
        ex.points.len(),
        ex.triangles.len()
    );
    Ok(Mesh::new(ex.points, ex.triangles))
}

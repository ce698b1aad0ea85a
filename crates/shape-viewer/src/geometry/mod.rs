//! Geometry handed to the renderer: triangle meshes, scalar volumes, bounds.
//!
//! Shapes are resolved once at load time into a [`ShapeSource`]; nothing
//! downstream inspects the kind of data again.

pub mod isosurface;

pub use self::isosurface::extract_isosurface;

use crate::error::{Result, ViewerError};
use glam::DVec3;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Axis-aligned bounds. An empty box has `min > max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: DVec3,
    pub max: DVec3,
}

impl Bounds {
    pub const EMPTY: Bounds = Bounds {
        min: DVec3::INFINITY,
        max: DVec3::NEG_INFINITY,
    };

    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    pub fn from_points<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a DVec3>,
    {
        let mut bounds = Self::EMPTY;
        for p in points {
            bounds.extend(*p);
        }
        bounds
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[inline]
    pub fn extend(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Bounds::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Grows the box by `amount` on every side.
    pub fn padded(&self, amount: f64) -> Bounds {
        if self.is_empty() {
            return *self;
        }
        Bounds::new(self.min - DVec3::splat(amount), self.max + DVec3::splat(amount))
    }

    #[inline]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn size(&self) -> DVec3 {
        if self.is_empty() {
            DVec3::ZERO
        } else {
            self.max - self.min
        }
    }

    #[inline]
    pub fn diagonal(&self) -> f64 {
        self.size().length()
    }

    pub fn corners(&self) -> [DVec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            DVec3::new(a.x, a.y, a.z),
            DVec3::new(b.x, a.y, a.z),
            DVec3::new(a.x, b.y, a.z),
            DVec3::new(b.x, b.y, a.z),
            DVec3::new(a.x, a.y, b.z),
            DVec3::new(b.x, a.y, b.z),
            DVec3::new(a.x, b.y, b.z),
            DVec3::new(b.x, b.y, b.z),
        ]
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Triangle mesh with named per-point arrays.
///
/// `revision` is bumped by [`Mesh::modified`]; renderers compare it to decide
/// whether point arrays (colors) must be re-uploaded.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub points: Vec<DVec3>,
    pub triangles: Vec<[u32; 3]>,
    pub point_arrays: BTreeMap<String, Vec<f64>>,
    /// Anatomical domain this shape belongs to.
    pub domain: Option<String>,
    revision: u64,
}

pub type SharedMesh = Rc<RefCell<Mesh>>;

impl Mesh {
    pub fn new(points: Vec<DVec3>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            points,
            triangles,
            ..Default::default()
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn into_shared(self) -> SharedMesh {
        Rc::new(RefCell::new(self))
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::from_points(&self.points)
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[inline]
    pub fn modified(&mut self) {
        self.revision += 1;
    }

    pub fn point_array(&self, name: &str) -> Option<&[f64]> {
        self.point_arrays.get(name).map(Vec::as_slice)
    }

    pub fn set_point_array(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.point_arrays.insert(name.into(), values);
    }

    /// Area-weighted vertex normals; isolated vertices get a zero normal.
    pub fn vertex_normals(&self) -> Vec<DVec3> {
        let mut normals = vec![DVec3::ZERO; self.points.len()];
        for (ti, tri) in self.triangles.iter().enumerate() {
            let Some([a, b, c]) = self.triangle(ti) else {
                continue;
            };
            let n = (b - a).cross(c - a);
            for &v in tri {
                normals[v as usize] += n;
            }
        }
        normals.iter().map(|n| n.normalize_or_zero()).collect()
    }

    pub fn triangle(&self, index: usize) -> Option<[DVec3; 3]> {
        let [a, b, c] = *self.triangles.get(index)?;
        Some([
            *self.points.get(a as usize)?,
            *self.points.get(b as usize)?,
            *self.points.get(c as usize)?,
        ])
    }
}

/// Scalar image on a regular grid. Indices are absolute (within `extent`),
/// world position is `origin + spacing * index`.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    extent: [[i64; 2]; 3],
    origin: DVec3,
    spacing: DVec3,
    scalars: Vec<f64>,
}

impl Volume {
    /// A volume whose extent starts at index 0 on every axis.
    pub fn new(dims: [usize; 3], origin: DVec3, spacing: DVec3, scalars: Vec<f64>) -> Result<Self> {
        let extent = dims.map(|d| [0, d as i64 - 1]);
        Self::with_extent(extent, origin, spacing, scalars)
    }

    pub fn with_extent(
        extent: [[i64; 2]; 3],
        origin: DVec3,
        spacing: DVec3,
        scalars: Vec<f64>,
    ) -> Result<Self> {
        if extent.iter().any(|[lo, hi]| hi < lo) {
            return Err(ViewerError::Geometry(format!("empty volume extent {:?}", extent)));
        }
        let volume = Self {
            extent,
            origin,
            spacing,
            scalars,
        };
        let expected: usize = volume.dimensions().iter().product();
        if volume.scalars.len() != expected {
            return Err(ViewerError::Geometry(format!(
                "volume has {} scalars, extent requires {}",
                volume.scalars.len(),
                expected
            )));
        }
        Ok(volume)
    }

    #[inline]
    pub fn extent(&self) -> [[i64; 2]; 3] {
        self.extent
    }

    #[inline]
    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    #[inline]
    pub fn spacing(&self) -> DVec3 {
        self.spacing
    }

    #[inline]
    pub fn scalars(&self) -> &[f64] {
        &self.scalars
    }

    pub fn dimensions(&self) -> [usize; 3] {
        self.extent.map(|[lo, hi]| (hi - lo + 1).max(0) as usize)
    }

    /// Scalar at grid offsets `(i, j, k)` relative to the extent start.
    pub fn value(&self, i: usize, j: usize, k: usize) -> f64 {
        let [nx, ny, _] = self.dimensions();
        self.scalars[i + nx * (j + ny * k)]
    }

    pub fn index_to_world(&self, index: [i64; 3]) -> DVec3 {
        self.origin + self.spacing * DVec3::new(index[0] as f64, index[1] as f64, index[2] as f64)
    }

    pub fn bounds(&self) -> Bounds {
        let lo = self.index_to_world(self.extent.map(|e| e[0]));
        let hi = self.index_to_world(self.extent.map(|e| e[1]));
        Bounds::new(lo.min(hi), lo.max(hi))
    }

    /// World bounds of a sub-extent.
    pub fn extent_bounds(&self, extent: [[i64; 2]; 3]) -> Bounds {
        let lo = self.index_to_world(extent.map(|e| e[0]));
        let hi = self.index_to_world(extent.map(|e| e[1]));
        Bounds::new(lo.min(hi), lo.max(hi))
    }

    /// `(min, max)` of the scalars; `(0, 0)` for an empty volume.
    pub fn scalar_range(&self) -> (f64, f64) {
        let mut iter = self.scalars.iter().copied().filter(|v| v.is_finite());
        let Some(first) = iter.next() else {
            return (0.0, 0.0);
        };
        iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)))
    }
}

/// A loaded shape, resolved once into one of the kinds the viewer can draw.
#[derive(Debug, Clone)]
pub enum ShapeSource {
    /// Already a surface.
    Surface(SharedMesh),
    /// Label map drawn through its cached iso-surface.
    Segmentation(Rc<Volume>),
    /// Intensity image drawn as a slice.
    Image(Rc<Volume>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_union_ignores_empty() {
        let a = Bounds::from_points(&[DVec3::ZERO, DVec3::ONE]);
        assert_eq!(a.union(&Bounds::EMPTY), a);
        assert_eq!(Bounds::EMPTY.union(&a), a);
        assert!(Bounds::EMPTY.is_empty());
        assert_eq!(a.center(), DVec3::splat(0.5));
    }

    #[test]
    fn volume_rejects_wrong_scalar_count() {
        let err = Volume::new([2, 2, 2], DVec3::ZERO, DVec3::ONE, vec![0.0; 7]).unwrap_err();
        assert!(matches!(err, ViewerError::Geometry(_)));
    }

    #[test]
    fn volume_bounds_follow_extent_and_spacing() {
        let volume = Volume::with_extent(
            [[0, 10], [2, 3], [0, 0]],
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.5, 2.0, 1.0),
            vec![0.0; 11 * 2],
        )
        .unwrap();
        let bounds = volume.bounds();
        assert_eq!(bounds.min, DVec3::new(1.0, 4.0, 0.0));
        assert_eq!(bounds.max, DVec3::new(6.0, 6.0, 0.0));
        assert_eq!(volume.dimensions(), [11, 2, 1]);
    }

    #[test]
    fn vertex_normals_of_a_flat_quad_point_up() {
        let mesh = Mesh::new(
            vec![DVec3::ZERO, DVec3::X, DVec3::new(1.0, 1.0, 0.0), DVec3::Y, DVec3::splat(9.0)],
            vec![[0, 1, 2], [0, 2, 3]],
        );
        let normals = mesh.vertex_normals();
        for n in &normals[..4] {
            assert!((*n - DVec3::Z).length() < 1e-12);
        }
        assert_eq!(normals[4], DVec3::ZERO);
    }

    #[test]
    fn scalar_range_of_volume() {
        let volume =
            Volume::new([2, 1, 1], DVec3::ZERO, DVec3::ONE, vec![-3.0, 12.0]).unwrap();
        assert_eq!(volume.scalar_range(), (-3.0, 12.0));
    }
}

//! Point index over 3D points, backed by an `rstar` R-tree.
//!
//! Distances are squared Euclidean throughout. Results are ordered by
//! `(distance_sq, index)`, so equidistant points come back in insertion order.

use glam::DVec3;
use rstar::primitives::GeomWithData;
use rstar::RTree;
use std::cmp::Ordering;
use std::fmt;

/// One query hit. `index` is the point's position in the build list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub position: DVec3,
    pub distance_sq: f64,
}

type IndexedPoint = GeomWithData<[f64; 3], usize>;

#[derive(Clone, Default)]
pub struct SpatialIndex {
    points: Vec<DVec3>,
    tree: RTree<IndexedPoint>,
}

impl fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("points", &self.points.len())
            .finish()
    }
}

#[inline]
fn closer(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance_sq
        .total_cmp(&b.distance_sq)
        .then(a.index.cmp(&b.index))
}

impl SpatialIndex {
    pub fn new(points: Vec<DVec3>) -> Self {
        let items: Vec<IndexedPoint> = points
            .iter()
            .enumerate()
            .map(|(index, p)| GeomWithData::new(p.to_array(), index))
            .collect();
        Self {
            points,
            tree: RTree::bulk_load(items),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[inline]
    pub fn points(&self) -> &[DVec3] {
        &self.points
    }

    fn hit(&self, index: usize, target: DVec3) -> Neighbor {
        let position = self.points[index];
        Neighbor {
            index,
            position,
            distance_sq: position.distance_squared(target),
        }
    }

    /// Up to `k` nearest points, optionally limited to `distance_sq <= max_distance_sq`.
    pub fn nearest(&self, target: DVec3, k: usize, max_distance_sq: Option<f64>) -> Vec<Neighbor> {
        if k == 0 || self.points.is_empty() {
            return Vec::new();
        }
        let limit = max_distance_sq.unwrap_or(f64::INFINITY);

        // The tree yields equidistant points in no fixed order, so the whole
        // band at the k-th distance is collected before sorting.
        let mut band: Option<f64> = None;
        let mut best = Vec::with_capacity(k.min(self.points.len()));
        for (item, distance_sq) in self.tree.nearest_neighbor_iter_with_distance_2(&target.to_array()) {
            if distance_sq > limit || band.map_or(false, |b| distance_sq > b) {
                break;
            }
            best.push(self.hit(item.data, target));
            if best.len() == k {
                band = Some(distance_sq);
            }
        }

        best.sort_by(closer);
        best.truncate(k);
        best
    }

    /// Every point with Euclidean distance `<= radius`.
    pub fn within_radius(&self, target: DVec3, radius: f64) -> Vec<Neighbor> {
        if radius < 0.0 {
            return Vec::new();
        }
        let r2 = radius * radius;
        let mut hits: Vec<Neighbor> = self
            .tree
            .locate_within_distance(target.to_array(), r2)
            .map(|item| self.hit(item.data, target))
            .filter(|n| n.distance_sq <= r2)
            .collect();
        hits.sort_by(closer);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force(points: &[DVec3], target: DVec3, k: usize) -> Vec<usize> {
        let mut all: Vec<Neighbor> = points
            .iter()
            .enumerate()
            .map(|(index, p)| Neighbor {
                index,
                position: *p,
                distance_sq: p.distance_squared(target),
            })
            .collect();
        all.sort_by(closer);
        all.into_iter().take(k).map(|n| n.index).collect()
    }

    fn lattice() -> Vec<DVec3> {
        let mut points = Vec::new();
        for z in 0..4 {
            for y in 0..5 {
                for x in 0..6 {
                    points.push(DVec3::new(x as f64, y as f64, z as f64));
                }
            }
        }
        // Duplicates exercise insertion-order ties.
        points.push(DVec3::new(2.0, 2.0, 2.0));
        points.push(DVec3::new(0.0, 0.0, 0.0));
        points
    }

    #[test]
    fn empty_index_answers_nothing() {
        let index = SpatialIndex::new(Vec::new());
        assert!(index.nearest(DVec3::ZERO, 3, None).is_empty());
        assert!(index.within_radius(DVec3::ZERO, 10.0).is_empty());
    }

    #[test]
    fn nearest_matches_brute_force_with_ties() {
        let points = lattice();
        let index = SpatialIndex::new(points.clone());
        let targets = [
            DVec3::new(2.0, 2.0, 2.0),
            DVec3::new(0.5, 0.5, 0.5),
            DVec3::new(2.5, 1.0, 3.0),
            DVec3::new(-1.0, 7.0, 1.5),
            DVec3::ZERO,
        ];
        for target in targets {
            for k in [1, 2, 5, 9] {
                let got: Vec<usize> = index.nearest(target, k, None).iter().map(|n| n.index).collect();
                assert_eq!(got, brute_force(&points, target, k), "target {:?} k {}", target, k);
            }
        }
    }

    #[test]
    fn exact_duplicate_resolves_to_first_inserted() {
        let points = vec![DVec3::X, DVec3::ZERO, DVec3::ZERO, DVec3::Y];
        let index = SpatialIndex::new(points);
        let hit = index.nearest(DVec3::new(0.0, 0.0, 0.1), 1, None);
        assert_eq!(hit[0].index, 1);
    }

    #[test]
    fn ties_at_the_cutoff_keep_insertion_order() {
        // Six points on the unit sphere around the origin, inserted out of axis order.
        let points = vec![
            DVec3::NEG_Z,
            DVec3::X,
            DVec3::new(5.0, 5.0, 5.0),
            DVec3::Y,
            DVec3::NEG_X,
            DVec3::Z,
            DVec3::NEG_Y,
        ];
        let index = SpatialIndex::new(points);
        let got: Vec<usize> = index.nearest(DVec3::ZERO, 3, None).iter().map(|n| n.index).collect();
        assert_eq!(got, vec![0, 1, 3]);

        let all: Vec<usize> = index.within_radius(DVec3::ZERO, 1.0).iter().map(|n| n.index).collect();
        assert_eq!(all, vec![0, 1, 3, 4, 5, 6]);
    }

    #[test]
    fn max_distance_is_squared() {
        let index = SpatialIndex::new(vec![DVec3::ZERO, DVec3::new(3.0, 0.0, 0.0)]);
        let hits = index.nearest(DVec3::ZERO, 5, Some(4.0));
        assert_eq!(hits.len(), 1);
        let hits = index.nearest(DVec3::ZERO, 5, Some(9.0));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].distance_sq, 9.0);
    }

    #[test]
    fn within_radius_is_euclidean_and_inclusive() {
        let points = lattice();
        let index = SpatialIndex::new(points.clone());
        let target = DVec3::new(2.0, 2.0, 1.0);
        let hits = index.within_radius(target, 1.0);
        let expected: Vec<usize> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.distance(target) <= 1.0)
            .map(|(i, _)| i)
            .collect();
        let mut got: Vec<usize> = hits.iter().map(|n| n.index).collect();
        assert_eq!(got[0], expected.iter().copied().find(|&i| points[i] == target).unwrap());
        got.sort_unstable();
        assert_eq!(got, expected);
    }
}

//! Per-point inclusion classification against plane and paint constraints.
//!
//! Every target point starts included. Constraints are applied in id order and
//! the first one that excludes a point decides it; later constraints never
//! re-include it. Paint constraints look up the nearest field point through a
//! spatial index built over the field and reuse it until the data is rewritten.

use super::model::AnnotationKey;
use crate::geometry::Mesh;
use crate::spatial::SpatialIndex;
use glam::DVec3;
use log::debug;
use shapeio::{ConstraintData, PaintField, EXCLUDED, INCLUDED};
use std::collections::HashMap;
use std::rc::Rc;

/// Point array the colorizer writes, read through the constraint lookup table.
pub const COLOR_ARRAY: &str = "color";

fn apply_constraint(values: &mut [u8], points: &[DVec3], data: &ConstraintData, field_index: Option<&SpatialIndex>) {
    match data {
        ConstraintData::Plane(plane) => {
            for (value, &p) in values.iter_mut().zip(points) {
                if *value == INCLUDED && plane.excludes(p) {
                    *value = EXCLUDED;
                }
            }
        }
        ConstraintData::Paint(field) => {
            let Some(index) = field_index else {
                return;
            };
            if field.len() != points.len() {
                debug!(
                    "Paint field covers {} points, target has {}",
                    field.len(),
                    points.len()
                );
            }
            for (value, &p) in values.iter_mut().zip(points) {
                if *value == EXCLUDED {
                    continue;
                }
                if let Some(hit) = index.nearest(p, 1, None).first() {
                    if field.scalars()[hit.index] == EXCLUDED {
                        *value = EXCLUDED;
                    }
                }
            }
        }
    }
}

fn field_index(field: &PaintField) -> SpatialIndex {
    SpatialIndex::new(field.points().to_vec())
}

/// One-shot classification without index caching.
pub fn classify_points(points: &[DVec3], constraints: &[&ConstraintData]) -> Vec<u8> {
    let mut values = vec![INCLUDED; points.len()];
    for data in constraints {
        let index = data.as_paint().map(field_index);
        apply_constraint(&mut values, points, data, index.as_ref());
    }
    values
}

#[derive(Debug, Default)]
pub struct ConstraintColorizer {
    field_indices: HashMap<AnnotationKey, Rc<SpatialIndex>>,
}

impl ConstraintColorizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_for(&mut self, key: AnnotationKey, field: &PaintField) -> Rc<SpatialIndex> {
        self.field_indices
            .entry(key)
            .or_insert_with(|| Rc::new(field_index(field)))
            .clone()
    }

    /// Inclusion values for `points`. `constraints` pairs each shown
    /// constraint id with its data and must be sorted by id.
    pub fn classify(
        &mut self,
        subject: &str,
        domain: &str,
        points: &[DVec3],
        constraints: &[(usize, &ConstraintData)],
    ) -> Vec<u8> {
        let mut values = vec![INCLUDED; points.len()];
        for &(id, data) in constraints {
            let index = data
                .as_paint()
                .map(|field| self.index_for(AnnotationKey::new(subject, domain, id), field));
            apply_constraint(&mut values, points, data, index.as_deref());
        }
        values
    }

    /// Writes the inclusion values into the mesh's [`COLOR_ARRAY`] and marks it
    /// modified. Returns the number of excluded points.
    pub fn colorize(
        &mut self,
        subject: &str,
        domain: &str,
        mesh: &mut Mesh,
        constraints: &[(usize, &ConstraintData)],
    ) -> usize {
        let values = self.classify(subject, domain, &mesh.points, constraints);
        let excluded = values.iter().filter(|&&v| v == EXCLUDED).count();
        mesh.set_point_array(COLOR_ARRAY, values.into_iter().map(f64::from).collect());
        mesh.modified();
        excluded
    }

    /// Drops the cached index of one constraint's field.
    pub fn invalidate(&mut self, key: &AnnotationKey) {
        self.field_indices.remove(key);
    }

    pub fn clear(&mut self) {
        self.field_indices.clear();
    }

    #[inline]
    pub fn cached_fields(&self) -> usize {
        self.field_indices.len()
    }
}

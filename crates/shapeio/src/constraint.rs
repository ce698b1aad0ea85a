//! Constraint geometry: half-space planes and painted inclusion fields.

use crate::{FormatError, Result};
use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scalar value marking a point as excluded from downstream processing.
pub const EXCLUDED: u8 = 0;
/// Scalar value marking a point as included.
pub const INCLUDED: u8 = 1;

/// Squared normal length below which a plane is rejected.
const MIN_NORMAL_LENGTH_SQ: f64 = 1e-24;

/// The closed set of constraint types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintKind {
    Plane,
    Paint,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConstraintKind::Plane => "plane",
            ConstraintKind::Paint => "paint",
        };

        f.write_str(s)
    }
}

impl FromStr for ConstraintKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plane" => Ok(ConstraintKind::Plane),
            "paint" => Ok(ConstraintKind::Paint),
            other => Err(format!("unknown constraint type '{}'", other)),
        }
    }
}

/// A half-space constraint. A point `p` is excluded when
/// `dot(normal, origin - p) <= 0`: on the plane, or on the side the normal
/// points toward.
///
/// The normal is validated at construction and never has zero length, so
/// classification against a `Plane` is always defined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    origin: DVec3,
    normal: DVec3,
}

impl Plane {
    pub fn new(origin: DVec3, normal: DVec3) -> Result<Self> {
        if !normal.is_finite() || normal.length_squared() < MIN_NORMAL_LENGTH_SQ {
            return Err(FormatError::ZeroNormal);
        }

        Ok(Self { origin, normal })
    }

    #[inline]
    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    /// The normal as stored; not necessarily unit length.
    #[inline]
    pub fn normal(&self) -> DVec3 {
        self.normal
    }

    #[inline]
    pub fn unit_normal(&self) -> DVec3 {
        self.normal.normalize()
    }

    /// `dot(normal, origin - p) <= 0`.
    #[inline]
    pub fn excludes(&self, p: DVec3) -> bool {
        self.normal.dot(self.origin - p) <= 0.0
    }

    /// Same plane with the normal reversed.
    pub fn flipped(&self) -> Self {
        Self {
            origin: self.origin,
            normal: -self.normal,
        }
    }
}

/// Painted inclusion field over a target shape's point set.
///
/// `points[i]` and `scalars[i]` describe the same target point; the two vectors
/// always have equal length and every scalar is [`EXCLUDED`] or [`INCLUDED`].
#[derive(Debug, Clone, PartialEq)]
pub struct PaintField {
    points: Vec<DVec3>,
    scalars: Vec<u8>,
}

impl PaintField {
    pub fn new(points: Vec<DVec3>, scalars: Vec<u8>) -> Result<Self> {
        if points.len() != scalars.len() {
            return Err(FormatError::FieldLengthMismatch {
                points: points.len(),
                scalars: scalars.len(),
            });
        }

        if let Some(&bad) = scalars.iter().find(|&&s| s != EXCLUDED && s != INCLUDED) {
            return Err(FormatError::InvalidScalar(bad));
        }

        Ok(Self { points, scalars })
    }

    /// A field covering `points` where every point carries `value`.
    pub fn uniform(points: Vec<DVec3>, value: bool) -> Self {
        let scalar = if value { INCLUDED } else { EXCLUDED };
        let scalars = vec![scalar; points.len()];
        Self { points, scalars }
    }

    #[inline]
    pub fn points(&self) -> &[DVec3] {
        &self.points
    }

    #[inline]
    pub fn scalars(&self) -> &[u8] {
        &self.scalars
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Sets the scalar of point `index`. Out-of-range indices are ignored and
    /// reported as `false`.
    pub fn set_included(&mut self, index: usize, included: bool) -> bool {
        match self.scalars.get_mut(index) {
            Some(slot) => {
                *slot = if included { INCLUDED } else { EXCLUDED };
                true
            }
            None => false,
        }
    }

    pub fn excluded_count(&self) -> usize {
        self.scalars.iter().filter(|&&s| s == EXCLUDED).count()
    }
}

/// Per (subject, domain, constraint id) payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintData {
    Plane(Plane),
    Paint(PaintField),
}

impl ConstraintData {
    pub fn kind(&self) -> ConstraintKind {
        match self {
            ConstraintData::Plane(_) => ConstraintKind::Plane,
            ConstraintData::Paint(_) => ConstraintKind::Paint,
        }
    }

    pub fn as_plane(&self) -> Option<&Plane> {
        match self {
            ConstraintData::Plane(plane) => Some(plane),
            ConstraintData::Paint(_) => None,
        }
    }

    pub fn as_paint(&self) -> Option<&PaintField> {
        match self {
            ConstraintData::Paint(field) => Some(field),
            ConstraintData::Plane(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_normal_is_rejected() {
        let err = Plane::new(DVec3::ZERO, DVec3::ZERO).unwrap_err();
        assert!(matches!(err, FormatError::ZeroNormal));
        assert!(Plane::new(DVec3::ZERO, DVec3::new(f64::NAN, 0.0, 1.0)).is_err());
    }

    #[test]
    fn plane_excludes_points_on_the_normal_side() {
        let plane = Plane::new(DVec3::ZERO, DVec3::Z).unwrap();
        assert!(plane.excludes(DVec3::new(0.0, 0.0, 1.0)));
        assert!(plane.excludes(DVec3::new(3.0, -2.0, 0.0)));
        assert!(!plane.excludes(DVec3::new(0.0, 0.0, -1.0)));
    }

    #[test]
    fn flipping_the_normal_reverses_every_off_plane_point() {
        let plane = Plane::new(DVec3::new(1.0, 2.0, 3.0), DVec3::new(0.3, -1.0, 0.5)).unwrap();
        let flipped = plane.flipped();
        let samples = [
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(5.0, -4.0, 2.0),
            DVec3::new(-3.0, 7.5, 1.0),
            DVec3::new(1.0, 3.0, 3.0),
        ];
        for p in samples {
            assert_ne!(plane.excludes(p), flipped.excludes(p), "point {:?}", p);
        }
    }

    #[test]
    fn paint_field_validates_lengths_and_values() {
        let points = vec![DVec3::ZERO, DVec3::X];
        assert!(matches!(
            PaintField::new(points.clone(), vec![1]),
            Err(FormatError::FieldLengthMismatch { points: 2, scalars: 1 })
        ));
        assert!(matches!(
            PaintField::new(points.clone(), vec![1, 2]),
            Err(FormatError::InvalidScalar(2))
        ));

        let mut field = PaintField::new(points, vec![1, 1]).unwrap();
        assert!(field.set_included(1, false));
        assert!(!field.set_included(9, false));
        assert_eq!(field.scalars(), &[1, 0]);
        assert_eq!(field.excluded_count(), 1);
    }

    #[test]
    fn kind_round_trips_through_text() {
        assert_eq!("Plane".parse::<ConstraintKind>().unwrap(), ConstraintKind::Plane);
        assert_eq!(ConstraintKind::Paint.to_string(), "paint");
        assert!("lasso".parse::<ConstraintKind>().is_err());
    }
}

//! JSON constraint files: parsing with per-record recovery, and writing.

use crate::constraint::{ConstraintData, PaintField, Plane};
use crate::{FormatError, Result};
use glam::DVec3;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// One constraint read from (or destined for) a subject's constraint file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintRecord {
    pub domain: Option<String>,
    pub name: Option<String>,
    pub data: ConstraintData,
}

// --- On-disk layout ---

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileRoot {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    planes: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    paint: Vec<Value>,
}

/// Domains appear both as strings and as bare indices in the wild.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum DomainTag {
    Text(String),
    Index(u64),
}

impl DomainTag {
    fn into_string(self) -> String {
        match self {
            DomainTag::Text(s) => s,
            DomainTag::Index(i) => i.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PlaneEntry {
    points: Vec<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    domain: Option<DomainTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FieldEntry {
    points: Vec<[f64; 3]>,
    scalars: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PaintEntry {
    field: FieldEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    domain: Option<DomainTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

/// Derives a plane from three points: `normal = (p2 - p3) x (p1 - p2)`,
/// `origin = p1`. Collinear points yield [`FormatError::ZeroNormal`].
pub fn plane_from_points(points: [DVec3; 3]) -> Result<Plane> {
    let [p1, p2, p3] = points;
    let v1 = p2 - p3;
    let v2 = p1 - p2;
    Plane::new(p1, v1.cross(v2))
}

/// Inverse of [`plane_from_points`]: three coplanar points whose re-derived
/// normal points the same way as `plane.normal()`.
///
/// The in-plane vectors are `v1 = n x a` (with `a` the coordinate axis least
/// aligned with `n`) and `v2 = n x v1`; emitting `origin, origin + v2,
/// origin + v1` makes the re-derived normal `v1 x v2 = |v1|^2 n`.
pub fn plane_to_points(plane: &Plane) -> [DVec3; 3] {
    let n = plane.unit_normal();
    let abs = n.abs();
    let axis = if abs.x <= abs.y && abs.x <= abs.z {
        DVec3::X
    } else if abs.y <= abs.z {
        DVec3::Y
    } else {
        DVec3::Z
    };

    let v1 = n.cross(axis).normalize();
    let v2 = n.cross(v1);
    let origin = plane.origin();

    [origin, origin + v2, origin + v1]
}

fn to_dvec(p: &[f64; 3]) -> DVec3 {
    DVec3::from_array(*p)
}

fn parse_plane_entry(value: Value) -> Result<ConstraintRecord> {
    let entry: PlaneEntry = serde_json::from_value(value)?;
    if entry.points.len() != 3 {
        return Err(FormatError::Parse {
            line: 0,
            msg: format!("plane record has {} points, expected 3", entry.points.len()),
        });
    }

    let plane = plane_from_points([
        to_dvec(&entry.points[0]),
        to_dvec(&entry.points[1]),
        to_dvec(&entry.points[2]),
    ])?;

    Ok(ConstraintRecord {
        domain: entry.domain.map(DomainTag::into_string),
        name: entry.name,
        data: ConstraintData::Plane(plane),
    })
}

fn parse_paint_entry(value: Value) -> Result<ConstraintRecord> {
    let entry: PaintEntry = serde_json::from_value(value)?;
    let points = entry.field.points.iter().map(to_dvec).collect();
    let field = PaintField::new(points, entry.field.scalars)?;

    Ok(ConstraintRecord {
        domain: entry.domain.map(DomainTag::into_string),
        name: entry.name,
        data: ConstraintData::Paint(field),
    })
}

/// Parses a constraint file. A document that is not valid JSON is an error;
/// individual malformed records are skipped.
pub fn parse_constraints_str(text: &str) -> Result<Vec<ConstraintRecord>> {
    let root: FileRoot = serde_json::from_str(text)?;
    let mut records = Vec::with_capacity(root.planes.len() + root.paint.len());

    for (index, value) in root.planes.into_iter().enumerate() {
        match parse_plane_entry(value) {
            Ok(record) => records.push(record),
            Err(err) => warn!("Skipping plane record {}: {}", index, err),
        }
    }

    for (index, value) in root.paint.into_iter().enumerate() {
        match parse_paint_entry(value) {
            Ok(record) => records.push(record),
            Err(err) => warn!("Skipping paint record {}: {}", index, err),
        }
    }

    debug!("Parsed {} constraint records", records.len());
    Ok(records)
}

pub fn read_constraints_file<P: AsRef<Path>>(path: P) -> Result<Vec<ConstraintRecord>> {
    let text = fs::read_to_string(path)?;
    parse_constraints_str(&text)
}

/// Serializes records into the constraint file layout. Planes are written as
/// three points (see [`plane_to_points`]).
pub fn constraints_to_string(records: &[ConstraintRecord]) -> Result<String> {
    let mut root = FileRoot::default();

    for record in records {
        let domain = record.domain.clone().map(DomainTag::Text);
        let name = record.name.clone();

        match &record.data {
            ConstraintData::Plane(plane) => {
                let points = plane_to_points(plane).map(|p| p.to_array()).to_vec();
                root.planes
                    .push(serde_json::to_value(PlaneEntry { points, domain, name })?);
            }
            ConstraintData::Paint(field) => {
                let entry = PaintEntry {
                    field: FieldEntry {
                        points: field.points().iter().map(|p| p.to_array()).collect(),
                        scalars: field.scalars().to_vec(),
                    },
                    domain,
                    name,
                };
                root.paint.push(serde_json::to_value(entry)?);
            }
        }
    }

    Ok(serde_json::to_string_pretty(&root)?)
}

pub fn write_constraints_file<P: AsRef<Path>>(path: P, records: &[ConstraintRecord]) -> Result<()> {
    let text = constraints_to_string(records)?;
    fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConstraintKind;

    const EPS: f64 = 1e-9;

    #[test]
    fn three_axis_points_give_z_normal() {
        let plane = plane_from_points([DVec3::ZERO, DVec3::X, DVec3::Y]).unwrap();
        assert_eq!(plane.origin(), DVec3::ZERO);
        let n = plane.unit_normal();
        assert!(n.x.abs() < EPS && n.y.abs() < EPS);
        assert!((n.z.abs() - 1.0).abs() < EPS);

        assert!(plane.excludes(DVec3::new(0.0, 0.0, -1.0)));
        assert!(!plane.excludes(DVec3::new(0.0, 0.0, 1.0)));
    }

    #[test]
    fn collinear_points_are_rejected() {
        let err = plane_from_points([DVec3::ZERO, DVec3::X, DVec3::X * 2.0]).unwrap_err();
        assert!(matches!(err, FormatError::ZeroNormal));
    }

    #[test]
    fn plane_survives_three_point_round_trip() {
        let normals = [
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, -2.0, 0.0),
            DVec3::new(1.0, 1.0, 0.0),
            DVec3::new(-0.3, 0.8, -0.2),
        ];
        for normal in normals {
            let plane = Plane::new(DVec3::new(4.0, -1.5, 2.25), normal).unwrap();
            let back = plane_from_points(plane_to_points(&plane)).unwrap();

            assert!((back.origin() - plane.origin()).length() < EPS);
            assert!(
                (back.unit_normal() - plane.unit_normal()).length() < 1e-9,
                "normal {:?} came back as {:?}",
                normal,
                back.normal()
            );
        }
    }

    #[test]
    fn malformed_records_are_skipped() {
        let text = r#"{
            "planes": [
                { "points": [[0,0,0],[1,0,0]] },
                { "points": [[0,0,0],[1,0,0],[0,1,0]], "domain": 1, "name": "floor" },
                { "points": [[0,0,0],[1,0,0],[2,0,0]] },
                { "nonsense": true }
            ],
            "paint": [
                { "field": { "points": [[0,0,0],[1,1,1]], "scalars": [1] } },
                { "field": { "points": [[0,0,0],[1,1,1]], "scalars": [1, 0] }, "domain": "0" }
            ]
        }"#;

        let records = parse_constraints_str(text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data.kind(), ConstraintKind::Plane);
        assert_eq!(records[0].domain.as_deref(), Some("1"));
        assert_eq!(records[0].name.as_deref(), Some("floor"));
        assert_eq!(records[1].data.kind(), ConstraintKind::Paint);
        assert_eq!(records[1].data.as_paint().unwrap().scalars(), &[1, 0]);
    }

    #[test]
    fn invalid_document_is_an_error() {
        assert!(matches!(parse_constraints_str("{ planes: "), Err(FormatError::Json(_))));
    }

    #[test]
    fn written_file_reads_back() {
        let plane = Plane::new(DVec3::new(1.0, 2.0, 3.0), DVec3::new(0.0, 1.0, 1.0)).unwrap();
        let field = PaintField::new(vec![DVec3::ZERO, DVec3::ONE], vec![0, 1]).unwrap();
        let records = vec![
            ConstraintRecord {
                domain: Some("0".into()),
                name: Some("cut".into()),
                data: ConstraintData::Plane(plane),
            },
            ConstraintRecord {
                domain: None,
                name: None,
                data: ConstraintData::Paint(field.clone()),
            },
        ];

        let text = constraints_to_string(&records).unwrap();
        let back = parse_constraints_str(&text).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].name.as_deref(), Some("cut"));
        let back_plane = back[0].data.as_plane().unwrap();
        assert!((back_plane.unit_normal() - plane.unit_normal()).length() < EPS);
        assert_eq!(back[1].data.as_paint(), Some(&field));
    }
}

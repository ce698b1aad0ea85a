//! SHAPEIO: annotation file formats shared by the viewer and the batch tools.
//!
//! - Particle files: plain text, one point per line, whitespace-separated `x y z`.
//!   Blank lines are ignored; any other malformed line is an error.
//! - Mask files: plain text, one `0` or `1` per line (0 = excluded, 1 = included).
//! - Constraint files: JSON, per subject.
//!
//! Constraint file layout:
//!
//! ```text
//! {
//!   "planes": [ { "points": [[x,y,z],[x,y,z],[x,y,z]], "domain"?: "0", "name"?: "..." } ],
//!   "paint":  [ { "field": { "points": [[x,y,z], ...], "scalars": [0|1, ...] },
//!                 "domain"?: "0", "name"?: "..." } ]
//! }
//! ```
//!
//! A plane record is exactly three points. The normal is derived as
//! `(p2 - p3) x (p1 - p2)` and the origin is `p1`. A paint record carries one
//! scalar per point of the target shape. Malformed records are skipped with a
//! warning, the remainder of the file is still read.

pub mod constraint;
pub mod constraints_file;
pub mod points;

pub use constraint::{ConstraintData, ConstraintKind, PaintField, Plane, EXCLUDED, INCLUDED};
pub use constraints_file::{
    constraints_to_string, parse_constraints_str, plane_from_points, plane_to_points, read_constraints_file,
    write_constraints_file, ConstraintRecord,
};
pub use points::{parse_mask, parse_points, read_points_file, write_mask_file, write_points_file};

use thiserror::Error;

/// Errors raised while reading or writing annotation files.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("line {line}: {msg}")]
    Parse { line: usize, msg: String },

    #[error("plane normal has zero length")]
    ZeroNormal,

    #[error("paint field has {points} points but {scalars} scalars")]
    FieldLengthMismatch { points: usize, scalars: usize },

    #[error("paint scalar {0} is not 0 or 1")]
    InvalidScalar(u8),
}

pub type Result<T> = std::result::Result<T, FormatError>;

//! Particle (`x y z` per line) and mask (`0|1` per line) text files.

use crate::constraint::{EXCLUDED, INCLUDED};
use crate::{FormatError, Result};
use glam::DVec3;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// Parses a particle file. Lines are 1-based in errors.
pub fn parse_points(text: &str) -> Result<Vec<DVec3>> {
    let mut points = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut coords = [0.0f64; 3];
        let mut count = 0;
        for token in line.split_whitespace() {
            if count == 3 {
                return Err(FormatError::Parse {
                    line: i + 1,
                    msg: "more than three coordinates".into(),
                });
            }
            coords[count] = token.parse().map_err(|_| FormatError::Parse {
                line: i + 1,
                msg: format!("'{}' is not a number", token),
            })?;
            count += 1;
        }

        if count != 3 {
            return Err(FormatError::Parse {
                line: i + 1,
                msg: format!("expected 3 coordinates, found {}", count),
            });
        }

        points.push(DVec3::from_array(coords));
    }

    Ok(points)
}

pub fn read_points_file<P: AsRef<Path>>(path: P) -> Result<Vec<DVec3>> {
    let text = fs::read_to_string(path)?;
    parse_points(&text)
}

pub fn write_points_file<P: AsRef<Path>>(path: P, points: &[DVec3]) -> Result<()> {
    let mut out = String::with_capacity(points.len() * 32);
    for p in points {
        // Writing to a String cannot fail.
        let _ = writeln!(out, "{} {} {}", p.x, p.y, p.z);
    }
    fs::write(path, out)?;
    Ok(())
}

/// Parses a mask file into per-point inclusion flags (`true` = included).
pub fn parse_mask(text: &str) -> Result<Vec<bool>> {
    let mut mask = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let value: u8 = line.parse().map_err(|_| FormatError::Parse {
            line: i + 1,
            msg: format!("'{}' is not a mask value", line),
        })?;
        match value {
            EXCLUDED => mask.push(false),
            INCLUDED => mask.push(true),
            other => return Err(FormatError::InvalidScalar(other)),
        }
    }

    Ok(mask)
}

pub fn write_mask_file<P: AsRef<Path>>(path: P, mask: &[bool]) -> Result<()> {
    let mut out = String::with_capacity(mask.len() * 2);
    for &included in mask {
        out.push(if included { '1' } else { '0' });
        out.push('\n');
    }
    fs::write(path, out)?;
    Ok(())
}

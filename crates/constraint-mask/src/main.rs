use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use shape_viewer::annotation::classify_points;
use shapeio::{
    read_constraints_file, read_points_file, write_constraints_file, write_mask_file,
    ConstraintData, EXCLUDED,
};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Instant,
};
use walkdir::WalkDir;

/// Extension of particle files.
const PARTICLES_EXT: &str = "particles";

#[derive(Parser, Debug, Clone)]
#[command(name = "constraint-mask", version)]
/// Classifies every subject's particles against its plane and paint
/// constraints and writes one inclusion mask (1 = included) per subject.
struct Args {
    #[arg(long, env = "CONSTRAINT_MASK_INPUT", default_value = "subjects")]
    input_dir: String,

    #[arg(long, env = "CONSTRAINT_MASK_OUTPUT", default_value = "masks")]
    output_dir: String,

    /// Only apply constraints of this domain; records without a domain
    /// belong to domain "0".
    #[arg(long, env = "CONSTRAINT_MASK_DOMAIN")]
    domain: Option<String>,

    #[arg(long, env = "CONSTRAINT_MASK_OVERWRITE", default_value_t = false)]
    overwrite: bool,

    /// Also rewrite each subject's constraints, with planes re-emitted from
    /// their origin and normal, as `<subject>_constraints.json` in the output
    /// directory.
    #[arg(long, env = "CONSTRAINT_MASK_NORMALIZE", default_value_t = false)]
    normalize: bool,

    /// Optional JSON summary of excluded counts per subject.
    #[arg(long, env = "CONSTRAINT_MASK_REPORT")]
    report: Option<String>,
}

/// A subject with both a particle file and a constraint file.
#[derive(Debug, Clone)]
struct WorkItem {
    subject: String,
    particles: PathBuf,
    constraints: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
struct SubjectSummary {
    points: usize,
    constraints: usize,
    excluded: usize,
}

/// Constraint file of a particle file: `<stem>_constraints.json`, else
/// `<stem>.json`, next to it.
fn constraints_path(particles: &Path) -> Option<PathBuf> {
    let stem = particles.file_stem()?.to_str()?;
    let dir = particles.parent().unwrap_or_else(|| Path::new("."));
    [format!("{}_constraints.json", stem), format!("{}.json", stem)]
        .into_iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

fn find_work_items(input_dir: &str) -> Vec<WorkItem> {
    let mut items = Vec::new();

    for entry in WalkDir::new(input_dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();

        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        if ext != PARTICLES_EXT {
            continue;
        }

        let Some(subject) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
            continue;
        };
        match constraints_path(&path) {
            Some(constraints) => items.push(WorkItem {
                subject,
                particles: path,
                constraints,
            }),
            None => debug!("No constraints for {}", path.display()),
        }
    }

    items
}

fn process_subject(item: &WorkItem, args: &Args) -> Result<Option<SubjectSummary>> {
    let out_path = Path::new(&args.output_dir).join(format!("{}.mask", item.subject));
    if out_path.exists() && !args.overwrite {
        debug!("Skipping existing file: {}", out_path.display());
        return Ok(None);
    }

    let points = read_points_file(&item.particles)
        .with_context(|| format!("reading particles {}", item.particles.display()))?;
    let records = read_constraints_file(&item.constraints)
        .with_context(|| format!("reading constraints {}", item.constraints.display()))?;

    let selected: Vec<&ConstraintData> = records
        .iter()
        .filter(|r| match &args.domain {
            Some(domain) => r.domain.as_deref().unwrap_or("0") == domain,
            None => true,
        })
        .map(|r| &r.data)
        .collect();

    let values = classify_points(&points, &selected);
    let mask: Vec<bool> = values.iter().map(|&v| v != EXCLUDED).collect();
    write_mask_file(&out_path, &mask).with_context(|| format!("writing {}", out_path.display()))?;

    if args.normalize {
        let normalized =
            Path::new(&args.output_dir).join(format!("{}_constraints.json", item.subject));
        write_constraints_file(&normalized, &records)
            .with_context(|| format!("writing {}", normalized.display()))?;
        debug!("Normalized {} record(s) into {}", records.len(), normalized.display());
    }

    let summary = SubjectSummary {
        points: points.len(),
        constraints: selected.len(),
        excluded: mask.iter().filter(|&&m| !m).count(),
    };
    info!(
        "{}: {} of {} point(s) excluded by {} constraint(s)",
        item.subject, summary.excluded, summary.points, summary.constraints
    );
    Ok(Some(summary))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir))?;

    let started = Instant::now();
    let items = find_work_items(&args.input_dir);
    info!("Processing {} subject(s)...", items.len());

    let results: Vec<(String, Option<SubjectSummary>)> = items
        .par_iter()
        .filter_map(|item| match process_subject(item, &args) {
            Ok(summary) => Some((item.subject.clone(), summary)),
            Err(err) => {
                warn!("Error processing {}: {:#}", item.subject, err);
                None
            }
        })
        .collect();

    let written: BTreeMap<String, SubjectSummary> = results
        .into_iter()
        .filter_map(|(subject, summary)| summary.map(|s| (subject, s)))
        .collect();

    if let Some(report) = &args.report {
        let text = serde_json::to_string_pretty(&written)?;
        fs::write(report, text).with_context(|| format!("writing report {}", report))?;
    }

    info!(
        "Wrote {} mask(s) in {:.2?}",
        written.len(),
        started.elapsed()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;
    use shapeio::{parse_mask, write_points_file};

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("constraint-mask-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn args(input: &Path, output: &Path) -> Args {
        Args {
            input_dir: input.to_string_lossy().into_owned(),
            output_dir: output.to_string_lossy().into_owned(),
            domain: None,
            overwrite: false,
            normalize: false,
            report: None,
        }
    }

    #[test]
    fn only_subjects_with_constraints_are_processed() {
        let dir = scratch("pairing");
        write_points_file(dir.join("a.particles"), &[]).unwrap();
        write_points_file(dir.join("b.particles"), &[]).unwrap();
        fs::write(dir.join("a_constraints.json"), "{}").unwrap();

        let items = find_work_items(dir.to_str().unwrap());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].subject, "a");
        assert_eq!(items[0].constraints, dir.join("a_constraints.json"));
    }

    #[test]
    fn three_point_plane_excludes_points_below_it() {
        let dir = scratch("plane");
        let out = dir.join("out");
        fs::create_dir_all(&out).unwrap();
        write_points_file(
            dir.join("s.particles"),
            &[DVec3::new(0.0, 0.0, -1.0), DVec3::new(0.0, 0.0, 1.0)],
        )
        .unwrap();
        fs::write(
            dir.join("s.json"),
            r#"{ "planes": [ { "points": [[0,0,0],[1,0,0],[0,1,0]] } ] }"#,
        )
        .unwrap();

        let items = find_work_items(dir.to_str().unwrap());
        let summary = process_subject(&items[0], &args(&dir, &out)).unwrap().unwrap();
        assert_eq!(summary.excluded, 1);

        let mask = parse_mask(&fs::read_to_string(out.join("s.mask")).unwrap()).unwrap();
        assert_eq!(mask, vec![false, true]);

        // Existing masks are kept unless overwriting.
        assert!(process_subject(&items[0], &args(&dir, &out)).unwrap().is_none());
    }

    #[test]
    fn normalized_constraints_classify_the_same() {
        let dir = scratch("normalize");
        let out = dir.join("out");
        fs::create_dir_all(&out).unwrap();
        let points = [DVec3::new(0.5, 0.5, -2.0), DVec3::new(0.5, 0.5, 3.0)];
        write_points_file(dir.join("s.particles"), &points).unwrap();
        fs::write(
            dir.join("s_constraints.json"),
            r#"{ "planes": [ { "points": [[0,0,0],[1,0,0],[0,1,0]], "domain": "0" } ] }"#,
        )
        .unwrap();

        let items = find_work_items(dir.to_str().unwrap());
        let mut a = args(&dir, &out);
        a.normalize = true;
        process_subject(&items[0], &a).unwrap().unwrap();

        let original = read_constraints_file(dir.join("s_constraints.json")).unwrap();
        let normalized = read_constraints_file(out.join("s_constraints.json")).unwrap();
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].domain.as_deref(), Some("0"));

        let before: Vec<&ConstraintData> = original.iter().map(|r| &r.data).collect();
        let after: Vec<&ConstraintData> = normalized.iter().map(|r| &r.data).collect();
        assert_eq!(classify_points(&points, &before), classify_points(&points, &after));
    }
}

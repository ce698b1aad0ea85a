//! Annotation definitions and per-subject annotation data.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use shapeio::ConstraintKind;
use std::collections::BTreeMap;
use std::fmt;

/// Dataset-wide landmark definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkInfo {
    pub id: usize,
    pub name: String,
    pub color: [u8; 3],
    pub domain: String,
    /// Number of subjects with this landmark placed.
    #[serde(default)]
    pub num_set: usize,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Dataset-wide constraint definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintInfo {
    pub id: usize,
    #[serde(rename = "type")]
    pub kind: ConstraintKind,
    pub domain: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub num_set: usize,
}

/// Addresses one annotation of one subject's shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnotationKey {
    pub subject: String,
    pub domain: String,
    pub id: usize,
}

impl AnnotationKey {
    pub fn new(subject: impl Into<String>, domain: impl Into<String>, id: usize) -> Self {
        Self {
            subject: subject.into(),
            domain: domain.into(),
            id,
        }
    }

    pub fn with_id(&self, id: usize) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }
}

impl fmt::Display for AnnotationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.subject, self.domain, self.id)
    }
}

/// The interactive widget kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WidgetKind {
    Seed,
    Plane,
    Paint,
}

/// Identity of a widget inside a viewport's interaction manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WidgetId {
    pub kind: WidgetKind,
    pub key: AnnotationKey,
}

/// Which annotation list a placement request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationTarget {
    Landmark,
    Constraint,
}

/// Values nested as subject -> domain -> id.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationStore<T> {
    entries: BTreeMap<String, BTreeMap<String, BTreeMap<usize, T>>>,
}

impl<T> Default for AnnotationStore<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> AnnotationStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &AnnotationKey) -> Option<&T> {
        self.entries.get(&key.subject)?.get(&key.domain)?.get(&key.id)
    }

    pub fn get_mut(&mut self, key: &AnnotationKey) -> Option<&mut T> {
        self.entries
            .get_mut(&key.subject)?
            .get_mut(&key.domain)?
            .get_mut(&key.id)
    }

    pub fn insert(&mut self, key: AnnotationKey, value: T) -> Option<T> {
        self.entries
            .entry(key.subject)
            .or_default()
            .entry(key.domain)
            .or_default()
            .insert(key.id, value)
    }

    pub fn remove(&mut self, key: &AnnotationKey) -> Option<T> {
        let domains = self.entries.get_mut(&key.subject)?;
        let ids = domains.get_mut(&key.domain)?;
        let removed = ids.remove(&key.id);
        if ids.is_empty() {
            domains.remove(&key.domain);
        }
        if domains.is_empty() {
            self.entries.remove(&key.subject);
        }
        removed
    }

    /// Entries of one (subject, domain), ordered by id.
    pub fn domain_entries(&self, subject: &str, domain: &str) -> Option<&BTreeMap<usize, T>> {
        self.entries.get(subject)?.get(domain)
    }

    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AnnotationKey, &T)> {
        self.entries.iter().flat_map(|(subject, domains)| {
            domains.iter().flat_map(move |(domain, ids)| {
                ids.iter()
                    .map(move |(&id, v)| (AnnotationKey::new(subject.clone(), domain.clone(), id), v))
            })
        })
    }

    pub fn len(&self) -> usize {
        self.entries
            .values()
            .flat_map(|d| d.values())
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of subjects holding a value for `(domain, id)`.
    pub fn subjects_with(&self, domain: &str, id: usize) -> usize {
        self.entries
            .values()
            .filter(|domains| domains.get(domain).map_or(false, |ids| ids.contains_key(&id)))
            .count()
    }

    /// Re-keys every entry through `mapping` (old id -> new id). Entries whose
    /// id is not in the mapping are dropped.
    pub fn remap_ids(&mut self, mapping: &BTreeMap<usize, usize>) {
        for domains in self.entries.values_mut() {
            for ids in domains.values_mut() {
                let old = std::mem::take(ids);
                *ids = old
                    .into_iter()
                    .filter_map(|(id, v)| mapping.get(&id).map(|&new_id| (new_id, v)))
                    .collect();
            }
            domains.retain(|_, ids| !ids.is_empty());
        }
        self.entries.retain(|_, domains| !domains.is_empty());
    }
}

/// Entries of a definition list carrying a renumberable id.
pub trait Numbered {
    fn id(&self) -> usize;
    fn set_id(&mut self, id: usize);
}

impl Numbered for LandmarkInfo {
    fn id(&self) -> usize {
        self.id
    }

    fn set_id(&mut self, id: usize) {
        self.id = id;
    }
}

impl Numbered for ConstraintInfo {
    fn id(&self) -> usize {
        self.id
    }

    fn set_id(&mut self, id: usize) {
        self.id = id;
    }
}

/// Removes the entry with `id` and renumbers the survivors `0..n` in list
/// order. Returns the old -> new id mapping of the survivors, or `None` when
/// no entry had that id.
pub fn delete_and_renumber<T: Numbered>(list: &mut Vec<T>, id: usize) -> Option<BTreeMap<usize, usize>> {
    let position = list.iter().position(|e| e.id() == id)?;
    list.remove(position);

    let mut mapping = BTreeMap::new();
    for (new_id, entry) in list.iter_mut().enumerate() {
        mapping.insert(entry.id(), new_id);
        entry.set_id(new_id);
    }
    Some(mapping)
}

/// Recomputes every landmark's `num_set` from the placements.
pub fn recount_landmarks(info: &mut [LandmarkInfo], placements: &AnnotationStore<DVec3>) {
    for entry in info {
        entry.num_set = placements.subjects_with(&entry.domain, entry.id);
    }
}

/// Recomputes every constraint's `num_set` from the stored data.
pub fn recount_constraints<T>(info: &mut [ConstraintInfo], data: &AnnotationStore<T>) {
    for entry in info {
        entry.num_set = data.subjects_with(&entry.domain, entry.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landmark(id: usize, name: &str) -> LandmarkInfo {
        LandmarkInfo {
            id,
            name: name.into(),
            color: [255, 0, 0],
            domain: "0".into(),
            num_set: 0,
            comment: None,
        }
    }

    #[test]
    fn deleting_a_middle_landmark_remaps_placements() {
        let mut info = vec![landmark(0, "tip"), landmark(1, "base"), landmark(2, "notch")];
        let mut placements = AnnotationStore::new();
        for subject in ["a", "b"] {
            for id in 0..3 {
                placements.insert(AnnotationKey::new(subject, "0", id), DVec3::splat(id as f64));
            }
        }

        let mapping = delete_and_renumber(&mut info, 1).unwrap();
        placements.remap_ids(&mapping);

        assert_eq!(info.iter().map(|l| l.id).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(info[1].name, "notch");
        for subject in ["a", "b"] {
            assert_eq!(placements.get(&AnnotationKey::new(subject, "0", 0)), Some(&DVec3::ZERO));
            assert_eq!(
                placements.get(&AnnotationKey::new(subject, "0", 1)),
                Some(&DVec3::splat(2.0))
            );
            assert!(placements.get(&AnnotationKey::new(subject, "0", 2)).is_none());
        }
        assert_eq!(placements.len(), 4);
    }

    #[test]
    fn deleting_an_unknown_id_changes_nothing() {
        let mut info = vec![landmark(0, "tip")];
        assert!(delete_and_renumber(&mut info, 4).is_none());
        assert_eq!(info.len(), 1);
    }

    #[test]
    fn num_set_counts_subjects() {
        let mut info = vec![landmark(0, "tip"), landmark(1, "base")];
        let mut placements = AnnotationStore::new();
        placements.insert(AnnotationKey::new("a", "0", 0), DVec3::ZERO);
        placements.insert(AnnotationKey::new("b", "0", 0), DVec3::ONE);
        placements.insert(AnnotationKey::new("b", "1", 1), DVec3::ONE);

        recount_landmarks(&mut info, &placements);
        assert_eq!(info[0].num_set, 2);
        assert_eq!(info[1].num_set, 0);
    }

    #[test]
    fn removing_the_last_entry_prunes_empty_maps() {
        let mut store = AnnotationStore::new();
        let key = AnnotationKey::new("a", "0", 3);
        store.insert(key.clone(), 1u8);
        assert_eq!(store.remove(&key), Some(1));
        assert!(store.is_empty());
        assert_eq!(store.subjects().count(), 0);
    }

    #[test]
    fn constraint_info_reads_type_field() {
        let info: ConstraintInfo =
            serde_json::from_str(r#"{ "id": 2, "type": "paint", "domain": "1" }"#).unwrap();
        assert_eq!(info.kind, ConstraintKind::Paint);
        assert_eq!(info.name, None);
    }
}

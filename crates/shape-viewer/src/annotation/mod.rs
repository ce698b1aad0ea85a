//! Landmarks and constraints: their definitions, per-subject data, the
//! inclusion colorizer and the interactive widgets that edit them.

pub mod colorize;
pub mod model;
pub mod widgets;

pub use self::colorize::{classify_points, ConstraintColorizer, COLOR_ARRAY};
pub use self::model::{
    delete_and_renumber, recount_constraints, recount_landmarks, AnnotationKey, AnnotationStore,
    AnnotationTarget, ConstraintInfo, LandmarkInfo, Numbered, WidgetId, WidgetKind,
};
pub use self::widgets::{
    AnnotationWidgetManager, Commit, PaintMode, PaintWidget, Placement, PlaneWidget, SeedWidget,
    WidgetHandle, WidgetPhase, WidgetSettings,
};

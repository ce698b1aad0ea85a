// src/lib.rs
//! Shape viewer annotation engine.
//!
//! Control logic that sits between user interaction, annotation data and a
//! rendering backend for a grid of per-subject viewports:
//! - `spatial`: R-tree nearest-neighbour queries.
//! - `cache` / `geometry`: meshes, volumes, iso-surface extraction and its cache.
//! - `annotation`: landmark/constraint model, inclusion colorizer, widgets.
//! - `viewport` / `sync` / `camera`: viewport registry and delta-based camera sync.
//! - `slice`: image slice axis, window/level, crop and cutting planes.
//! - `compose`: grid construction and the imperative entry points.
//!
//! The renderer itself is behind the `backend::Renderer` trait; the
//! `HeadlessRenderer` keeps everything in memory.

pub mod annotation;
pub mod backend;
pub mod cache;
pub mod camera;
pub mod compose;
pub mod config;
pub mod error;
pub mod geometry;
pub mod reactive;
pub mod slice;
pub mod spatial;
pub mod sync;
pub mod viewport;

pub use compose::SceneComposer;
pub use config::ViewerConfig;
pub use error::{Result, ViewerError};

//! # ddrescue-rs — block-level data recovery engine
//!
//! Copies a source byte-addressable region to a destination while tolerating
//! read errors, persisting progress to a mapfile so an interrupted run can
//! resume and later passes can concentrate on the bytes still unread.
//!
//! - The rescue domain is mutated only through [`status_map::StatusMap`]'s
//!   `change_chunk_status`/`split_sblock_by`/`truncate_vector` — individual
//!   `Sblock`s are never held onto by callers.
//! - Passes run in a fixed order: bulk copy, trim, scrape, retry (see
//!   [`rescue::RescueEngine::run`]).
//! - The mapfile format is line-oriented text; see [`status_map::mapfile`].

pub mod block;
pub mod cli;
pub mod diagnostics;
pub mod domain;
pub mod fill;
pub mod generate;
pub mod io_primitives;
pub mod loggers;
pub mod numfmt;
pub mod rescue;
pub mod status_map;
pub mod status_view;

pub use block::{Block, PassState, Sblock, Status, MAX};
pub use cli::{Mode, RescueArgs};
pub use domain::Domain;
pub use rescue::{EngineStatus, RescueEngine, RescueError, RescueOptions, RescueReport};
pub use status_map::{StatusMap, StatusMapError};

//! Refresh and resampling pipeline behind the oceanographic sensor dashboard.
//!
//! Data flow, one cycle:
//! [`Scheduler`] says a refresh is due → [`Source`] queries the store since a
//! cutoff (bucketing natively or through [`resample()`]) → [`cache::refresh`]
//! merges into the [`CacheState`] → [`RefreshLoop`] publishes a [`Snapshot`]
//! that renderers read through a [`DashboardHandle`].
//!
//! Module layout follows the Explicit Module Boundary Pattern (EMBP): each
//! module exports a narrow surface, re-exported here so sibling modules and
//! binaries depend on the crate root rather than on each other's internals.

pub mod cache;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod generator;
pub mod models;
pub mod resample;
pub mod routes;
pub mod scheduler;
pub mod schema;
pub mod store;
pub mod summary;
pub mod telemetry;

pub use cache::{CacheState, RefreshMode, RefreshReport, View};
pub use config::{Config, ConfigLayer};
pub use dashboard::{DashboardHandle, RefreshLoop, Snapshot, Status, ViewUpdate};
pub use error::{PipelineError, PipelineResult};
pub use generator::Generator;
pub use models::{Column, Reading, TimeSeries};
pub use resample::{resample, BucketWidth, Resample};
pub use scheduler::{Clock, ManualClock, Scheduler, SystemClock};
pub use store::{open_sink, open_store, Backend, Cutoff, ReadingSink, ReadingStore, Source};

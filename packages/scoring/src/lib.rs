#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Scoring for geocoder results.
//!
//! Two concerns live here:
//! - [`proximity`] folds a feature's intrinsic score with its distance from
//!   the caller's proximity point, weighted by the index's zoom level.
//! - [`ceiling`] caps indexes whose score scale is far out of line with
//!   the rest of the stack.

pub mod ceiling;
pub mod proximity;

pub use ceiling::ScoreCeiling;
pub use geostack_models::distance::{haversine_km, haversine_miles};
pub use proximity::{PROXIMITY_RADIUS_MILES, score_dist, tile_for_point};

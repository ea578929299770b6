//! OpenDRIVE Map Library - Road network compiler and lane graph queries
//!
//! This library turns an OpenDRIVE (`.xodr`) document into an immutable [`Map`]: continuous
//! reference lines reconstructed from piecewise geometry, lane sections with width profiles,
//! lane-level connectivity across roads and junctions, and a quadtree spatial index for
//! point queries.
//!
//! # Architecture
//!
//! - **[`GeometrySegment`]**: Closed set of parametric primitives evaluated by arc length
//! - **[`ReferenceLine`]**: Contiguous chain of segments plus elevation/superelevation overlays
//! - **[`LaneSection`]**: Lanes of constant count along a stretch of road, with width polynomials
//! - **[`Road`]** and **[`Junction`]**: Owned road network elements, links stored as ids
//! - **[`Quadtree`]**: Spatial index over sampled road traces, built per road and merged
//! - **[`Map`]**: Assembled network, entry points for [`Waypoint`] queries
//!
//! # Compilation
//!
//! Parsing is delegated to `roxmltree`. Per-road construction runs on the rayon pool, then
//! lane links are resolved in a single sequential pass. Any failure aborts the whole
//! compilation: either a complete [`Map`] is returned or nothing.
//!
//! ```no_run
//! let text = std::fs::read_to_string("town.xodr").unwrap();
//! let map = opendrive_map::Map::from_xodr(&text).unwrap();
//! if let Some(wp) = map.waypoint_at(1, -1, 5.0) {
//!     for next in wp.next_waypoints(10.0) {
//!         println!("{next:?}");
//!     }
//! }
//! ```

mod config;
mod connectivity;
mod geometry;
mod junction;
mod lane;
mod map;
mod parser;
mod polynomial;
mod query;
mod quadtree;
mod reference_line;
mod road;
mod waypoint;

#[cfg(test)]
mod fixtures;

// Public API exports
pub use config::MapConfig;
pub use geometry::{GeometryKind, GeometrySegment, ParamRange, Pose2};
pub use junction::{Connection, Junction, LaneLinkRecord};
pub use lane::{
    Lane, LaneChangeRule, LaneLink, LaneSection, LaneSpeed, LaneType, RoadMark, RoadMarkColor,
    RoadMarkKind,
};
pub use map::{Map, MapHeader, MapSummary};
pub use polynomial::{Cubic, PiecewiseCubic};
pub use quadtree::{Quadtree, TraceHit};
pub use reference_line::{ReferenceLine, ReferencePoint};
pub use road::{ContactPoint, ElementType, LanePose, Road, RoadLink, SpeedRecord};
pub use waypoint::{LaneChange, TravelDirection, Waypoint};

/// Road identifier as declared in the document.
pub type RoadId = u32;
/// Junction identifier as declared in the document.
pub type JunctionId = u32;
/// Signed lane identifier: positive to the left of the reference line, negative to the right,
/// zero for the center lane.
pub type LaneId = i32;

/// Compile a document, logging and discarding the error on failure.
///
/// Use [`Map::from_xodr`] to inspect the failure instead.
pub fn compile(text: &str) -> Option<Map> {
    match Map::from_xodr(text) {
        Ok(map) => Some(map),
        Err(err) => {
            tracing::error!("OpenDRIVE compilation failed: {err}");
            None
        }
    }
}

/// Error types for map compilation
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("XML parsing error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Missing element <{element}> in {context}")]
    MissingElement { element: String, context: String },

    #[error("Missing attribute '{attribute}' on <{element}>")]
    MissingAttribute { element: String, attribute: String },

    #[error("Invalid value '{value}' for attribute '{attribute}' on <{element}>")]
    InvalidAttribute {
        element: String,
        attribute: String,
        value: String,
    },

    #[error("Road {road}: {reason}")]
    NonContiguousGeometry { road: RoadId, reason: String },

    #[error("Road {road}: lane {lane} has negative width {width:.4} at s={s:.3}")]
    NegativeLaneWidth {
        road: RoadId,
        lane: LaneId,
        s: f64,
        width: f64,
    },

    #[error("Road {road}: invalid lane layout: {reason}")]
    InvalidLaneLayout { road: RoadId, reason: String },

    #[error("Duplicate road id {0}")]
    DuplicateRoad(RoadId),

    #[error("Duplicate junction id {0}")]
    DuplicateJunction(JunctionId),

    #[error("{context} references undefined road {road}")]
    UnresolvedRoad { road: RoadId, context: String },

    #[error("{context} references undefined junction {junction}")]
    UnresolvedJunction { junction: JunctionId, context: String },

    #[error("{context} references lane {lane} missing from road {road}")]
    UnresolvedLane {
        road: RoadId,
        lane: LaneId,
        context: String,
    },

    #[error("Merge mismatch: {reason}")]
    MergeMismatch { reason: String },
}

pub type Result<T> = std::result::Result<T, MapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        let _: fn(&str) -> Result<Map> = Map::from_xodr;
        let _: fn(&str) -> Option<Map> = compile;
        let _: fn() -> MapConfig = MapConfig::default;
    }

    #[test]
    fn test_compile_returns_none_on_failure() {
        assert!(compile("<not-closed").is_none());
        assert!(compile("<OpenDRIVE></OpenDRIVE>").is_some());
    }
}

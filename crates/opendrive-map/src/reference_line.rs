//! Road reference line: contiguous chain of geometry segments with vertical overlays

use crate::geometry::GeometrySegment;
use crate::polynomial::PiecewiseCubic;
use crate::{MapError, Result, RoadId};
use geo::{Coord, Rect};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Full pose of the reference line at one arc length
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReferencePoint {
    pub s: f64,
    pub position: Coord<f64>,
    /// Height from the elevation profile
    pub z: f64,
    pub heading: f64,
    pub curvature: f64,
    /// Longitudinal slope angle from the elevation profile
    pub pitch: f64,
    /// Superelevation angle (roll about the reference line)
    pub roll: f64,
    /// Lateral shift of the lane center line (laneOffset)
    pub lane_offset: f64,
}

impl ReferencePoint {
    /// Unit normal pointing to the left of the heading.
    pub fn left_normal(&self) -> Coord<f64> {
        let (sin, cos) = self.heading.sin_cos();
        Coord { x: -sin, y: cos }
    }

    /// Planar point `t` meters to the left (negative: right) of the reference line.
    pub fn lateral(&self, t: f64) -> Coord<f64> {
        let n = self.left_normal();
        Coord {
            x: self.position.x + t * n.x,
            y: self.position.y + t * n.y,
        }
    }
}

/// Continuous reference curve of a single road
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReferenceLine {
    segments: Vec<GeometrySegment>,
    length: f64,
    elevation: PiecewiseCubic,
    superelevation: PiecewiseCubic,
    lane_offset: PiecewiseCubic,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ReferenceLine {
    /// Build a reference line, checking that `segments` tile `[0, length]`.
    ///
    /// Zero-length segments are dropped. Any gap, overlap or ordering problem larger than
    /// `tolerance` rejects the road.
    pub fn new(
        road: RoadId,
        length: f64,
        segments: Vec<GeometrySegment>,
        elevation: PiecewiseCubic,
        superelevation: PiecewiseCubic,
        lane_offset: PiecewiseCubic,
        tolerance: f64,
    ) -> Result<Self> {
        let fail = |reason: String| MapError::NonContiguousGeometry { road, reason };

        if !(length.is_finite() && length > 0.0) {
            return Err(fail(format!("invalid road length {length}")));
        }

        let mut kept: Vec<GeometrySegment> = Vec::with_capacity(segments.len());
        let mut cursor = 0.0;
        for (i, segment) in segments.into_iter().enumerate() {
            if !(segment.length.is_finite() && segment.length >= 0.0) {
                return Err(fail(format!(
                    "geometry {i} has invalid length {}",
                    segment.length
                )));
            }
            let placed = [segment.s, segment.start.x, segment.start.y, segment.heading];
            if placed.iter().any(|v| !v.is_finite()) {
                return Err(fail(format!(
                    "geometry {i} has non-finite placement (s={}, x={}, y={}, hdg={})",
                    segment.s, segment.start.x, segment.start.y, segment.heading
                )));
            }
            let end = segment.eval(segment.length);
            let finite = [end.position.x, end.position.y, end.heading];
            if finite.iter().any(|v| !v.is_finite()) {
                return Err(fail(format!("geometry {i} has non-finite parameters")));
            }
            if (segment.s - cursor).abs() > tolerance {
                return Err(fail(format!(
                    "geometry {i} starts at s={:.6} but previous geometry ends at s={cursor:.6}",
                    segment.s
                )));
            }
            cursor = segment.end_s();
            if segment.length > 0.0 {
                kept.push(segment);
            } else {
                tracing::debug!("Road {road}: dropping zero-length geometry {i}");
            }
        }

        if kept.is_empty() {
            return Err(fail("no geometry with positive length".to_string()));
        }
        if (cursor - length).abs() > tolerance {
            return Err(fail(format!(
                "geometry ends at s={cursor:.6} but road length is {length:.6}"
            )));
        }

        Ok(Self {
            segments: kept,
            length,
            elevation,
            superelevation,
            lane_offset,
        })
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn segments(&self) -> &[GeometrySegment] {
        &self.segments
    }

    /// Lateral shift of the lane center line at `s`.
    pub fn lane_offset(&self, s: f64) -> f64 {
        self.lane_offset.value(s)
    }

    /// Index of the segment owning `s` (binary search over start offsets).
    fn segment_index(&self, s: f64) -> usize {
        self.segments
            .partition_point(|g| g.s <= s)
            .saturating_sub(1)
    }

    /// Evaluate the reference line at road offset `s`, clamped to `[0, length]`.
    pub fn evaluate(&self, s: f64) -> ReferencePoint {
        let s = s.clamp(0.0, self.length);
        let segment = &self.segments[self.segment_index(s)];
        let pose = segment.eval(s - segment.s);
        ReferencePoint {
            s,
            position: pose.position,
            z: self.elevation.value(s),
            heading: pose.heading,
            curvature: pose.curvature,
            pitch: self.elevation.slope(s).atan(),
            roll: self.superelevation.value(s),
            lane_offset: self.lane_offset.value(s),
        }
    }

    /// Arc lengths `0, step, 2·step, ..., length` (the end is always included).
    pub fn sample_offsets(&self, step: f64) -> Vec<f64> {
        sample_range(0.0, self.length, step)
    }

    /// Bounding box of the line widened by `margin` on every side.
    pub fn bounding_box(&self, step: f64, margin: f64) -> Rect<f64> {
        let mut min = Coord {
            x: f64::INFINITY,
            y: f64::INFINITY,
        };
        let mut max = Coord {
            x: f64::NEG_INFINITY,
            y: f64::NEG_INFINITY,
        };
        for s in self.sample_offsets(step) {
            let p = self.evaluate(s).position;
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Rect::new(
            Coord {
                x: min.x - margin,
                y: min.y - margin,
            },
            Coord {
                x: max.x + margin,
                y: max.y + margin,
            },
        )
    }
}

/// Offsets from `start` to `end` every `step`, always ending exactly at `end`.
pub(crate) fn sample_range(start: f64, end: f64, step: f64) -> Vec<f64> {
    if end <= start {
        return vec![start];
    }
    let count = ((end - start) / step).ceil() as usize;
    let mut offsets: Vec<f64> = (0..count).map(|i| start + i as f64 * step).collect();
    offsets.push(end);
    offsets
}

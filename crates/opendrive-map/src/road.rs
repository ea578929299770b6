//! Roads: reference line, lane sections and road-level links

use crate::lane::{Lane, LaneSection};
use crate::reference_line::{ReferenceLine, sample_range};
use crate::{JunctionId, LaneId, MapConfig, MapError, Result, RoadId};
use geo::{Coord, Rect};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// End of a road (or lane) a link attaches to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ContactPoint {
    /// The s = 0 end
    Start,
    /// The s = length end
    End,
}

impl ContactPoint {
    /// `"end"` maps to `End`, anything else to `Start`.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("end") {
            ContactPoint::End
        } else {
            ContactPoint::Start
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            ContactPoint::Start => ContactPoint::End,
            ContactPoint::End => ContactPoint::Start,
        }
    }
}

/// Kind of element a road link points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ElementType {
    Road,
    Junction,
}

/// `<predecessor>` / `<successor>` of a road
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RoadLink {
    pub element_type: ElementType,
    pub element_id: u32,
    /// Only meaningful for road elements
    pub contact_point: Option<ContactPoint>,
}

/// Speed limit in force from `s` onwards
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpeedRecord {
    pub s: f64,
    /// Road type name (`town`, `motorway`, ...)
    pub road_type: String,
    /// Maximum speed in m/s, if declared
    pub max_speed: Option<f64>,
}

/// Position and orientation on a lane center line
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LanePose {
    pub position: Coord<f64>,
    pub z: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    /// Signed lateral distance from the reference line (positive to the left)
    pub t: f64,
}

/// Raw lane section as declared in the document
#[derive(Debug, Clone)]
pub(crate) struct SectionRecord {
    pub s: f64,
    pub lanes: Vec<Lane>,
}

/// Everything needed to build one road, as read from the document
#[derive(Debug, Clone)]
pub(crate) struct RoadRecord {
    pub id: RoadId,
    pub name: String,
    pub length: f64,
    pub junction: Option<JunctionId>,
    pub predecessor: Option<RoadLink>,
    pub successor: Option<RoadLink>,
    pub geometry: Vec<crate::GeometrySegment>,
    pub elevation: crate::PiecewiseCubic,
    pub superelevation: crate::PiecewiseCubic,
    pub lane_offset: crate::PiecewiseCubic,
    pub sections: Vec<SectionRecord>,
    pub speeds: Vec<SpeedRecord>,
}

/// A road of the network
#[derive(Debug, Clone)]
pub struct Road {
    id: RoadId,
    name: String,
    length: f64,
    junction: Option<JunctionId>,
    predecessor: Option<RoadLink>,
    successor: Option<RoadLink>,
    reference_line: ReferenceLine,
    pub(crate) sections: Vec<LaneSection>,
    speeds: Vec<SpeedRecord>,
    bounding_box: Rect<f64>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Road {
    /// Build the reference line and lane sections of one road.
    ///
    /// Independent of every other road, so roads can be built in parallel.
    pub(crate) fn build(record: RoadRecord, config: &MapConfig) -> Result<Self> {
        #[cfg(feature = "profiling")]
        profiling::scope!("road::build");

        let RoadRecord {
            id,
            name,
            length,
            junction,
            predecessor,
            successor,
            geometry,
            elevation,
            superelevation,
            lane_offset,
            mut sections,
            mut speeds,
        } = record;

        let reference_line = ReferenceLine::new(
            id,
            length,
            geometry,
            elevation,
            superelevation,
            lane_offset,
            config.geometry_tolerance,
        )?;

        if sections.is_empty() {
            return Err(MapError::InvalidLaneLayout {
                road: id,
                reason: "road has no lane sections".to_string(),
            });
        }
        sections.sort_by(|a, b| a.s.total_cmp(&b.s));
        if sections[0].s.abs() > config.geometry_tolerance {
            return Err(MapError::InvalidLaneLayout {
                road: id,
                reason: format!("first lane section starts at s={}", sections[0].s),
            });
        }
        let last_start = sections[sections.len() - 1].s;
        if last_start > length + config.geometry_tolerance {
            return Err(MapError::InvalidLaneLayout {
                road: id,
                reason: format!("lane section at s={last_start} is beyond road length {length}"),
            });
        }

        let starts: Vec<f64> = sections.iter().map(|sec| sec.s.clamp(0.0, length)).collect();
        let built = sections
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                let s_start = starts[index];
                let s_end = starts.get(index + 1).copied().unwrap_or(length);
                LaneSection::new(id, index, s_start, s_end, record.lanes, config.step())
            })
            .collect::<Result<Vec<_>>>()?;

        speeds.sort_by(|a, b| a.s.total_cmp(&b.s));

        let mut road = Self {
            id,
            name,
            length,
            junction,
            predecessor,
            successor,
            reference_line,
            sections: built,
            speeds,
            bounding_box: Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }),
        };
        road.bounding_box = road.compute_bounding_box(config.step());
        tracing::debug!(
            "Road {id} built: length {length:.2}, {} geometries, {} lane sections",
            road.reference_line.segments().len(),
            road.sections.len()
        );
        Ok(road)
    }

    pub fn id(&self) -> RoadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    /// Junction this road belongs to (connecting roads only)
    pub fn junction(&self) -> Option<JunctionId> {
        self.junction
    }

    pub fn predecessor(&self) -> Option<&RoadLink> {
        self.predecessor.as_ref()
    }

    pub fn successor(&self) -> Option<&RoadLink> {
        self.successor.as_ref()
    }

    /// Road link at the given end.
    pub fn link_at(&self, end: ContactPoint) -> Option<&RoadLink> {
        match end {
            ContactPoint::Start => self.predecessor.as_ref(),
            ContactPoint::End => self.successor.as_ref(),
        }
    }

    pub fn reference_line(&self) -> &ReferenceLine {
        &self.reference_line
    }

    pub fn sections(&self) -> &[LaneSection] {
        &self.sections
    }

    pub fn section(&self, index: usize) -> Option<&LaneSection> {
        self.sections.get(index)
    }

    /// Section index at the given end of the road.
    pub fn section_index_at_end(&self, end: ContactPoint) -> usize {
        match end {
            ContactPoint::Start => 0,
            ContactPoint::End => self.sections.len().saturating_sub(1),
        }
    }

    /// Index of the section covering `s` (the later one on shared boundaries).
    pub fn section_index(&self, s: f64) -> usize {
        self.sections
            .partition_point(|sec| sec.s_start() <= s)
            .saturating_sub(1)
    }

    pub fn speed_records(&self) -> &[SpeedRecord] {
        &self.speeds
    }

    /// Speed limit in force at `s`, in m/s.
    pub fn speed_limit(&self, s: f64) -> Option<f64> {
        let idx = self.speeds.partition_point(|r| r.s <= s);
        self.speeds.get(idx.checked_sub(1)?)?.max_speed
    }

    /// Bounding box of the paved area (outermost lane edges).
    pub fn bounding_box(&self) -> Rect<f64> {
        self.bounding_box
    }

    /// Pose on the center line of `lane` in section `section` at road offset `s`.
    pub fn lane_pose(&self, section: usize, lane: LaneId, s: f64) -> Option<LanePose> {
        let sec = self.sections.get(section)?;
        Some(self.pose_on(sec, sec.lane(lane)?, s))
    }

    /// Pose on the center line of a lane of this road; `s` is clamped to the section.
    pub(crate) fn pose_on(&self, section: &LaneSection, lane: &Lane, s: f64) -> LanePose {
        let s = s.clamp(section.s_start(), section.s_end());
        let point = self.reference_line.evaluate(s);

        let id = lane.id();
        let t = point.lane_offset + id.signum() as f64 * section.lateral_offset(id, s);
        let roll = if lane.is_level() { 0.0 } else { point.roll };
        LanePose {
            position: point.lateral(t),
            z: point.z + t * roll.tan(),
            yaw: point.heading,
            pitch: point.pitch,
            roll,
            t,
        }
    }

    /// Signed lateral positions `(left edge, right edge)` of the paved area at `s`.
    pub fn edges(&self, s: f64) -> (f64, f64) {
        let sec = &self.sections[self.section_index(s)];
        let offset = self.reference_line.lane_offset(s);
        (
            offset + sec.side_width(true, s),
            offset - sec.side_width(false, s),
        )
    }

    /// Largest distance between the reference line and a lane edge at `s`.
    pub fn lateral_extent(&self, s: f64) -> f64 {
        let (left, right) = self.edges(s);
        left.abs().max(right.abs())
    }

    fn compute_bounding_box(&self, step: f64) -> Rect<f64> {
        let mut min = Coord {
            x: f64::INFINITY,
            y: f64::INFINITY,
        };
        let mut max = Coord {
            x: f64::NEG_INFINITY,
            y: f64::NEG_INFINITY,
        };
        for s in sample_range(0.0, self.length, step) {
            let point = self.reference_line.evaluate(s);
            let (left, right) = self.edges(s);
            for p in [point.lateral(left), point.lateral(right)] {
                min.x = min.x.min(p.x);
                min.y = min.y.min(p.y);
                max.x = max.x.max(p.x);
                max.y = max.y.max(p.y);
            }
        }
        Rect::new(min, max)
    }
}

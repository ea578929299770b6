//! Lanes and lane sections
//!
//! A lane section holds the lanes of one stretch of road, ordered from the center outwards on
//! each side. Lateral offsets are derived from the width polynomials of inner lanes.

use crate::polynomial::PiecewiseCubic;
use crate::road::ContactPoint;
use crate::{LaneId, MapError, Result, RoadId};
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lane usage category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LaneType {
    #[default]
    None,
    Driving,
    Stop,
    Shoulder,
    Biking,
    Sidewalk,
    Border,
    Restricted,
    Parking,
    Bidirectional,
    Median,
    Special1,
    Special2,
    Special3,
    RoadWorks,
    Tram,
    Rail,
    Entry,
    Exit,
    OffRamp,
    OnRamp,
}

impl LaneType {
    /// Case-insensitive mapping of the `type` attribute. Unknown names map to `None`.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "driving" => Self::Driving,
            "stop" => Self::Stop,
            "shoulder" => Self::Shoulder,
            "biking" => Self::Biking,
            "sidewalk" => Self::Sidewalk,
            "border" => Self::Border,
            "restricted" => Self::Restricted,
            "parking" => Self::Parking,
            "bidirectional" => Self::Bidirectional,
            "median" => Self::Median,
            "special1" => Self::Special1,
            "special2" => Self::Special2,
            "special3" => Self::Special3,
            "roadworks" => Self::RoadWorks,
            "tram" => Self::Tram,
            "rail" => Self::Rail,
            "entry" => Self::Entry,
            "exit" => Self::Exit,
            "offramp" => Self::OffRamp,
            "onramp" => Self::OnRamp,
            _ => Self::None,
        }
    }
}

/// Style of a lane border line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RoadMarkKind {
    #[default]
    None,
    Solid,
    Broken,
    SolidSolid,
    SolidBroken,
    BrokenSolid,
    BrokenBroken,
    BottsDots,
    Grass,
    Curb,
    Custom,
    Edge,
}

impl RoadMarkKind {
    /// Case-insensitive mapping of the `type` attribute, `None` when unknown.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "solid" => Self::Solid,
            "broken" => Self::Broken,
            "solid solid" => Self::SolidSolid,
            "solid broken" => Self::SolidBroken,
            "broken solid" => Self::BrokenSolid,
            "broken broken" => Self::BrokenBroken,
            "botts dots" => Self::BottsDots,
            "grass" => Self::Grass,
            "curb" => Self::Curb,
            "custom" => Self::Custom,
            "edge" => Self::Edge,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RoadMarkColor {
    /// `standard`, usually white
    #[default]
    Standard,
    White,
    Yellow,
    Blue,
    Green,
    Red,
    Orange,
    Black,
    Violet,
}

impl RoadMarkColor {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "standard" => Self::Standard,
            "white" => Self::White,
            "yellow" => Self::Yellow,
            "blue" => Self::Blue,
            "green" => Self::Green,
            "red" => Self::Red,
            "orange" => Self::Orange,
            "black" => Self::Black,
            "violet" => Self::Violet,
            _ => return None,
        })
    }
}

/// Lane changes permitted across a border, in terms of lane ids.
///
/// `Increase` allows moving to the lane with the larger id, `Decrease` to the smaller one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LaneChangeRule {
    None,
    Increase,
    Decrease,
    #[default]
    Both,
}

impl LaneChangeRule {
    /// Case-insensitive mapping of the `laneChange` attribute. Unknown values allow both ways.
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "increase" => Self::Increase,
            "decrease" => Self::Decrease,
            _ => Self::Both,
        }
    }

    /// Whether the border may be crossed towards larger (`true`) or smaller lane ids.
    pub fn permits(self, increasing: bool) -> bool {
        match self {
            Self::None => false,
            Self::Both => true,
            Self::Increase => increasing,
            Self::Decrease => !increasing,
        }
    }
}

/// Marking on the outer border of a lane, in force from `s_offset` onwards
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RoadMark {
    /// Offset from the section start
    pub s_offset: f64,
    pub kind: RoadMarkKind,
    pub color: RoadMarkColor,
    pub width: Option<f64>,
    pub lane_change: LaneChangeRule,
}

/// Lane-level speed limit in force from `s_offset` onwards, overriding the road's
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneSpeed {
    /// Offset from the section start
    pub s_offset: f64,
    /// Maximum speed in m/s, `None` for no limit
    pub max_speed: Option<f64>,
}

/// Last record whose offset is at or before `ds`.
fn record_at<T>(records: &[T], ds: f64, offset: impl Fn(&T) -> f64) -> Option<&T> {
    let idx = records.partition_point(|r| offset(r) <= ds);
    records.get(idx.checked_sub(1)?)
}

/// Resolved connection to a lane of the same or another road.
///
/// `contact` tells which end of the target lane is attached: entering at `Start` continues
/// towards increasing s, entering at `End` continues towards decreasing s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneLink {
    pub road: RoadId,
    pub section: usize,
    pub lane: LaneId,
    pub contact: ContactPoint,
}

pub(crate) type LaneLinks = SmallVec<[LaneLink; 2]>;

/// A single lane of a lane section
#[derive(Debug, Clone)]
pub struct Lane {
    id: LaneId,
    lane_type: LaneType,
    level: bool,
    /// Width records keyed by offset from the section start
    width: PiecewiseCubic,
    road_marks: Vec<RoadMark>,
    speeds: Vec<LaneSpeed>,
    /// Declared lane links (ids only, resolved during connectivity)
    pub(crate) declared_predecessor: Option<LaneId>,
    pub(crate) declared_successor: Option<LaneId>,
    /// Lanes attached at the end with the larger s
    pub(crate) successors: LaneLinks,
    /// Lanes attached at the end with the smaller s
    pub(crate) predecessors: LaneLinks,
}

impl Lane {
    pub fn new(
        id: LaneId,
        lane_type: LaneType,
        level: bool,
        width: PiecewiseCubic,
        predecessor: Option<LaneId>,
        successor: Option<LaneId>,
    ) -> Self {
        Self {
            id,
            lane_type,
            level,
            width,
            road_marks: Vec::new(),
            speeds: Vec::new(),
            declared_predecessor: predecessor,
            declared_successor: successor,
            successors: SmallVec::new(),
            predecessors: SmallVec::new(),
        }
    }

    /// Attach border markings; later records at the same offset win.
    pub fn with_road_marks(mut self, mut marks: Vec<RoadMark>) -> Self {
        marks.sort_by(|a, b| a.s_offset.total_cmp(&b.s_offset));
        self.road_marks = marks;
        self
    }

    /// Attach lane speed limits; later records at the same offset win.
    pub fn with_speeds(mut self, mut speeds: Vec<LaneSpeed>) -> Self {
        speeds.sort_by(|a, b| a.s_offset.total_cmp(&b.s_offset));
        self.speeds = speeds;
        self
    }

    pub fn id(&self) -> LaneId {
        self.id
    }

    pub fn lane_type(&self) -> LaneType {
        self.lane_type
    }

    /// Level lanes keep a flat cross-section and ignore superelevation.
    pub fn is_level(&self) -> bool {
        self.level
    }

    /// Width at `ds` meters from the section start, never negative.
    pub fn width(&self, ds: f64) -> f64 {
        if self.id == 0 {
            return 0.0;
        }
        self.width.value(ds).max(0.0)
    }

    pub fn road_marks(&self) -> &[RoadMark] {
        &self.road_marks
    }

    /// Marking of the outer border at `ds` meters from the section start.
    pub fn road_mark(&self, ds: f64) -> Option<&RoadMark> {
        record_at(&self.road_marks, ds, |m| m.s_offset)
    }

    pub fn speeds(&self) -> &[LaneSpeed] {
        &self.speeds
    }

    /// Lane speed record in force at `ds` meters from the section start.
    pub fn speed(&self, ds: f64) -> Option<&LaneSpeed> {
        record_at(&self.speeds, ds, |r| r.s_offset)
    }

    /// Links at the larger-s end of the lane.
    pub fn successors(&self) -> &[LaneLink] {
        &self.successors
    }

    /// Links at the smaller-s end of the lane.
    pub fn predecessors(&self) -> &[LaneLink] {
        &self.predecessors
    }

    /// Links attached at the given end of the lane.
    pub fn links_at(&self, end: ContactPoint) -> &[LaneLink] {
        match end {
            ContactPoint::Start => &self.predecessors,
            ContactPoint::End => &self.successors,
        }
    }

    pub(crate) fn links_at_mut(&mut self, end: ContactPoint) -> &mut LaneLinks {
        match end {
            ContactPoint::Start => &mut self.predecessors,
            ContactPoint::End => &mut self.successors,
        }
    }

    /// Add a link unless an identical one is already present.
    pub(crate) fn attach(&mut self, end: ContactPoint, link: LaneLink) {
        let links = self.links_at_mut(end);
        if !links.contains(&link) {
            links.push(link);
        }
    }

    pub(crate) fn raw_width(&self, ds: f64) -> f64 {
        self.width.value(ds)
    }
}

/// Stretch of road with a constant set of lanes
#[derive(Debug, Clone)]
pub struct LaneSection {
    index: usize,
    s_start: f64,
    s_end: f64,
    /// Lanes 1, 2, ... from the center outwards
    left: Vec<Lane>,
    center: Option<Lane>,
    /// Lanes -1, -2, ... from the center outwards
    right: Vec<Lane>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl LaneSection {
    /// Build a section from unordered lanes.
    ///
    /// Lane ids on each side must run consecutively from ±1 outwards; widths must stay
    /// non-negative at every sampled offset.
    pub fn new(
        road: RoadId,
        index: usize,
        s_start: f64,
        s_end: f64,
        lanes: Vec<Lane>,
        step: f64,
    ) -> Result<Self> {
        let mut left = Vec::new();
        let mut center = None;
        let mut right = Vec::new();
        for lane in lanes {
            match lane.id {
                0 if center.is_some() => {
                    return Err(MapError::InvalidLaneLayout {
                        road,
                        reason: format!("section {index} declares lane 0 twice"),
                    });
                }
                0 => center = Some(lane),
                id if id > 0 => left.push(lane),
                _ => right.push(lane),
            }
        }
        left.sort_by_key(|l| l.id);
        right.sort_by_key(|l| -l.id);

        for (side, lanes, sign) in [("left", &left, 1), ("right", &right, -1)] {
            for (i, lane) in lanes.iter().enumerate() {
                let expected = sign * (i as LaneId + 1);
                if lane.id != expected {
                    return Err(MapError::InvalidLaneLayout {
                        road,
                        reason: format!(
                            "section {index} {side} lanes are not consecutive: found {} where {expected} was expected",
                            lane.id
                        ),
                    });
                }
            }
        }

        let section = Self {
            index,
            s_start,
            s_end,
            left,
            center,
            right,
        };
        section.check_widths(road, step)?;
        Ok(section)
    }

    fn check_widths(&self, road: RoadId, step: f64) -> Result<()> {
        let length = self.length();
        for lane in self.left.iter().chain(self.right.iter()) {
            for ds in crate::reference_line::sample_range(0.0, length, step) {
                let width = lane.raw_width(ds);
                if width < -1e-9 {
                    return Err(MapError::NegativeLaneWidth {
                        road,
                        lane: lane.id,
                        s: self.s_start + ds,
                        width,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn s_start(&self) -> f64 {
        self.s_start
    }

    pub fn s_end(&self) -> f64 {
        self.s_end
    }

    pub fn length(&self) -> f64 {
        self.s_end - self.s_start
    }

    pub fn contains(&self, s: f64) -> bool {
        s >= self.s_start && s <= self.s_end
    }

    pub fn lane(&self, id: LaneId) -> Option<&Lane> {
        match id {
            0 => self.center.as_ref(),
            id if id > 0 => self.left.get(id as usize - 1),
            id => self.right.get(id.unsigned_abs() as usize - 1),
        }
    }

    pub(crate) fn lane_mut(&mut self, id: LaneId) -> Option<&mut Lane> {
        match id {
            0 => self.center.as_mut(),
            id if id > 0 => self.left.get_mut(id as usize - 1),
            id => self.right.get_mut(id.unsigned_abs() as usize - 1),
        }
    }

    /// Non-center lanes: left side outwards, then right side outwards.
    pub fn lanes(&self) -> impl Iterator<Item = &Lane> + '_ {
        self.left.iter().chain(self.right.iter())
    }

    pub fn left_lanes(&self) -> &[Lane] {
        &self.left
    }

    pub fn right_lanes(&self) -> &[Lane] {
        &self.right
    }

    pub fn center_lane(&self) -> Option<&Lane> {
        self.center.as_ref()
    }

    /// Width of lane `id` at road offset `s`; zero for the center lane or unknown lanes.
    pub fn width(&self, id: LaneId, s: f64) -> f64 {
        self.lane(id)
            .map_or(0.0, |lane| lane.width(s - self.s_start))
    }

    /// Sum of widths of the lanes strictly between the center and lane `id`.
    pub fn inner_edge(&self, id: LaneId, s: f64) -> f64 {
        let side = if id > 0 { &self.left } else { &self.right };
        let count = (id.unsigned_abs() as usize).saturating_sub(1).min(side.len());
        let ds = s - self.s_start;
        side[..count].iter().map(|lane| lane.width(ds)).sum()
    }

    /// Distance from the lane center line to lane `id`'s center at road offset `s`.
    pub fn lateral_offset(&self, id: LaneId, s: f64) -> f64 {
        if id == 0 {
            return 0.0;
        }
        self.inner_edge(id, s) + 0.5 * self.width(id, s)
    }

    /// Total width of one side (`left = true` for positive ids).
    pub fn side_width(&self, left: bool, s: f64) -> f64 {
        let side = if left { &self.left } else { &self.right };
        let ds = s - self.s_start;
        side.iter().map(|lane| lane.width(ds)).sum()
    }
}

//! Waypoints: lightweight locators on a lane, borrowed from the map they came from

use crate::lane::{Lane, LaneLink, LaneSection, LaneType, RoadMark};
use crate::map::Map;
use crate::road::{ContactPoint, LanePose, Road};
use crate::{JunctionId, LaneId, RoadId};
use std::f64::consts::PI;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Links followed by a single traversal before giving up, guards against zero-length loops.
const MAX_LINK_DEPTH: usize = 256;

/// Distances below this are treated as zero when advancing
const EPSILON: f64 = 1e-9;

/// Direction of travel along the road reference line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TravelDirection {
    /// Towards increasing s
    #[default]
    Forward,
    /// Towards decreasing s
    Backward,
}

impl TravelDirection {
    pub fn reverse(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }

    /// Lane end reached when travelling in this direction.
    fn exit(self) -> ContactPoint {
        match self {
            Self::Forward => ContactPoint::End,
            Self::Backward => ContactPoint::Start,
        }
    }
}

/// Lane changes allowed from a waypoint, relative to its travel direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LaneChange {
    None,
    Left,
    Right,
    Both,
}

impl LaneChange {
    fn from_sides(left: bool, right: bool) -> Self {
        match (left, right) {
            (true, true) => Self::Both,
            (true, false) => Self::Left,
            (false, true) => Self::Right,
            (false, false) => Self::None,
        }
    }

    pub fn allows_left(self) -> bool {
        matches!(self, Self::Left | Self::Both)
    }

    pub fn allows_right(self) -> bool {
        matches!(self, Self::Right | Self::Both)
    }
}

/// Position on a lane center line
///
/// Valid only while the originating [`Map`] is alive; links are followed through the map's
/// lookup tables on demand.
#[derive(Clone, Copy)]
pub struct Waypoint<'m> {
    map: &'m Map,
    road: &'m Road,
    section: &'m LaneSection,
    lane: &'m Lane,
    s: f64,
    direction: TravelDirection,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl<'m> Waypoint<'m> {
    pub(crate) fn new(
        map: &'m Map,
        road: &'m Road,
        section: &'m LaneSection,
        lane: &'m Lane,
        s: f64,
        direction: TravelDirection,
    ) -> Self {
        Self {
            map,
            road,
            section,
            lane,
            s,
            direction,
        }
    }

    /// Waypoint where `link` enters its target lane.
    fn enter(&self, link: &LaneLink) -> Option<Self> {
        let road = self.map.road(link.road)?;
        let section = road.section(link.section)?;
        let lane = section.lane(link.lane)?;
        let (s, direction) = match link.contact {
            ContactPoint::Start => (section.s_start(), TravelDirection::Forward),
            ContactPoint::End => (section.s_end(), TravelDirection::Backward),
        };
        Some(Self::new(self.map, road, section, lane, s, direction))
    }

    pub fn road_id(&self) -> RoadId {
        self.road.id()
    }

    pub fn lane_id(&self) -> LaneId {
        self.lane.id()
    }

    /// Arc length along the road reference line
    pub fn s(&self) -> f64 {
        self.s
    }

    pub fn section_index(&self) -> usize {
        self.section.index()
    }

    pub fn direction(&self) -> TravelDirection {
        self.direction
    }

    pub fn road(&self) -> &'m Road {
        self.road
    }

    pub fn lane(&self) -> &'m Lane {
        self.lane
    }

    pub fn map(&self) -> &'m Map {
        self.map
    }

    pub fn lane_type(&self) -> LaneType {
        self.lane.lane_type()
    }

    pub fn lane_width(&self) -> f64 {
        self.section.width(self.lane.id(), self.s)
    }

    /// Whether the waypoint lies on a connecting road inside a junction.
    pub fn is_junction(&self) -> bool {
        self.road.junction().is_some()
    }

    pub fn junction_id(&self) -> Option<JunctionId> {
        self.road.junction()
    }

    /// Speed limit in force here, in m/s. A lane speed record overrides the road's.
    pub fn speed_limit(&self) -> Option<f64> {
        match self.lane.speed(self.s - self.section.s_start()) {
            Some(record) => record.max_speed,
            None => self.road.speed_limit(self.s),
        }
    }

    /// Marking of the border to the left of the travel direction.
    pub fn left_marking(&self) -> Option<&'m RoadMark> {
        self.border_mark(self.left_step())
    }

    /// Marking of the border to the right of the travel direction.
    pub fn right_marking(&self) -> Option<&'m RoadMark> {
        self.border_mark(-self.left_step())
    }

    /// Lane changes the markings on both borders allow. An unmarked border allows crossing.
    ///
    /// Only the markings are consulted; whether a neighbour lane exists is up to
    /// [`Waypoint::left`] and [`Waypoint::right`].
    pub fn lane_change(&self) -> LaneChange {
        let permits = |step: LaneId| {
            self.border_mark(step)
                .is_none_or(|mark| mark.lane_change.permits(step > 0))
        };
        LaneChange::from_sides(permits(self.left_step()), permits(-self.left_step()))
    }

    /// Marking on the border crossed when moving one lane id in the direction of `step`.
    ///
    /// Each lane carries the marking of its outer border; the border next to the center is
    /// marked by the center lane.
    fn border_mark(&self, step: LaneId) -> Option<&'m RoadMark> {
        let id = self.lane.id();
        let owner = if (id + step).abs() > id.abs() {
            id
        } else {
            id + step
        };
        self.section
            .lane(owner)?
            .road_mark(self.s - self.section.s_start())
    }

    /// Lane id step that moves to the left of the travel direction.
    fn left_step(&self) -> LaneId {
        match self.direction {
            TravelDirection::Forward => 1,
            TravelDirection::Backward => -1,
        }
    }

    /// World pose facing the travel direction.
    ///
    /// Backward waypoints are turned around: yaw gains half a turn and pitch and roll
    /// change sign.
    pub fn transform(&self) -> LanePose {
        let pose = self.road.pose_on(self.section, self.lane, self.s);
        match self.direction {
            TravelDirection::Forward => pose,
            TravelDirection::Backward => LanePose {
                yaw: wrap_angle(pose.yaw + PI),
                pitch: -pose.pitch,
                roll: -pose.roll,
                ..pose
            },
        }
    }

    /// Waypoints `distance` meters ahead, following successor links in the travel direction.
    ///
    /// Branches produce one waypoint each, in link order. A dead end before the distance is
    /// covered yields nothing for that branch; reaching a lane end exactly stays on the lane.
    pub fn next_waypoints(&self, distance: f64) -> Vec<Waypoint<'m>> {
        if !distance.is_finite() || distance < 0.0 {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.advance(distance, 0, &mut out);
        out
    }

    /// Waypoints `distance` meters behind, walking against the travel direction.
    ///
    /// The returned waypoints keep facing the way of travel.
    pub fn previous_waypoints(&self, distance: f64) -> Vec<Waypoint<'m>> {
        self.reversed()
            .next_waypoints(distance)
            .into_iter()
            .map(|wp| wp.reversed())
            .collect()
    }

    /// Neighbour lane on the left with respect to the travel direction.
    ///
    /// Any neighbour is returned; see [`Waypoint::lane_change`] for whether moving there is
    /// allowed.
    pub fn left(&self) -> Option<Waypoint<'m>> {
        self.neighbour(self.left_step())
    }

    /// Neighbour lane on the right with respect to the travel direction.
    pub fn right(&self) -> Option<Waypoint<'m>> {
        self.neighbour(-self.left_step())
    }

    fn neighbour(&self, step: LaneId) -> Option<Waypoint<'m>> {
        let mut id = self.lane.id() + step;
        if id == 0 {
            id += step;
        }
        let lane = self.section.lane(id)?;
        Some(Self { lane, ..*self })
    }

    fn reversed(&self) -> Self {
        Self {
            direction: self.direction.reverse(),
            ..*self
        }
    }

    fn advance(&self, distance: f64, depth: usize, out: &mut Vec<Waypoint<'m>>) {
        let (lo, hi) = (self.section.s_start(), self.section.s_end());
        let available = match self.direction {
            TravelDirection::Forward => hi - self.s,
            TravelDirection::Backward => self.s - lo,
        }
        .max(0.0);

        if distance <= available + EPSILON {
            let s = match self.direction {
                TravelDirection::Forward => (self.s + distance).min(hi),
                TravelDirection::Backward => (self.s - distance).max(lo),
            };
            let reached = Self { s, ..*self };
            if !out.contains(&reached) {
                out.push(reached);
            }
            return;
        }

        if depth >= MAX_LINK_DEPTH {
            tracing::warn!(
                "Stopped following lane links after {MAX_LINK_DEPTH} hops from road {} lane {}",
                self.road_id(),
                self.lane_id()
            );
            return;
        }

        let remaining = distance - available;
        for link in self.lane.links_at(self.direction.exit()) {
            if let Some(entry) = self.enter(link) {
                entry.advance(remaining, depth + 1, out);
            }
        }
    }
}

impl fmt::Debug for Waypoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waypoint")
            .field("road", &self.road_id())
            .field("section", &self.section_index())
            .field("lane", &self.lane_id())
            .field("s", &self.s)
            .field("direction", &self.direction)
            .finish()
    }
}

impl PartialEq for Waypoint<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.map, other.map)
            && self.road_id() == other.road_id()
            && self.section_index() == other.section_index()
            && self.lane_id() == other.lane_id()
            && self.s == other.s
            && self.direction == other.direction
    }
}

fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped <= -PI { wrapped + 2.0 * PI } else { wrapped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, document, lane, link, road, section, straight_road};
    use crate::lane::{RoadMarkColor, RoadMarkKind};

    fn pair(connections: &[fixtures::Connection<'_>]) -> Map {
        Map::from_xodr(&fixtures::junction_pair(connections)).unwrap()
    }

    #[test]
    fn test_next_through_junction() {
        let map = pair(&[(0, 1, 2, "start", &[(1, 1), (-1, -1)][..])]);
        let start = map.waypoint_at(1, 1, 9.0).unwrap();
        let next = start.next_waypoints(2.0);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].road_id(), 2);
        assert_eq!(next[0].lane_id(), 1);
        assert!((next[0].s() - 1.0).abs() < 1e-9);
        assert_eq!(next[0].direction(), TravelDirection::Forward);
        assert!(next[0].is_junction());
        assert_eq!(next[0].junction_id(), Some(100));
    }

    #[test]
    fn test_next_within_lane_and_exact_end() {
        let map = pair(&[(0, 1, 2, "start", &[(-1, -1)][..])]);
        let wp = map.waypoint_at(1, -1, 2.0).unwrap();
        let next = wp.next_waypoints(3.0);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].road_id(), 1);
        assert!((next[0].s() - 5.0).abs() < 1e-9);

        let end = wp.next_waypoints(8.0);
        assert_eq!(end.len(), 1);
        assert_eq!(end[0].road_id(), 1);
        assert!((end[0].s() - 10.0).abs() < 1e-9);

        assert_eq!(wp.next_waypoints(0.0), vec![wp]);
        assert!(wp.next_waypoints(f64::NAN).is_empty());
    }

    #[test]
    fn test_dead_end_is_empty() {
        let map = pair(&[(0, 1, 2, "start", &[(-1, -1)][..])]);
        // Lane 1 has no link into the junction.
        let wp = map.waypoint_at(1, 1, 9.0).unwrap();
        assert!(wp.next_waypoints(2.0).is_empty());
        // Road 2 leads nowhere.
        let wp = map.waypoint_at(2, -1, 9.0).unwrap();
        assert!(wp.next_waypoints(5.0).is_empty());
    }

    #[test]
    fn test_branches_follow_declaration_order() {
        let sections = [section(0.0, &[(-1, lane(-1, 3.0, None, None))])];
        let text = document(
            &[
                road(
                    1,
                    (0.0, 0.0),
                    0.0,
                    10.0,
                    None,
                    &link("successor", "junction", 100, None),
                    &sections,
                ),
                road(3, (10.0, 0.0), 0.5, 10.0, Some(100), "", &sections),
                road(2, (10.0, 0.0), -0.5, 10.0, Some(100), "", &sections),
            ],
            &[fixtures::junction(
                100,
                &[
                    (0, 1, 3, "start", &[(-1, -1)][..]),
                    (1, 1, 2, "start", &[(-1, -1)][..]),
                ],
            )],
        );
        let map = Map::from_xodr(&text).unwrap();
        let next = map.waypoint_at(1, -1, 8.0).unwrap().next_waypoints(4.0);
        let roads: Vec<RoadId> = next.iter().map(Waypoint::road_id).collect();
        assert_eq!(roads, vec![3, 2]);
        assert!(next.iter().all(|wp| (wp.s() - 2.0).abs() < 1e-9));
    }

    #[test]
    fn test_entering_at_end_travels_backward() {
        // Road 2 is drawn backwards and its end touches road 1's end.
        let text = document(
            &[
                road(
                    1,
                    (0.0, 0.0),
                    0.0,
                    10.0,
                    None,
                    &link("successor", "road", 2, Some("end")),
                    &[section(0.0, &[(-1, lane(-1, 3.0, None, Some(1)))])],
                ),
                road(
                    2,
                    (20.0, 0.0),
                    PI,
                    10.0,
                    None,
                    &link("successor", "road", 1, Some("end")),
                    &[section(0.0, &[(1, lane(1, 3.0, None, Some(-1)))])],
                ),
            ],
            &[],
        );
        let map = Map::from_xodr(&text).unwrap();
        let next = map.waypoint_at(1, -1, 8.0).unwrap().next_waypoints(5.0);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].road_id(), 2);
        assert_eq!(next[0].lane_id(), 1);
        assert_eq!(next[0].direction(), TravelDirection::Backward);
        assert!((next[0].s() - 7.0).abs() < 1e-9);

        // Both lanes lie on the same side of the x axis and face +x.
        let before = map.waypoint_at(1, -1, 8.0).unwrap().transform();
        let after = next[0].transform();
        assert!((before.position.y - after.position.y).abs() < 1e-6);
        assert!(after.yaw.abs() < 1e-6);
        assert!((after.position.x - 13.0).abs() < 1e-6);

        // Walking back returns to where we started.
        let back = next[0].previous_waypoints(5.0);
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].road_id(), 1);
        assert!((back[0].s() - 8.0).abs() < 1e-9);
        assert_eq!(back[0].direction(), TravelDirection::Forward);
    }

    #[test]
    fn test_previous_through_junction() {
        let map = pair(&[(0, 1, 2, "start", &[(1, 1), (-1, -1)][..])]);
        let wp = map.waypoint_at(2, -1, 1.0).unwrap();
        let previous = wp.previous_waypoints(3.0);
        assert_eq!(previous.len(), 1);
        assert_eq!(previous[0].road_id(), 1);
        assert!((previous[0].s() - 8.0).abs() < 1e-9);
        assert_eq!(previous[0].direction(), TravelDirection::Forward);
    }

    #[test]
    fn test_left_and_right() {
        let text = document(
            &[road(
                1,
                (0.0, 0.0),
                0.0,
                10.0,
                None,
                "",
                &[section(
                    0.0,
                    &[
                        (1, lane(1, 3.0, None, None)),
                        (-1, lane(-1, 3.0, None, None)),
                        (-2, lane(-2, 3.0, None, None)),
                    ],
                )],
            )],
            &[],
        );
        let map = Map::from_xodr(&text).unwrap();
        let wp = map.waypoint_at(1, -1, 5.0).unwrap();
        assert_eq!(wp.left().map(|w| w.lane_id()), Some(1));
        assert_eq!(wp.right().map(|w| w.lane_id()), Some(-2));
        assert!(wp.right().and_then(|w| w.right()).is_none());

        let backward = wp.reversed();
        assert_eq!(backward.left().map(|w| w.lane_id()), Some(-2));
        assert_eq!(backward.right().map(|w| w.lane_id()), Some(1));
        assert_eq!(
            backward.right().map(|w| w.direction()),
            Some(TravelDirection::Backward)
        );
    }

    fn marked_road() -> Map {
        let width = r#"<width sOffset="0" a="3" b="0" c="0" d="0"/>"#;
        let marked_section = format!(
            r#"<laneSection s="0">
                <left>
                    <lane id="1" type="driving">{width}
                        <roadMark sOffset="0" type="solid" laneChange="none"/>
                        <speed sOffset="5" max="no limit"/>
                    </lane>
                </left>
                <center>
                    <lane id="0" type="none"><roadMark sOffset="0" type="solid solid" color="yellow" laneChange="none"/></lane>
                </center>
                <right>
                    <lane id="-1" type="driving">{width}
                        <roadMark sOffset="0" type="broken" laneChange="decrease"/>
                        <speed sOffset="0" max="20" unit="m/s"/>
                    </lane>
                    <lane id="-2" type="driving">{width}<roadMark sOffset="0" type="solid" laneChange="none"/></lane>
                    <lane id="-3" type="shoulder">{width}</lane>
                </right>
            </laneSection>"#
        );
        Map::from_xodr(&document(
            &[road(1, (0.0, 0.0), 0.0, 10.0, None, "", &[marked_section])],
            &[],
        ))
        .unwrap()
    }

    #[test]
    fn test_lane_change_follows_border_marks() {
        let map = marked_road();
        let change = |lane, direction| {
            let wp = map.waypoint_at(1, lane, 5.0).unwrap();
            match direction {
                TravelDirection::Forward => wp.lane_change(),
                TravelDirection::Backward => wp.reversed().lane_change(),
            }
        };

        // Center line forbids crossing; the broken line only towards smaller ids.
        assert_eq!(change(-1, TravelDirection::Forward), LaneChange::Right);
        assert_eq!(change(-1, TravelDirection::Backward), LaneChange::Left);
        assert_eq!(change(-2, TravelDirection::Forward), LaneChange::None);
        assert_eq!(change(-2, TravelDirection::Backward), LaneChange::None);
        // The outer border of lane -3 is unmarked.
        assert_eq!(change(-3, TravelDirection::Forward), LaneChange::Right);
        assert_eq!(change(1, TravelDirection::Forward), LaneChange::None);

        assert!(LaneChange::Both.allows_left() && LaneChange::Both.allows_right());
        assert!(!LaneChange::Right.allows_left());
    }

    #[test]
    fn test_border_markings() {
        let map = marked_road();
        let wp = map.waypoint_at(1, -1, 5.0).unwrap();
        let left = wp.left_marking().unwrap();
        assert_eq!(left.kind, RoadMarkKind::SolidSolid);
        assert_eq!(left.color, RoadMarkColor::Yellow);
        assert_eq!(wp.right_marking().map(|m| m.kind), Some(RoadMarkKind::Broken));

        let backward = wp.reversed();
        assert_eq!(
            backward.left_marking().map(|m| m.kind),
            Some(RoadMarkKind::Broken)
        );
        assert!(map.waypoint_at(1, -3, 5.0).unwrap().right_marking().is_none());
    }

    #[test]
    fn test_lane_speed_overrides_road_speed() {
        let map = marked_road();
        let speed = |lane, s| map.waypoint_at(1, lane, s).unwrap().speed_limit();

        assert_eq!(speed(-1, 5.0), Some(20.0));
        assert!((speed(-2, 5.0).unwrap() - 50.0 / 3.6).abs() < 1e-9);
        // Lane 1 follows the road until its own record starts, then has no limit.
        assert!((speed(1, 2.0).unwrap() - 50.0 / 3.6).abs() < 1e-9);
        assert_eq!(speed(1, 6.0), None);
    }

    #[test]
    fn test_straight_road_round_trip() {
        let map = Map::from_xodr(&document(
            &[straight_road(1, 40.0, 3.5, None, None)],
            &[],
        ))
        .unwrap();
        let wp = map.waypoint_at(1, -1, 20.0).unwrap();
        assert_eq!(wp.s(), 20.0);
        assert_eq!(wp.section_index(), 0);
        assert_eq!(wp.lane_type(), LaneType::Driving);
        assert!((wp.lane_width() - 3.5).abs() < 1e-12);
        assert!(!wp.is_junction());
        assert!((wp.speed_limit().unwrap() - 50.0 / 3.6).abs() < 1e-9);

        let pose = wp.transform();
        assert!((pose.position.x - 20.0).abs() < 1e-9);
        assert!((pose.position.y + 1.75).abs() < 1e-9);
        assert!((pose.t + 1.75).abs() < 1e-9);
        assert_eq!(pose.yaw, 0.0);

        let backward = wp.reversed().transform();
        assert!((backward.yaw - PI).abs() < 1e-12);
    }

    #[test]
    fn test_wrap_angle() {
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-12);
        assert!((wrap_angle(-0.5) + 0.5).abs() < 1e-12);
        assert!((wrap_angle(2.0 * PI)).abs() < 1e-12);
    }
}

//! Map-level queries: waypoint lookup, nearest lane projection and lane graph listings

use crate::lane::{Lane, LaneSection, LaneType};
use crate::map::Map;
use crate::reference_line::sample_range;
use crate::road::{ContactPoint, Road};
use crate::waypoint::{TravelDirection, Waypoint};
use crate::{JunctionId, LaneId, RoadId};
use geo::{Coord, Rect};
use std::collections::BTreeMap;

/// Golden ratio conjugate used by the closest point refinement
const INV_PHI: f64 = 0.618_033_988_749_894_8;

/// Distances closer than this are considered equal when breaking ties
const TIE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f64,
    road: RoadId,
    section: usize,
    lane: LaneId,
    s: f64,
}

impl Candidate {
    /// Closer wins; near-equal distances go to the lowest road id, then lowest |lane id|.
    fn beats(&self, other: &Candidate) -> bool {
        if (self.distance - other.distance).abs() > TIE_TOLERANCE {
            return self.distance < other.distance;
        }
        (self.road, self.lane.unsigned_abs()) < (other.road, other.lane.unsigned_abs())
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Map {
    /// Waypoint on `lane` of `road` at arc length `s`, travelling towards increasing s.
    ///
    /// `None` when the road or lane does not exist there, or `s` is outside the road.
    pub fn waypoint_at(&self, road: RoadId, lane: LaneId, s: f64) -> Option<Waypoint<'_>> {
        let road_ref = self.road(road)?;
        if lane == 0 || !(0.0..=road_ref.length()).contains(&s) {
            return None;
        }
        let section = road_ref.section(road_ref.section_index(s))?;
        let lane_ref = section.lane(lane)?;
        Some(Waypoint::new(
            self,
            road_ref,
            section,
            lane_ref,
            s,
            TravelDirection::Forward,
        ))
    }

    /// Nearest point on the center line of a driving lane.
    ///
    /// With `max_distance`, lanes farther away are ignored; without it the search widens
    /// until something is found.
    pub fn closest_waypoint(
        &self,
        point: Coord<f64>,
        max_distance: Option<f64>,
    ) -> Option<Waypoint<'_>> {
        self.closest_waypoint_of_type(point, max_distance, &[LaneType::Driving])
    }

    /// Nearest point on the center line of a lane whose type is in `lane_types`
    /// (any type when empty).
    pub fn closest_waypoint_of_type(
        &self,
        point: Coord<f64>,
        max_distance: Option<f64>,
        lane_types: &[LaneType],
    ) -> Option<Waypoint<'_>> {
        #[cfg(feature = "profiling")]
        profiling::scope!("map::closest_waypoint");

        if !(point.x.is_finite() && point.y.is_finite()) {
            return None;
        }
        let bounds = self.bounding_box()?;
        // No lane point is farther than the farthest corner of the map bounds.
        let reach = [
            bounds.min(),
            bounds.max(),
            Coord {
                x: bounds.min().x,
                y: bounds.max().y,
            },
            Coord {
                x: bounds.max().x,
                y: bounds.min().y,
            },
        ]
        .iter()
        .map(|corner| distance(*corner, point))
        .fold(0.0_f64, f64::max);

        let mut radius = match max_distance {
            Some(max) if max.is_nan() || max < 0.0 => return None,
            Some(max) => max,
            None => self.config().search_radius.max(self.config().step()),
        };
        loop {
            let best = self.closest_within(point, radius, lane_types);
            // A closer lane point would lie inside the searched square.
            if let Some(best) = best.filter(|c| c.distance <= radius) {
                return self.candidate_waypoint(best);
            }
            if max_distance.is_some() || radius > reach {
                return None;
            }
            radius *= 2.0;
        }
    }

    fn candidate_waypoint(&self, candidate: Candidate) -> Option<Waypoint<'_>> {
        let road = self.road(candidate.road)?;
        let section = road.section(candidate.section)?;
        let lane = section.lane(candidate.lane)?;
        Some(Waypoint::new(
            self,
            road,
            section,
            lane,
            candidate.s,
            TravelDirection::Forward,
        ))
    }

    /// Best candidate among the stretches of road the index returns for a square of half
    /// size `radius` around `point`.
    fn closest_within(
        &self,
        point: Coord<f64>,
        radius: f64,
        lane_types: &[LaneType],
    ) -> Option<Candidate> {
        let delta = Coord {
            x: radius,
            y: radius,
        };
        let step = self.config().step();

        let mut ranges: BTreeMap<RoadId, Vec<(f64, f64)>> = BTreeMap::new();
        for hit in self.index.query(Rect::new(point - delta, point + delta)) {
            ranges
                .entry(hit.road)
                .or_default()
                .push((hit.s_start - step, hit.s_end + step));
        }

        let mut best: Option<Candidate> = None;
        for (road_id, mut stretches) in ranges {
            let Some(road) = self.road(road_id) else {
                continue;
            };
            for (lo, hi) in merge_ranges(&mut stretches) {
                for section in road.sections() {
                    let lo = lo.max(section.s_start());
                    let hi = hi.min(section.s_end());
                    if lo > hi {
                        continue;
                    }
                    for lane in section.lanes() {
                        if !lane_types.is_empty() && !lane_types.contains(&lane.lane_type()) {
                            continue;
                        }
                        let candidate = self.closest_on_lane(road, section, lane, point, lo, hi);
                        if best.is_none_or(|b| candidate.beats(&b)) {
                            best = Some(candidate);
                        }
                    }
                }
            }
        }
        best
    }

    /// Coarse sampling of `[lo, hi]` followed by golden-section refinement around the
    /// best sample.
    fn closest_on_lane(
        &self,
        road: &Road,
        section: &LaneSection,
        lane: &Lane,
        point: Coord<f64>,
        lo: f64,
        hi: f64,
    ) -> Candidate {
        let dist = |s: f64| distance(road.pose_on(section, lane, s).position, point);

        let samples = sample_range(lo, hi, 0.5 * self.config().step());
        let (mut best_i, mut best_d) = (0, f64::INFINITY);
        for (i, &s) in samples.iter().enumerate() {
            let d = dist(s);
            if d < best_d {
                (best_i, best_d) = (i, d);
            }
        }

        let mut a = samples[best_i.saturating_sub(1)];
        let mut b = samples[(best_i + 1).min(samples.len() - 1)];
        let mut c = b - INV_PHI * (b - a);
        let mut d = a + INV_PHI * (b - a);
        let (mut fc, mut fd) = (dist(c), dist(d));
        for _ in 0..self.config().refinement_iterations {
            if fc < fd {
                (b, d, fd) = (d, c, fc);
                c = b - INV_PHI * (b - a);
                fc = dist(c);
            } else {
                (a, c, fc) = (c, d, fd);
                d = a + INV_PHI * (b - a);
                fd = dist(d);
            }
        }

        let (mut s, mut distance) = if fc < fd { (c, fc) } else { (d, fd) };
        if best_d < distance {
            (s, distance) = (samples[best_i], best_d);
        }
        Candidate {
            distance,
            road: road.id(),
            section: section.index(),
            lane: lane.id(),
            s,
        }
    }

    /// One waypoint every `distance` meters along every driving lane, starting at each
    /// lane section's start. Zero-length sections contribute nothing.
    pub fn generate_waypoints(&self, distance: f64) -> Vec<Waypoint<'_>> {
        if !distance.is_finite() || distance <= 0.0 {
            return Vec::new();
        }
        let mut waypoints = Vec::new();
        for road in self.roads() {
            for section in road.sections() {
                for lane in section
                    .lanes()
                    .filter(|lane| lane.lane_type() == LaneType::Driving)
                {
                    let mut s = section.s_start();
                    while s < section.s_end() {
                        waypoints.push(Waypoint::new(
                            self,
                            road,
                            section,
                            lane,
                            s,
                            TravelDirection::Forward,
                        ));
                        s += distance;
                    }
                }
            }
        }
        waypoints
    }

    /// Every successor link leaving a driving lane, as (lane start, entry into the target).
    ///
    /// Entries through a target lane's end face backward.
    pub fn topology(&self) -> Vec<(Waypoint<'_>, Waypoint<'_>)> {
        let mut pairs = Vec::new();
        for road in self.roads() {
            for section in road.sections() {
                for lane in section
                    .lanes()
                    .filter(|lane| lane.lane_type() == LaneType::Driving)
                {
                    let from = Waypoint::new(
                        self,
                        road,
                        section,
                        lane,
                        section.s_start(),
                        TravelDirection::Forward,
                    );
                    for link in lane.successors() {
                        let Some(target) = self.road(link.road) else {
                            continue;
                        };
                        let Some(target_section) = target.section(link.section) else {
                            continue;
                        };
                        let Some(target_lane) = target_section.lane(link.lane) else {
                            continue;
                        };
                        let (s, direction) = match link.contact {
                            ContactPoint::Start => {
                                (target_section.s_start(), TravelDirection::Forward)
                            }
                            ContactPoint::End => {
                                (target_section.s_end(), TravelDirection::Backward)
                            }
                        };
                        pairs.push((
                            from,
                            Waypoint::new(self, target, target_section, target_lane, s, direction),
                        ));
                    }
                }
            }
        }
        pairs
    }

    /// Area covered by the connecting roads of a junction.
    pub fn junction_bounding_box(&self, id: JunctionId) -> Option<Rect<f64>> {
        self.junction(id)?.bounding_box()
    }
}

fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Sort and merge overlapping `(start, end)` ranges.
fn merge_ranges(ranges: &mut [(f64, f64)]) -> Vec<(f64, f64)> {
    ranges.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(ranges.len());
    for &(start, end) in ranges.iter() {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, document, lane, road, section, straight_road};

    fn straight(length: f64, width: f64) -> Map {
        Map::from_xodr(&document(&[straight_road(1, length, width, None, None)], &[])).unwrap()
    }

    #[test]
    fn test_waypoint_at_range() {
        let map = straight(30.0, 3.0);
        assert!(map.waypoint_at(1, -1, 0.0).is_some());
        assert!(map.waypoint_at(1, -1, 30.0).is_some());
        assert!(map.waypoint_at(1, -1, -0.1).is_none());
        assert!(map.waypoint_at(1, -1, 30.1).is_none());
        assert!(map.waypoint_at(1, -2, 10.0).is_none());
        assert!(map.waypoint_at(1, 0, 10.0).is_none());
        assert!(map.waypoint_at(2, -1, 10.0).is_none());
    }

    #[test]
    fn test_waypoint_at_picks_section() {
        let text = document(
            &[road(
                1,
                (0.0, 0.0),
                0.0,
                20.0,
                None,
                "",
                &[
                    section(0.0, &[(-1, lane(-1, 3.0, None, Some(-1)))]),
                    section(
                        8.0,
                        &[(-1, lane(-1, 3.0, Some(-1), None)), (-2, lane(-2, 2.0, None, None))],
                    ),
                ],
            )],
            &[],
        );
        let map = Map::from_xodr(&text).unwrap();
        assert_eq!(map.waypoint_at(1, -1, 4.0).unwrap().section_index(), 0);
        assert_eq!(map.waypoint_at(1, -1, 8.0).unwrap().section_index(), 1);
        assert!(map.waypoint_at(1, -2, 4.0).is_none());

        // Advancing across the section boundary keeps the lane.
        let next = map.waypoint_at(1, -1, 6.0).unwrap().next_waypoints(4.0);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].section_index(), 1);
        assert!((next[0].s() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_closest_on_centerline() {
        let map = straight(100.0, 3.0);
        let wp = map
            .closest_waypoint(Coord { x: 42.0, y: -1.5 }, None)
            .unwrap();
        assert_eq!(wp.road_id(), 1);
        assert_eq!(wp.lane_id(), -1);
        assert!((wp.s() - 42.0).abs() < 1e-6);
        let pose = wp.transform();
        assert!((pose.position.x - 42.0).abs() < 1e-6);
        assert!((pose.position.y + 1.5).abs() < 1e-9);

        let left = map
            .closest_waypoint(Coord { x: 42.3, y: 1.4 }, Some(1.0))
            .unwrap();
        assert_eq!(left.lane_id(), 1);
        assert!((left.s() - 42.3).abs() < 1e-6);
    }

    #[test]
    fn test_closest_on_curved_road() {
        let text = r#"<OpenDRIVE>
            <road id="4" length="31.4159265358979" junction="-1">
                <planView>
                    <geometry s="0" x="0" y="0" hdg="0" length="31.4159265358979"><arc curvature="0.05"/></geometry>
                </planView>
                <lanes><laneSection s="0">
                    <center><lane id="0" type="none"/></center>
                    <right><lane id="-1" type="driving"><width sOffset="0" a="2" b="0" c="0" d="0"/></lane></right>
                </laneSection></lanes>
            </road>
        </OpenDRIVE>"#;
        let map = Map::from_xodr(text).unwrap();
        // Circle of radius 20 around (0, 20); lane -1 runs on radius 21.
        let angle: f64 = 0.6;
        let on_lane = Coord {
            x: 21.0 * angle.sin(),
            y: 20.0 - 21.0 * angle.cos(),
        };
        let wp = map.closest_waypoint(on_lane, None).unwrap();
        assert!((wp.s() - 20.0 * angle).abs() < 1e-5);
        let pose = wp.transform();
        assert!(distance(pose.position, on_lane) < 1e-5);
    }

    #[test]
    fn test_closest_respects_max_distance_and_type() {
        let map = straight(50.0, 3.0);
        let far = Coord { x: 25.0, y: 40.0 };
        assert!(map.closest_waypoint(far, Some(5.0)).is_none());
        let wp = map.closest_waypoint(far, None).unwrap();
        assert_eq!(wp.lane_id(), 1);
        assert!(map.closest_waypoint(far, Some(-1.0)).is_none());

        assert!(
            map.closest_waypoint_of_type(far, None, &[LaneType::Sidewalk])
                .is_none()
        );
        assert!(map.closest_waypoint_of_type(far, None, &[]).is_some());
    }

    #[test]
    fn test_closest_tie_prefers_lowest_road() {
        // Two identical roads on top of each other.
        let text = document(
            &[
                straight_road(5, 20.0, 3.0, None, None),
                straight_road(3, 20.0, 3.0, None, None),
            ],
            &[],
        );
        let map = Map::from_xodr(&text).unwrap();
        let wp = map
            .closest_waypoint(Coord { x: 10.0, y: -1.5 }, None)
            .unwrap();
        assert_eq!(wp.road_id(), 3);
        assert_eq!(wp.lane_id(), -1);
    }

    #[test]
    fn test_closest_to_non_finite_point() {
        let map = straight(20.0, 3.0);
        for point in [
            Coord { x: f64::INFINITY, y: 0.0 },
            Coord { x: 0.0, y: f64::NEG_INFINITY },
            Coord { x: f64::NAN, y: 1.0 },
        ] {
            assert!(map.closest_waypoint(point, None).is_none());
            assert!(map.closest_waypoint(point, Some(100.0)).is_none());
        }
    }

    #[test]
    fn test_closest_on_empty_map() {
        let map = Map::from_xodr("<OpenDRIVE/>").unwrap();
        assert!(map.closest_waypoint(Coord { x: 0.0, y: 0.0 }, None).is_none());
    }

    #[test]
    fn test_generate_waypoints() {
        let map = straight(10.0, 3.0);
        let waypoints = map.generate_waypoints(2.5);
        // Two lanes, s = 0, 2.5, 5, 7.5
        assert_eq!(waypoints.len(), 8);
        assert!(waypoints.iter().all(|wp| wp.s() < 10.0));
        assert!(map.generate_waypoints(0.0).is_empty());
    }

    #[test]
    fn test_topology_and_junction_bbox() {
        let map = Map::from_xodr(&fixtures::junction_pair(&[(
            0,
            1,
            2,
            "start",
            &[(1, 1), (-1, -1)][..],
        )]))
        .unwrap();
        let topology = map.topology();
        assert_eq!(topology.len(), 2);
        for (from, to) in &topology {
            assert_eq!(from.road_id(), 1);
            assert_eq!(to.road_id(), 2);
            assert_eq!(from.lane_id(), to.lane_id());
            assert_eq!(to.s(), 0.0);
        }

        let bbox = map.junction_bounding_box(100).unwrap();
        assert!((bbox.min().x - 10.0).abs() < 1e-9);
        assert!((bbox.max().x - 20.0).abs() < 1e-9);
        assert!(map.junction_bounding_box(1).is_none());
    }

    #[test]
    fn test_merge_ranges() {
        let mut ranges = [(5.0, 8.0), (0.0, 2.0), (1.0, 3.0), (8.0, 9.0)];
        assert_eq!(merge_ranges(&mut ranges), vec![(0.0, 3.0), (5.0, 9.0)]);
    }
}

//! Lane-level connectivity across lane sections, roads and junctions
//!
//! Links are planned against an immutable view of the network (validating every id on the
//! way) and applied afterwards. Every link is stored on both lanes it joins: a lane's
//! `successors` are attached at its larger-s end, `predecessors` at its smaller-s end,
//! independently of the direction traffic uses.

use crate::junction::Junction;
use crate::lane::LaneLink;
use crate::road::{ContactPoint, ElementType, Road, RoadLink};
use crate::{JunctionId, LaneId, MapError, Result, RoadId};
use std::collections::BTreeMap;

/// One end of one lane
#[derive(Debug, Clone, Copy, PartialEq)]
struct Endpoint {
    road: RoadId,
    section: usize,
    lane: LaneId,
    end: ContactPoint,
}

impl Endpoint {
    fn as_link(&self) -> LaneLink {
        LaneLink {
            road: self.road,
            section: self.section,
            lane: self.lane,
            contact: self.end,
        }
    }
}

/// Key identifying a junction lane link: incoming lane end plus connecting road.
type ConnectionKey = (RoadId, LaneId, ContactPoint, RoadId);

#[derive(Default)]
struct LinkPlan {
    pairs: Vec<(Endpoint, Endpoint)>,
}

impl LinkPlan {
    fn connect(&mut self, a: Endpoint, b: Endpoint) {
        self.pairs.push((a, b));
    }
}

/// Wire lane links for the whole network. Returns the number of joined lane ends.
pub(crate) fn resolve(
    roads: &mut BTreeMap<RoadId, Road>,
    junctions: &BTreeMap<JunctionId, Junction>,
) -> Result<usize> {
    #[cfg(feature = "profiling")]
    profiling::scope!("connectivity::resolve");

    validate_road_links(roads, junctions)?;

    let mut plan = LinkPlan::default();
    plan_section_links(roads, &mut plan)?;
    plan_road_links(roads, &mut plan)?;
    plan_junction_links(roads, junctions, &mut plan)?;

    let count = plan.pairs.len();
    for (a, b) in plan.pairs {
        attach(roads, a, b.as_link());
        attach(roads, b, a.as_link());
    }
    Ok(count)
}

fn attach(roads: &mut BTreeMap<RoadId, Road>, at: Endpoint, link: LaneLink) {
    if let Some(lane) = roads
        .get_mut(&at.road)
        .and_then(|road| road.sections.get_mut(at.section))
        .and_then(|section| section.lane_mut(at.lane))
    {
        lane.attach(at.end, link);
    }
}

fn validate_road_links(
    roads: &BTreeMap<RoadId, Road>,
    junctions: &BTreeMap<JunctionId, Junction>,
) -> Result<()> {
    for road in roads.values() {
        let links = [("predecessor", road.predecessor()), ("successor", road.successor())];
        for (name, link) in links {
            let Some(link) = link else { continue };
            let context = format!("Road {} {name}", road.id());
            match link.element_type {
                ElementType::Road if !roads.contains_key(&link.element_id) => {
                    return Err(MapError::UnresolvedRoad {
                        road: link.element_id,
                        context,
                    });
                }
                ElementType::Junction if !junctions.contains_key(&link.element_id) => {
                    return Err(MapError::UnresolvedJunction {
                        junction: link.element_id,
                        context,
                    });
                }
                _ => {}
            }
        }
        if let Some(junction) = road.junction().filter(|j| !junctions.contains_key(j)) {
            return Err(MapError::UnresolvedJunction {
                junction,
                context: format!("Road {}", road.id()),
            });
        }
    }
    Ok(())
}

fn require_lane(
    roads: &BTreeMap<RoadId, Road>,
    road: RoadId,
    section: usize,
    lane: LaneId,
    context: impl FnOnce() -> String,
) -> Result<()> {
    let found = roads
        .get(&road)
        .and_then(|r| r.section(section))
        .and_then(|s| s.lane(lane))
        .is_some();
    if found {
        Ok(())
    } else {
        Err(MapError::UnresolvedLane {
            road,
            lane,
            context: context(),
        })
    }
}

fn require_road(roads: &BTreeMap<RoadId, Road>, road: RoadId, context: &str) -> Result<()> {
    if roads.contains_key(&road) {
        Ok(())
    } else {
        Err(MapError::UnresolvedRoad {
            road,
            context: context.to_string(),
        })
    }
}

/// Links between consecutive lane sections of the same road.
fn plan_section_links(roads: &BTreeMap<RoadId, Road>, plan: &mut LinkPlan) -> Result<()> {
    for road in roads.values() {
        let id = road.id();
        for (k, pair) in road.sections().windows(2).enumerate() {
            let (before, after) = (&pair[0], &pair[1]);
            for lane in before.lanes() {
                let Some(next) = lane.declared_successor else {
                    continue;
                };
                require_lane(roads, id, k + 1, next, || {
                    format!("Road {id} section {k} lane {} successor", lane.id())
                })?;
                plan.connect(
                    Endpoint {
                        road: id,
                        section: k,
                        lane: lane.id(),
                        end: ContactPoint::End,
                    },
                    Endpoint {
                        road: id,
                        section: k + 1,
                        lane: next,
                        end: ContactPoint::Start,
                    },
                );
            }
            for lane in after.lanes() {
                let Some(prev) = lane.declared_predecessor else {
                    continue;
                };
                require_lane(roads, id, k, prev, || {
                    format!("Road {id} section {} lane {} predecessor", k + 1, lane.id())
                })?;
                plan.connect(
                    Endpoint {
                        road: id,
                        section: k + 1,
                        lane: lane.id(),
                        end: ContactPoint::Start,
                    },
                    Endpoint {
                        road: id,
                        section: k,
                        lane: prev,
                        end: ContactPoint::End,
                    },
                );
            }
        }
    }
    Ok(())
}

/// Direct road-to-road links, using each lane's declared link at the road end.
fn plan_road_links(roads: &BTreeMap<RoadId, Road>, plan: &mut LinkPlan) -> Result<()> {
    for road in roads.values() {
        let id = road.id();
        for end in [ContactPoint::Start, ContactPoint::End] {
            let Some(RoadLink {
                element_type: ElementType::Road,
                element_id: target,
                contact_point,
            }) = road.link_at(end).copied()
            else {
                continue;
            };
            // Successors usually attach at the target's start, predecessors at its end.
            let contact = contact_point.unwrap_or(end.opposite());
            let section = road.section_index_at_end(end);
            let target_section = roads
                .get(&target)
                .map_or(0, |t| t.section_index_at_end(contact));

            for lane in road.sections()[section].lanes() {
                let declared = match end {
                    ContactPoint::Start => lane.declared_predecessor,
                    ContactPoint::End => lane.declared_successor,
                };
                let Some(target_lane) = declared else {
                    continue;
                };
                require_lane(roads, target, target_section, target_lane, || {
                    format!("Road {id} lane {} link at {end:?}", lane.id())
                })?;
                plan.connect(
                    Endpoint {
                        road: id,
                        section,
                        lane: lane.id(),
                        end,
                    },
                    Endpoint {
                        road: target,
                        section: target_section,
                        lane: target_lane,
                        end: contact,
                    },
                );
            }
        }
    }
    Ok(())
}

/// End of `incoming` that touches the junction.
fn incoming_end(
    incoming: &Road,
    connecting: &Road,
    junction: JunctionId,
    contact: ContactPoint,
) -> Option<ContactPoint> {
    let to_junction = |link: Option<&RoadLink>| {
        link.is_some_and(|l| l.element_type == ElementType::Junction && l.element_id == junction)
    };
    if to_junction(incoming.successor()) {
        return Some(ContactPoint::End);
    }
    if to_junction(incoming.predecessor()) {
        return Some(ContactPoint::Start);
    }
    connecting
        .link_at(contact)
        .filter(|l| l.element_type == ElementType::Road && l.element_id == incoming.id())
        .and_then(|l| l.contact_point)
}

/// Junction connections, in junction id order then declaration order.
///
/// A repeated (incoming lane end, connecting road) pair replaces the earlier declaration.
fn plan_junction_links(
    roads: &BTreeMap<RoadId, Road>,
    junctions: &BTreeMap<JunctionId, Junction>,
    plan: &mut LinkPlan,
) -> Result<()> {
    for junction in junctions.values() {
        let jid = junction.id();
        let mut entries: Vec<(ConnectionKey, Endpoint, Endpoint)> = Vec::new();

        for connection in junction.connections() {
            let context = format!("Junction {jid} connection {}", connection.id);
            require_road(roads, connection.incoming_road, &context)?;
            require_road(roads, connection.connecting_road, &context)?;
            let (Some(incoming), Some(connecting)) = (
                roads.get(&connection.incoming_road),
                roads.get(&connection.connecting_road),
            ) else {
                continue;
            };

            let contact = connection.contact_point;
            let end = incoming_end(incoming, connecting, jid, contact).unwrap_or_else(|| {
                tracing::warn!(
                    "{context}: road {} is not linked to the junction, assuming its end",
                    incoming.id()
                );
                ContactPoint::End
            });
            let incoming_section = incoming.section_index_at_end(end);
            let connecting_section = connecting.section_index_at_end(contact);

            for lane_link in &connection.lane_links {
                require_lane(roads, incoming.id(), incoming_section, lane_link.from, || {
                    format!("{context} laneLink from")
                })?;
                require_lane(
                    roads,
                    connecting.id(),
                    connecting_section,
                    lane_link.to,
                    || format!("{context} laneLink to"),
                )?;

                let key = (incoming.id(), lane_link.from, end, connecting.id());
                if let Some(pos) = entries.iter().position(|(k, _, _)| *k == key) {
                    let (_, _, previous) = entries.remove(pos);
                    tracing::warn!(
                        "{context}: road {} lane {} into road {} is declared twice (lane {} replaced by lane {})",
                        incoming.id(),
                        lane_link.from,
                        connecting.id(),
                        previous.lane,
                        lane_link.to
                    );
                }
                entries.push((
                    key,
                    Endpoint {
                        road: incoming.id(),
                        section: incoming_section,
                        lane: lane_link.from,
                        end,
                    },
                    Endpoint {
                        road: connecting.id(),
                        section: connecting_section,
                        lane: lane_link.to,
                        end: contact,
                    },
                ));
            }
        }

        for (_, a, b) in entries {
            plan.connect(a, b);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::fixtures::{self, document, lane, link, road, section};
    use crate::{ContactPoint, LaneLink, Map, MapError};

    fn compile(text: &str) -> Map {
        Map::from_xodr(text).unwrap()
    }

    #[test]
    fn test_section_links() {
        let sections = [
            section(
                0.0,
                &[(-1, lane(-1, 3.0, None, Some(-1))), (-2, lane(-2, 3.0, None, Some(-1)))],
            ),
            section(5.0, &[(-1, lane(-1, 3.0, Some(-1), None))]),
        ];
        let map = compile(&document(
            &[road(1, (0.0, 0.0), 0.0, 10.0, None, "", &sections)],
            &[],
        ));
        let road = map.road(1).unwrap();
        let outer = road.section(0).unwrap().lane(-2).unwrap();
        assert_eq!(
            outer.successors(),
            &[LaneLink {
                road: 1,
                section: 1,
                lane: -1,
                contact: ContactPoint::Start
            }]
        );
        // Declared from both sides, stored once.
        let merged = road.section(1).unwrap().lane(-1).unwrap();
        assert_eq!(merged.predecessors().len(), 2);
        assert!(merged.successors().is_empty());
    }

    #[test]
    fn test_road_links_default_contact() {
        let sections = |pred: Option<i32>, succ: Option<i32>| {
            [section(0.0, &[(-1, lane(-1, 3.0, pred, succ))])]
        };
        let map = compile(&document(
            &[
                road(
                    1,
                    (0.0, 0.0),
                    0.0,
                    10.0,
                    None,
                    &link("successor", "road", 2, None),
                    &sections(None, Some(-1)),
                ),
                road(
                    2,
                    (10.0, 0.0),
                    0.0,
                    10.0,
                    None,
                    &link("predecessor", "road", 1, None),
                    &sections(Some(-1), None),
                ),
            ],
            &[],
        ));
        let first = map.road(1).unwrap().section(0).unwrap().lane(-1).unwrap();
        assert_eq!(
            first.successors(),
            &[LaneLink {
                road: 2,
                section: 0,
                lane: -1,
                contact: ContactPoint::Start
            }]
        );
        let second = map.road(2).unwrap().section(0).unwrap().lane(-1).unwrap();
        assert_eq!(
            second.predecessors(),
            &[LaneLink {
                road: 1,
                section: 0,
                lane: -1,
                contact: ContactPoint::End
            }]
        );
    }

    #[test]
    fn test_end_to_end_roads_flip_contact() {
        // Road 2 is drawn backwards: its end touches road 1's end.
        let map = compile(&document(
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
                    std::f64::consts::PI,
                    10.0,
                    None,
                    &link("successor", "road", 1, Some("end")),
                    &[section(0.0, &[(1, lane(1, 3.0, None, Some(-1)))])],
                ),
            ],
            &[],
        ));
        let lane = map.road(2).unwrap().section(0).unwrap().lane(1).unwrap();
        assert_eq!(
            lane.successors(),
            &[LaneLink {
                road: 1,
                section: 0,
                lane: -1,
                contact: ContactPoint::End
            }]
        );
    }

    #[test]
    fn test_junction_links_both_lanes() {
        let map = compile(&fixtures::junction_pair(&[(
            0,
            1,
            2,
            "start",
            &[(1, 1), (-1, -1)][..],
        )]));
        let incoming = map.road(1).unwrap().section(0).unwrap().lane(1).unwrap();
        assert_eq!(
            incoming.successors(),
            &[LaneLink {
                road: 2,
                section: 0,
                lane: 1,
                contact: ContactPoint::Start
            }]
        );
        let connecting = map.road(2).unwrap().section(0).unwrap().lane(-1).unwrap();
        assert_eq!(
            connecting.predecessors(),
            &[LaneLink {
                road: 1,
                section: 0,
                lane: -1,
                contact: ContactPoint::End
            }]
        );
    }

    #[test]
    fn test_duplicate_connection_last_wins() {
        let map = compile(&fixtures::junction_pair(&[
            (0, 1, 2, "start", &[(1, 1)][..]),
            (1, 1, 2, "start", &[(1, -1)][..]),
        ]));
        let incoming = map.road(1).unwrap().section(0).unwrap().lane(1).unwrap();
        assert_eq!(incoming.successors().len(), 1);
        assert_eq!(incoming.successors()[0].lane, -1);
        let stale = map.road(2).unwrap().section(0).unwrap().lane(1).unwrap();
        assert!(stale.predecessors().is_empty());
    }

    #[test]
    fn test_undefined_road_reference_fails() {
        let err = Map::from_xodr(&document(
            &[fixtures::straight_road(
                1,
                10.0,
                3.0,
                None,
                Some(&link("successor", "road", 99, None)),
            )],
            &[],
        ))
        .unwrap_err();
        assert!(matches!(err, MapError::UnresolvedRoad { road: 99, .. }));
    }

    #[test]
    fn test_undefined_junction_reference_fails() {
        let err = Map::from_xodr(&document(
            &[fixtures::straight_road(
                1,
                10.0,
                3.0,
                Some(&link("predecessor", "junction", 5, None)),
                None,
            )],
            &[],
        ))
        .unwrap_err();
        assert!(matches!(err, MapError::UnresolvedJunction { junction: 5, .. }));
    }

    #[test]
    fn test_unresolvable_lane_fails() {
        let err = Map::from_xodr(&fixtures::junction_pair(&[(
            0,
            1,
            2,
            "start",
            &[(-3, -1)][..],
        )]))
        .unwrap_err();
        assert!(matches!(err, MapError::UnresolvedLane { road: 1, lane: -3, .. }));
    }

    #[test]
    fn test_connection_with_undefined_road_fails() {
        let err = Map::from_xodr(&fixtures::junction_pair(&[(
            0,
            1,
            42,
            "start",
            &[(1, 1)][..],
        )]))
        .unwrap_err();
        assert!(matches!(err, MapError::UnresolvedRoad { road: 42, .. }));
    }
}

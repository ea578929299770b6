//! Reads an OpenDRIVE document tree into raw road and junction records
//!
//! The XML tree itself comes from `roxmltree`; this module only walks elements and converts
//! attributes. Geometric validation happens later, when roads are built.

use crate::geometry::{GeometryKind, GeometrySegment, ParamRange};
use crate::junction::{Connection, Junction, LaneLinkRecord};
use crate::lane::{
    Lane, LaneChangeRule, LaneSpeed, LaneType, RoadMark, RoadMarkColor, RoadMarkKind,
};
use crate::map::MapHeader;
use crate::polynomial::{Cubic, PiecewiseCubic};
use crate::road::{ContactPoint, ElementType, RoadLink, RoadRecord, SectionRecord, SpeedRecord};
use crate::{JunctionId, LaneId, MapError, Result, RoadId};
use geo::Coord;
use roxmltree::Node;
use std::str::FromStr;

const MPH_TO_MS: f64 = 0.44704;
const KMH_TO_MS: f64 = 1.0 / 3.6;

/// Everything read from one document
#[derive(Debug)]
pub(crate) struct DocumentRecord {
    pub header: MapHeader,
    pub roads: Vec<RoadRecord>,
    pub junctions: Vec<Junction>,
}

/// Parse document text into records.
pub(crate) fn parse_document(text: &str) -> Result<DocumentRecord> {
    #[cfg(feature = "profiling")]
    profiling::scope!("parser::parse_document");

    let document = roxmltree::Document::parse(text)?;
    let root = document.root_element();
    if root.tag_name().name() != "OpenDRIVE" {
        return Err(MapError::MissingElement {
            element: "OpenDRIVE".to_string(),
            context: "document root".to_string(),
        });
    }

    let header = match child(root, "header") {
        Some(node) => parse_header(node)?,
        None => MapHeader::default(),
    };
    let roads = children(root, "road")
        .map(parse_road)
        .collect::<Result<Vec<_>>>()?;
    let junctions = children(root, "junction")
        .map(parse_junction)
        .collect::<Result<Vec<_>>>()?;

    Ok(DocumentRecord {
        header,
        roads,
        junctions,
    })
}

// ============================================================================
// Node helpers
// ============================================================================

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn require_child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>> {
    child(node, name).ok_or_else(|| MapError::MissingElement {
        element: name.to_string(),
        context: describe(node),
    })
}

fn describe(node: Node) -> String {
    match node.attribute("id") {
        Some(id) => format!("<{} id=\"{id}\">", node.tag_name().name()),
        None => format!("<{}>", node.tag_name().name()),
    }
}

fn invalid(node: Node, attribute: &str, value: &str) -> MapError {
    MapError::InvalidAttribute {
        element: node.tag_name().name().to_string(),
        attribute: attribute.to_string(),
        value: value.to_string(),
    }
}

/// Parse an optional attribute; present but malformed values are an error.
fn opt_attr<T: FromStr>(node: Node, name: &str) -> Result<Option<T>> {
    match node.attribute(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(node, name, raw)),
    }
}

fn attr<T: FromStr>(node: Node, name: &str) -> Result<T> {
    opt_attr(node, name)?.ok_or_else(|| MapError::MissingAttribute {
        element: node.tag_name().name().to_string(),
        attribute: name.to_string(),
    })
}

fn attr_or<T: FromStr>(node: Node, name: &str, default: T) -> Result<T> {
    Ok(opt_attr(node, name)?.unwrap_or(default))
}

fn bool_attr(node: Node, name: &str) -> Result<bool> {
    match node.attribute(name).map(str::trim) {
        None => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(raw) => Err(invalid(node, name, raw)),
    }
}

/// `a b c d` coefficients keyed by the given offset attribute.
fn cubic_record(node: Node, offset: &str) -> Result<(f64, Cubic)> {
    Ok((
        attr(node, offset)?,
        Cubic::new(
            attr(node, "a")?,
            attr(node, "b")?,
            attr(node, "c")?,
            attr(node, "d")?,
        ),
    ))
}

fn profile<'a, 'input: 'a>(
    nodes: impl Iterator<Item = Node<'a, 'input>>,
    offset: &str,
) -> Result<PiecewiseCubic> {
    let records = nodes
        .map(|n| cubic_record(n, offset))
        .collect::<Result<Vec<_>>>()?;
    Ok(PiecewiseCubic::new(records))
}

// ============================================================================
// Header
// ============================================================================

fn parse_header(node: Node) -> Result<MapHeader> {
    Ok(MapHeader {
        rev_major: opt_attr(node, "revMajor")?,
        rev_minor: opt_attr(node, "revMinor")?,
        name: node.attribute("name").map(str::to_string),
        version: node.attribute("version").map(str::to_string),
        north: opt_attr(node, "north")?,
        south: opt_attr(node, "south")?,
        east: opt_attr(node, "east")?,
        west: opt_attr(node, "west")?,
        geo_reference: child(node, "geoReference")
            .and_then(|n| n.text())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
    })
}

// ============================================================================
// Roads
// ============================================================================

fn parse_road(node: Node) -> Result<RoadRecord> {
    let id: RoadId = attr(node, "id")?;
    let length: f64 = attr(node, "length")?;
    let junction: i64 = attr_or(node, "junction", -1)?;
    let junction = JunctionId::try_from(junction).ok();

    let (predecessor, successor) = match child(node, "link") {
        Some(link) => (
            child(link, "predecessor").map(parse_road_link).transpose()?,
            child(link, "successor").map(parse_road_link).transpose()?,
        ),
        None => (None, None),
    };

    let plan_view = require_child(node, "planView")?;
    let geometry = children(plan_view, "geometry")
        .map(parse_geometry)
        .collect::<Result<Vec<_>>>()?;

    let elevation = match child(node, "elevationProfile") {
        Some(p) => profile(children(p, "elevation"), "s")?,
        None => PiecewiseCubic::default(),
    };
    let superelevation = match child(node, "lateralProfile") {
        Some(p) => {
            for other in p
                .children()
                .filter(|n| n.is_element() && n.tag_name().name() != "superelevation")
            {
                tracing::debug!(
                    "Road {id}: ignoring lateral profile element <{}>",
                    other.tag_name().name()
                );
            }
            profile(children(p, "superelevation"), "s")?
        }
        None => PiecewiseCubic::default(),
    };

    let lanes = require_child(node, "lanes")?;
    let lane_offset = profile(children(lanes, "laneOffset"), "s")?;
    let sections = children(lanes, "laneSection")
        .map(|n| parse_section(id, n))
        .collect::<Result<Vec<_>>>()?;

    let speeds = children(node, "type")
        .map(|n| parse_speed(id, n))
        .collect::<Result<Vec<_>>>()?;

    Ok(RoadRecord {
        id,
        name: node.attribute("name").unwrap_or_default().to_string(),
        length,
        junction,
        predecessor,
        successor,
        geometry,
        elevation,
        superelevation,
        lane_offset,
        sections,
        speeds,
    })
}

fn parse_road_link(node: Node) -> Result<RoadLink> {
    let raw_type: String = attr(node, "elementType")?;
    let element_type = match raw_type.as_str() {
        "road" => ElementType::Road,
        "junction" => ElementType::Junction,
        other => return Err(invalid(node, "elementType", other)),
    };
    Ok(RoadLink {
        element_type,
        element_id: attr(node, "elementId")?,
        contact_point: node.attribute("contactPoint").map(ContactPoint::from_name),
    })
}

fn parse_geometry(node: Node) -> Result<GeometrySegment> {
    let shape = node
        .children()
        .find(|n| n.is_element())
        .ok_or_else(|| MapError::MissingElement {
            element: "line|arc|spiral|poly3|paramPoly3".to_string(),
            context: describe(node),
        })?;

    let kind = match shape.tag_name().name() {
        "line" => GeometryKind::Line,
        "arc" => GeometryKind::Arc {
            curvature: attr(shape, "curvature")?,
        },
        "spiral" => GeometryKind::Spiral {
            curv_start: attr(shape, "curvStart")?,
            curv_end: attr(shape, "curvEnd")?,
        },
        "poly3" => GeometryKind::Poly3(coefficients(shape, "")?),
        "paramPoly3" => GeometryKind::ParamPoly3 {
            u: coefficients(shape, "U")?,
            v: coefficients(shape, "V")?,
            range: match shape.attribute("pRange") {
                None | Some("normalized") => ParamRange::Normalized,
                Some("arcLength") => ParamRange::ArcLength,
                Some(other) => return Err(invalid(shape, "pRange", other)),
            },
        },
        other => {
            return Err(MapError::MissingElement {
                element: format!("line|arc|spiral|poly3|paramPoly3 (found <{other}>)"),
                context: describe(node),
            });
        }
    };

    Ok(GeometrySegment::new(
        attr(node, "s")?,
        Coord {
            x: attr(node, "x")?,
            y: attr(node, "y")?,
        },
        attr(node, "hdg")?,
        attr(node, "length")?,
        kind,
    ))
}

/// Coefficients `a{suffix} b{suffix} c{suffix} d{suffix}`.
fn coefficients(node: Node, suffix: &str) -> Result<Cubic> {
    Ok(Cubic::new(
        attr(node, &format!("a{suffix}"))?,
        attr(node, &format!("b{suffix}"))?,
        attr(node, &format!("c{suffix}"))?,
        attr(node, &format!("d{suffix}"))?,
    ))
}

fn parse_speed(road: RoadId, node: Node) -> Result<SpeedRecord> {
    let max_speed = match child(node, "speed") {
        Some(speed) => parse_speed_value(road, speed)?,
        None => None,
    };
    Ok(SpeedRecord {
        s: attr(node, "s")?,
        road_type: node.attribute("type").unwrap_or_default().to_string(),
        max_speed,
    })
}

/// Maximum speed normalised to m/s; `no limit` and `undefined` yield `None`.
fn parse_speed_value(road: RoadId, node: Node) -> Result<Option<f64>> {
    let Some(raw) = node.attribute("max") else {
        return Ok(None);
    };
    if matches!(raw.trim(), "no limit" | "undefined") {
        return Ok(None);
    }
    let max: f64 = attr(node, "max")?;
    let factor = match node.attribute("unit").unwrap_or("m/s") {
        "m/s" => 1.0,
        "km/h" | "kmh" => KMH_TO_MS,
        "mph" => MPH_TO_MS,
        other => {
            tracing::warn!("Road {road}: unknown speed unit '{other}', assuming m/s");
            1.0
        }
    };
    Ok(Some(max * factor))
}

fn parse_section(road: RoadId, node: Node) -> Result<SectionRecord> {
    let mut lanes = Vec::new();
    for (side, positive) in [("left", Some(true)), ("center", None), ("right", Some(false))] {
        let Some(side_node) = child(node, side) else {
            continue;
        };
        for lane_node in children(side_node, "lane") {
            let lane = parse_lane(road, lane_node)?;
            let on_side = match positive {
                Some(true) => lane.id() > 0,
                Some(false) => lane.id() < 0,
                None => lane.id() == 0,
            };
            if !on_side {
                return Err(MapError::InvalidLaneLayout {
                    road,
                    reason: format!("lane {} declared under <{side}>", lane.id()),
                });
            }
            lanes.push(lane);
        }
    }
    Ok(SectionRecord {
        s: attr(node, "s")?,
        lanes,
    })
}

fn parse_lane(road: RoadId, node: Node) -> Result<Lane> {
    let id: LaneId = attr(node, "id")?;
    let type_name = node.attribute("type").unwrap_or("none");
    let lane_type = LaneType::from_name(type_name);
    if lane_type == LaneType::None && !type_name.eq_ignore_ascii_case("none") {
        tracing::warn!("Road {road}: lane {id} has unknown type '{type_name}'");
    }

    let width = profile(children(node, "width"), "sOffset")?;
    if width.is_empty() && id != 0 {
        tracing::warn!("Road {road}: lane {id} has no <width>, using zero width");
    }

    let (predecessor, successor) = match child(node, "link") {
        Some(link) => (
            child(link, "predecessor")
                .map(|n| attr(n, "id"))
                .transpose()?,
            child(link, "successor").map(|n| attr(n, "id")).transpose()?,
        ),
        None => (None, None),
    };

    let road_marks = children(node, "roadMark")
        .map(|mark| parse_road_mark(road, id, mark))
        .collect::<Result<Vec<_>>>()?;
    let speeds = children(node, "speed")
        .map(|speed| {
            Ok(LaneSpeed {
                s_offset: attr_or(speed, "sOffset", 0.0)?,
                max_speed: parse_speed_value(road, speed)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Lane::new(
        id,
        lane_type,
        bool_attr(node, "level")?,
        width,
        predecessor,
        successor,
    )
    .with_road_marks(road_marks)
    .with_speeds(speeds))
}

fn parse_road_mark(road: RoadId, lane: LaneId, node: Node) -> Result<RoadMark> {
    let type_name = node.attribute("type").unwrap_or("none");
    let kind = RoadMarkKind::from_name(type_name).unwrap_or_else(|| {
        tracing::warn!("Road {road}: lane {lane} has unknown road mark type '{type_name}'");
        RoadMarkKind::Custom
    });
    let color_name = node.attribute("color").unwrap_or("standard");
    let color = RoadMarkColor::from_name(color_name).unwrap_or_else(|| {
        tracing::warn!("Road {road}: lane {lane} has unknown road mark color '{color_name}'");
        RoadMarkColor::Standard
    });
    Ok(RoadMark {
        s_offset: attr_or(node, "sOffset", 0.0)?,
        kind,
        color,
        width: opt_attr(node, "width")?,
        lane_change: node
            .attribute("laneChange")
            .map_or(LaneChangeRule::Both, LaneChangeRule::from_name),
    })
}

// ============================================================================
// Junctions
// ============================================================================

fn parse_junction(node: Node) -> Result<Junction> {
    let id: JunctionId = attr(node, "id")?;
    let connections = children(node, "connection")
        .map(parse_connection)
        .collect::<Result<Vec<_>>>()?;
    Ok(Junction::new(
        id,
        node.attribute("name").unwrap_or_default().to_string(),
        connections,
    ))
}

fn parse_connection(node: Node) -> Result<Connection> {
    let lane_links = children(node, "laneLink")
        .map(|n| {
            Ok(LaneLinkRecord {
                from: attr(n, "from")?,
                to: attr(n, "to")?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Connection {
        id: attr(node, "id")?,
        incoming_road: attr(node, "incomingRoad")?,
        connecting_road: attr(node, "connectingRoad")?,
        contact_point: node
            .attribute("contactPoint")
            .map_or(ContactPoint::Start, ContactPoint::from_name),
        lane_links,
    })
}

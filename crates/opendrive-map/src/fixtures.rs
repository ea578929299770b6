//! Small OpenDRIVE document builders shared by unit tests

use crate::{LaneId, RoadId};

pub(crate) fn document(roads: &[String], junctions: &[String]) -> String {
    format!(
        "<?xml version=\"1.0\" standalone=\"yes\"?>\n<OpenDRIVE>\n<header revMajor=\"1\" revMinor=\"4\" name=\"test\"/>\n{}\n{}\n</OpenDRIVE>",
        roads.join("\n"),
        junctions.join("\n")
    )
}

/// `<predecessor>` or `<successor>` road link element.
pub(crate) fn link(tag: &str, element_type: &str, id: u32, contact: Option<&str>) -> String {
    match contact {
        Some(contact) => format!(
            r#"<{tag} elementType="{element_type}" elementId="{id}" contactPoint="{contact}"/>"#
        ),
        None => format!(r#"<{tag} elementType="{element_type}" elementId="{id}"/>"#),
    }
}

/// Driving lane with a constant width and optional lane links.
pub(crate) fn lane(
    id: LaneId,
    width: f64,
    predecessor: Option<LaneId>,
    successor: Option<LaneId>,
) -> String {
    let mut links = String::new();
    if let Some(p) = predecessor {
        links.push_str(&format!(r#"<predecessor id="{p}"/>"#));
    }
    if let Some(s) = successor {
        links.push_str(&format!(r#"<successor id="{s}"/>"#));
    }
    let links = if links.is_empty() {
        links
    } else {
        format!("<link>{links}</link>")
    };
    format!(
        r#"<lane id="{id}" type="driving" level="false">{links}<width sOffset="0" a="{width}" b="0" c="0" d="0"/></lane>"#
    )
}

/// Lane section with a center lane; `lanes` are sorted into left/right by id sign.
pub(crate) fn section(s: f64, lanes: &[(LaneId, String)]) -> String {
    let left: String = lanes
        .iter()
        .filter(|(id, _)| *id > 0)
        .map(|(_, xml)| xml.as_str())
        .collect();
    let right: String = lanes
        .iter()
        .filter(|(id, _)| *id < 0)
        .map(|(_, xml)| xml.as_str())
        .collect();
    format!(
        r#"<laneSection s="{s}"><left>{left}</left><center><lane id="0" type="none"/></center><right>{right}</right></laneSection>"#
    )
}

/// Straight road with one lane on each side and no lane links.
pub(crate) fn straight_road(
    id: RoadId,
    length: f64,
    width: f64,
    predecessor: Option<&str>,
    successor: Option<&str>,
) -> String {
    let links = format!(
        "{}{}",
        predecessor.unwrap_or_default(),
        successor.unwrap_or_default()
    );
    road(
        id,
        (0.0, 0.0),
        0.0,
        length,
        None,
        &links,
        &[section(
            0.0,
            &[(1, lane(1, width, None, None)), (-1, lane(-1, width, None, None))],
        )],
    )
}

/// Road with a single straight geometry.
pub(crate) fn road(
    id: RoadId,
    start: (f64, f64),
    heading: f64,
    length: f64,
    junction: Option<u32>,
    links: &str,
    sections: &[String],
) -> String {
    let junction = junction.map_or(-1, i64::from);
    let link = if links.is_empty() {
        String::new()
    } else {
        format!("<link>{links}</link>")
    };
    format!(
        r#"<road id="{id}" name="road{id}" length="{length}" junction="{junction}">
    {link}
    <type s="0" type="town"><speed max="50" unit="km/h"/></type>
    <planView><geometry s="0" x="{x}" y="{y}" hdg="{heading}" length="{length}"><line/></geometry></planView>
    <lanes>{sections}</lanes>
</road>"#,
        x = start.0,
        y = start.1,
        sections = sections.join("")
    )
}

/// `(id, incoming road, connecting road, contact point, [(from, to)])`
pub(crate) type Connection<'a> = (u32, RoadId, RoadId, &'a str, &'a [(LaneId, LaneId)]);

pub(crate) fn junction(id: u32, connections: &[Connection<'_>]) -> String {
    let body: String = connections
        .iter()
        .map(|(cid, incoming, connecting, contact, links)| {
            let lane_links: String = links
                .iter()
                .map(|(from, to)| format!(r#"<laneLink from="{from}" to="{to}"/>"#))
                .collect();
            format!(
                r#"<connection id="{cid}" incomingRoad="{incoming}" connectingRoad="{connecting}" contactPoint="{contact}">{lane_links}</connection>"#
            )
        })
        .collect();
    format!(r#"<junction id="{id}" name="junction{id}">{body}</junction>"#)
}

fn one_lane_each_side() -> [String; 1] {
    [section(
        0.0,
        &[(1, lane(1, 3.0, None, None)), (-1, lane(-1, 3.0, None, None))],
    )]
}

/// Two 10 m roads joined through junction 100: road 1 ends where connecting road 2 starts.
pub(crate) fn junction_pair(connections: &[Connection<'_>]) -> String {
    document(
        &[
            road(
                1,
                (0.0, 0.0),
                0.0,
                10.0,
                None,
                &link("successor", "junction", 100, None),
                &one_lane_each_side(),
            ),
            road(
                2,
                (10.0, 0.0),
                0.0,
                10.0,
                Some(100),
                &link("predecessor", "road", 1, Some("end")),
                &one_lane_each_side(),
            ),
        ],
        &[junction(100, connections)],
    )
}

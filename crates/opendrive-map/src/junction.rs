//! Junctions and their connections

use crate::road::ContactPoint;
use crate::{JunctionId, LaneId, RoadId};
use geo::Rect;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// `<laneLink from to>` of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneLinkRecord {
    /// Lane of the incoming road
    pub from: LaneId,
    /// Lane of the connecting road
    pub to: LaneId,
}

/// One incoming road attached to one connecting road
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Connection {
    pub id: u32,
    pub incoming_road: RoadId,
    pub connecting_road: RoadId,
    /// End of the connecting road that touches the incoming road
    pub contact_point: ContactPoint,
    pub lane_links: Vec<LaneLinkRecord>,
}

/// A junction, with connections kept in declaration order
#[derive(Debug, Clone)]
pub struct Junction {
    id: JunctionId,
    name: String,
    connections: Vec<Connection>,
    /// Union of the connecting roads' paved areas, filled in by the map assembler
    pub(crate) bounding_box: Option<Rect<f64>>,
}

impl Junction {
    pub fn new(id: JunctionId, name: String, connections: Vec<Connection>) -> Self {
        Self {
            id,
            name,
            connections,
            bounding_box: None,
        }
    }

    pub fn id(&self) -> JunctionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connecting roads, deduplicated, in declaration order.
    pub fn connecting_roads(&self) -> Vec<RoadId> {
        let mut roads: Vec<RoadId> = Vec::new();
        for connection in &self.connections {
            if !roads.contains(&connection.connecting_road) {
                roads.push(connection.connecting_road);
            }
        }
        roads
    }

    /// Connections whose incoming road is `road`.
    pub fn connections_from(&self, road: RoadId) -> impl Iterator<Item = &Connection> + '_ {
        self.connections
            .iter()
            .filter(move |c| c.incoming_road == road)
    }

    pub fn bounding_box(&self) -> Option<Rect<f64>> {
        self.bounding_box
    }
}

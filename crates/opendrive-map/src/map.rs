//! Map - Top-level owner of roads, junctions and the spatial index
//!
//! Compilation runs in stages: parse the document tree, check id uniqueness, build every
//! road independently (in parallel), resolve lane links across roads in one sequential
//! pass, then build per-road quadtrees (in parallel) and merge them. The result is
//! immutable and can be shared freely between query threads.

use crate::config::MapConfig;
use crate::connectivity;
use crate::junction::Junction;
use crate::parser::{DocumentRecord, parse_document};
use crate::quadtree::Quadtree;
use crate::road::Road;
use crate::{JunctionId, MapError, Result, RoadId};
use geo::{Coord, Rect};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Attributes of the `<header>` element
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapHeader {
    pub rev_major: Option<u32>,
    pub rev_minor: Option<u32>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub north: Option<f64>,
    pub south: Option<f64>,
    pub east: Option<f64>,
    pub west: Option<f64>,
    /// Text of `<geoReference>`, usually a PROJ string
    pub geo_reference: Option<String>,
}

/// Counts describing a compiled map
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapSummary {
    pub roads: usize,
    pub junctions: usize,
    pub lane_sections: usize,
    /// Non-center lanes across all sections
    pub lanes: usize,
    /// Sum of road lengths in meters
    pub total_length: f64,
}

/// Compiled road network
#[derive(Debug)]
pub struct Map {
    header: MapHeader,
    roads: BTreeMap<RoadId, Road>,
    junctions: BTreeMap<JunctionId, Junction>,
    pub(crate) index: Quadtree,
    bounding_box: Option<Rect<f64>>,
    config: MapConfig,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Map {
    /// Compile a document with the default configuration.
    pub fn from_xodr(text: &str) -> Result<Self> {
        Self::from_xodr_with_config(text, MapConfig::default())
    }

    /// Compile a document.
    ///
    /// Fails on the first malformed element, geometric inconsistency or unresolved
    /// reference; no partially built map is ever returned.
    pub fn from_xodr_with_config(text: &str, config: MapConfig) -> Result<Self> {
        #[cfg(feature = "profiling")]
        profiling::scope!("map::from_xodr");

        let DocumentRecord {
            header,
            roads,
            junctions,
        } = parse_document(text)?;

        let mut road_ids = BTreeSet::new();
        for road in &roads {
            if !road_ids.insert(road.id) {
                return Err(MapError::DuplicateRoad(road.id));
            }
        }
        let mut junctions_by_id = BTreeMap::new();
        for junction in junctions {
            let id = junction.id();
            if junctions_by_id.insert(id, junction).is_some() {
                return Err(MapError::DuplicateJunction(id));
            }
        }

        let built: Vec<Road> = if config.parallel {
            roads
                .into_par_iter()
                .map(|record| Road::build(record, &config))
                .collect::<Result<_>>()?
        } else {
            roads
                .into_iter()
                .map(|record| Road::build(record, &config))
                .collect::<Result<_>>()?
        };
        let mut roads: BTreeMap<RoadId, Road> =
            built.into_iter().map(|road| (road.id(), road)).collect();

        // Barrier: links cross road boundaries, so every road must be built first.
        let links = connectivity::resolve(&mut roads, &junctions_by_id)?;

        let bounding_box = union(roads.values().map(Road::bounding_box));
        let index = build_index(&roads, bounding_box, &config)?;

        for junction in junctions_by_id.values_mut() {
            junction.bounding_box = union(
                junction
                    .connecting_roads()
                    .iter()
                    .filter_map(|id| roads.get(id))
                    .map(Road::bounding_box),
            );
        }

        let map = Self {
            header,
            roads,
            junctions: junctions_by_id,
            index,
            bounding_box,
            config,
        };
        let summary = map.summary();
        tracing::info!(
            "Compiled map: {} roads ({:.1} m), {} junctions, {} lane sections, {} lanes, {} lane links",
            summary.roads,
            summary.total_length,
            summary.junctions,
            summary.lane_sections,
            summary.lanes,
            links
        );
        Ok(map)
    }

    pub fn header(&self) -> &MapHeader {
        &self.header
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn road(&self, id: RoadId) -> Option<&Road> {
        self.roads.get(&id)
    }

    pub fn junction(&self, id: JunctionId) -> Option<&Junction> {
        self.junctions.get(&id)
    }

    /// Roads in ascending id order.
    pub fn roads(&self) -> impl Iterator<Item = &Road> + '_ {
        self.roads.values()
    }

    /// Junctions in ascending id order.
    pub fn junctions(&self) -> impl Iterator<Item = &Junction> + '_ {
        self.junctions.values()
    }

    /// Bounding box of every road's paved area, `None` for an empty map.
    pub fn bounding_box(&self) -> Option<Rect<f64>> {
        self.bounding_box
    }

    pub fn spatial_index(&self) -> &Quadtree {
        &self.index
    }

    pub fn summary(&self) -> MapSummary {
        let sections = self.roads.values().flat_map(|road| road.sections());
        MapSummary {
            roads: self.roads.len(),
            junctions: self.junctions.len(),
            lane_sections: sections.clone().count(),
            lanes: sections.map(|section| section.lanes().count()).sum(),
            total_length: self.roads.values().map(Road::length).sum(),
        }
    }
}

/// Build one quadtree per road and merge them into a single index.
fn build_index(
    roads: &BTreeMap<RoadId, Road>,
    bounds: Option<Rect<f64>>,
    config: &MapConfig,
) -> Result<Quadtree> {
    #[cfg(feature = "profiling")]
    profiling::scope!("map::build_index");

    let bounds = bounds.unwrap_or(Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }));
    let step = config.step();
    let trees: Vec<Quadtree> = if config.parallel {
        roads
            .par_iter()
            .map(|(_, road)| Quadtree::new_with_road(road, bounds, step))
            .collect()
    } else {
        roads
            .values()
            .map(|road| Quadtree::new_with_road(road, bounds, step))
            .collect()
    };

    let mut index = Quadtree::new(bounds);
    for tree in trees {
        index.merge(tree)?;
    }
    tracing::debug!("Spatial index built: {} trace chunks", index.len());
    Ok(index)
}

fn union(rects: impl Iterator<Item = Rect<f64>>) -> Option<Rect<f64>> {
    rects.reduce(|a, b| {
        Rect::new(
            Coord {
                x: a.min().x.min(b.min().x),
                y: a.min().y.min(b.min().y),
            },
            Coord {
                x: a.max().x.max(b.max().x),
                y: a.max().y.max(b.max().y),
            },
        )
    })
}

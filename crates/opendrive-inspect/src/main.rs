//! Command-line inspector: compile an OpenDRIVE file, print a summary and run queries

mod logging;
mod settings;

use opendrive_map::{Map, MapError, Waypoint};
use settings::Settings;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
enum InspectError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Compilation failed: {0}")]
    Compile(#[from] MapError),

    #[error("No waypoint on road {road} lane {lane} at s={s}")]
    NoWaypoint { road: u32, lane: i32, s: f64 },
}

fn main() -> ExitCode {
    logging::setup_logging();
    let settings = Settings::from_cli();

    match run(&settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(settings: &Settings) -> Result<(), InspectError> {
    #[cfg(feature = "profiling")]
    profiling::scope!("inspect::run");

    let text = std::fs::read_to_string(&settings.file).map_err(|source| InspectError::Read {
        path: settings.file.clone(),
        source,
    })?;

    let start = Instant::now();
    let map = Map::from_xodr_with_config(&text, settings.map_config())?;
    tracing::info!(
        "Compiled {} in {:.1?}",
        settings.file.display(),
        start.elapsed()
    );

    print_summary(&map);

    if settings.roads {
        print_roads(&map);
    }

    if let Some(point) = settings.point() {
        match map.closest_waypoint(point, settings.max_distance) {
            Some(wp) => println!("closest to ({}, {}): {}", point.x, point.y, describe(&wp)),
            None => println!("closest to ({}, {}): none", point.x, point.y),
        }
    }

    if let Some((road, lane, s)) = settings.start() {
        let wp = map
            .waypoint_at(road, lane, s)
            .ok_or(InspectError::NoWaypoint { road, lane, s })?;
        println!("waypoint: {}", describe(&wp));
        let (label, reached) = if settings.advance >= 0.0 {
            ("next", wp.next_waypoints(settings.advance))
        } else {
            ("previous", wp.previous_waypoints(-settings.advance))
        };
        if reached.is_empty() {
            println!("{label} {}: dead end", settings.advance.abs());
        }
        for next in &reached {
            println!("{label} {}: {}", settings.advance.abs(), describe(next));
        }
        if let Some(left) = wp.left() {
            println!("left: {}", describe(&left));
        }
        if let Some(right) = wp.right() {
            println!("right: {}", describe(&right));
        }
    }

    if let Some(spacing) = settings.spacing {
        let waypoints = map.generate_waypoints(spacing);
        println!("road,lane,s,x,y,z,yaw");
        for wp in &waypoints {
            let pose = wp.transform();
            println!(
                "{},{},{:.3},{:.3},{:.3},{:.3},{:.5}",
                wp.road_id(),
                wp.lane_id(),
                wp.s(),
                pose.position.x,
                pose.position.y,
                pose.z,
                pose.yaw
            );
        }
        tracing::info!("Generated {} waypoints every {spacing} m", waypoints.len());
    }

    if settings.topology {
        for (from, to) in map.topology() {
            println!(
                "road {} lane {} -> road {} lane {} ({:?})",
                from.road_id(),
                from.lane_id(),
                to.road_id(),
                to.lane_id(),
                to.direction()
            );
        }
    }

    Ok(())
}

fn print_summary(map: &Map) {
    let summary = map.summary();
    let header = map.header();
    if let Some(name) = &header.name {
        println!("name: {name}");
    }
    if let (Some(major), Some(minor)) = (header.rev_major, header.rev_minor) {
        println!("revision: {major}.{minor}");
    }
    println!(
        "roads: {} ({:.1} m), junctions: {}, lane sections: {}, lanes: {}",
        summary.roads, summary.total_length, summary.junctions, summary.lane_sections, summary.lanes
    );
    if let Some(bbox) = map.bounding_box() {
        println!(
            "bounds: ({:.2}, {:.2}) - ({:.2}, {:.2})",
            bbox.min().x,
            bbox.min().y,
            bbox.max().x,
            bbox.max().y
        );
    }
}

fn print_roads(map: &Map) {
    for road in map.roads() {
        let link = |link: Option<&opendrive_map::RoadLink>| match link {
            Some(l) => format!("{:?} {}", l.element_type, l.element_id),
            None => "-".to_string(),
        };
        println!(
            "road {} '{}': {:.2} m, {} sections, junction {}, predecessor {}, successor {}",
            road.id(),
            road.name(),
            road.length(),
            road.sections().len(),
            road.junction().map_or("-".to_string(), |j| j.to_string()),
            link(road.predecessor()),
            link(road.successor())
        );
    }
}

fn describe(wp: &Waypoint<'_>) -> String {
    let pose = wp.transform();
    format!(
        "road {} lane {} s={:.3} at ({:.3}, {:.3}, {:.3}) yaw={:.4} width={:.2} {:?} lane change {:?}{}",
        wp.road_id(),
        wp.lane_id(),
        wp.s(),
        pose.position.x,
        pose.position.y,
        pose.z,
        pose.yaw,
        wp.lane_width(),
        wp.direction(),
        wp.lane_change(),
        wp.junction_id()
            .map_or(String::new(), |j| format!(" in junction {j}"))
    )
}

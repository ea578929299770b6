use clap::Parser;
use geo::Coord;
use opendrive_map::{LaneId, MapConfig, RoadId};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// OpenDRIVE Inspect - Compile an OpenDRIVE road network and query its lane graph
pub struct Settings {
    /// OpenDRIVE (.xodr) file to compile
    #[clap(value_name = "FILE")]
    pub file: PathBuf,

    /// Largest gap or overlap accepted between consecutive geometries, in meters
    #[clap(long, default_value = "0.001")]
    pub tolerance: f64,

    /// Arc-length step used to sample reference lines for the spatial index, in meters
    #[clap(long, default_value = "1.0")]
    pub sampling_step: f64,

    /// Build roads on a single thread
    #[clap(long, default_value = "false")]
    pub sequential: bool,

    /// List every road with its length, lane sections and links
    #[clap(long, default_value = "false")]
    pub roads: bool,

    /// Find the closest driving lane to this point
    #[clap(long, num_args = 2, value_names = ["X", "Y"], allow_negative_numbers = true)]
    pub point: Option<Vec<f64>>,

    /// Ignore lanes farther than this from --point, in meters
    #[clap(long)]
    pub max_distance: Option<f64>,

    /// Road of the waypoint to start from (requires --lane and --s)
    #[clap(long, requires_all = ["lane", "s"])]
    pub road: Option<RoadId>,

    /// Lane of the waypoint to start from
    #[clap(long, allow_negative_numbers = true)]
    pub lane: Option<LaneId>,

    /// Arc length of the waypoint to start from
    #[clap(long)]
    pub s: Option<f64>,

    /// Distance to travel from the waypoint; negative values walk backwards
    #[clap(long, default_value = "10.0", allow_negative_numbers = true)]
    pub advance: f64,

    /// Print one waypoint every N meters along every driving lane
    #[clap(long, value_name = "N")]
    pub spacing: Option<f64>,

    /// Print every link between driving lanes
    #[clap(long, default_value = "false")]
    pub topology: bool,
}

impl Settings {
    pub fn from_cli() -> Self {
        Self::parse()
    }

    /// Compilation settings derived from the command line.
    pub fn map_config(&self) -> MapConfig {
        MapConfig {
            geometry_tolerance: self.tolerance,
            sampling_step: self.sampling_step,
            parallel: !self.sequential,
            ..MapConfig::default()
        }
    }

    pub fn point(&self) -> Option<Coord<f64>> {
        match self.point.as_deref() {
            Some([x, y]) => Some(Coord { x: *x, y: *y }),
            _ => None,
        }
    }

    /// `(road, lane, s)` of the requested start waypoint.
    pub fn start(&self) -> Option<(RoadId, LaneId, f64)> {
        Some((self.road?, self.lane?, self.s?))
    }
}

//! Quadtree spatial index over sampled reference lines
//!
//! Each road contributes a trace: its reference line sampled at a fixed arc-length step,
//! together with a lateral margin wide enough to cover every lane of the road. Traces are
//! stored at the deepest node that still contains them whole, and chunked at node
//! boundaries on the way down, so a query returns only the stretches of road (as arc-length
//! ranges) that come close to the queried rectangle.

use crate::road::Road;
use crate::{MapError, Result, RoadId};
use geo::{Coord, Rect};

/// Maximum depth of the quadtree to prevent infinite recursion
const MAX_DEPTH: u32 = 16;

/// Minimum number of samples required to recurse into children
const MIN_POINTS_FOR_RECURSION: usize = 8;

/// A sampled stretch of one road's reference line
#[derive(Debug, Clone)]
struct RawTrace {
    road: RoadId,
    points: Vec<Coord<f64>>,
    /// Arc length of each point, ascending
    offsets: Vec<f64>,
    /// Largest lateral distance from the reference line to any lane edge, plus slack
    margin: f64,
}

/// Stretch of road returned by [`Quadtree::query`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceHit {
    pub road: RoadId,
    pub s_start: f64,
    pub s_end: f64,
}

/// Root container for the spatial index
#[derive(Debug, Clone)]
pub struct Quadtree {
    root: QuadtreeNode,
    /// Largest trace margin stored anywhere in the tree
    margin: f64,
}

#[derive(Debug, Clone)]
struct QuadtreeNode {
    bounding_box: Rect<f64>,
    /// Depth level in the tree (0 = root)
    level: u32,
    traces: Vec<RawTrace>,
    /// Child nodes (NW, NE, SW, SE) if subdivided
    children: Option<Box<[QuadtreeNode; 4]>>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Quadtree {
    /// Create an empty quadtree covering `bounds`, grown to a square around its center.
    pub fn new(bounds: Rect<f64>) -> Self {
        let center = bounds.center();
        let half = 0.5 * bounds.width().max(bounds.height()).max(1.0);
        let delta = Coord { x: half, y: half };
        Self {
            root: QuadtreeNode::new(Rect::new(center - delta, center + delta), 0),
            margin: 0.0,
        }
    }

    /// Build a quadtree holding a single road.
    ///
    /// This can be called in parallel for every road and the results merged.
    pub fn new_with_road(road: &Road, bounds: Rect<f64>, step: f64) -> Self {
        let mut quadtree = Self::new(bounds);
        let line = road.reference_line();
        let offsets = line.sample_offsets(step);
        let points: Vec<Coord<f64>> = offsets
            .iter()
            .map(|&s| line.evaluate(s).position)
            .collect();
        let margin = offsets
            .iter()
            .map(|&s| road.lateral_extent(s))
            .fold(0.0_f64, f64::max)
            + step;

        quadtree.margin = margin;
        quadtree.root.insert(RawTrace {
            road: road.id(),
            points,
            offsets,
            margin,
        });
        quadtree
    }

    /// Merge another quadtree into this one
    ///
    /// Both quadtrees must cover the same bounds.
    pub fn merge(&mut self, other: Quadtree) -> Result<()> {
        self.margin = self.margin.max(other.margin);
        self.root.merge_with(other.root)
    }

    /// Stretches of road whose lanes may reach into `rect`.
    ///
    /// The result is conservative: every lane point inside `rect` lies on a returned stretch,
    /// but a stretch may also cover points outside it.
    pub fn query(&self, rect: Rect<f64>) -> Vec<TraceHit> {
        let mut raw = Vec::new();
        self.root
            .query_traces(inflate(rect, self.margin), rect, &mut raw);
        raw.into_iter()
            .filter_map(|trace| {
                Some(TraceHit {
                    road: trace.road,
                    s_start: *trace.offsets.first()?,
                    s_end: *trace.offsets.last()?,
                })
            })
            .collect()
    }

    pub fn bounds(&self) -> Rect<f64> {
        self.root.bounding_box
    }

    /// Number of trace chunks stored in the tree.
    pub fn len(&self) -> usize {
        self.root.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QuadtreeNode {
    fn new(bounding_box: Rect<f64>, level: u32) -> Self {
        Self {
            bounding_box,
            level,
            traces: Vec::new(),
            children: None,
        }
    }

    /// Subdivide this node into 4 children
    fn subdivide(&mut self) {
        if self.children.is_some() {
            return;
        }

        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let mid_x = (min.x + max.x) / 2.0;
        let mid_y = (min.y + max.y) / 2.0;
        let level = self.level + 1;

        let nw = Self::new(
            Rect::new(Coord { x: min.x, y: mid_y }, Coord { x: mid_x, y: max.y }),
            level,
        );
        let ne = Self::new(
            Rect::new(Coord { x: mid_x, y: mid_y }, Coord { x: max.x, y: max.y }),
            level,
        );
        let sw = Self::new(
            Rect::new(Coord { x: min.x, y: min.y }, Coord { x: mid_x, y: mid_y }),
            level,
        );
        let se = Self::new(
            Rect::new(Coord { x: mid_x, y: min.y }, Coord { x: max.x, y: mid_y }),
            level,
        );

        self.children = Some(Box::new([nw, ne, sw, se]));
    }

    /// Insert a trace, chunking it at child boundaries while it spans several children.
    fn insert(&mut self, trace: RawTrace) {
        let bounds = inflate(self.bounding_box, trace.margin);
        if !polyline_intersects_rect(&trace.points, bounds) {
            return;
        }

        // Children narrower than the margin would all receive the same samples.
        let should_recurse = self.level < MAX_DEPTH
            && trace.points.len() >= MIN_POINTS_FOR_RECURSION
            && self.bounding_box.width() > 2.0 * trace.margin
            && self.spans_multiple_children(&trace.points);

        if should_recurse {
            self.subdivide();
            if let Some(children) = &mut self.children {
                for child in children.iter_mut() {
                    for run in child.extract_runs(&trace) {
                        child.insert(run);
                    }
                }
            }
        } else {
            self.traces.push(trace);
        }
    }

    /// Contiguous runs of `trace` that touch this node's (inflated) bounds.
    ///
    /// A point is kept when it lies inside the bounds or when one of its adjacent
    /// polyline segments crosses them, so runs keep the segments that enter and leave.
    fn extract_runs(&self, trace: &RawTrace) -> Vec<RawTrace> {
        let bounds = inflate(self.bounding_box, trace.margin);
        let points = &trace.points;
        let mut runs = Vec::new();
        let mut current: Option<(usize, usize)> = None;

        for i in 0..points.len() {
            let keep = contains(bounds, points[i])
                || (i > 0 && line_intersects_rect(points[i - 1], points[i], bounds))
                || (i + 1 < points.len() && line_intersects_rect(points[i], points[i + 1], bounds));
            match (keep, current) {
                (true, Some((start, _))) => current = Some((start, i)),
                (true, None) => current = Some((i, i)),
                (false, Some(run)) => {
                    runs.push(run);
                    current = None;
                }
                (false, None) => {}
            }
        }
        runs.extend(current);

        runs.into_iter()
            .map(|(start, end)| RawTrace {
                road: trace.road,
                points: points[start..=end].to_vec(),
                offsets: trace.offsets[start..=end].to_vec(),
                margin: trace.margin,
            })
            .collect()
    }

    /// Check if a trace spans multiple children of this node
    fn spans_multiple_children(&self, points: &[Coord<f64>]) -> bool {
        let min = self.bounding_box.min();
        let max = self.bounding_box.max();
        let mid_x = (min.x + max.x) / 2.0;
        let mid_y = (min.y + max.y) / 2.0;

        let mut quadrants = [false; 4]; // NW, NE, SW, SE
        for point in points {
            let is_east = point.x >= mid_x;
            let is_north = point.y >= mid_y;
            match (is_east, is_north) {
                (false, true) => quadrants[0] = true,
                (true, true) => quadrants[1] = true,
                (false, false) => quadrants[2] = true,
                (true, false) => quadrants[3] = true,
            }
        }
        quadrants.iter().filter(|&&q| q).count() > 1
    }

    /// Merge another node into this one
    fn merge_with(&mut self, other: QuadtreeNode) -> Result<()> {
        if self.level != other.level {
            return Err(MapError::MergeMismatch {
                reason: format!(
                    "Node levels do not match: {} vs {}",
                    self.level, other.level
                ),
            });
        }

        let (a, b) = (self.bounding_box, other.bounding_box);
        let bbox_eq = (a.min().x - b.min().x).abs() < 1e-6
            && (a.min().y - b.min().y).abs() < 1e-6
            && (a.max().x - b.max().x).abs() < 1e-6
            && (a.max().y - b.max().y).abs() < 1e-6;
        if !bbox_eq {
            return Err(MapError::MergeMismatch {
                reason: "Node bounding boxes do not match".to_string(),
            });
        }

        self.traces.extend(other.traces);

        match (&mut self.children, other.children) {
            (_, None) => {}
            (None, Some(other_children)) => self.children = Some(other_children),
            (Some(self_children), Some(other_children)) => {
                for (self_child, other_child) in
                    self_children.iter_mut().zip(other_children.into_iter())
                {
                    self_child.merge_with(other_child)?;
                }
            }
        }
        Ok(())
    }

    /// Collect traces near `rect`; `culling` is `rect` grown by the largest trace margin.
    fn query_traces<'a>(
        &'a self,
        culling: Rect<f64>,
        rect: Rect<f64>,
        results: &mut Vec<&'a RawTrace>,
    ) {
        if !rects_intersect(self.bounding_box, culling) {
            return;
        }

        for trace in &self.traces {
            if polyline_intersects_rect(&trace.points, inflate(rect, trace.margin)) {
                results.push(trace);
            }
        }

        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query_traces(culling, rect, results);
            }
        }
    }

    fn count(&self) -> usize {
        self.traces.len()
            + self
                .children
                .as_ref()
                .map_or(0, |children| children.iter().map(Self::count).sum())
    }
}

fn inflate(rect: Rect<f64>, margin: f64) -> Rect<f64> {
    let delta = Coord {
        x: margin,
        y: margin,
    };
    Rect::new(rect.min() - delta, rect.max() + delta)
}

fn contains(rect: Rect<f64>, p: Coord<f64>) -> bool {
    let (min, max) = (rect.min(), rect.max());
    p.x >= min.x && p.x <= max.x && p.y >= min.y && p.y <= max.y
}

fn rects_intersect(a: Rect<f64>, b: Rect<f64>) -> bool {
    !(a.max().x < b.min().x || a.min().x > b.max().x || a.max().y < b.min().y || a.min().y > b.max().y)
}

/// Check if a polyline has a point inside `rect` or a segment crossing it
fn polyline_intersects_rect(points: &[Coord<f64>], rect: Rect<f64>) -> bool {
    points.iter().any(|&p| contains(rect, p))
        || points
            .windows(2)
            .any(|pair| line_intersects_rect(pair[0], pair[1], rect))
}

/// Check if a line segment intersects a rectangle
fn line_intersects_rect(p1: Coord<f64>, p2: Coord<f64>, rect: Rect<f64>) -> bool {
    let min = rect.min();
    let max = rect.max();

    // Cohen-Sutherland outcodes
    let outcode = |p: Coord<f64>| -> u8 {
        let mut code = 0u8;
        if p.x < min.x {
            code |= 1;
        }
        if p.x > max.x {
            code |= 2;
        }
        if p.y < min.y {
            code |= 4;
        }
        if p.y > max.y {
            code |= 8;
        }
        code
    };

    let code1 = outcode(p1);
    let code2 = outcode(p2);
    if code1 == 0 || code2 == 0 {
        return true;
    }
    if code1 & code2 != 0 {
        return false;
    }

    let corner = |x: f64, y: f64| Coord { x, y };
    let edges = [
        (corner(min.x, min.y), corner(min.x, max.y)), // left
        (corner(max.x, min.y), corner(max.x, max.y)), // right
        (corner(min.x, min.y), corner(max.x, min.y)), // bottom
        (corner(min.x, max.y), corner(max.x, max.y)), // top
    ];
    edges
        .into_iter()
        .any(|(e1, e2)| segments_intersect(p1, p2, e1, e2))
}

/// Check if two line segments intersect
fn segments_intersect(p1: Coord<f64>, p2: Coord<f64>, p3: Coord<f64>, p4: Coord<f64>) -> bool {
    let d1 = direction(p3, p4, p1);
    let d2 = direction(p3, p4, p2);
    let d3 = direction(p1, p2, p3);
    let d4 = direction(p1, p2, p4);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(p3, p4, p1))
        || (d2 == 0.0 && on_segment(p3, p4, p2))
        || (d3 == 0.0 && on_segment(p1, p2, p3))
        || (d4 == 0.0 && on_segment(p1, p2, p4))
}

/// Cross product direction
fn direction(p1: Coord<f64>, p2: Coord<f64>, p3: Coord<f64>) -> f64 {
    (p3.x - p1.x) * (p2.y - p1.y) - (p2.x - p1.x) * (p3.y - p1.y)
}

/// Check if point p is on segment (p1, p2)
fn on_segment(p1: Coord<f64>, p2: Coord<f64>, p: Coord<f64>) -> bool {
    p.x >= p1.x.min(p2.x) && p.x <= p1.x.max(p2.x) && p.y >= p1.y.min(p2.y) && p.y <= p1.y.max(p2.y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MapConfig;
    use crate::fixtures::{document, straight_road};
    use crate::parser::parse_document;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Rect<f64> {
        Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 })
    }

    fn build_road(length: f64) -> Road {
        let doc = parse_document(&document(
            &[straight_road(7, length, 3.0, None, None)],
            &[],
        ))
        .unwrap();
        let record = doc.roads.into_iter().next().unwrap();
        Road::build(record, &MapConfig::default()).unwrap()
    }

    #[test]
    fn test_quadtree_creation() {
        let quadtree = Quadtree::new(rect(0.0, 0.0, 100.0, 20.0));
        assert!(quadtree.is_empty());
        assert_eq!(quadtree.bounds(), rect(0.0, -40.0, 100.0, 60.0));
        assert!(quadtree.root.children.is_none());
        assert!(quadtree.query(rect(0.0, 0.0, 10.0, 10.0)).is_empty());
    }

    #[test]
    fn test_node_subdivide() {
        let mut node = QuadtreeNode::new(rect(0.0, 0.0, 100.0, 100.0), 0);
        node.subdivide();
        let children = node.children.as_ref().unwrap();
        assert_eq!(children.len(), 4);
        for child in children.iter() {
            assert_eq!(child.level, 1);
            assert_eq!(child.bounding_box.width(), 50.0);
        }
    }

    #[test]
    fn test_line_intersects_rect() {
        let r = rect(0.0, 0.0, 10.0, 10.0);
        let c = |x, y| Coord { x, y };
        assert!(line_intersects_rect(c(2.0, 2.0), c(8.0, 8.0), r));
        assert!(line_intersects_rect(c(-5.0, 5.0), c(15.0, 5.0), r));
        assert!(line_intersects_rect(c(-5.0, 5.0), c(5.0, 5.0), r));
        assert!(!line_intersects_rect(c(20.0, 20.0), c(30.0, 30.0), r));
        // Diagonal passing the corner
        assert!(!line_intersects_rect(c(-1.0, 12.0), c(12.0, 11.0), r));
    }

    #[test]
    fn test_spans_multiple_children() {
        let node = QuadtreeNode::new(rect(0.0, 0.0, 100.0, 100.0), 0);
        let c = |x, y| Coord { x, y };
        assert!(!node.spans_multiple_children(&[c(10.0, 10.0), c(20.0, 20.0)]));
        assert!(node.spans_multiple_children(&[c(10.0, 10.0), c(60.0, 10.0)]));
    }

    #[test]
    fn test_query_returns_nearby_stretch() {
        let road = build_road(200.0);
        let bounds = road.bounding_box();
        let quadtree = Quadtree::new_with_road(&road, bounds, 1.0);
        assert!(quadtree.len() > 1, "long road should be chunked");

        let hits = quadtree.query(rect(150.0, -1.0, 151.0, 1.0));
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.road == 7));
        assert!(hits.iter().any(|h| h.s_start <= 150.0 && h.s_end >= 151.0));
        // Chunking keeps results local
        assert!(hits.iter().all(|h| h.s_end - h.s_start < 200.0));

        // Lanes reach 3 m to either side of the reference line
        assert!(!quadtree.query(rect(50.0, 2.5, 51.0, 2.9)).is_empty());
        assert!(quadtree.query(rect(50.0, 20.0, 51.0, 21.0)).is_empty());
    }

    #[test]
    fn test_merge() {
        let road = build_road(50.0);
        let bounds = rect(-10.0, -10.0, 60.0, 60.0);
        let mut merged = Quadtree::new(bounds);
        merged
            .merge(Quadtree::new_with_road(&road, bounds, 1.0))
            .unwrap();
        assert!(!merged.is_empty());
        assert!(!merged.query(rect(20.0, -1.0, 21.0, 1.0)).is_empty());

        let other = Quadtree::new(rect(0.0, 0.0, 1.0, 1.0));
        assert!(matches!(
            merged.merge(other),
            Err(MapError::MergeMismatch { .. })
        ));
    }
}

//! Parametric geometry primitives of the road plan view
//!
//! Every primitive is evaluated by arc length `ds` measured from its own start and returns the
//! planar pose on the curve. Primitives are a closed enum so evaluation stays exhaustive.

use crate::polynomial::Cubic;
use geo::Coord;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest integration step (meters) used for spirals and cubic arc lengths
const MAX_INTEGRATION_STEP: f64 = 0.25;

/// Largest heading change (radians) allowed per integration step
const MAX_HEADING_STEP: f64 = 0.05;

/// Upper bound on Simpson intervals for a single integral
const MAX_INTEGRATION_STEPS: usize = 4096;

/// Newton iterations when inverting the arc length of a cubic
const MAX_NEWTON_ITERATIONS: usize = 32;

/// Parameter range of a parametric cubic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ParamRange {
    /// `p` runs over `[0, length]`
    ArcLength,
    /// `p` runs over `[0, 1]`
    #[default]
    Normalized,
}

/// Variant-specific parameters of a geometry segment
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum GeometryKind {
    Line,
    Arc {
        curvature: f64,
    },
    /// Clothoid with curvature varying linearly over the segment length
    Spiral {
        curv_start: f64,
        curv_end: f64,
    },
    /// Lateral offset `v(u)` over the local longitudinal axis `u`
    Poly3(Cubic),
    ParamPoly3 {
        u: Cubic,
        v: Cubic,
        range: ParamRange,
    },
}

/// Planar pose on a curve
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pose2 {
    pub position: Coord<f64>,
    /// Heading in radians, counter-clockwise from the x axis
    pub heading: f64,
    /// Signed curvature (1/m), positive when turning left
    pub curvature: f64,
}

/// A single `<geometry>` record of a road's plan view
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GeometrySegment {
    /// Start offset along the road reference line
    pub s: f64,
    /// Start position
    pub start: Coord<f64>,
    /// Start heading in radians
    pub heading: f64,
    pub length: f64,
    pub kind: GeometryKind,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl GeometrySegment {
    pub fn new(s: f64, start: Coord<f64>, heading: f64, length: f64, kind: GeometryKind) -> Self {
        Self {
            s,
            start,
            heading,
            length,
            kind,
        }
    }

    /// Road offset where this segment ends
    pub fn end_s(&self) -> f64 {
        self.s + self.length
    }

    /// Largest absolute curvature reached on the segment (cubics are sampled).
    pub fn max_curvature(&self) -> f64 {
        match &self.kind {
            GeometryKind::Line => 0.0,
            GeometryKind::Arc { curvature } => curvature.abs(),
            GeometryKind::Spiral {
                curv_start,
                curv_end,
            } => curv_start.abs().max(curv_end.abs()),
            GeometryKind::Poly3(_) | GeometryKind::ParamPoly3 { .. } => (0..=16)
                .map(|i| self.eval(self.length * i as f64 / 16.0).curvature.abs())
                .fold(0.0, f64::max),
        }
    }

    /// Evaluate the pose at `ds` meters from the segment start.
    ///
    /// `ds` is clamped to `[0, length]`; callers are responsible for selecting the right segment.
    pub fn eval(&self, ds: f64) -> Pose2 {
        let ds = ds.clamp(0.0, self.length.max(0.0));
        match &self.kind {
            GeometryKind::Line => self.eval_line(ds),
            GeometryKind::Arc { curvature } => self.eval_arc(ds, *curvature),
            GeometryKind::Spiral {
                curv_start,
                curv_end,
            } => self.eval_spiral(ds, *curv_start, *curv_end),
            GeometryKind::Poly3(poly) => self.eval_poly3(ds, poly),
            GeometryKind::ParamPoly3 { u, v, range } => self.eval_param_poly3(ds, u, v, *range),
        }
    }

    fn eval_line(&self, ds: f64) -> Pose2 {
        let (sin, cos) = self.heading.sin_cos();
        Pose2 {
            position: Coord {
                x: self.start.x + ds * cos,
                y: self.start.y + ds * sin,
            },
            heading: self.heading,
            curvature: 0.0,
        }
    }

    fn eval_arc(&self, ds: f64, curvature: f64) -> Pose2 {
        if curvature.abs() < 1e-12 {
            return self.eval_line(ds);
        }
        let radius = 1.0 / curvature;
        let heading = self.heading + ds * curvature;
        // Rotate the start point around the arc center.
        Pose2 {
            position: Coord {
                x: self.start.x + radius * (heading.sin() - self.heading.sin()),
                y: self.start.y - radius * (heading.cos() - self.heading.cos()),
            },
            heading,
            curvature,
        }
    }

    fn eval_spiral(&self, ds: f64, curv_start: f64, curv_end: f64) -> Pose2 {
        let rate = if self.length > 0.0 {
            (curv_end - curv_start) / self.length
        } else {
            0.0
        };
        let heading_at = |u: f64| self.heading + curv_start * u + 0.5 * rate * u * u;

        let max_curv = curv_start.abs().max(curv_end.abs());
        let steps = integration_steps(ds, max_curv);
        let dx = simpson(|u| heading_at(u).cos(), ds, steps);
        let dy = simpson(|u| heading_at(u).sin(), ds, steps);

        Pose2 {
            position: Coord {
                x: self.start.x + dx,
                y: self.start.y + dy,
            },
            heading: heading_at(ds),
            curvature: curv_start + rate * ds,
        }
    }

    fn eval_poly3(&self, ds: f64, poly: &Cubic) -> Pose2 {
        // Arc length is at least u, so ds bounds the abscissa.
        let steps = integration_steps(ds, poly.bend(0.0).abs().max(poly.bend(ds).abs()));
        let u = invert_arc_length(ds, ds, ds, steps, |u| poly.slope(u).hypot(1.0));

        let slope = poly.slope(u);
        let curvature = poly.bend(u) / (1.0 + slope * slope).powf(1.5);
        Pose2 {
            position: self.local_to_global(u, poly.value(u)),
            heading: self.heading + slope.atan(),
            curvature,
        }
    }

    fn eval_param_poly3(&self, ds: f64, u: &Cubic, v: &Cubic, range: ParamRange) -> Pose2 {
        let upper = match range {
            ParamRange::ArcLength => self.length,
            ParamRange::Normalized => 1.0,
        };
        let guess = if self.length > 0.0 {
            upper * ds / self.length
        } else {
            0.0
        };
        let p = invert_arc_length(ds, upper, guess, integration_steps(ds, 0.0), |p| {
            u.slope(p).hypot(v.slope(p))
        });

        let (du, dv) = (u.slope(p), v.slope(p));
        let (ddu, ddv) = (u.bend(p), v.bend(p));
        let speed_sq = du * du + dv * dv;
        let curvature = if speed_sq > 1e-18 {
            (du * ddv - dv * ddu) / speed_sq.powf(1.5)
        } else {
            0.0
        };
        let tangent = if speed_sq > 1e-18 { dv.atan2(du) } else { 0.0 };

        Pose2 {
            position: self.local_to_global(u.value(p), v.value(p)),
            heading: self.heading + tangent,
            curvature,
        }
    }

    /// Map local `(u, v)` coordinates (u along the start heading, v to its left) to the plane.
    fn local_to_global(&self, u: f64, v: f64) -> Coord<f64> {
        let (sin, cos) = self.heading.sin_cos();
        Coord {
            x: self.start.x + u * cos - v * sin,
            y: self.start.y + u * sin + v * cos,
        }
    }
}

/// Even number of Simpson intervals for integrating over `length` with the given curvature.
fn integration_steps(length: f64, max_curvature: f64) -> usize {
    let mut step = MAX_INTEGRATION_STEP;
    if max_curvature > 0.0 {
        step = step.min(MAX_HEADING_STEP / max_curvature);
    }
    let n = (length / step).ceil();
    let n = if n.is_finite() {
        (n as usize).clamp(8, MAX_INTEGRATION_STEPS)
    } else {
        MAX_INTEGRATION_STEPS
    };
    n + n % 2
}

/// Composite Simpson rule of `f` over `[0, upper]` with `steps` (even) intervals.
fn simpson(f: impl Fn(f64) -> f64, upper: f64, steps: usize) -> f64 {
    if upper <= 0.0 {
        return 0.0;
    }
    let h = upper / steps as f64;
    let mut sum = f(0.0) + f(upper);
    for i in 1..steps {
        let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
        sum += weight * f(i as f64 * h);
    }
    sum * h / 3.0
}

/// Find the parameter in `[0, upper]` at which the curve has travelled `ds`.
///
/// `speed` is the derivative of arc length with respect to the parameter. Newton steps start
/// from `guess` and fall back to bisection whenever they leave the bracket.
fn invert_arc_length(
    ds: f64,
    upper: f64,
    guess: f64,
    steps: usize,
    speed: impl Fn(f64) -> f64,
) -> f64 {
    if ds <= 0.0 || upper <= 0.0 {
        return 0.0;
    }
    let arc_length = |p: f64| simpson(&speed, p, steps);
    if arc_length(upper) <= ds {
        return upper;
    }

    let (mut lo, mut hi) = (0.0, upper);
    let mut p = guess.clamp(0.0, upper);
    for _ in 0..MAX_NEWTON_ITERATIONS {
        let error = arc_length(p) - ds;
        if error.abs() < 1e-10 {
            break;
        }
        if error > 0.0 {
            hi = p;
        } else {
            lo = p;
        }
        let next = p - error / speed(p);
        p = if next > lo && next < hi {
            next
        } else {
            0.5 * (lo + hi)
        };
    }
    p
}

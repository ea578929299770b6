//! Cubic polynomials and piecewise profiles keyed by arc length

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// `a + b·ds + c·ds² + d·ds³`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Cubic {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Cubic {
    pub const fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self { a, b, c, d }
    }

    pub const fn constant(a: f64) -> Self {
        Self::new(a, 0.0, 0.0, 0.0)
    }

    #[inline]
    pub fn value(&self, ds: f64) -> f64 {
        self.a + ds * (self.b + ds * (self.c + ds * self.d))
    }

    /// First derivative.
    #[inline]
    pub fn slope(&self, ds: f64) -> f64 {
        self.b + ds * (2.0 * self.c + ds * 3.0 * self.d)
    }

    /// Second derivative.
    #[inline]
    pub fn bend(&self, ds: f64) -> f64 {
        2.0 * self.c + 6.0 * self.d * ds
    }
}

/// One polynomial piece, valid from `start` until the next piece's start.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct Piece {
    start: f64,
    poly: Cubic,
}

/// Ordered sequence of cubic pieces. An empty profile evaluates to zero everywhere.
///
/// Used for elevation, superelevation, lane offset and lane width records.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PiecewiseCubic {
    pieces: Vec<Piece>,
}

impl PiecewiseCubic {
    /// Build from `(start, polynomial)` records. Records are stably sorted by start, so
    /// equal starts keep their declaration order and the last one shadows the others.
    pub fn new(mut records: Vec<(f64, Cubic)>) -> Self {
        records.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            pieces: records
                .into_iter()
                .map(|(start, poly)| Piece { start, poly })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    /// Start offsets of all pieces, in order.
    pub fn starts(&self) -> impl Iterator<Item = f64> + '_ {
        self.pieces.iter().map(|p| p.start)
    }

    /// Piece in force at `s`, with the local offset into it. Offsets before the first
    /// piece are clamped to its start.
    fn locate(&self, s: f64) -> Option<(&Piece, f64)> {
        let idx = self.pieces.partition_point(|p| p.start <= s);
        let piece = self.pieces.get(idx.saturating_sub(1))?;
        Some((piece, (s - piece.start).max(0.0)))
    }

    pub fn value(&self, s: f64) -> f64 {
        self.locate(s).map_or(0.0, |(p, ds)| p.poly.value(ds))
    }

    pub fn slope(&self, s: f64) -> f64 {
        self.locate(s).map_or(0.0, |(p, ds)| p.poly.slope(ds))
    }
}

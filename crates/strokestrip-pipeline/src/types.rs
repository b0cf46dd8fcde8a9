//! Shared types for the strokestrip consolidation pipeline.

use std::collections::BTreeMap;
use std::ops::{Add, Div, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::correspond::CorrespondenceKind;
use crate::orient::ClusterOrientation;
use crate::parameterize::ClusterParameterization;

/// Identifier of the cluster a stroke was assigned to by the (external)
/// spatial clustering step.
pub type ClusterId = i32;

/// A 2D point (or vector) in capture or normalized coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
}

impl Point {
    /// The origin.
    pub const ZERO: Self = Self::new(0.0, 0.0);

    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Dot product, treating both points as vectors.
    #[must_use]
    pub fn dot(self, other: Self) -> f64 {
        self.x.mul_add(other.x, self.y * other.y)
    }

    /// Z component of the 3D cross product.
    #[must_use]
    pub fn cross(self, other: Self) -> f64 {
        self.x.mul_add(other.y, -(self.y * other.x))
    }

    /// Vector length.
    #[must_use]
    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Unit vector in the same direction, or `None` for a (near) zero
    /// vector.
    #[must_use]
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        (len > f64::EPSILON).then(|| self / len)
    }

    /// Linear interpolation: `self` at `t = 0`, `other` at `t = 1`.
    #[must_use]
    pub fn lerp(self, other: Self, t: f64) -> Self {
        Self::new(
            (other.x - self.x).mul_add(t, self.x),
            (other.y - self.y).mul_add(t, self.y),
        )
    }

    /// Whether both coordinates are finite.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Point {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

impl Mul<f64> for Point {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f64> for Point {
    type Output = Self;

    fn div(self, rhs: f64) -> Self {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum corner.
    pub min: Point,
    /// Maximum corner.
    pub max: Point,
}

impl BoundingBox {
    /// Bounding box of a set of points, or `None` when the set is empty.
    #[must_use]
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let mut bbox = Self {
            min: first,
            max: first,
        };
        for &p in iter {
            bbox.include(p);
        }
        Some(bbox)
    }

    /// Grow the box to contain `p`.
    pub fn include(&mut self, p: Point) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
    }

    /// Smallest box containing both boxes.
    #[must_use]
    pub fn union(mut self, other: Self) -> Self {
        self.include(other.min);
        self.include(other.max);
        self
    }

    /// Center of the box.
    #[must_use]
    pub fn center(&self) -> Point {
        self.min.lerp(self.max, 0.5)
    }

    /// Horizontal extent.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    /// Vertical extent.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }
}

/// A sequence of connected points forming a path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Polyline(Vec<Point>);

impl Polyline {
    /// Create a new polyline from a vector of points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the polyline has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the polyline.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the first point, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Point> {
        self.0.first()
    }

    /// Returns the last point, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Point> {
        self.0.last()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Consumes the polyline and returns the underlying vector of points.
    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.0
    }

    /// The same path traversed in the opposite direction.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self(self.0.iter().rev().copied().collect())
    }

    /// Total length of the path.
    #[must_use]
    pub fn arc_length(&self) -> f64 {
        self.0.windows(2).map(|w| w[0].distance(w[1])).sum()
    }

    /// Arc length from the first point to every point (first entry is 0).
    #[must_use]
    pub fn cumulative_arc_length(&self) -> Vec<f64> {
        crate::geometry::cumulative_arc_length(&self.0)
    }

    /// Axis-aligned bounding box, or `None` for an empty polyline.
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(&self.0)
    }
}

/// Canvas dimensions of the original drawing surface.
///
/// Only used to size debug renderings; the algorithms never read it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in capture units.
    pub width: u32,
    /// Height in capture units.
    pub height: u32,
}

/// One recorded pen sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Pen position in capture units.
    pub position: Point,
    /// Capture timestamp.
    pub time: f64,
}

impl Sample {
    /// Create a new sample.
    #[must_use]
    pub const fn new(x: f64, y: f64, time: f64) -> Self {
        Self {
            position: Point::new(x, y),
            time,
        }
    }
}

/// A polyline as recorded by the capture device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchedPolyline {
    /// Cluster this polyline was assigned to.
    pub cluster: ClusterId,
    /// Samples in drawing order.
    pub samples: Vec<Sample>,
}

/// Raw recorded drawing, as produced by an external loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    /// Pen stroke thickness in capture units. Must be positive.
    pub thickness: f64,
    /// Size of the drawing surface.
    #[serde(default)]
    pub canvas: Dimensions,
    /// Recorded polylines.
    pub polylines: Vec<SketchedPolyline>,
}

impl Capture {
    /// Reject captures that no stage can work with.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidThickness`] if the thickness is not
    /// a positive finite number, [`PipelineError::EmptyCapture`] if no
    /// polyline carries any sample, and [`PipelineError::NonFiniteSample`]
    /// for NaN or infinite coordinates.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.thickness.is_finite() && self.thickness > 0.0) {
            return Err(PipelineError::InvalidThickness(self.thickness));
        }
        if self.polylines.iter().all(|p| p.samples.is_empty()) {
            return Err(PipelineError::EmptyCapture);
        }
        for (polyline, p) in self.polylines.iter().enumerate() {
            if let Some(sample) = p.samples.iter().position(|s| !s.position.is_finite()) {
                return Err(PipelineError::NonFiniteSample { polyline, sample });
            }
        }
        Ok(())
    }
}

/// Traversal decision made for one stroke by the orientation resolver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    /// Whether the stroke's points were reversed relative to capture order.
    pub reversed: bool,
    /// Agreement of the stroke with the rest of its cluster in `[-1, 1]`.
    ///
    /// 1.0 means every informative pair agrees with the decision, 0.0
    /// means no pair carried a usable signal.
    pub confidence: f64,
}

impl Orientation {
    /// Whether the decision is too weak to be trusted.
    #[must_use]
    pub fn is_uncertain(&self, min_confidence: f64) -> bool {
        self.confidence < min_confidence
    }
}

/// A normalized stroke: positions in stroke-width units plus one `u`
/// value per position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    source_index: usize,
    polyline: Polyline,
    u: Vec<f64>,
    orientation: Option<Orientation>,
}

impl Stroke {
    /// Create a stroke with `u` zeroed and no orientation decision.
    #[must_use]
    pub fn new(source_index: usize, polyline: Polyline) -> Self {
        let u = vec![0.0; polyline.len()];
        Self {
            source_index,
            polyline,
            u,
            orientation: None,
        }
    }

    /// Index of the capture polyline this stroke was built from.
    #[must_use]
    pub const fn source_index(&self) -> usize {
        self.source_index
    }

    /// The stroke geometry.
    #[must_use]
    pub const fn polyline(&self) -> &Polyline {
        &self.polyline
    }

    /// Positions in traversal order.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        self.polyline.points()
    }

    /// Number of points.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.polyline.len()
    }

    /// Whether the stroke has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.polyline.is_empty()
    }

    /// Parameter values, parallel to [`points`](Self::points).
    #[must_use]
    pub fn u(&self) -> &[f64] {
        &self.u
    }

    /// Orientation decision, `None` until the resolver has run.
    #[must_use]
    pub const fn orientation(&self) -> Option<Orientation> {
        self.orientation
    }

    /// Apply an orientation decision, reversing points and `u` when the
    /// decision says so.
    #[must_use]
    pub fn oriented(&self, orientation: Orientation) -> Self {
        let (polyline, u) = if orientation.reversed {
            (
                self.polyline.reversed(),
                self.u.iter().rev().copied().collect(),
            )
        } else {
            (self.polyline.clone(), self.u.clone())
        };
        Self {
            source_index: self.source_index,
            polyline,
            u,
            orientation: Some(orientation),
        }
    }

    /// Replace the parameter values when the caller already guarantees
    /// one value per point.
    pub(crate) fn replace_u(&self, u: Vec<f64>) -> Self {
        debug_assert_eq!(u.len(), self.polyline.len(), "one u value per point");
        Self {
            source_index: self.source_index,
            polyline: self.polyline.clone(),
            u,
            orientation: self.orientation,
        }
    }

    /// Replace the parameter values.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ParameterLength`] when `u` does not have
    /// one value per point.
    pub fn with_u(&self, u: Vec<f64>) -> Result<Self, PipelineError> {
        if u.len() != self.polyline.len() {
            return Err(PipelineError::ParameterLength {
                expected: self.polyline.len(),
                actual: u.len(),
            });
        }
        Ok(self.replace_u(u))
    }
}

/// Strokes believed to depict one intended curve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Member strokes, in capture order.
    pub strokes: Vec<Stroke>,
}

impl Cluster {
    /// Create a cluster from its strokes.
    #[must_use]
    pub const fn new(strokes: Vec<Stroke>) -> Self {
        Self { strokes }
    }

    /// Total number of points across all strokes.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.strokes.iter().map(Stroke::len).sum()
    }
}

/// The working object threaded through every stage: clusters of
/// normalized strokes plus global scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    /// Clusters keyed by cluster id.
    pub clusters: BTreeMap<ClusterId, Cluster>,
    /// Stroke thickness in normalized units (always 1.0).
    pub thickness: f64,
    /// Width of the bounding box of all strokes, in stroke widths.
    pub width: f64,
    /// Height of the bounding box of all strokes, in stroke widths.
    pub height: f64,
    /// Canvas of the originating capture, for renderers.
    pub canvas: Dimensions,
}

impl Input {
    /// Number of strokes across all clusters.
    #[must_use]
    pub fn stroke_count(&self) -> usize {
        self.clusters.values().map(|c| c.strokes.len()).sum()
    }

    /// Number of points across all clusters.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.clusters.values().map(Cluster::point_count).sum()
    }

    /// A copy of the global scalars around a new set of clusters.
    #[must_use]
    pub const fn with_clusters(&self, clusters: BTreeMap<ClusterId, Cluster>) -> Self {
        Self {
            clusters,
            thickness: self.thickness,
            width: self.width,
            height: self.height,
            canvas: self.canvas,
        }
    }

    /// Iterate over every stroke together with its cluster id.
    pub fn strokes(&self) -> impl Iterator<Item = (ClusterId, &Stroke)> {
        self.clusters
            .iter()
            .flat_map(|(&id, c)| c.strokes.iter().map(move |s| (id, s)))
    }
}

/// Configuration for the consolidation pipeline.
///
/// Distances are expressed in stroke widths, i.e. in normalized units,
/// except `resample_spacing` which is a multiple of the capture
/// thickness (the two coincide after normalization).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Arc-length spacing used when resampling raw polylines, as a
    /// multiple of the capture thickness.
    pub resample_spacing: f64,

    /// How point correspondences between strokes are established.
    pub correspondence: CorrespondenceKind,

    /// Matches farther apart than this are ignored.
    pub max_correspondence_distance: f64,

    /// Strokes whose orientation confidence falls below this are flagged
    /// as uncertain.
    pub min_orientation_confidence: f64,

    /// Clusters with at most this many strokes get an exact orientation
    /// solve; larger ones use spanning-tree propagation plus local search.
    pub exhaustive_orientation_limit: usize,

    /// Weight of cross-stroke alignment terms relative to the
    /// within-stroke arc-length terms.
    pub alignment_weight: f64,
}

impl PipelineConfig {
    /// Default for [`resample_spacing`](Self::resample_spacing).
    pub const DEFAULT_RESAMPLE_SPACING: f64 = 3.0;
    /// Default for [`max_correspondence_distance`](Self::max_correspondence_distance).
    pub const DEFAULT_MAX_CORRESPONDENCE_DISTANCE: f64 = 10.0;
    /// Default for [`min_orientation_confidence`](Self::min_orientation_confidence).
    pub const DEFAULT_MIN_ORIENTATION_CONFIDENCE: f64 = 0.25;
    /// Default for [`exhaustive_orientation_limit`](Self::exhaustive_orientation_limit).
    pub const DEFAULT_EXHAUSTIVE_ORIENTATION_LIMIT: usize = 12;
    /// Default for [`alignment_weight`](Self::alignment_weight).
    pub const DEFAULT_ALIGNMENT_WEIGHT: f64 = 1.0;
    /// Hard upper bound on the exhaustive solver (2^(n-1) assignments).
    pub const MAX_EXHAUSTIVE_ORIENTATION_LIMIT: usize = 20;

    /// Check the configuration for values no stage can honor.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.resample_spacing.is_finite() && self.resample_spacing > 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "resample_spacing must be positive, got {}",
                self.resample_spacing,
            )));
        }
        if !(self.max_correspondence_distance.is_finite() && self.max_correspondence_distance > 0.0)
        {
            return Err(PipelineError::InvalidConfig(format!(
                "max_correspondence_distance must be positive, got {}",
                self.max_correspondence_distance,
            )));
        }
        if !(-1.0..=1.0).contains(&self.min_orientation_confidence) {
            return Err(PipelineError::InvalidConfig(format!(
                "min_orientation_confidence must lie in [-1, 1], got {}",
                self.min_orientation_confidence,
            )));
        }
        if self.exhaustive_orientation_limit > Self::MAX_EXHAUSTIVE_ORIENTATION_LIMIT {
            return Err(PipelineError::InvalidConfig(format!(
                "exhaustive_orientation_limit must be at most {}, got {}",
                Self::MAX_EXHAUSTIVE_ORIENTATION_LIMIT,
                self.exhaustive_orientation_limit,
            )));
        }
        if !(self.alignment_weight.is_finite() && self.alignment_weight >= 0.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "alignment_weight must be non-negative, got {}",
                self.alignment_weight,
            )));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resample_spacing: Self::DEFAULT_RESAMPLE_SPACING,
            correspondence: CorrespondenceKind::default(),
            max_correspondence_distance: Self::DEFAULT_MAX_CORRESPONDENCE_DISTANCE,
            min_orientation_confidence: Self::DEFAULT_MIN_ORIENTATION_CONFIDENCE,
            exhaustive_orientation_limit: Self::DEFAULT_EXHAUSTIVE_ORIENTATION_LIMIT,
            alignment_weight: Self::DEFAULT_ALIGNMENT_WEIGHT,
        }
    }
}

/// Result of running the full pipeline.
///
/// `input` holds the oriented, parameterized strokes; the two maps are
/// read-only diagnostic snapshots keyed by cluster id that renderers and
/// callers use to spot degraded clusters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    /// Clusters of oriented, parameterized strokes.
    pub input: Input,
    /// Orientation decisions per cluster.
    pub orientation: BTreeMap<ClusterId, ClusterOrientation>,
    /// Parameterization outcome per cluster.
    pub parameterization: BTreeMap<ClusterId, ClusterParameterization>,
}

impl ProcessResult {
    /// Ids of clusters where either stage had to fall back.
    #[must_use]
    pub fn degraded_clusters(&self, min_confidence: f64) -> Vec<ClusterId> {
        self.input
            .clusters
            .iter()
            .filter(|(id, cluster)| {
                let uncertain = cluster.strokes.iter().any(|s| {
                    s.orientation()
                        .is_some_and(|o| o.is_uncertain(min_confidence))
                });
                let degraded = self
                    .parameterization
                    .get(id)
                    .is_some_and(ClusterParameterization::is_degraded);
                uncertain || degraded
            })
            .map(|(&id, _)| id)
            .collect()
    }
}

/// Errors that can occur during pipeline processing.
///
/// Only input validation fails; per-cluster degradations are reported
/// through [`ProcessResult`] instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The capture thickness is zero, negative, or not finite.
    #[error("stroke thickness must be positive, got {0}")]
    InvalidThickness(f64),

    /// The capture has no samples at all.
    #[error("capture contains no samples")]
    EmptyCapture,

    /// A sample coordinate is NaN or infinite.
    #[error("polyline {polyline} sample {sample} has a non-finite coordinate")]
    NonFiniteSample {
        /// Index of the offending polyline.
        polyline: usize,
        /// Index of the offending sample within the polyline.
        sample: usize,
    },

    /// A parameter sequence does not match its stroke.
    #[error("expected {expected} parameter values, got {actual}")]
    ParameterLength {
        /// Number of points in the stroke.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

/// Serde-compatible proxy for `PipelineError`.
///
/// `thiserror` enums do not derive serde, so the error is mirrored
/// variant-for-variant to cross a worker or process boundary.
#[derive(Serialize, Deserialize)]
enum PipelineErrorProxy {
    InvalidThickness(f64),
    EmptyCapture,
    NonFiniteSample { polyline: usize, sample: usize },
    ParameterLength { expected: usize, actual: usize },
    InvalidConfig(String),
}

impl Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::InvalidThickness(t) => PipelineErrorProxy::InvalidThickness(*t),
            Self::EmptyCapture => PipelineErrorProxy::EmptyCapture,
            Self::NonFiniteSample { polyline, sample } => PipelineErrorProxy::NonFiniteSample {
                polyline: *polyline,
                sample: *sample,
            },
            Self::ParameterLength { expected, actual } => PipelineErrorProxy::ParameterLength {
                expected: *expected,
                actual: *actual,
            },
            Self::InvalidConfig(s) => PipelineErrorProxy::InvalidConfig(s.clone()),
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PipelineError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = PipelineErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            PipelineErrorProxy::InvalidThickness(t) => Self::InvalidThickness(t),
            PipelineErrorProxy::EmptyCapture => Self::EmptyCapture,
            PipelineErrorProxy::NonFiniteSample { polyline, sample } => {
                Self::NonFiniteSample { polyline, sample }
            }
            PipelineErrorProxy::ParameterLength { expected, actual } => {
                Self::ParameterLength { expected, actual }
            }
            PipelineErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // --- Point tests ---

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance_squared(b) - 25.0).abs() < f64::EPSILON);
        assert!((a.distance(b) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn point_arithmetic() {
        let a = Point::new(1.0, 2.0);
        let b = Point::new(3.0, 5.0);
        assert_eq!(a + b, Point::new(4.0, 7.0));
        assert_eq!(b - a, Point::new(2.0, 3.0));
        assert_eq!(-a, Point::new(-1.0, -2.0));
        assert_eq!(a * 2.0, Point::new(2.0, 4.0));
        assert_eq!(b / 2.0, Point::new(1.5, 2.5));
    }

    #[test]
    fn point_dot_and_cross() {
        let x = Point::new(1.0, 0.0);
        let y = Point::new(0.0, 1.0);
        assert!(x.dot(y).abs() < f64::EPSILON);
        assert!((x.cross(y) - 1.0).abs() < f64::EPSILON);
        assert!((y.cross(x) + 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn point_normalized() {
        let n = Point::new(3.0, 4.0).normalized().unwrap();
        assert!((n.length() - 1.0).abs() < 1e-12);
        assert!(Point::ZERO.normalized().is_none());
    }

    #[test]
    fn point_lerp() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(10.0, -4.0);
        assert_eq!(a.lerp(b, 0.5), Point::new(5.0, -2.0));
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
    }

    // --- Polyline / bounding box tests ---

    #[test]
    fn polyline_reversed_and_length() {
        let pl = Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(3.0, 4.0),
            Point::new(3.0, 5.0),
        ]);
        let rev = pl.reversed();
        assert_eq!(rev.first(), pl.last());
        assert_eq!(rev.last(), pl.first());
        assert!((pl.arc_length() - 6.0).abs() < 1e-12);
        assert!((rev.arc_length() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn bounding_box_of_points() {
        let pts = [
            Point::new(1.0, -2.0),
            Point::new(-3.0, 4.0),
            Point::new(5.0, 0.0),
        ];
        let bbox = BoundingBox::from_points(&pts).unwrap();
        assert_eq!(bbox.min, Point::new(-3.0, -2.0));
        assert_eq!(bbox.max, Point::new(5.0, 4.0));
        assert_eq!(bbox.center(), Point::new(1.0, 1.0));
        assert!((bbox.width() - 8.0).abs() < f64::EPSILON);
        assert!((bbox.height() - 6.0).abs() < f64::EPSILON);
        assert!(BoundingBox::from_points(&[]).is_none());
    }

    #[test]
    fn bounding_box_union() {
        let a = BoundingBox::from_points(&[Point::new(0.0, 0.0)]).unwrap();
        let b = BoundingBox::from_points(&[Point::new(2.0, -1.0)]).unwrap();
        let u = a.union(b);
        assert_eq!(u.min, Point::new(0.0, -1.0));
        assert_eq!(u.max, Point::new(2.0, 0.0));
    }

    // --- Capture validation ---

    fn capture(thickness: f64, samples: Vec<Sample>) -> Capture {
        Capture {
            thickness,
            canvas: Dimensions::default(),
            polylines: vec![SketchedPolyline {
                cluster: 0,
                samples,
            }],
        }
    }

    #[test]
    fn capture_rejects_bad_thickness() {
        let s = vec![Sample::new(0.0, 0.0, 0.0)];
        assert!(matches!(
            capture(0.0, s.clone()).validate(),
            Err(PipelineError::InvalidThickness(_))
        ));
        assert!(matches!(
            capture(-1.0, s.clone()).validate(),
            Err(PipelineError::InvalidThickness(_))
        ));
        assert!(matches!(
            capture(f64::NAN, s).validate(),
            Err(PipelineError::InvalidThickness(_))
        ));
    }

    #[test]
    fn capture_rejects_empty() {
        assert!(matches!(
            capture(1.0, vec![]).validate(),
            Err(PipelineError::EmptyCapture)
        ));
        let none = Capture {
            thickness: 1.0,
            canvas: Dimensions::default(),
            polylines: vec![],
        };
        assert!(matches!(none.validate(), Err(PipelineError::EmptyCapture)));
    }

    #[test]
    fn capture_rejects_non_finite() {
        let s = vec![Sample::new(0.0, 0.0, 0.0), Sample::new(f64::NAN, 1.0, 1.0)];
        assert!(matches!(
            capture(1.0, s).validate(),
            Err(PipelineError::NonFiniteSample {
                polyline: 0,
                sample: 1
            })
        ));
    }

    // --- Stroke tests ---

    #[test]
    fn stroke_starts_unoriented_with_zero_u() {
        let s = Stroke::new(
            4,
            Polyline::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)]),
        );
        assert_eq!(s.source_index(), 4);
        assert_eq!(s.u(), &[0.0, 0.0]);
        assert!(s.orientation().is_none());
    }

    #[test]
    fn stroke_oriented_reverses_points_and_u() {
        let s = Stroke::new(
            0,
            Polyline::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)]),
        )
        .with_u(vec![0.0, 1.0])
        .unwrap();
        let flipped = s.oriented(Orientation {
            reversed: true,
            confidence: 1.0,
        });
        assert_eq!(flipped.points()[0], Point::new(1.0, 0.0));
        assert_eq!(flipped.u(), &[1.0, 0.0]);
        assert!(flipped.orientation().unwrap().reversed);
    }

    #[test]
    fn stroke_with_u_rejects_wrong_length() {
        let s = Stroke::new(0, Polyline::new(vec![Point::new(0.0, 0.0)]));
        assert!(matches!(
            s.with_u(vec![0.0, 1.0]),
            Err(PipelineError::ParameterLength {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn orientation_uncertain_threshold() {
        let o = Orientation {
            reversed: false,
            confidence: 0.1,
        };
        assert!(o.is_uncertain(0.25));
        assert!(!o.is_uncertain(0.05));
    }

    // --- ProcessResult tests ---

    fn result_with(fallback_components: usize) -> ProcessResult {
        let stroke = Stroke::new(
            0,
            Polyline::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)]),
        );
        ProcessResult {
            input: Input {
                clusters: BTreeMap::from([(7, Cluster::new(vec![stroke]))]),
                thickness: 1.0,
                width: 1.0,
                height: 0.0,
                canvas: Dimensions::default(),
            },
            orientation: BTreeMap::new(),
            parameterization: BTreeMap::from([(
                7,
                ClusterParameterization {
                    status: crate::parameterize::ParameterizationStatus::Joint,
                    components: 2,
                    fallback_components,
                    alignment_terms: 4,
                    isolated_strokes: 0,
                    residual: 0.0,
                    pairs: Vec::new(),
                },
            )]),
        }
    }

    #[test]
    fn degraded_clusters_include_failed_components() {
        assert!(result_with(0).degraded_clusters(0.25).is_empty());
        assert_eq!(result_with(1).degraded_clusters(0.25), vec![7]);
    }

    // --- PipelineConfig tests ---

    #[test]
    fn pipeline_config_defaults() {
        let config = PipelineConfig::default();
        assert!((config.resample_spacing - 3.0).abs() < f64::EPSILON);
        assert_eq!(config.correspondence, CorrespondenceKind::NearestSegment);
        assert!((config.max_correspondence_distance - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.exhaustive_orientation_limit, 12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn pipeline_config_rejects_invalid_values() {
        let bad = [
            PipelineConfig {
                resample_spacing: 0.0,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                max_correspondence_distance: -1.0,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                min_orientation_confidence: 2.0,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                exhaustive_orientation_limit: 64,
                ..PipelineConfig::default()
            },
            PipelineConfig {
                alignment_weight: f64::NAN,
                ..PipelineConfig::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(PipelineError::InvalidConfig(_))),
                "{config:?} should be rejected",
            );
        }
    }

    #[test]
    fn pipeline_config_partial_json_uses_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "alignment_weight": 2.5 }"#).unwrap();
        assert!((config.alignment_weight - 2.5).abs() < f64::EPSILON);
        assert!((config.resample_spacing - 3.0).abs() < f64::EPSILON);
    }

    // --- PipelineError tests ---

    #[test]
    fn error_display() {
        assert_eq!(
            PipelineError::EmptyCapture.to_string(),
            "capture contains no samples",
        );
        assert_eq!(
            PipelineError::InvalidThickness(-2.0).to_string(),
            "stroke thickness must be positive, got -2",
        );
    }

    #[test]
    fn pipeline_error_serde_round_trip() {
        let err = PipelineError::NonFiniteSample {
            polyline: 3,
            sample: 7,
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: PipelineError = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            PipelineError::NonFiniteSample {
                polyline: 3,
                sample: 7
            }
        ));
    }

    #[test]
    fn capture_json_without_canvas() {
        let json = r#"{
            "thickness": 2.0,
            "polylines": [
                { "cluster": 1, "samples": [
                    { "position": { "x": 0.0, "y": 0.0 }, "time": 0.0 }
                ] }
            ]
        }"#;
        let capture: Capture = serde_json::from_str(json).unwrap();
        assert_eq!(capture.canvas, Dimensions::default());
        assert_eq!(capture.polylines[0].cluster, 1);
    }
}

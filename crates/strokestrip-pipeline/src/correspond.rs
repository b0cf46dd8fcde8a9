//! Point correspondences between strokes of one cluster.
//!
//! Both the orientation resolver and the joint parameterizer need to know
//! which place on stroke B a given point of stroke A lies next to. This
//! module defines the [`CorrespondenceRule`] trait for pluggable matching
//! strategies and the [`CorrespondenceKind`] enum for runtime selection.
//!
//! Every rule works the same way at the top level: all stroke segments of
//! the cluster go into an R\*-tree, and for every point of every stroke
//! the nearest segment of each *other* stroke is looked up. Matches
//! farther than the configured cutoff are discarded, so strokes that only
//! partly overlap only correspond where they actually overlap.

use geo::{Closest, ClosestPoint, Line};
use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde::{Deserialize, Serialize};

use crate::geometry::{segment_direction, tangent_at};
use crate::types::{Cluster, Point};

/// Selects how a point is matched against another stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CorrespondenceKind {
    /// Project onto the nearest segment of the other stroke. The match
    /// carries the interpolation parameter along that segment.
    #[default]
    NearestSegment,

    /// Snap to the nearer endpoint of the nearest segment, i.e. match
    /// point-to-point without interpolation.
    NearestVertex,
}

/// One point-to-stroke correspondence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Stroke index (within the cluster) of the query point.
    pub from_stroke: usize,
    /// Point index within `from_stroke`.
    pub from_point: usize,
    /// Stroke index of the matched stroke.
    pub to_stroke: usize,
    /// Segment index within `to_stroke` (from point `to_segment` to
    /// `to_segment + 1`).
    pub to_segment: usize,
    /// Position along the segment in `[0, 1]`.
    pub t: f64,
    /// Matched position on `to_stroke`.
    pub position: Point,
    /// Distance between the query point and `position`.
    pub distance: f64,
    /// Whether the query point projects outside the segment, so the match
    /// was clamped to one of its ends. Snapping to a vertex does not count.
    pub clamped: bool,
}

impl Match {
    /// Linear falloff weight: 1 at zero distance, 0 at `max_distance`.
    #[must_use]
    pub fn proximity(&self, max_distance: f64) -> f64 {
        if max_distance <= 0.0 {
            return 0.0;
        }
        (1.0 - self.distance / max_distance).clamp(0.0, 1.0)
    }

    /// Cosine between the query point's tangent and the matched segment's
    /// direction, both in current traversal order.
    ///
    /// Positive when the two strokes run the same way at this match.
    #[must_use]
    pub fn tangent_agreement(&self, cluster: &Cluster) -> f64 {
        let (Some(from), Some(to)) = (
            cluster.strokes.get(self.from_stroke),
            cluster.strokes.get(self.to_stroke),
        ) else {
            return 0.0;
        };
        tangent_at(from.points(), self.from_point)
            .dot(segment_direction(to.points(), self.to_segment))
    }
}

/// Trait for correspondence strategies.
pub trait CorrespondenceRule {
    /// Find, for every point of every stroke, the nearest location on each
    /// other stroke of the cluster within `max_distance`.
    fn correspond(&self, cluster: &Cluster, max_distance: f64) -> Vec<Match>;
}

impl CorrespondenceRule for CorrespondenceKind {
    fn correspond(&self, cluster: &Cluster, max_distance: f64) -> Vec<Match> {
        let snap = matches!(self, Self::NearestVertex);
        nearest_matches(cluster, max_distance, snap)
    }
}

/// Identifies a segment within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SegmentId {
    stroke: usize,
    segment: usize,
}

type IndexedSegment = GeomWithData<Line<f64>, SegmentId>;

/// Hard cap on nearest-neighbor iterations per query point. Own-stroke
/// segments are skipped without counting towards a result, so a tightly
/// curled stroke could otherwise scan far.
const MAX_NN_ITERATIONS: usize = 256;

const fn point_to_coord(p: Point) -> geo::Coord<f64> {
    geo::Coord { x: p.x, y: p.y }
}

const fn coord_to_point(c: geo::Coord<f64>) -> Point {
    Point::new(c.x, c.y)
}

fn closest_coord_on_line(line: &Line<f64>, query: &geo::Point<f64>) -> geo::Coord<f64> {
    match line.closest_point(query) {
        Closest::Intersection(p) | Closest::SinglePoint(p) => p.into(),
        Closest::Indeterminate => line.start,
    }
}

/// Parameter of `p` projected onto the line through `a -> b`, unclamped.
fn segment_parameter(a: Point, b: Point, p: Point) -> f64 {
    let d = b - a;
    let len_sq = d.dot(d);
    if len_sq <= f64::EPSILON {
        return 0.0;
    }
    (p - a).dot(d) / len_sq
}

fn nearest_matches(cluster: &Cluster, max_distance: f64, snap: bool) -> Vec<Match> {
    let strokes = &cluster.strokes;
    if strokes.len() < 2 || max_distance.is_nan() || max_distance <= 0.0 {
        return Vec::new();
    }

    let segments: Vec<IndexedSegment> = strokes
        .iter()
        .enumerate()
        .flat_map(|(si, stroke)| {
            let pts = stroke.points();
            (0..pts.len().saturating_sub(1)).map(move |seg| {
                GeomWithData::new(
                    Line::new(point_to_coord(pts[seg]), point_to_coord(pts[seg + 1])),
                    SegmentId {
                        stroke: si,
                        segment: seg,
                    },
                )
            })
        })
        .collect();
    let tree = RTree::bulk_load(segments);

    let mut matches = Vec::new();
    let mut seen = vec![false; strokes.len()];

    for (from_stroke, stroke) in strokes.iter().enumerate() {
        for (from_point, &p) in stroke.points().iter().enumerate() {
            seen.fill(false);
            seen[from_stroke] = true;
            let query = geo::Point::new(p.x, p.y);

            for (iterations, candidate) in tree.nearest_neighbor_iter(&query).enumerate() {
                if iterations >= MAX_NN_ITERATIONS {
                    break;
                }
                let id = candidate.data;
                if seen[id.stroke] {
                    continue;
                }
                let line = candidate.geom();
                let closest = coord_to_point(closest_coord_on_line(line, &query));
                let distance = p.distance(closest);
                // The iterator yields segments by increasing distance, so
                // nothing later can be within range either.
                if distance > max_distance {
                    break;
                }
                seen[id.stroke] = true;

                let a = coord_to_point(line.start);
                let b = coord_to_point(line.end);
                let projected = segment_parameter(a, b, p);
                let mut t = segment_parameter(a, b, closest).clamp(0.0, 1.0);
                let mut position = closest;
                let mut dist = distance;
                if snap {
                    t = t.round();
                    position = if t < 0.5 { a } else { b };
                    dist = p.distance(position);
                    if dist > max_distance {
                        continue;
                    }
                }
                matches.push(Match {
                    from_stroke,
                    from_point,
                    to_stroke: id.stroke,
                    to_segment: id.segment,
                    t,
                    position,
                    distance: dist,
                    clamped: !(0.0..=1.0).contains(&projected),
                });
            }
        }
    }

    matches
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Polyline, Stroke};

    fn stroke(coords: &[(f64, f64)]) -> Stroke {
        Stroke::new(
            0,
            Polyline::new(coords.iter().map(|&(x, y)| Point::new(x, y)).collect()),
        )
    }

    fn horizontal(y: f64, x0: f64, x1: f64, n: usize) -> Stroke {
        #[allow(clippy::cast_precision_loss)]
        let coords: Vec<(f64, f64)> = (0..n)
            .map(|i| {
                let t = i as f64 / (n - 1) as f64;
                ((x1 - x0).mul_add(t, x0), y)
            })
            .collect();
        stroke(&coords)
    }

    #[test]
    fn single_stroke_has_no_matches() {
        let cluster = Cluster::new(vec![horizontal(0.0, 0.0, 10.0, 5)]);
        assert!(
            CorrespondenceKind::NearestSegment
                .correspond(&cluster, 10.0)
                .is_empty()
        );
    }

    #[test]
    fn parallel_strokes_match_both_ways() {
        let cluster = Cluster::new(vec![
            horizontal(0.0, 0.0, 12.0, 5),
            horizontal(1.0, 0.0, 12.0, 5),
        ]);
        let matches = CorrespondenceKind::NearestSegment.correspond(&cluster, 5.0);
        assert_eq!(matches.len(), 10);
        for m in &matches {
            assert_ne!(m.from_stroke, m.to_stroke);
            assert!((m.distance - 1.0).abs() < 1e-9);
            assert!(m.tangent_agreement(&cluster) > 0.99);
        }
    }

    #[test]
    fn matches_beyond_cutoff_are_dropped() {
        let cluster = Cluster::new(vec![
            horizontal(0.0, 0.0, 12.0, 5),
            horizontal(20.0, 0.0, 12.0, 5),
        ]);
        assert!(
            CorrespondenceKind::NearestSegment
                .correspond(&cluster, 10.0)
                .is_empty()
        );
    }

    #[test]
    fn segment_match_interpolates() {
        let cluster = Cluster::new(vec![
            stroke(&[(1.0, 1.0), (1.5, 1.0)]),
            stroke(&[(0.0, 0.0), (4.0, 0.0)]),
        ]);
        let matches = CorrespondenceKind::NearestSegment.correspond(&cluster, 5.0);
        let m = matches
            .iter()
            .find(|m| m.from_stroke == 0 && m.from_point == 0)
            .unwrap();
        assert_eq!(m.to_stroke, 1);
        assert_eq!(m.to_segment, 0);
        assert!((m.t - 0.25).abs() < 1e-9);
        assert!(m.position.distance(Point::new(1.0, 0.0)) < 1e-9);
    }

    #[test]
    fn vertex_match_snaps_to_endpoint() {
        let cluster = Cluster::new(vec![
            stroke(&[(1.0, 1.0), (1.5, 1.0)]),
            stroke(&[(0.0, 0.0), (4.0, 0.0)]),
        ]);
        let matches = CorrespondenceKind::NearestVertex.correspond(&cluster, 5.0);
        let m = matches
            .iter()
            .find(|m| m.from_stroke == 0 && m.from_point == 0)
            .unwrap();
        assert!(m.t.abs() < f64::EPSILON);
        assert_eq!(m.position, Point::new(0.0, 0.0));
        assert!((m.distance - 2.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn clamping_is_recorded_only_past_the_segment() {
        let cluster = Cluster::new(vec![
            stroke(&[(-2.0, 1.0), (1.0, 1.0)]),
            stroke(&[(0.0, 0.0), (4.0, 0.0)]),
        ]);
        for kind in [
            CorrespondenceKind::NearestSegment,
            CorrespondenceKind::NearestVertex,
        ] {
            let matches = kind.correspond(&cluster, 5.0);
            let past = matches
                .iter()
                .find(|m| m.from_stroke == 0 && m.from_point == 0)
                .unwrap();
            assert!(past.clamped);
            assert!(past.t.abs() < f64::EPSILON);
            let inside = matches
                .iter()
                .find(|m| m.from_stroke == 0 && m.from_point == 1)
                .unwrap();
            assert!(!inside.clamped);
        }
    }

    #[test]
    fn opposite_strokes_disagree() {
        let forward = horizontal(0.0, 0.0, 12.0, 5);
        let backward = horizontal(0.5, 12.0, 0.0, 5);
        let cluster = Cluster::new(vec![forward, backward]);
        let matches = CorrespondenceKind::NearestSegment.correspond(&cluster, 5.0);
        assert!(!matches.is_empty());
        for m in &matches {
            assert!(m.tangent_agreement(&cluster) < -0.99);
        }
    }

    #[test]
    fn only_nearest_segment_per_stroke() {
        // Three strokes: each point finds exactly one match on each other
        // stroke.
        let cluster = Cluster::new(vec![
            horizontal(0.0, 0.0, 9.0, 4),
            horizontal(1.0, 0.0, 9.0, 4),
            horizontal(2.0, 0.0, 9.0, 4),
        ]);
        let matches = CorrespondenceKind::NearestSegment.correspond(&cluster, 5.0);
        assert_eq!(matches.len(), 3 * 4 * 2);
    }

    #[test]
    fn proximity_falloff() {
        let m = Match {
            from_stroke: 0,
            from_point: 0,
            to_stroke: 1,
            to_segment: 0,
            t: 0.0,
            position: Point::ZERO,
            distance: 2.5,
            clamped: false,
        };
        assert!((m.proximity(10.0) - 0.75).abs() < 1e-12);
        assert!(m.proximity(2.0).abs() < f64::EPSILON);
        assert!(m.proximity(0.0).abs() < f64::EPSILON);
    }
}

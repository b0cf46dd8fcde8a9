//! Isoline extraction over a parameterized cluster.
//!
//! An isoline at level `u` is the set of places where each stroke's `u`
//! values cross that level. Because `u` is non-decreasing along every
//! stroke, a stroke crosses a given level at most once (or along a flat
//! run, in which case the first position of the run is reported).
//!
//! These are read-only queries: nothing here modifies the cluster.

use serde::{Deserialize, Serialize};

use crate::types::{Cluster, Point};

/// One stroke's crossing of an isoline level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsolineCrossing {
    /// Stroke index within the cluster.
    pub stroke: usize,
    /// Interpolated position where the stroke reaches the level.
    pub position: Point,
}

/// All crossings of a single `u` level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Isoline {
    /// The level.
    pub u: f64,
    /// At most one crossing per stroke, in stroke order.
    pub crossings: Vec<IsolineCrossing>,
}

/// Minimum and maximum `u` over every point of the cluster.
///
/// Returns `None` for a cluster without points.
#[must_use]
pub fn u_range(cluster: &Cluster) -> Option<(f64, f64)> {
    cluster
        .strokes
        .iter()
        .flat_map(|s| s.u().iter().copied())
        .fold(None, |acc, u| match acc {
            None => Some((u, u)),
            Some((lo, hi)) => Some((lo.min(u), hi.max(u))),
        })
}

/// Evenly spaced levels covering the cluster's `u` range.
///
/// Levels start at the range minimum and step by `spacing` up to and
/// including the maximum. Non-positive or non-finite spacing yields no
/// levels.
#[must_use]
pub fn isoline_levels(cluster: &Cluster, spacing: f64) -> Vec<f64> {
    if !spacing.is_finite() || spacing <= 0.0 {
        return Vec::new();
    }
    let Some((lo, hi)) = u_range(cluster) else {
        return Vec::new();
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let steps = ((hi - lo) / spacing).floor() as usize;
    #[allow(clippy::cast_precision_loss)]
    (0..=steps).map(|k| spacing.mul_add(k as f64, lo)).collect()
}

/// Extract one [`Isoline`] per requested level.
///
/// Levels outside a stroke's `u` range produce no crossing for that
/// stroke. Empty isolines are kept so the output lines up with `levels`.
#[must_use]
pub fn isolines(cluster: &Cluster, levels: &[f64]) -> Vec<Isoline> {
    levels
        .iter()
        .map(|&level| Isoline {
            u: level,
            crossings: cluster
                .strokes
                .iter()
                .enumerate()
                .filter_map(|(stroke, s)| {
                    crossing(s.points(), s.u(), level)
                        .map(|position| IsolineCrossing { stroke, position })
                })
                .collect(),
        })
        .collect()
}

fn crossing(points: &[Point], u: &[f64], level: f64) -> Option<Point> {
    if points.is_empty() || points.len() != u.len() {
        return None;
    }
    if points.len() == 1 {
        return ((u[0] - level).abs() <= f64::EPSILON).then_some(points[0]);
    }
    (0..points.len() - 1).find_map(|k| {
        let (a, b) = (u[k], u[k + 1]);
        if level < a || level > b {
            return None;
        }
        let span = b - a;
        let t = if span > 0.0 { (level - a) / span } else { 0.0 };
        Some(points[k].lerp(points[k + 1], t))
    })
}

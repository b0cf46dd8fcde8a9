//! Polyline geometry helpers: arc length, uniform resampling, tangents.
//!
//! Raw pen samples are spaced irregularly in space (they are taken at a
//! fixed rate in time), so every polyline is resampled to a uniform
//! arc-length spacing before anything else looks at it.

use crate::types::{Point, Polyline, Sample};

/// Arc length from the first point to every point.
///
/// The first entry is always 0; the last is the total length. Returns an
/// empty vector for an empty input.
#[must_use]
pub fn cumulative_arc_length(points: &[Point]) -> Vec<f64> {
    let mut out = Vec::with_capacity(points.len());
    let mut acc = 0.0;
    for (i, p) in points.iter().enumerate() {
        if i > 0 {
            acc += points[i - 1].distance(*p);
        }
        out.push(acc);
    }
    out
}

/// Resample timestamped samples to a uniform arc-length spacing.
///
/// A path of length `L` yields `floor(L / spacing) + 1` samples spread
/// evenly over the whole path, so both endpoints are kept and the actual
/// spacing lies in `[spacing, 2 * spacing)`. Timestamps are interpolated
/// with the positions.
///
/// Paths shorter than `spacing` (and inputs with fewer than two samples
/// or a non-positive spacing) produce no samples at all.
#[must_use]
pub fn resample_samples(samples: &[Sample], spacing: f64) -> Vec<Sample> {
    if samples.len() < 2 || spacing.is_nan() || spacing <= 0.0 {
        return Vec::new();
    }

    let positions: Vec<Point> = samples.iter().map(|s| s.position).collect();
    let cumulative = cumulative_arc_length(&positions);
    let total = cumulative.last().copied().unwrap_or(0.0);
    if total < spacing {
        return Vec::new();
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let intervals = (total / spacing).floor() as usize;
    #[allow(clippy::cast_precision_loss)]
    let step = total / intervals as f64;

    let mut out = Vec::with_capacity(intervals + 1);
    let mut seg = 0;
    for i in 0..=intervals {
        #[allow(clippy::cast_precision_loss)]
        let target = if i == intervals {
            total
        } else {
            step * i as f64
        };
        while seg + 2 < cumulative.len() && cumulative[seg + 1] < target {
            seg += 1;
        }
        let a = samples[seg];
        let b = samples[seg + 1];
        let seg_len = cumulative[seg + 1] - cumulative[seg];
        let t = if seg_len > 0.0 {
            ((target - cumulative[seg]) / seg_len).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.push(Sample {
            position: a.position.lerp(b.position, t),
            time: (b.time - a.time).mul_add(t, a.time),
        });
    }
    out
}

/// Resample a polyline to a uniform arc-length spacing.
///
/// See [`resample_samples`] for the exact contract.
///
/// # Examples
///
/// ```
/// use strokestrip_pipeline::{Point, Polyline};
/// use strokestrip_pipeline::geometry::resample;
///
/// let polyline = Polyline::new(vec![
///     Point::new(0.0, 0.0),
///     Point::new(10.0, 0.0),
/// ]);
/// // 10 units / 3 units spacing -> 3 intervals -> 4 points
/// assert_eq!(resample(&polyline, 3.0).len(), 4);
/// ```
#[must_use]
pub fn resample(polyline: &Polyline, spacing: f64) -> Polyline {
    let samples: Vec<Sample> = polyline
        .points()
        .iter()
        .map(|p| Sample {
            position: *p,
            time: 0.0,
        })
        .collect();
    Polyline::new(
        resample_samples(&samples, spacing)
            .into_iter()
            .map(|s| s.position)
            .collect(),
    )
}

/// Unit tangent at point `i`, using central differences in the interior
/// and one-sided differences at the ends.
///
/// Returns [`Point::ZERO`] when the neighborhood is degenerate.
#[must_use]
pub fn tangent_at(points: &[Point], i: usize) -> Point {
    if points.len() < 2 || i >= points.len() {
        return Point::ZERO;
    }
    let prev = points[i.saturating_sub(1)];
    let next = points[(i + 1).min(points.len() - 1)];
    (next - prev).normalized().unwrap_or(Point::ZERO)
}

/// Unit direction of the segment from point `seg` to point `seg + 1`.
#[must_use]
pub fn segment_direction(points: &[Point], seg: usize) -> Point {
    match (points.get(seg), points.get(seg + 1)) {
        (Some(&a), Some(&b)) => (b - a).normalized().unwrap_or(Point::ZERO),
        _ => Point::ZERO,
    }
}

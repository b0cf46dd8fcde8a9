//! Capture-to-normalized coordinate transform.
//!
//! Converts raw capture polylines into strokes grouped by cluster, in a
//! canonical frame where:
//!
//! ```text
//! norm = (resampled - bbox_center) / thickness
//! ```
//!
//! so one unit equals one stroke width and the bounding box of every
//! resampled point is centered at the origin. Resampling happens first,
//! at `resample_spacing × thickness`, which fixes point density
//! independently of drawing speed and tablet sample rate.
//!
//! Polylines too short to yield two resampled points are dropped here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::resample_samples;
use crate::types::{
    BoundingBox, Capture, Cluster, Input, PipelineConfig, PipelineError, Point, Polyline, Stroke,
};

/// Counts gathered while normalizing, used by diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeStats {
    /// Polylines in the capture.
    pub input_polylines: usize,
    /// Polylines dropped because they were too short to resample.
    pub dropped_polylines: usize,
    /// Strokes in the normalized output.
    pub strokes: usize,
    /// Distinct clusters in the normalized output.
    pub clusters: usize,
    /// Points across all normalized strokes.
    pub points: usize,
}

/// Normalize a capture into an [`Input`].
///
/// The capture is not modified.
///
/// # Errors
///
/// Returns the validation errors of [`Capture::validate`] and
/// [`PipelineConfig::validate`]. Short polylines are not errors; they are
/// dropped and counted in [`NormalizeStats::dropped_polylines`].
pub fn normalize_capture(
    capture: &Capture,
    config: &PipelineConfig,
) -> Result<(Input, NormalizeStats), PipelineError> {
    config.validate()?;
    capture.validate()?;

    let thickness = capture.thickness;
    let spacing = config.resample_spacing * thickness;

    let resampled: Vec<Vec<Point>> = capture
        .polylines
        .iter()
        .map(|p| {
            resample_samples(&p.samples, spacing)
                .into_iter()
                .map(|s| s.position)
                .collect()
        })
        .collect();

    let bbox = BoundingBox::from_points(resampled.iter().flatten());
    let (center, width, height) = bbox.map_or((Point::ZERO, 0.0, 0.0), |b| {
        (b.center(), b.width() / thickness, b.height() / thickness)
    });

    let mut clusters: BTreeMap<_, Cluster> = BTreeMap::new();
    let mut stats = NormalizeStats {
        input_polylines: capture.polylines.len(),
        ..NormalizeStats::default()
    };

    for (source_index, (polyline, points)) in capture.polylines.iter().zip(resampled).enumerate() {
        if points.len() < 2 {
            stats.dropped_polylines += 1;
            continue;
        }
        let normalized: Vec<Point> = points
            .into_iter()
            .map(|p| (p - center) / thickness)
            .collect();
        stats.points += normalized.len();
        stats.strokes += 1;
        clusters
            .entry(polyline.cluster)
            .or_default()
            .strokes
            .push(Stroke::new(source_index, Polyline::new(normalized)));
    }
    stats.clusters = clusters.len();

    Ok((
        Input {
            clusters,
            thickness: 1.0,
            width,
            height,
            canvas: capture.canvas,
        },
        stats,
    ))
}

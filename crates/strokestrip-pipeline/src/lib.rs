//! strokestrip-pipeline: Pure stroke consolidation pipeline (sans-IO).
//!
//! Turns a capture of hand-drawn polylines, each already assigned to a
//! cluster of strokes depicting the same curve, into oriented strokes
//! carrying a shared parameter `u` through:
//! normalize -> orient -> parameterize.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! captures and returns structured data. Reading capture files and
//! writing renderings live in the bench and export crates.

pub mod correspond;
pub mod diagnostics;
pub mod geometry;
pub mod isolines;
pub mod normalize;
pub mod orient;
pub mod parameterize;
pub mod pipeline;
pub mod types;

pub use correspond::{CorrespondenceKind, CorrespondenceRule, Match};
pub use isolines::{Isoline, IsolineCrossing, isoline_levels, isolines, u_range};
pub use orient::{ClusterOrientation, OrientationSolver, PairAgreement};
pub use parameterize::{AlignmentPair, ClusterParameterization, ParameterizationStatus};
pub use pipeline::Pipeline;
pub use types::{
    BoundingBox, Capture, Cluster, ClusterId, Dimensions, Input, Orientation, PipelineConfig,
    PipelineError, Point, Polyline, ProcessResult, Sample, SketchedPolyline, Stroke,
};

/// Run the full consolidation pipeline.
///
/// # Pipeline steps
///
/// 1. Validate the capture and config
/// 2. Resample every polyline at `resample_spacing × thickness`
/// 3. Normalize to stroke-width units around the bounding-box center,
///    grouping by cluster and dropping strokes shorter than two points
/// 4. Resolve orientation within each cluster
/// 5. Solve the joint parameterization within each cluster
///
/// Clusters never influence each other. Per-cluster degradations
/// (uncertain orientation, arc-length fallback) are reported in the
/// result, never as errors.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidThickness`] for a non-positive or
/// non-finite thickness, [`PipelineError::EmptyCapture`] when no polyline
/// has samples, [`PipelineError::NonFiniteSample`] for NaN or infinite
/// coordinates, and [`PipelineError::InvalidConfig`] for an unusable
/// configuration.
pub fn process(capture: &Capture, config: &PipelineConfig) -> Result<ProcessResult, PipelineError> {
    // 1-3. Validation, resampling, normalization.
    let (input, _) = normalize::normalize_capture(capture, config)?;

    // 4. Orientation.
    let (input, orientation) = orient::orient_input(&input, config);

    // 5. Joint parameterization.
    let (input, parameterization) = parameterize::parameterize_input(&input, config);

    Ok(ProcessResult {
        input,
        orientation,
        parameterization,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn line(cluster: ClusterId, from: (f64, f64), to: (f64, f64)) -> SketchedPolyline {
        SketchedPolyline {
            cluster,
            samples: vec![
                Sample::new(from.0, from.1, 0.0),
                Sample::new(to.0, to.1, 1.0),
            ],
        }
    }

    #[test]
    fn process_empty_capture() {
        let capture = Capture {
            thickness: 1.0,
            canvas: Dimensions::default(),
            polylines: vec![],
        };
        let result = process(&capture, &PipelineConfig::default());
        assert!(matches!(result, Err(PipelineError::EmptyCapture)));
    }

    #[test]
    fn process_non_finite_sample() {
        let capture = Capture {
            thickness: 1.0,
            canvas: Dimensions::default(),
            polylines: vec![line(0, (0.0, 0.0), (f64::INFINITY, 0.0))],
        };
        let result = process(&capture, &PipelineConfig::default());
        assert!(matches!(
            result,
            Err(PipelineError::NonFiniteSample {
                polyline: 0,
                sample: 1
            })
        ));
    }

    #[test]
    fn process_matches_staged_pipeline() {
        let capture = Capture {
            thickness: 1.5,
            canvas: Dimensions {
                width: 200,
                height: 100,
            },
            polylines: vec![
                line(4, (0.0, 0.0), (90.0, 3.0)),
                line(4, (88.0, 1.5), (2.0, -1.0)),
                line(9, (10.0, 50.0), (10.0, 90.0)),
            ],
        };
        let config = PipelineConfig::default();
        let direct = process(&capture, &config).unwrap();
        let staged = Pipeline::new(capture, config)
            .normalize()
            .unwrap()
            .orient()
            .parameterize()
            .into_result();
        assert_eq!(direct, staged);
        assert_eq!(direct.orientation[&4].flipped_count(), 1);
    }

    #[test]
    fn process_all_short_strokes_is_empty_but_ok() {
        let capture = Capture {
            thickness: 10.0,
            canvas: Dimensions::default(),
            polylines: vec![line(0, (0.0, 0.0), (5.0, 0.0))],
        };
        let result = process(&capture, &PipelineConfig::default()).unwrap();
        assert!(result.input.clusters.is_empty());
        assert!(result.orientation.is_empty());
        assert!(result.parameterization.is_empty());
    }
}

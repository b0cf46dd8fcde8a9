//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::process`] which runs the entire pipeline in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use strokestrip_pipeline::{Capture, Pipeline, PipelineConfig, PipelineError};
//! # fn run(capture: Capture) -> Result<(), PipelineError> {
//! let config = PipelineConfig::default();
//! let pipeline = Pipeline::new(capture, config)
//!     .normalize()?
//!     .orient()
//!     .parameterize();
//!
//! let result = pipeline.into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next pipeline state
//! (or `Result` for the fallible normalization), carrying forward what
//! later stages and callers need. The caller can inspect the current
//! stage's output via accessor methods at any point.

use std::collections::BTreeMap;

use crate::diagnostics::StageMetrics;
use crate::normalize::NormalizeStats;
use crate::orient::{ClusterOrientation, OrientationSolver};
use crate::parameterize::{ClusterParameterization, ParameterizationStatus};
use crate::types::{Capture, ClusterId, Input, PipelineConfig, PipelineError, ProcessResult};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// The capture and config are stored but not yet touched. Call
/// [`normalize`](Self::normalize) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing; call .normalize() to continue"]
pub struct Pending {
    config: PipelineConfig,
    capture: Capture,
}

impl Pending {
    /// The raw capture.
    #[must_use]
    pub const fn capture(&self) -> &Capture {
        &self.capture
    }

    /// Validate, resample, and normalize the capture, advancing to the
    /// [`Normalized`] stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for an unusable config,
    /// [`PipelineError::InvalidThickness`],
    /// [`PipelineError::EmptyCapture`], or
    /// [`PipelineError::NonFiniteSample`] for an unusable capture.
    pub fn normalize(self) -> Result<Normalized, PipelineError> {
        let (input, stats) = crate::normalize::normalize_capture(&self.capture, &self.config)?;
        Ok(Normalized {
            config: self.config,
            input,
            stats,
        })
    }
}

// ───────────────────────── Stage 1: Normalized ───────────────────────

/// Pipeline state after normalization.
///
/// Strokes are resampled, expressed in stroke widths around the origin,
/// and grouped by cluster, still in drawn direction. Call
/// [`orient`](Self::orient) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .orient() to continue"]
pub struct Normalized {
    config: PipelineConfig,
    input: Input,
    stats: NormalizeStats,
}

impl Normalized {
    /// The normalized strokes.
    #[must_use]
    pub const fn input(&self) -> &Input {
        &self.input
    }

    /// Counts gathered while normalizing.
    #[must_use]
    pub const fn stats(&self) -> NormalizeStats {
        self.stats
    }

    /// Resolve stroke orientation in every cluster.
    pub fn orient(self) -> Oriented {
        let (input, orientation) = crate::orient::orient_input(&self.input, &self.config);
        Oriented {
            config: self.config,
            input,
            stats: self.stats,
            orientation,
        }
    }
}

// ───────────────────────── Stage 2: Oriented ─────────────────────────

/// Pipeline state after orientation resolution.
///
/// Call [`parameterize`](Self::parameterize) to advance.
#[must_use = "pipeline stages are consumed by advancing; call .parameterize() to continue"]
pub struct Oriented {
    config: PipelineConfig,
    input: Input,
    stats: NormalizeStats,
    orientation: BTreeMap<ClusterId, ClusterOrientation>,
}

impl Oriented {
    /// Strokes after flipping.
    #[must_use]
    pub const fn input(&self) -> &Input {
        &self.input
    }

    /// Per-cluster orientation snapshots.
    #[must_use]
    pub const fn orientation(&self) -> &BTreeMap<ClusterId, ClusterOrientation> {
        &self.orientation
    }

    /// Compute the joint parameterization of every cluster.
    pub fn parameterize(self) -> Parameterized {
        let (input, parameterization) =
            crate::parameterize::parameterize_input(&self.input, &self.config);
        Parameterized {
            input,
            stats: self.stats,
            orientation: self.orientation,
            parameterization,
        }
    }
}

// ───────────────────────── Stage 3: Parameterized ────────────────────

/// Pipeline state after joint parameterization, the final stage.
///
/// Call [`into_result`](Self::into_result) to extract the
/// [`ProcessResult`].
#[must_use = "call .into_result() to extract the ProcessResult"]
pub struct Parameterized {
    input: Input,
    stats: NormalizeStats,
    orientation: BTreeMap<ClusterId, ClusterOrientation>,
    parameterization: BTreeMap<ClusterId, ClusterParameterization>,
}

impl Parameterized {
    /// Oriented, parameterized strokes.
    #[must_use]
    pub const fn input(&self) -> &Input {
        &self.input
    }

    /// Per-cluster parameterization outcomes.
    #[must_use]
    pub const fn parameterization(&self) -> &BTreeMap<ClusterId, ClusterParameterization> {
        &self.parameterization
    }

    /// Counts gathered while normalizing.
    #[must_use]
    pub const fn stats(&self) -> NormalizeStats {
        self.stats
    }

    /// Consume the pipeline and return the [`ProcessResult`].
    #[must_use]
    pub fn into_result(self) -> ProcessResult {
        ProcessResult {
            input: self.input,
            orientation: self.orientation,
            parameterization: self.parameterization,
        }
    }
}

// ───────────────────────── Stage metrics ───────────────────────────

impl Normalized {
    pub(crate) const fn stage_metrics(&self) -> StageMetrics {
        StageMetrics::Normalize {
            input_polylines: self.stats.input_polylines,
            dropped_polylines: self.stats.dropped_polylines,
            strokes: self.stats.strokes,
            clusters: self.stats.clusters,
            points: self.stats.points,
            width: self.input.width,
            height: self.input.height,
        }
    }
}

impl Oriented {
    pub(crate) fn stage_metrics(&self) -> StageMetrics {
        let min = self.config.min_orientation_confidence;
        let reports = self.orientation.values();
        StageMetrics::Orient {
            clusters: self.orientation.len(),
            strokes: reports.clone().map(|o| o.reversed.len()).sum(),
            flipped_strokes: reports.clone().map(ClusterOrientation::flipped_count).sum(),
            uncertain_strokes: reports
                .clone()
                .map(|o| o.uncertain_strokes(min).len())
                .sum(),
            exhaustive_clusters: reports
                .clone()
                .filter(|o| o.solver == OrientationSolver::Exhaustive)
                .count(),
            spanning_tree_clusters: reports
                .clone()
                .filter(|o| o.solver == OrientationSolver::SpanningTree)
                .count(),
            endpoint_fallback_pairs: reports
                .flat_map(|o| o.pairs.iter())
                .filter(|p| p.endpoint_fallback)
                .count(),
        }
    }
}

impl Parameterized {
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn stage_metrics(&self) -> StageMetrics {
        let reports: Vec<&ClusterParameterization> = self.parameterization.values().collect();
        let joint: Vec<f64> = reports
            .iter()
            .filter(|p| p.status == ParameterizationStatus::Joint)
            .map(|p| p.residual)
            .collect();
        let mean_residual = if joint.is_empty() {
            0.0
        } else {
            joint.iter().sum::<f64>() / joint.len() as f64
        };
        StageMetrics::Parameterize {
            clusters: reports.len(),
            joint_clusters: joint.len(),
            fallback_clusters: reports.iter().filter(|p| p.is_fallback()).count(),
            fallback_components: reports.iter().map(|p| p.fallback_components).sum(),
            alignment_terms: reports.iter().map(|p| p.alignment_terms).sum(),
            isolated_strokes: reports.iter().map(|p| p.isolated_strokes).sum(),
            mean_residual,
            max_residual: joint.iter().copied().fold(0.0, f64::max),
        }
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental stroke consolidation pipeline.
///
/// Created via [`Pipeline::new`], which stores the capture and config
/// without doing any processing. Each stage method consumes the current
/// state and returns the next, making it a compile-time error to skip
/// stages or call them out of order.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline from a capture and config.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(capture: Capture, config: PipelineConfig) -> Pending {
        Pending { config, capture }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{Dimensions, Sample, SketchedPolyline};

    fn wave(cluster: i32, offset: f64, reversed: bool) -> SketchedPolyline {
        #[allow(clippy::cast_precision_loss)]
        let mut samples: Vec<Sample> = (0..40)
            .map(|i| {
                let x = 2.0 * i as f64;
                Sample::new(x, 6.0f64.mul_add((x / 12.0).sin(), offset), i as f64)
            })
            .collect();
        if reversed {
            samples.reverse();
        }
        SketchedPolyline { cluster, samples }
    }

    fn capture() -> Capture {
        Capture {
            thickness: 2.0,
            canvas: Dimensions {
                width: 100,
                height: 60,
            },
            polylines: vec![
                wave(0, 10.0, false),
                wave(0, 12.0, true),
                wave(0, 14.0, false),
                wave(1, 40.0, false),
            ],
        }
    }

    #[test]
    fn pending_exposes_capture() {
        let pending = Pipeline::new(capture(), PipelineConfig::default());
        assert_eq!(pending.capture().polylines.len(), 4);
    }

    #[test]
    fn normalize_invalid_capture_returns_error() {
        let mut bad = capture();
        bad.thickness = -1.0;
        let result = Pipeline::new(bad, PipelineConfig::default()).normalize();
        assert!(matches!(result, Err(PipelineError::InvalidThickness(_))));
    }

    #[test]
    fn normalize_invalid_config_returns_error() {
        let config = PipelineConfig {
            resample_spacing: 0.0,
            ..PipelineConfig::default()
        };
        let result = Pipeline::new(capture(), config).normalize();
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn normalized_exposes_clusters() {
        let normalized = Pipeline::new(capture(), PipelineConfig::default())
            .normalize()
            .unwrap();
        assert_eq!(normalized.input().clusters.len(), 2);
        assert_eq!(normalized.stats().strokes, 4);
        assert!(normalized.input().strokes().all(|(_, s)| s.orientation().is_none()));
    }

    #[test]
    fn oriented_flips_reversed_stroke() {
        let oriented = Pipeline::new(capture(), PipelineConfig::default())
            .normalize()
            .unwrap()
            .orient();
        let report = &oriented.orientation()[&0];
        assert_eq!(report.reversed, vec![false, true, false]);
        let strokes = &oriented.input().clusters[&0].strokes;
        // All three now run left to right.
        for s in strokes {
            assert!(s.points()[0].x < s.points()[s.len() - 1].x);
            assert!(s.orientation().is_some());
        }
    }

    #[test]
    fn parameterized_result_is_monotone() {
        let result = Pipeline::new(capture(), PipelineConfig::default())
            .normalize()
            .unwrap()
            .orient()
            .parameterize()
            .into_result();
        assert_eq!(
            result.parameterization[&0].status,
            ParameterizationStatus::Joint
        );
        assert_eq!(
            result.parameterization[&1].status,
            ParameterizationStatus::SingleStroke
        );
        for (_, s) in result.input.strokes() {
            assert_eq!(s.u().len(), s.len());
            assert!(s.u().windows(2).all(|w| w[1] >= w[0]));
        }
    }

    #[test]
    fn orient_metrics_count_flips() {
        let oriented = Pipeline::new(capture(), PipelineConfig::default())
            .normalize()
            .unwrap()
            .orient();
        let metrics = oriented.stage_metrics();
        assert!(
            matches!(
                metrics,
                StageMetrics::Orient {
                    clusters: 2,
                    strokes: 4,
                    flipped_strokes: 1,
                    exhaustive_clusters: 1,
                    spanning_tree_clusters: 0,
                    ..
                }
            ),
            "unexpected metrics: {metrics:?}",
        );
    }

    #[test]
    fn normalize_metrics_report_extent() {
        let normalized = Pipeline::new(capture(), PipelineConfig::default())
            .normalize()
            .unwrap();
        let metrics = normalized.stage_metrics();
        assert!(
            matches!(
                metrics,
                StageMetrics::Normalize {
                    strokes: 4,
                    clusters: 2,
                    width,
                    ..
                } if width > 0.0
            ),
            "unexpected metrics: {metrics:?}",
        );
    }

    #[test]
    fn parameterize_metrics_count_joint_clusters() {
        let done = Pipeline::new(capture(), PipelineConfig::default())
            .normalize()
            .unwrap()
            .orient()
            .parameterize();
        assert!(matches!(
            done.stage_metrics(),
            StageMetrics::Parameterize {
                clusters: 2,
                joint_clusters: 1,
                fallback_clusters: 0,
                fallback_components: 0,
                ..
            }
        ));
    }
}

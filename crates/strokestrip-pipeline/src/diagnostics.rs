//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! These diagnostics are permanent instrumentation intended for
//! algorithm tuning and parameter experimentation. Every call to
//! [`process_with_diagnostics`] collects diagnostics alongside the
//! pipeline results.
//!
//! Duration measurements use [`std::time::Duration`]. Timestamps come
//! from a caller-supplied [`Clock`] so the crate itself stays free of
//! platform time sources.
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::Pipeline;
use crate::types::{Capture, PipelineConfig, PipelineError, ProcessResult};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Source of timestamps for stage timing.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current time.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: validation, resampling, normalization.
    pub normalize: StageDiagnostics,
    /// Stage 2: orientation resolution.
    pub orient: StageDiagnostics,
    /// Stage 3: joint parameterization.
    pub parameterize: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics (counts, sizes, etc.).
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Normalization metrics.
    Normalize {
        /// Polylines in the capture.
        input_polylines: usize,
        /// Polylines too short to keep.
        dropped_polylines: usize,
        /// Strokes produced.
        strokes: usize,
        /// Distinct clusters.
        clusters: usize,
        /// Points after resampling.
        points: usize,
        /// Extent of all strokes, in stroke widths.
        width: f64,
        /// Extent of all strokes, in stroke widths.
        height: f64,
    },
    /// Orientation metrics.
    Orient {
        /// Clusters processed.
        clusters: usize,
        /// Strokes processed.
        strokes: usize,
        /// Strokes reversed.
        flipped_strokes: usize,
        /// Strokes whose decision fell below the confidence threshold.
        uncertain_strokes: usize,
        /// Clusters solved by enumeration.
        exhaustive_clusters: usize,
        /// Clusters solved by spanning-tree propagation.
        spanning_tree_clusters: usize,
        /// Stroke pairs scored from endpoints only.
        endpoint_fallback_pairs: usize,
    },
    /// Parameterization metrics.
    Parameterize {
        /// Clusters processed.
        clusters: usize,
        /// Clusters solved jointly.
        joint_clusters: usize,
        /// Clusters that fell back to per-stroke arc length.
        fallback_clusters: usize,
        /// Multi-stroke components whose solve failed, across all clusters.
        fallback_components: usize,
        /// Cross-stroke alignment terms across all clusters.
        alignment_terms: usize,
        /// Strokes without any alignment term.
        isolated_strokes: usize,
        /// Mean alignment residual over jointly solved clusters.
        mean_residual: f64,
        /// Worst alignment residual over jointly solved clusters.
        max_residual: f64,
    },
}

/// High-level summary counts for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Polylines in the capture.
    pub input_polylines: usize,
    /// Strokes that survived normalization.
    pub strokes: usize,
    /// Clusters in the output.
    pub clusters: usize,
    /// Points in the output.
    pub points: usize,
    /// Clusters where orientation was uncertain or parameterization fell
    /// back.
    pub degraded_clusters: usize,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Capture: {} polylines -> {} strokes in {} clusters ({} points)",
            self.summary.input_polylines,
            self.summary.strokes,
            self.summary.clusters,
            self.summary.points,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let stages = [
            ("Normalize", &self.normalize),
            ("Orient", &self.orient),
            ("Parameterize", &self.parameterize),
        ];

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Clusters: {}  |  Degraded: {}",
            self.summary.clusters, self.summary.degraded_clusters,
        ));

        lines.join("\n")
    }
}

/// Run the whole pipeline, timing each stage with `clock`.
///
/// # Errors
///
/// Returns the same errors as [`crate::process`].
pub fn process_with_diagnostics<C: Clock>(
    capture: &Capture,
    config: &PipelineConfig,
    clock: &C,
) -> Result<(ProcessResult, PipelineDiagnostics), PipelineError> {
    let pending = Pipeline::new(capture.clone(), config.clone());
    let start = clock.now();

    let t = clock.now();
    let normalized = pending.normalize()?;
    let normalize = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: normalized.stage_metrics(),
    };

    let t = clock.now();
    let oriented = normalized.orient();
    let orient = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: oriented.stage_metrics(),
    };

    let t = clock.now();
    let parameterized = oriented.parameterize();
    let parameterize = StageDiagnostics {
        duration: clock.elapsed(&t),
        metrics: parameterized.stage_metrics(),
    };

    let total_duration = clock.elapsed(&start);
    let stats = parameterized.stats();
    let result = parameterized.into_result();

    let summary = PipelineSummary {
        input_polylines: stats.input_polylines,
        strokes: result.input.stroke_count(),
        clusters: result.input.clusters.len(),
        points: result.input.point_count(),
        degraded_clusters: result
            .degraded_clusters(config.min_orientation_confidence)
            .len(),
    };

    Ok((
        result,
        PipelineDiagnostics {
            normalize,
            orient,
            parameterize,
            total_duration,
            summary,
        },
    ))
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Normalize {
            input_polylines,
            dropped_polylines,
            strokes,
            clusters,
            points,
            width,
            height,
        } => {
            format!(
                "{input_polylines} polylines ({dropped_polylines} dropped) -> {strokes} strokes, {clusters} clusters, {points} pts, {width:.1}x{height:.1} widths",
            )
        }
        StageMetrics::Orient {
            strokes,
            flipped_strokes,
            uncertain_strokes,
            exhaustive_clusters,
            spanning_tree_clusters,
            endpoint_fallback_pairs,
            ..
        } => {
            format!(
                "flipped {flipped_strokes}/{strokes}, uncertain {uncertain_strokes}, exhaustive={exhaustive_clusters} tree={spanning_tree_clusters} endpoint_pairs={endpoint_fallback_pairs}",
            )
        }
        StageMetrics::Parameterize {
            clusters,
            joint_clusters,
            fallback_clusters,
            fallback_components,
            alignment_terms,
            isolated_strokes,
            mean_residual,
            max_residual,
        } => {
            format!(
                "joint {joint_clusters}/{clusters}, fallback {fallback_clusters} (components {fallback_components}), terms={alignment_terms} isolated={isolated_strokes} residual mean={mean_residual:.3} max={max_residual:.3}",
            )
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::types::{Dimensions, Sample, SketchedPolyline};

    /// Advances one millisecond every time it is read.
    struct StepClock {
        ticks: Cell<u64>,
    }

    impl Clock for StepClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.ticks.get();
            self.ticks.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.now() - since)
        }
    }

    fn capture() -> Capture {
        let line = |cluster, y: f64, reversed: bool| {
            let mut samples = vec![Sample::new(0.0, y, 0.0), Sample::new(60.0, y, 1.0)];
            if reversed {
                samples.reverse();
            }
            SketchedPolyline { cluster, samples }
        };
        Capture {
            thickness: 1.0,
            canvas: Dimensions::default(),
            polylines: vec![
                line(0, 0.0, false),
                line(0, 1.0, true),
                line(1, 30.0, false),
                SketchedPolyline {
                    cluster: 2,
                    samples: vec![Sample::new(0.0, 50.0, 0.0), Sample::new(1.0, 50.0, 1.0)],
                },
            ],
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        let ms = duration_ms(d);
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn diagnostics_collect_every_stage() {
        let clock = StepClock { ticks: Cell::new(0) };
        let (result, diag) =
            process_with_diagnostics(&capture(), &PipelineConfig::default(), &clock).unwrap();

        assert_eq!(diag.summary.input_polylines, 4);
        assert_eq!(diag.summary.strokes, 3);
        assert_eq!(diag.summary.clusters, 2);
        assert_eq!(diag.summary.points, result.input.point_count());
        assert!(matches!(
            diag.normalize.metrics,
            StageMetrics::Normalize {
                dropped_polylines: 1,
                ..
            }
        ));
        assert!(matches!(
            diag.orient.metrics,
            StageMetrics::Orient {
                flipped_strokes: 1,
                ..
            }
        ));
        assert!(matches!(
            diag.parameterize.metrics,
            StageMetrics::Parameterize {
                joint_clusters: 1,
                ..
            }
        ));
        assert!(diag.normalize.duration > Duration::ZERO);
        assert!(diag.total_duration >= diag.normalize.duration + diag.orient.duration);
    }

    #[test]
    fn diagnostics_propagate_errors() {
        let clock = StepClock { ticks: Cell::new(0) };
        let mut bad = capture();
        bad.thickness = f64::NAN;
        assert!(matches!(
            process_with_diagnostics(&bad, &PipelineConfig::default(), &clock),
            Err(PipelineError::InvalidThickness(_))
        ));
    }

    #[test]
    fn diagnostics_serialize_durations_as_seconds() {
        let clock = StepClock { ticks: Cell::new(0) };
        let (_, diag) =
            process_with_diagnostics(&capture(), &PipelineConfig::default(), &clock).unwrap();
        let json = serde_json::to_value(&diag).unwrap();
        assert!(json["total_duration"].is_f64());
        let back: PipelineDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.total_duration, diag.total_duration);
    }

    #[test]
    fn report_produces_nonempty_string() {
        let clock = StepClock { ticks: Cell::new(0) };
        let (_, diag) =
            process_with_diagnostics(&capture(), &PipelineConfig::default(), &clock).unwrap();
        let report = diag.report();
        assert!(report.contains("Pipeline Diagnostics Report"));
        assert!(report.contains("Parameterize"));
        assert!(report.contains("1 dropped"));
        assert!(report.contains("flipped 1/3"));
    }
}

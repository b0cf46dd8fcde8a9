//! SVG renderings of pipeline results.
//!
//! Every function here is a pure serializer: it takes pipeline output and
//! returns an SVG document as a `String`, built with the [`svg`] crate
//! for document construction, XML escaping, and path data formatting.
//!
//! All renderings share one coordinate system: the normalized frame of
//! the pipeline (one unit per stroke width, origin at the center of the
//! strokes' bounding box), with a margin of [`MARGIN`] stroke widths.
//!
//! Optional [`SvgMetadata`] embeds `<title>`, `<desc>`, and a
//! `<metadata>` element carrying the pipeline configuration.

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{
    Circle, Definitions, Description, Element, Group, Line, Marker, Path, Rectangle,
    Text as TextElement, Title,
};
use svg::node::{Node, Text, Value};

use strokestrip_pipeline::{
    BoundingBox, Cluster, ClusterId, Input, Point, Polyline, ProcessResult, isoline_levels,
    isolines, u_range,
};

/// Empty space around the strokes, in stroke widths.
pub const MARGIN: f64 = 2.0;

/// Rendered pixels per stroke width.
const PIXELS_PER_UNIT: f64 = 4.0;

/// Distinct colors cycled through by cluster id.
pub const CLUSTER_COLORS: [&str; 8] = [
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#17becf",
];

const BACKGROUND: &str = "#ffffff";
const MUTED_STROKE: &str = "#c8c8c8";
const AGREE_COLOR: &str = "#2ca02c";
const DISAGREE_COLOR: &str = "#d62728";

/// Metadata to embed in the SVG document.
///
/// All fields are optional. Text values are XML-escaped automatically by
/// the `svg` crate.
#[derive(Debug, Clone, Default)]
pub struct SvgMetadata<'a> {
    /// Document title, emitted as `<title>`.
    ///
    /// Typically the capture filename without extension.
    pub title: Option<&'a str>,

    /// Document description, emitted as `<desc>`.
    pub description: Option<&'a str>,

    /// Serialized [`PipelineConfig`](strokestrip_pipeline::PipelineConfig)
    /// JSON, emitted inside `<metadata>` so renderings carry
    /// machine-parseable settings.
    pub config_json: Option<&'a str>,
}

/// Build an SVG path `d` attribute string from a polyline.
///
/// Uses `M` for the first point and `L` for subsequent points.
/// Returns an empty string for polylines with fewer than 2 points.
///
/// # Examples
///
/// ```
/// use strokestrip_pipeline::{Point, Polyline};
/// use strokestrip_export::build_path_data;
///
/// let polyline = Polyline::new(vec![
///     Point::new(10.0, 20.0),
///     Point::new(30.0, 40.0),
/// ]);
/// let d = build_path_data(&polyline);
/// assert_eq!(d, "M10,20 L30,40");
/// ```
#[must_use]
pub fn build_path_data(polyline: &Polyline) -> String {
    path_data(polyline.points()).map_or_else(String::new, |data| String::from(Value::from(data)))
}

fn path_data(points: &[Point]) -> Option<Data> {
    let (first, rest) = points.split_first()?;
    if rest.is_empty() {
        return None;
    }
    let mut data = Data::new().move_to((first.x, first.y));
    for p in rest {
        data = data.line_to((p.x, p.y));
    }
    Some(data)
}

fn cluster_color(id: ClusterId) -> &'static str {
    let index = usize::try_from(id.rem_euclid(8)).unwrap_or(0);
    CLUSTER_COLORS[index]
}

/// Rainbow ramp from blue (`t = 0`) to red (`t = 1`).
fn rainbow(t: f64) -> String {
    let hue = 240.0 * (1.0 - t.clamp(0.0, 1.0));
    format!("hsl({hue:.0},90%,45%)")
}

/// Bounding box of every stroke point, falling back to the input's
/// extent around the origin.
fn frame(input: &Input) -> BoundingBox {
    BoundingBox::from_points(input.strokes().flat_map(|(_, s)| s.points())).unwrap_or(
        BoundingBox {
            min: Point::new(-input.width / 2.0, -input.height / 2.0),
            max: Point::new(input.width / 2.0, input.height / 2.0),
        },
    )
}

/// Document skeleton shared by every rendering: sized `<svg>`, metadata,
/// and a background rectangle covering the view box.
fn document(input: &Input, metadata: &SvgMetadata<'_>) -> Document {
    let b = frame(input);
    let x = b.min.x - MARGIN;
    let y = b.min.y - MARGIN;
    let w = b.width() + 2.0 * MARGIN;
    let h = b.height() + 2.0 * MARGIN;

    let mut doc = Document::new()
        .set("width", w * PIXELS_PER_UNIT)
        .set("height", h * PIXELS_PER_UNIT)
        .set("viewBox", (x, y, w, h));

    if let Some(title) = metadata.title {
        doc = doc.add(Title::new(title));
    }
    if let Some(description) = metadata.description {
        doc = doc.add(Description::new().add(Text::new(description)));
    }
    if let Some(config_json) = metadata.config_json {
        let mut pipeline_el = Element::new("strokestrip:pipeline");
        pipeline_el.assign("xmlns:strokestrip", "https://strokestrip.dev/ns/1");
        pipeline_el.append(Text::new(config_json));
        let mut metadata_el = Element::new("metadata");
        metadata_el.append(pipeline_el);
        doc = doc.add(metadata_el);
    }

    doc.add(
        Rectangle::new()
            .set("x", x)
            .set("y", y)
            .set("width", w)
            .set("height", h)
            .set("fill", BACKGROUND),
    )
}

fn finish(doc: &Document) -> String {
    // The svg crate omits the XML declaration, so we prepend it.
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n")
}

fn stroke_path(points: &[Point], color: &str, width: f64) -> Option<Path> {
    path_data(points).map(|d| {
        Path::new()
            .set("d", d)
            .set("fill", "none")
            .set("stroke", color)
            .set("stroke-width", width)
            .set("stroke-linecap", "round")
            .set("stroke-linejoin", "round")
    })
}

/// Muted background copy of every stroke in a cluster.
fn muted_cluster(cluster: &Cluster) -> Group {
    cluster
        .strokes
        .iter()
        .filter_map(|s| stroke_path(s.points(), MUTED_STROKE, 1.0))
        .fold(Group::new().set("class", "strokes"), Group::add)
}

/// Render every stroke in its cluster's color with a dot at its start
/// and an arrowhead at its end, so traversal direction is visible.
///
/// Strokes whose orientation confidence is below `min_confidence` are
/// drawn at reduced opacity.
#[must_use]
pub fn to_orientation_svg(
    input: &Input,
    min_confidence: f64,
    metadata: &SvgMetadata<'_>,
) -> String {
    let arrow = Marker::new()
        .set("id", "arrow")
        .set("viewBox", (0, 0, 10, 10))
        .set("refX", 5)
        .set("refY", 5)
        .set("markerWidth", 4)
        .set("markerHeight", 4)
        .set("orient", "auto-start-reverse")
        .add(
            Path::new()
                .set("d", "M0,0 L10,5 L0,10 z")
                .set("fill", "context-stroke"),
        );
    let mut doc = document(input, metadata).add(Definitions::new().add(arrow));

    for (&id, cluster) in &input.clusters {
        let color = cluster_color(id);
        let mut group = Group::new().set("id", format!("cluster-{id}"));
        for stroke in &cluster.strokes {
            let Some(path) = stroke_path(stroke.points(), color, 0.6) else {
                continue;
            };
            let uncertain = stroke
                .orientation()
                .is_some_and(|o| o.is_uncertain(min_confidence));
            let path = path
                .set("marker-end", "url(#arrow)")
                .set("opacity", if uncertain { 0.35 } else { 1.0 })
                .set("data-source", stroke.source_index());
            group = group.add(path);
            if let Some(start) = stroke.points().first() {
                group = group.add(
                    Circle::new()
                        .set("cx", start.x)
                        .set("cy", start.y)
                        .set("r", 0.6)
                        .set("fill", color),
                );
            }
        }
        doc = doc.add(group);
    }

    finish(&doc)
}

/// Render every stroke segment colored by its cluster-normalized `u`
/// on a blue-to-red ramp.
///
/// Within a jointly parameterized cluster, matching colors across
/// strokes mean matching positions along the intended curve.
#[must_use]
pub fn to_parameter_svg(input: &Input, metadata: &SvgMetadata<'_>) -> String {
    let mut doc = document(input, metadata);

    for (&id, cluster) in &input.clusters {
        let Some((lo, hi)) = u_range(cluster) else {
            continue;
        };
        let span = hi - lo;
        let normalize = |u: f64| if span > 0.0 { (u - lo) / span } else { 0.0 };

        let mut group = Group::new()
            .set("id", format!("cluster-{id}"))
            .set("stroke-width", 0.8)
            .set("stroke-linecap", "round");
        for stroke in &cluster.strokes {
            let (pts, u) = (stroke.points(), stroke.u());
            for k in 0..pts.len().saturating_sub(1) {
                let mid = 0.5 * (u[k] + u[k + 1]);
                group = group.add(
                    Line::new()
                        .set("x1", pts[k].x)
                        .set("y1", pts[k].y)
                        .set("x2", pts[k + 1].x)
                        .set("y2", pts[k + 1].y)
                        .set("stroke", rainbow(normalize(mid))),
                );
            }
        }
        doc = doc.add(group);
    }

    finish(&doc)
}

/// Render strokes in gray with isolines every `spacing` units of `u`.
///
/// Each isoline connects its crossings in stroke order and is colored by
/// level on the same ramp as [`to_parameter_svg`]. Crossings are marked
/// with small dots. Non-positive `spacing` renders strokes only.
#[must_use]
pub fn to_isolines_svg(input: &Input, spacing: f64, metadata: &SvgMetadata<'_>) -> String {
    let mut doc = document(input, metadata);

    for (&id, cluster) in &input.clusters {
        let mut group = Group::new()
            .set("id", format!("cluster-{id}"))
            .add(muted_cluster(cluster));

        let Some((lo, hi)) = u_range(cluster) else {
            doc = doc.add(group);
            continue;
        };
        let span = hi - lo;

        for line in isolines(cluster, &isoline_levels(cluster, spacing)) {
            let t = if span > 0.0 { (line.u - lo) / span } else { 0.0 };
            let color = rainbow(t);
            let positions: Vec<Point> = line.crossings.iter().map(|c| c.position).collect();
            let mut iso = Group::new()
                .set("class", "isoline")
                .set("data-u", line.u)
                .set("fill", color.as_str());
            if let Some(path) = stroke_path(&positions, &color, 0.3) {
                iso = iso.add(path);
            }
            for p in &positions {
                iso = iso.add(
                    Circle::new()
                        .set("cx", p.x)
                        .set("cy", p.y)
                        .set("r", 0.35),
                );
            }
            group = group.add(iso);
        }
        doc = doc.add(group);
    }

    finish(&doc)
}

/// Render the orientation resolver's evidence.
///
/// Strokes are drawn in gray (dashed when flipped). For every stroke
/// pair with any evidence, a line joins the two strokes' midpoints:
/// green when the pair agrees after flipping, red when it still
/// disagrees, dotted when the score came from endpoints only, and wider
/// for stronger scores. Each stroke is labeled with its index and
/// orientation confidence.
#[must_use]
pub fn to_orientation_debug_svg(result: &ProcessResult, metadata: &SvgMetadata<'_>) -> String {
    let mut doc = document(&result.input, metadata);

    for (&id, cluster) in &result.input.clusters {
        let Some(report) = result.orientation.get(&id) else {
            continue;
        };
        let mids: Vec<Point> = cluster
            .strokes
            .iter()
            .map(|s| s.points().get(s.len() / 2).copied().unwrap_or(Point::ZERO))
            .collect();
        let strongest = report
            .pairs
            .iter()
            .map(|p| p.score.abs())
            .fold(0.0, f64::max);

        let mut strokes = Group::new().set("class", "strokes");
        for (i, stroke) in cluster.strokes.iter().enumerate() {
            let flipped = report.reversed.get(i).copied().unwrap_or(false);
            if let Some(path) = stroke_path(stroke.points(), "#7f7f7f", 0.5) {
                let path = if flipped {
                    path.set("stroke-dasharray", "1.5 1")
                } else {
                    path
                };
                strokes = strokes.add(path);
            }
        }

        let mut pairs = Group::new().set("class", "pairs").set("opacity", 0.8);
        for pair in report.pairs.iter().filter(|p| p.score.abs() > f64::EPSILON) {
            let (Some(&a), Some(&b)) = (mids.get(pair.a), mids.get(pair.b)) else {
                continue;
            };
            let sign = |i: usize| {
                if report.reversed.get(i).copied().unwrap_or(false) {
                    -1.0
                } else {
                    1.0
                }
            };
            let resolved = pair.score * sign(pair.a) * sign(pair.b);
            let color = if resolved > 0.0 {
                AGREE_COLOR
            } else {
                DISAGREE_COLOR
            };
            let width = if strongest > 0.0 {
                0.15 + 0.85 * pair.score.abs() / strongest
            } else {
                0.15
            };
            let mut line = Line::new()
                .set("x1", a.x)
                .set("y1", a.y)
                .set("x2", b.x)
                .set("y2", b.y)
                .set("stroke", color)
                .set("stroke-width", width)
                .set("data-score", pair.score);
            if pair.endpoint_fallback {
                line = line.set("stroke-dasharray", "0.4 0.4");
            }
            pairs = pairs.add(line);
        }

        let mut labels = Group::new()
            .set("class", "labels")
            .set("font-family", "monospace")
            .set("font-size", 1.5);
        for (i, mid) in mids.iter().enumerate() {
            let confidence = report.confidence.get(i).copied().unwrap_or(0.0);
            labels = labels.add(
                TextElement::new(format!("{i}: {confidence:.2}"))
                    .set("x", mid.x + 0.5)
                    .set("y", mid.y - 0.5),
            );
        }

        doc = doc.add(
            Group::new()
                .set("id", format!("cluster-{id}"))
                .add(strokes)
                .add(pairs)
                .add(labels),
        );
    }

    finish(&doc)
}

/// Render the cross-stroke alignment terms behind each cluster's `u`.
///
/// Strokes are muted. Every alignment pair is a line from the query
/// point to its matched position, colored by how far apart their final
/// `u` values are (blue = aligned, red = the cluster's worst mismatch)
/// and widened by the term's weight. Each joint cluster is labeled with
/// its RMS residual.
#[must_use]
pub fn to_parameterization_debug_svg(
    result: &ProcessResult,
    metadata: &SvgMetadata<'_>,
) -> String {
    let mut doc = document(&result.input, metadata);

    for (&id, cluster) in &result.input.clusters {
        let Some(report) = result.parameterization.get(&id) else {
            continue;
        };
        let worst = report
            .pairs
            .iter()
            .map(|p| p.residual.abs())
            .fold(0.0, f64::max);
        let heaviest = report.pairs.iter().map(|p| p.weight).fold(0.0, f64::max);

        let mut pairs = Group::new().set("class", "alignment").set("opacity", 0.7);
        for pair in &report.pairs {
            let Some(from) = cluster
                .strokes
                .get(pair.from_stroke)
                .and_then(|s| s.points().get(pair.from_point))
            else {
                continue;
            };
            let color = if worst > 0.0 {
                rainbow(pair.residual.abs() / worst)
            } else {
                rainbow(0.0)
            };
            let width = if heaviest > 0.0 {
                0.05 + 0.3 * pair.weight / heaviest
            } else {
                0.05
            };
            pairs = pairs.add(
                Line::new()
                    .set("x1", from.x)
                    .set("y1", from.y)
                    .set("x2", pair.position.x)
                    .set("y2", pair.position.y)
                    .set("stroke", color)
                    .set("stroke-width", width)
                    .set("data-residual", pair.residual),
            );
        }

        let mut group = Group::new()
            .set("id", format!("cluster-{id}"))
            .add(muted_cluster(cluster))
            .add(pairs);
        if let Some(anchor) = cluster.strokes.first().and_then(|s| s.points().first()) {
            let label = if report.is_degraded() {
                format!("rms {:.3} (degraded)", report.residual)
            } else {
                format!("rms {:.3}", report.residual)
            };
            group = group.add(
                TextElement::new(label)
                    .set("x", anchor.x)
                    .set("y", anchor.y - 1.0)
                    .set("font-family", "monospace")
                    .set("font-size", 1.5),
            );
        }
        doc = doc.add(group);
    }

    finish(&doc)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use strokestrip_pipeline::{
        Capture, Dimensions, PipelineConfig, Sample, SketchedPolyline, process,
    };

    use super::*;

    fn result() -> ProcessResult {
        let line = |cluster, y: f64, reversed: bool| {
            let mut samples = vec![
                Sample::new(0.0, y, 0.0),
                Sample::new(20.0, y + 3.0, 0.5),
                Sample::new(40.0, y, 1.0),
            ];
            if reversed {
                samples.reverse();
            }
            SketchedPolyline { cluster, samples }
        };
        let capture = Capture {
            thickness: 1.0,
            canvas: Dimensions {
                width: 64,
                height: 64,
            },
            polylines: vec![
                line(0, 0.0, false),
                line(0, 1.0, true),
                line(0, 2.0, false),
                line(5, 30.0, false),
            ],
        };
        process(&capture, &PipelineConfig::default()).unwrap()
    }

    fn no_meta() -> SvgMetadata<'static> {
        SvgMetadata::default()
    }

    // --- build_path_data ---

    #[test]
    fn build_path_data_empty_polyline() {
        assert_eq!(build_path_data(&Polyline::new(vec![])), "");
    }

    #[test]
    fn build_path_data_single_point() {
        let polyline = Polyline::new(vec![Point::new(5.0, 5.0)]);
        assert_eq!(build_path_data(&polyline), "");
    }

    #[test]
    fn build_path_data_three_points() {
        let polyline = Polyline::new(vec![
            Point::new(10.0, 15.0),
            Point::new(12.5, 18.3),
            Point::new(14.0, 20.1),
        ]);
        assert_eq!(build_path_data(&polyline), "M10,15 L12.5,18.3 L14,20.1");
    }

    // --- Document frame ---

    #[test]
    fn every_rendering_is_a_complete_document() {
        let r = result();
        let meta = no_meta();
        for svg in [
            to_orientation_svg(&r.input, 0.25, &meta),
            to_parameter_svg(&r.input, &meta),
            to_isolines_svg(&r.input, 3.0, &meta),
            to_orientation_debug_svg(&r, &meta),
            to_parameterization_debug_svg(&r, &meta),
        ] {
            assert!(svg.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
            assert!(svg.contains("<svg"));
            assert!(svg.contains("viewBox="));
            assert!(svg.contains(r#"id="cluster-0""#));
            assert!(svg.contains(r#"id="cluster-5""#));
            assert!(svg.trim_end().ends_with("</svg>"));
        }
    }

    #[test]
    fn metadata_is_embedded_and_escaped() {
        let r = result();
        let meta = SvgMetadata {
            title: Some("two <strokes>"),
            description: Some("spacing=3 & weight=1"),
            config_json: Some(r#"{"resample_spacing":3.0}"#),
        };
        let svg = to_parameter_svg(&r.input, &meta);
        assert!(svg.contains("<title>two &lt;strokes&gt;</title>"));
        assert!(svg.contains("spacing=3 &amp; weight=1"));
        assert!(svg.contains("<metadata>"));
        assert!(svg.contains("strokestrip:pipeline"));
    }

    #[test]
    fn empty_input_renders_background_only() {
        let input = Input {
            clusters: std::collections::BTreeMap::new(),
            thickness: 1.0,
            width: 0.0,
            height: 0.0,
            canvas: Dimensions::default(),
        };
        let svg = to_parameter_svg(&input, &no_meta());
        assert!(svg.contains("<rect"));
        assert!(!svg.contains("<line"));
        assert!(svg.contains(r#"viewBox="-2 -2 4 4""#));
    }

    // --- Individual renderings ---

    #[test]
    fn orientation_marks_starts_and_ends() {
        let r = result();
        let svg = to_orientation_svg(&r.input, 0.25, &no_meta());
        assert_eq!(svg.matches("marker-end=").count(), 4);
        assert_eq!(svg.matches("<circle").count(), 4);
        assert!(svg.contains("<marker"));
        assert!(svg.contains(CLUSTER_COLORS[0]));
        assert!(svg.contains(CLUSTER_COLORS[5]));
    }

    #[test]
    fn rainbow_spans_blue_to_red() {
        assert_eq!(rainbow(0.0), "hsl(240,90%,45%)");
        assert_eq!(rainbow(1.0), "hsl(0,90%,45%)");
        assert_eq!(rainbow(7.0), "hsl(0,90%,45%)");
    }

    #[test]
    fn parameter_svg_has_one_line_per_segment() {
        let r = result();
        let segments: usize = r
            .input
            .strokes()
            .map(|(_, s)| s.len().saturating_sub(1))
            .sum();
        let svg = to_parameter_svg(&r.input, &no_meta());
        assert_eq!(svg.matches("<line").count(), segments);
        assert!(svg.contains("hsl(240,90%,45%)"));
    }

    #[test]
    fn isolines_cross_every_stroke_of_a_joint_cluster() {
        let r = result();
        let svg = to_isolines_svg(&r.input, 3.0, &no_meta());
        assert!(svg.contains(r#"class="isoline""#));
        let none = to_isolines_svg(&r.input, 0.0, &no_meta());
        assert!(!none.contains(r#"class="isoline""#));
    }

    #[test]
    fn debug_svg_shows_resolved_agreement() {
        let r = result();
        let svg = to_orientation_debug_svg(&r, &no_meta());
        // The reversed middle stroke is flipped and dashed.
        assert!(svg.contains("stroke-dasharray=\"1.5 1\""));
        // Every pair agrees once the flip is applied.
        assert!(svg.contains(AGREE_COLOR));
        assert!(!svg.contains(DISAGREE_COLOR));
        assert!(svg.contains("1: 1.00"));
    }

    #[test]
    fn parameterization_debug_draws_every_alignment_pair() {
        let r = result();
        let expected: usize = r.parameterization.values().map(|p| p.pairs.len()).sum();
        assert!(expected > 0);
        let svg = to_parameterization_debug_svg(&r, &no_meta());
        assert!(svg.contains(r#"class="alignment""#));
        assert_eq!(svg.matches("data-residual=").count(), expected);
        assert!(svg.contains("rms "));
        assert!(!svg.contains("(degraded)"));
    }

    #[test]
    fn parameterization_debug_colors_by_residual() {
        let mut r = result();
        let report = r.parameterization.get_mut(&0).unwrap();
        report.pairs.truncate(2);
        report.pairs[0].residual = 0.0;
        report.pairs[1].residual = -3.0;
        report.fallback_components = 1;
        let svg = to_parameterization_debug_svg(&r, &no_meta());
        // Aligned pair at the blue end, worst pair at the red end.
        assert!(svg.contains("hsl(240,90%,45%)"));
        assert!(svg.contains("hsl(0,90%,45%)"));
        assert!(svg.contains("(degraded)"));
    }

    #[test]
    fn cluster_colors_wrap_for_any_id() {
        assert_eq!(cluster_color(0), CLUSTER_COLORS[0]);
        assert_eq!(cluster_color(9), CLUSTER_COLORS[1]);
        assert_eq!(cluster_color(-1), CLUSTER_COLORS[7]);
    }
}

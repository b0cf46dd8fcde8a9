//! Orientation resolution: make every stroke of a cluster run the same way.
//!
//! # Algorithm overview
//!
//! 1. **Pairwise agreement:** correspondences between every pair of
//!    strokes (see [`crate::correspond`]) are scored by how well the two
//!    strokes' tangents line up at each match, weighted by proximity.
//!    The sum is positive when both strokes already run the same way
//!    along their shared path, negative otherwise. Pairs that share no
//!    match fall back to a weak score derived from their endpoints.
//!
//! 2. **Sign consistency:** choose `s ∈ {±1}ⁿ` maximizing
//!    `Σ w_ij s_i s_j` over the complete graph of pair scores. Small
//!    clusters are solved exhaustively; larger ones propagate signs along
//!    a maximum spanning tree of `|w|` (Kruskal via `UnionFind`) and then
//!    improve by single-stroke flips until no flip helps.
//!
//! 3. **Canonicalize:** the objective is symmetric under flipping every
//!    stroke, so the solution flipping fewer strokes wins; with exactly
//!    half flipped, stroke 0 keeps its drawn direction.
//!
//! 4. **Apply:** strokes with `s_i = -1` have their points (and `u`)
//!    reversed. Every stroke records its decision and a confidence so
//!    weakly supported decisions can be flagged.
//!
//! The resolver never fails. With no signal at all every stroke keeps its
//! drawn direction.

use std::collections::{BTreeMap, VecDeque};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::correspond::{CorrespondenceRule, Match};
use crate::types::{Cluster, ClusterId, Input, Orientation, PipelineConfig, Point, Stroke};

/// Scale applied to endpoint-only pair scores so a single real match
/// always outweighs them.
const ENDPOINT_FALLBACK_WEIGHT: f64 = 0.1;

/// Scores closer than this are treated as equal.
const SCORE_EPSILON: f64 = 1e-9;

/// Upper bound on local-search passes over the cluster.
const MAX_LOCAL_SEARCH_PASSES: usize = 64;

/// Which strategy produced a cluster's orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrientationSolver {
    /// Zero or one stroke: nothing to resolve.
    Trivial,
    /// Every assignment was evaluated.
    Exhaustive,
    /// Maximum spanning tree propagation plus local search.
    SpanningTree,
}

/// Signed agreement between two strokes of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairAgreement {
    /// First stroke index (`a < b`).
    pub a: usize,
    /// Second stroke index.
    pub b: usize,
    /// Positive when the strokes run the same way in drawn order.
    pub score: f64,
    /// Number of correspondences that contributed (both directions).
    pub matches: usize,
    /// Whether the score came from endpoint alignment only.
    pub endpoint_fallback: bool,
}

/// Read-only snapshot of the decisions made for one cluster.
///
/// Indices refer to the cluster's strokes in capture order, which the
/// resolver preserves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterOrientation {
    /// Agreement for every unordered stroke pair.
    pub pairs: Vec<PairAgreement>,
    /// Final per-stroke flip decision.
    pub reversed: Vec<bool>,
    /// Per-stroke confidence, see [`Orientation::confidence`].
    pub confidence: Vec<f64>,
    /// Total agreement `Σ w_ij s_i s_j` of the chosen assignment.
    pub score: f64,
    /// Strategy used.
    pub solver: OrientationSolver,
}

impl ClusterOrientation {
    /// Number of strokes that were reversed.
    #[must_use]
    pub fn flipped_count(&self) -> usize {
        self.reversed.iter().filter(|&&r| r).count()
    }

    /// Indices of strokes whose confidence is below `min_confidence`.
    #[must_use]
    pub fn uncertain_strokes(&self, min_confidence: f64) -> Vec<usize> {
        self.confidence
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c < min_confidence)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Resolve orientation for every cluster of `input`.
///
/// Returns a new [`Input`] with strokes reversed where needed, plus the
/// per-cluster diagnostic snapshots. Clusters never influence each other.
#[must_use]
pub fn orient_input(
    input: &Input,
    config: &PipelineConfig,
) -> (Input, BTreeMap<ClusterId, ClusterOrientation>) {
    let mut clusters = BTreeMap::new();
    let mut reports = BTreeMap::new();
    for (&id, cluster) in &input.clusters {
        let (oriented, report) = orient_cluster(cluster, config);
        clusters.insert(id, oriented);
        reports.insert(id, report);
    }
    (input.with_clusters(clusters), reports)
}

/// Resolve orientation within a single cluster.
#[must_use]
pub fn orient_cluster(cluster: &Cluster, config: &PipelineConfig) -> (Cluster, ClusterOrientation) {
    let n = cluster.strokes.len();
    if n < 2 {
        let report = ClusterOrientation {
            pairs: Vec::new(),
            reversed: vec![false; n],
            confidence: vec![1.0; n],
            score: 0.0,
            solver: OrientationSolver::Trivial,
        };
        return (apply(cluster, &report), report);
    }

    let matches = config
        .correspondence
        .correspond(cluster, config.max_correspondence_distance);
    let pairs = pair_agreements(cluster, &matches, config.max_correspondence_distance);
    let weights = weight_matrix(n, &pairs);

    // The enumeration mask must fit a `u64` even without `validate()`.
    let exhaustive_limit = config
        .exhaustive_orientation_limit
        .min(PipelineConfig::MAX_EXHAUSTIVE_ORIENTATION_LIMIT);
    let (signs, solver) = if n <= exhaustive_limit {
        (solve_exhaustive(&weights), OrientationSolver::Exhaustive)
    } else {
        (
            solve_spanning_tree(&weights, &pairs),
            OrientationSolver::SpanningTree,
        )
    };
    let signs = canonicalize(signs);

    let report = ClusterOrientation {
        confidence: confidences(&weights, &signs),
        score: objective(&weights, &signs),
        reversed: signs.iter().map(|&s| s < 0.0).collect(),
        pairs,
        solver,
    };
    (apply(cluster, &report), report)
}

/// Score every unordered stroke pair of the cluster.
///
/// `matches` must come from a [`CorrespondenceRule`] run on the same
/// cluster.
#[must_use]
pub fn pair_agreements(
    cluster: &Cluster,
    matches: &[Match],
    max_distance: f64,
) -> Vec<PairAgreement> {
    let n = cluster.strokes.len();
    let mut sums = vec![0.0; n * n];
    let mut counts = vec![0_usize; n * n];
    for m in matches {
        let (a, b) = (m.from_stroke.min(m.to_stroke), m.from_stroke.max(m.to_stroke));
        let idx = a * n + b;
        sums[idx] += m.tangent_agreement(cluster) * m.proximity(max_distance);
        counts[idx] += 1;
    }

    let mut pairs = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for a in 0..n {
        for b in (a + 1)..n {
            let idx = a * n + b;
            let pair = if counts[idx] > 0 {
                PairAgreement {
                    a,
                    b,
                    score: sums[idx],
                    matches: counts[idx],
                    endpoint_fallback: false,
                }
            } else {
                PairAgreement {
                    a,
                    b,
                    score: ENDPOINT_FALLBACK_WEIGHT
                        * endpoint_agreement(&cluster.strokes[a], &cluster.strokes[b]),
                    matches: 0,
                    endpoint_fallback: true,
                }
            };
            pairs.push(pair);
        }
    }
    pairs
}

/// Endpoint-only agreement in `[-1, 1]` for strokes with no overlap.
///
/// Averages two signals: whether the overall chord directions agree, and
/// whether same-named endpoints lie closer together than crossed ones.
fn endpoint_agreement(a: &Stroke, b: &Stroke) -> f64 {
    let (Some(&a0), Some(&a1), Some(&b0), Some(&b1)) = (
        a.polyline().first(),
        a.polyline().last(),
        b.polyline().first(),
        b.polyline().last(),
    ) else {
        return 0.0;
    };

    let chord = |from: Point, to: Point| (to - from).normalized().unwrap_or(Point::ZERO);
    let direction = chord(a0, a1).dot(chord(b0, b1));

    let same = a0.distance(b0) + a1.distance(b1);
    let crossed = a0.distance(b1) + a1.distance(b0);
    let total = same + crossed;
    let ends = if total > f64::EPSILON {
        (crossed - same) / total
    } else {
        0.0
    };

    0.5 * (direction + ends)
}

fn weight_matrix(n: usize, pairs: &[PairAgreement]) -> Vec<Vec<f64>> {
    let mut w = vec![vec![0.0; n]; n];
    for p in pairs {
        w[p.a][p.b] = p.score;
        w[p.b][p.a] = p.score;
    }
    w
}

/// `Σ_{i<j} w_ij s_i s_j`.
fn objective(weights: &[Vec<f64>], signs: &[f64]) -> f64 {
    let mut total = 0.0;
    for i in 0..signs.len() {
        for j in (i + 1)..signs.len() {
            total += weights[i][j] * signs[i] * signs[j];
        }
    }
    total
}

fn flip_count(signs: &[f64]) -> usize {
    signs.iter().filter(|&&s| s < 0.0).count()
}

/// Evaluate all `2^(n-1)` assignments with stroke 0 fixed.
fn solve_exhaustive(weights: &[Vec<f64>]) -> Vec<f64> {
    let n = weights.len();
    let mut best_signs = vec![1.0; n];
    let mut best_score = objective(weights, &best_signs);
    let mut best_flips = 0;

    let mut signs = vec![1.0; n];
    for mask in 1_u64..(1_u64 << (n - 1)) {
        for (i, s) in signs.iter_mut().enumerate().skip(1) {
            *s = if mask & (1 << (i - 1)) == 0 { 1.0 } else { -1.0 };
        }
        let score = objective(weights, &signs);
        let flips = flip_count(&signs).min(n - flip_count(&signs));
        if score > best_score + SCORE_EPSILON
            || ((score - best_score).abs() <= SCORE_EPSILON && flips < best_flips)
        {
            best_score = score;
            best_flips = flips;
            best_signs.copy_from_slice(&signs);
        }
    }
    best_signs
}

/// Propagate signs along a maximum-|w| spanning forest, then refine.
fn solve_spanning_tree(weights: &[Vec<f64>], pairs: &[PairAgreement]) -> Vec<f64> {
    let n = weights.len();

    let mut order: Vec<&PairAgreement> = pairs.iter().collect();
    order.sort_by(|x, y| y.score.abs().total_cmp(&x.score.abs()));

    let mut graph = UnGraph::<(), f64>::with_capacity(n, n.saturating_sub(1));
    let nodes: Vec<NodeIndex> = (0..n).map(|_| graph.add_node(())).collect();
    let mut uf = UnionFind::<usize>::new(n);
    for p in order {
        if p.score.abs() <= SCORE_EPSILON {
            break;
        }
        if uf.union(p.a, p.b) {
            graph.add_edge(nodes[p.a], nodes[p.b], p.score);
        }
    }

    let mut signs = vec![0.0; n];
    for root in 0..n {
        if signs[root] != 0.0 {
            continue;
        }
        signs[root] = 1.0;
        let mut queue = VecDeque::from([nodes[root]]);
        while let Some(node) = queue.pop_front() {
            let s = signs[node.index()];
            for edge in graph.edges(node) {
                let other = if edge.source() == node {
                    edge.target()
                } else {
                    edge.source()
                };
                if signs[other.index()] == 0.0 {
                    signs[other.index()] = if *edge.weight() < 0.0 { -s } else { s };
                    queue.push_back(other);
                }
            }
        }
    }

    local_search(weights, &mut signs);
    signs
}

/// Flip single strokes while doing so increases the objective.
fn local_search(weights: &[Vec<f64>], signs: &mut [f64]) {
    for _ in 0..MAX_LOCAL_SEARCH_PASSES {
        let mut improved = false;
        for i in 0..signs.len() {
            let field: f64 = (0..signs.len())
                .filter(|&j| j != i)
                .map(|j| weights[i][j] * signs[j])
                .sum();
            // Flipping i changes the objective by -2 s_i field.
            if -2.0 * signs[i] * field > SCORE_EPSILON {
                signs[i] = -signs[i];
                improved = true;
            }
        }
        if !improved {
            break;
        }
    }
}

/// Pick the representative of `{s, -s}` that flips fewer strokes, keeping
/// stroke 0 unflipped on an exact tie.
fn canonicalize(mut signs: Vec<f64>) -> Vec<f64> {
    let n = signs.len();
    let flips = flip_count(&signs);
    let negate = flips * 2 > n || (flips * 2 == n && signs.first().is_some_and(|&s| s < 0.0));
    if negate {
        for s in &mut signs {
            *s = -*s;
        }
    }
    signs
}

fn confidences(weights: &[Vec<f64>], signs: &[f64]) -> Vec<f64> {
    (0..signs.len())
        .map(|i| {
            let mut agree = 0.0;
            let mut total = 0.0;
            for j in (0..signs.len()).filter(|&j| j != i) {
                agree += weights[i][j] * signs[i] * signs[j];
                total += weights[i][j].abs();
            }
            if total > SCORE_EPSILON {
                agree / total
            } else {
                0.0
            }
        })
        .collect()
}

fn apply(cluster: &Cluster, report: &ClusterOrientation) -> Cluster {
    Cluster::new(
        cluster
            .strokes
            .iter()
            .zip(report.reversed.iter().zip(&report.confidence))
            .map(|(stroke, (&reversed, &confidence))| {
                stroke.oriented(Orientation {
                    reversed,
                    confidence,
                })
            })
            .collect(),
    )
}

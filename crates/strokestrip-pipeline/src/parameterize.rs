//! Joint parameterization: one comparable `u` coordinate per cluster.
//!
//! # Algorithm overview
//!
//! For each cluster independently:
//!
//! 1. **Correspondences:** match every point against the other strokes
//!    (see [`crate::correspond`]). Strokes are already oriented, so matches
//!    whose tangents point opposite ways (hooks, overshoots) are dropped,
//!    and so are projections clamped past the far end of the other stroke.
//!
//! 2. **Least squares:** one unknown `u` per point. Two kinds of terms:
//!
//!    ```text
//!    arc length:  (u[k+1] - u[k] - len(k))²                 within a stroke
//!    alignment:   w · (u[i] - ((1-t)·u[j] + t·u[j+1]))²     across strokes
//!    ```
//!
//!    Strokes tied together by alignment terms form components
//!    (`UnionFind`). Each component pins its first point to 0 and solves
//!    its normal equations by sparse Cholesky factorization. Every term
//!    touches at most three unknowns, so the system is assembled in
//!    triplet form and the unknowns are renumbered by reverse
//!    Cuthill-McKee to keep the factor narrow.
//!
//! 3. **Monotonicity:** each stroke's `u` is projected onto the closest
//!    non-decreasing sequence (pool-adjacent-violators), then each
//!    component is shifted so it starts at 0.
//!
//! Single strokes, strokes without any usable match, and components whose
//! factorization fails all receive plain cumulative arc length, so every
//! point always gets a value. Failed components are counted so callers can
//! tell a partially degraded cluster apart from a clean joint solve.

use std::collections::{BTreeMap, VecDeque};

use nalgebra::DMatrix;
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};

use crate::correspond::{CorrespondenceRule, Match};
use crate::geometry::cumulative_arc_length;
use crate::types::{Cluster, ClusterId, Input, PipelineConfig, Point, Stroke};

/// How a cluster's `u` values were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterizationStatus {
    /// Zero or one stroke: arc length is the exact answer.
    SingleStroke,
    /// At least one component was solved jointly.
    Joint,
    /// No usable correspondence (or no successful solve): every stroke
    /// carries its own arc length.
    ArcLengthFallback,
}

/// One cross-stroke alignment term as it entered the solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentPair {
    /// Stroke of the query point.
    pub from_stroke: usize,
    /// Point index within `from_stroke`.
    pub from_point: usize,
    /// Stroke the point was matched against.
    pub to_stroke: usize,
    /// Matched location on `to_stroke`.
    pub position: Point,
    /// Weight of the term in the least-squares objective.
    pub weight: f64,
    /// Final `u` of the query point minus the interpolated `u` at
    /// `position`, in stroke widths.
    pub residual: f64,
}

/// Read-only summary of one cluster's parameterization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterParameterization {
    /// How the values were obtained.
    pub status: ParameterizationStatus,
    /// Number of independently gauged components.
    pub components: usize,
    /// Multi-stroke components whose factorization failed and which
    /// carry plain arc length instead.
    pub fallback_components: usize,
    /// Alignment terms that entered the solve.
    pub alignment_terms: usize,
    /// Strokes with no alignment term at all.
    pub isolated_strokes: usize,
    /// Root-mean-square mismatch over alignment terms after the final
    /// adjustment, in stroke widths.
    pub residual: f64,
    /// Every alignment term with its final residual.
    pub pairs: Vec<AlignmentPair>,
}

impl ClusterParameterization {
    /// Whether the cluster degraded to per-stroke arc length.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        matches!(self.status, ParameterizationStatus::ArcLengthFallback)
    }

    /// Whether any part of the cluster carries arc length where a joint
    /// solve was attempted.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.is_fallback() || self.fallback_components > 0
    }
}

/// A cross-stroke alignment term in cluster-global variable indices.
#[derive(Debug, Clone, Copy)]
struct AlignmentTerm {
    from_stroke: usize,
    from_point: usize,
    to_stroke: usize,
    /// Variable of the query point.
    i: usize,
    /// First variable of the matched segment.
    j: usize,
    t: f64,
    position: Point,
    weight: f64,
}

/// `weight · (Σ c_k x_k - rhs)²` over component-local variables.
struct Equation {
    coefficients: Vec<(usize, f64)>,
    rhs: f64,
    weight: f64,
}

/// Parameterize every cluster of `input`.
#[must_use]
pub fn parameterize_input(
    input: &Input,
    config: &PipelineConfig,
) -> (Input, BTreeMap<ClusterId, ClusterParameterization>) {
    let mut clusters = BTreeMap::new();
    let mut reports = BTreeMap::new();
    for (&id, cluster) in &input.clusters {
        let (parameterized, report) = parameterize_cluster(cluster, config);
        clusters.insert(id, parameterized);
        reports.insert(id, report);
    }
    (input.with_clusters(clusters), reports)
}

/// Parameterize a single, already oriented cluster.
#[must_use]
pub fn parameterize_cluster(
    cluster: &Cluster,
    config: &PipelineConfig,
) -> (Cluster, ClusterParameterization) {
    let n = cluster.strokes.len();
    if n < 2 {
        return (
            with_arc_length(cluster),
            ClusterParameterization {
                status: ParameterizationStatus::SingleStroke,
                components: n,
                fallback_components: 0,
                alignment_terms: 0,
                isolated_strokes: 0,
                residual: 0.0,
                pairs: Vec::new(),
            },
        );
    }

    let offsets = variable_offsets(cluster);
    let matches = config
        .correspondence
        .correspond(cluster, config.max_correspondence_distance);
    let terms = alignment_terms(cluster, &matches, &offsets, config);
    solve_cluster(cluster, &offsets, &terms)
}

/// Index of each stroke's first variable in the cluster-wide numbering.
fn variable_offsets(cluster: &Cluster) -> Vec<usize> {
    cluster
        .strokes
        .iter()
        .scan(0, |acc, s| {
            let start = *acc;
            *acc += s.len();
            Some(start)
        })
        .collect()
}

fn solve_cluster(
    cluster: &Cluster,
    offsets: &[usize],
    terms: &[AlignmentTerm],
) -> (Cluster, ClusterParameterization) {
    let n = cluster.strokes.len();
    let mut uf = UnionFind::<usize>::new(n);
    let mut linked = vec![false; n];
    for term in terms {
        uf.union(term.from_stroke, term.to_stroke);
        linked[term.from_stroke] = true;
        linked[term.to_stroke] = true;
    }
    let isolated_strokes = linked.iter().filter(|&&l| !l).count();

    // Group strokes by component, keeping capture order inside each.
    let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for s in 0..n {
        components.entry(uf.find_mut(s)).or_default().push(s);
    }

    let mut u: Vec<Vec<f64>> = cluster
        .strokes
        .iter()
        .map(|s| cumulative_arc_length(s.points()))
        .collect();

    let mut solved = 0;
    let mut failed = 0;
    for members in components.values().filter(|m| m.len() > 1) {
        if let Some(solution) = solve_component(cluster, members, offsets, terms) {
            for (&s, values) in members.iter().zip(solution) {
                u[s] = values;
            }
            solved += 1;
        } else {
            failed += 1;
        }
    }

    for members in components.values() {
        for &s in members {
            u[s] = isotonic_non_decreasing(&u[s]);
        }
        let min = members
            .iter()
            .flat_map(|&s| u[s].iter().copied())
            .fold(f64::INFINITY, f64::min);
        if min.is_finite() {
            for &s in members {
                for v in &mut u[s] {
                    *v -= min;
                }
            }
        }
    }

    let pairs = alignment_pairs(terms, offsets, &u);
    let residual = rms_residual(&pairs);
    let status = if solved > 0 {
        ParameterizationStatus::Joint
    } else {
        ParameterizationStatus::ArcLengthFallback
    };

    let strokes = cluster
        .strokes
        .iter()
        .zip(u)
        .map(|(stroke, values)| stroke.replace_u(values))
        .collect();

    (
        Cluster::new(strokes),
        ClusterParameterization {
            status,
            components: components.len(),
            fallback_components: failed,
            alignment_terms: terms.len(),
            isolated_strokes,
            residual,
            pairs,
        },
    )
}

/// Keep matches between consistently oriented strokes and translate them
/// to global variable indices.
fn alignment_terms(
    cluster: &Cluster,
    matches: &[Match],
    offsets: &[usize],
    config: &PipelineConfig,
) -> Vec<AlignmentTerm> {
    matches
        .iter()
        .filter(|m| m.tangent_agreement(cluster) > 0.0)
        .filter(|m| !overhangs(cluster, m))
        .filter_map(|m| {
            let weight =
                config.alignment_weight * m.proximity(config.max_correspondence_distance);
            (weight > 0.0).then(|| AlignmentTerm {
                from_stroke: m.from_stroke,
                from_point: m.from_point,
                to_stroke: m.to_stroke,
                i: offsets[m.from_stroke] + m.from_point,
                j: offsets[m.to_stroke] + m.to_segment,
                t: m.t,
                position: m.position,
                weight,
            })
        })
        .collect()
}

/// A projection clamped past the very start or end of the other stroke:
/// the query point lies beyond that stroke, so the two do not overlap
/// there.
///
/// Vertex snapping also lands on `t = 0` or `t = 1`, so only genuinely
/// clamped projections count.
fn overhangs(cluster: &Cluster, m: &Match) -> bool {
    let Some(to) = cluster.strokes.get(m.to_stroke) else {
        return true;
    };
    let before_start = m.to_segment == 0 && m.t <= 0.0;
    let after_end = m.to_segment + 2 >= to.len() && m.t >= 1.0;
    m.clamped && (before_start || after_end)
}

/// Accumulate `weight · (Σ c_k x_k - rhs)²` into sparse normal equations.
fn accumulate(
    h: &mut CooMatrix<f64>,
    g: &mut [f64],
    coefficients: &[(usize, f64)],
    rhs: f64,
    weight: f64,
) {
    for &(a, ca) in coefficients {
        g[a] += weight * ca * rhs;
        for &(b, cb) in coefficients {
            h.push(a, b, weight * ca * cb);
        }
    }
}

/// Solve one connected component. Returns one `u` vector per member
/// stroke, or `None` when the system cannot be factorized.
fn solve_component(
    cluster: &Cluster,
    members: &[usize],
    offsets: &[usize],
    terms: &[AlignmentTerm],
) -> Option<Vec<Vec<f64>>> {
    // Map cluster-global variables to component-local ones.
    let mut local = BTreeMap::new();
    let mut count = 0;
    for &s in members {
        for k in 0..cluster.strokes[s].len() {
            local.insert(offsets[s] + k, count);
            count += 1;
        }
    }
    if count < 2 {
        return None;
    }

    let mut equations = Vec::new();
    for &s in members {
        let pts = cluster.strokes[s].points();
        for k in 0..pts.len().saturating_sub(1) {
            equations.push(Equation {
                coefficients: vec![
                    (local[&(offsets[s] + k + 1)], 1.0),
                    (local[&(offsets[s] + k)], -1.0),
                ],
                rhs: pts[k].distance(pts[k + 1]),
                weight: 1.0,
            });
        }
    }
    for term in terms {
        let (Some(&i), Some(&j0), Some(&j1)) = (
            local.get(&term.i),
            local.get(&term.j),
            local.get(&(term.j + 1)),
        ) else {
            continue;
        };
        equations.push(Equation {
            coefficients: vec![(i, 1.0), (j0, -(1.0 - term.t)), (j1, -term.t)],
            rhs: 0.0,
            weight: term.weight,
        });
    }

    // Local variable 0 (first point of the first member) is pinned to
    // zero, so it drops out of every equation.
    let unknowns = count - 1;
    for eq in &mut equations {
        eq.coefficients.retain(|&(v, _)| v > 0);
        for (v, _) in &mut eq.coefficients {
            *v -= 1;
        }
    }

    let mut adjacency = vec![Vec::new(); unknowns];
    for eq in &equations {
        for &(a, _) in &eq.coefficients {
            adjacency[a].extend(
                eq.coefficients
                    .iter()
                    .map(|&(b, _)| b)
                    .filter(|&b| b != a),
            );
        }
    }
    for neighbors in &mut adjacency {
        neighbors.sort_unstable();
        neighbors.dedup();
    }
    let order = reverse_cuthill_mckee(&adjacency);
    let mut position = vec![0; unknowns];
    for (new, &old) in order.iter().enumerate() {
        position[old] = new;
    }

    let mut h = CooMatrix::new(unknowns, unknowns);
    let mut g = vec![0.0; unknowns];
    for eq in &equations {
        let coefficients: Vec<(usize, f64)> = eq
            .coefficients
            .iter()
            .map(|&(v, c)| (position[v], c))
            .collect();
        accumulate(&mut h, &mut g, &coefficients, eq.rhs, eq.weight);
    }

    let factor = CscCholesky::factor(&CscMatrix::from(&h)).ok()?;
    let solution = factor.solve(&DMatrix::from_column_slice(unknowns, 1, &g));
    if solution.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let mut values = Vec::with_capacity(members.len());
    let mut next = 0;
    for &s in members {
        let len = cluster.strokes[s].len();
        let stroke_u: Vec<f64> = (next..next + len)
            .map(|k| {
                if k == 0 {
                    0.0
                } else {
                    solution[(position[k - 1], 0)]
                }
            })
            .collect();
        next += len;
        values.push(stroke_u);
    }
    Some(values)
}

/// Reverse Cuthill-McKee ordering of a symmetric sparsity graph.
///
/// Returns `order` with `order[new] = old`. Neighboring unknowns end up
/// close together, which bounds the Cholesky factor to a narrow profile.
fn reverse_cuthill_mckee(adjacency: &[Vec<usize>]) -> Vec<usize> {
    let n = adjacency.len();
    let mut order = Vec::with_capacity(n);
    let mut visited = vec![false; n];

    let mut seeds: Vec<usize> = (0..n).collect();
    seeds.sort_by_key(|&v| adjacency[v].len());

    for seed in seeds {
        if visited[seed] {
            continue;
        }
        let start = farthest(adjacency, farthest(adjacency, seed));
        visited[start] = true;
        let mut queue = VecDeque::from([start]);
        while let Some(v) = queue.pop_front() {
            order.push(v);
            let mut next: Vec<usize> = adjacency[v]
                .iter()
                .copied()
                .filter(|&w| !visited[w])
                .collect();
            next.sort_by_key(|&w| adjacency[w].len());
            for w in next {
                visited[w] = true;
                queue.push_back(w);
            }
        }
    }

    order.reverse();
    order
}

/// Last vertex reached by a breadth-first search from `start`: a cheap
/// pseudo-peripheral starting point.
fn farthest(adjacency: &[Vec<usize>], start: usize) -> usize {
    let mut seen = vec![false; adjacency.len()];
    seen[start] = true;
    let mut queue = VecDeque::from([start]);
    let mut last = start;
    while let Some(v) = queue.pop_front() {
        last = v;
        for &w in &adjacency[v] {
            if !seen[w] {
                seen[w] = true;
                queue.push_back(w);
            }
        }
    }
    last
}

/// Closest non-decreasing sequence in the least-squares sense
/// (pool-adjacent-violators).
fn isotonic_non_decreasing(values: &[f64]) -> Vec<f64> {
    // (sum, count) blocks; each block's mean is non-decreasing.
    let mut blocks: Vec<(f64, usize)> = Vec::with_capacity(values.len());
    for &v in values {
        blocks.push((v, 1));
        while blocks.len() >= 2 {
            let (s2, c2) = blocks[blocks.len() - 1];
            let (s1, c1) = blocks[blocks.len() - 2];
            #[allow(clippy::cast_precision_loss)]
            let violates = s1 / c1 as f64 > s2 / c2 as f64;
            if !violates {
                break;
            }
            blocks.pop();
            blocks.pop();
            blocks.push((s1 + s2, c1 + c2));
        }
    }
    blocks
        .into_iter()
        .flat_map(|(sum, count)| {
            #[allow(clippy::cast_precision_loss)]
            let mean = sum / count as f64;
            std::iter::repeat_n(mean, count)
        })
        .collect()
}

/// Snapshot every term with its residual under the final `u`.
fn alignment_pairs(
    terms: &[AlignmentTerm],
    offsets: &[usize],
    u: &[Vec<f64>],
) -> Vec<AlignmentPair> {
    let value = |global: usize| -> f64 {
        let stroke = offsets.partition_point(|&o| o <= global) - 1;
        u[stroke][global - offsets[stroke]]
    };
    terms
        .iter()
        .map(|term| {
            let target = (1.0 - term.t).mul_add(value(term.j), term.t * value(term.j + 1));
            AlignmentPair {
                from_stroke: term.from_stroke,
                from_point: term.from_point,
                to_stroke: term.to_stroke,
                position: term.position,
                weight: term.weight,
                residual: value(term.i) - target,
            }
        })
        .collect()
}

fn rms_residual(pairs: &[AlignmentPair]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = pairs.iter().map(|p| p.residual * p.residual).sum();
    #[allow(clippy::cast_precision_loss)]
    let mean = sum_sq / pairs.len() as f64;
    mean.sqrt()
}

fn with_arc_length(cluster: &Cluster) -> Cluster {
    Cluster::new(
        cluster
            .strokes
            .iter()
            .map(|s: &Stroke| s.replace_u(cumulative_arc_length(s.points())))
            .collect(),
    )
}

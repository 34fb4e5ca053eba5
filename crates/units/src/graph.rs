//! Flattened all-pairs conversion table.
//!
//! Built once per tenant from that tenant's equivalence rows:
//!
//! 1. a forward map (sale -> storage, ratio `equal`) and a reverse map
//!    (storage -> sale, ratio `1 / equal`);
//! 2. connected chains are discovered over both maps;
//! 3. each chain is validated (no directed cycle, no chain longer than the depth
//!    cap, ratios consistent around any diamond) and every pair of units in a
//!    valid chain is memoized, so a query is one hash lookup.
//!
//! A chain that fails validation is excluded from the table; its units answer
//! `InvalidEquivalence` instead of a number. Other chains are unaffected.

use std::collections::{BTreeSet, HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use stockledger_core::UnitId;

use crate::error::ConversionError;
use crate::unit::UnitEquivalence;

/// Traversal cap for one chain (edges).
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 100;

/// Relative tolerance used when checking that two paths agree.
const RATIO_TOLERANCE: f64 = 1e-9;

/// What to do when two units are not connected.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionPolicy {
    /// Surface `MissingConversion`.
    #[default]
    Strict,
    /// Treat the contribution as zero (partial balances), logging a warning.
    BestEffort,
}

#[derive(Debug, Clone, Default)]
pub struct ConversionGraph {
    multipliers: HashMap<(UnitId, UnitId), f64>,
    rejected: HashMap<UnitId, String>,
    issues: Vec<ConversionError>,
}

impl ConversionGraph {
    pub fn build(equivalences: &[UnitEquivalence], max_depth: usize) -> Self {
        let mut graph = ConversionGraph::default();

        let mut forward: HashMap<UnitId, Vec<(UnitId, f64)>> = HashMap::new();
        let mut reverse: HashMap<UnitId, Vec<(UnitId, f64)>> = HashMap::new();
        let mut units: BTreeSet<UnitId> = BTreeSet::new();

        for eq in equivalences {
            if let Err(err) = eq.validate() {
                graph.issues.push(err);
                continue;
            }
            forward
                .entry(eq.sale_unit())
                .or_default()
                .push((eq.storage_unit(), eq.equal()));
            reverse
                .entry(eq.storage_unit())
                .or_default()
                .push((eq.sale_unit(), 1.0 / eq.equal()));
            units.insert(eq.sale_unit());
            units.insert(eq.storage_unit());
        }

        // Deterministic traversal order regardless of row order.
        for edges in forward.values_mut().chain(reverse.values_mut()) {
            edges.sort_by(|a, b| a.0.cmp(&b.0));
        }

        let mut assigned: BTreeSet<UnitId> = BTreeSet::new();
        for &root in &units {
            if assigned.contains(&root) {
                continue;
            }
            let chain = connected_chain(root, &forward, &reverse);
            assigned.extend(chain.iter().copied());

            match flatten_chain(root, &chain, &forward, &reverse, max_depth) {
                Ok(potentials) => {
                    for (&a, &pa) in &potentials {
                        for (&b, &pb) in &potentials {
                            if a != b {
                                graph.multipliers.insert((a, b), pb / pa);
                            }
                        }
                    }
                }
                Err(reason) => {
                    for &unit in &chain {
                        graph.rejected.insert(unit, reason.clone());
                    }
                    graph.issues.push(ConversionError::invalid(reason));
                }
            }
        }

        graph
    }

    /// Multiplier `m` such that `qty_in_to = qty_in_from * m`.
    pub fn multiplier(&self, from: UnitId, to: UnitId) -> Result<f64, ConversionError> {
        if from == to {
            return Ok(1.0);
        }
        if let Some(m) = self.multipliers.get(&(from, to)) {
            return Ok(*m);
        }
        if let Some(reason) = self.rejected.get(&from).or_else(|| self.rejected.get(&to)) {
            return Err(ConversionError::invalid(reason.clone()));
        }
        Err(ConversionError::MissingConversion { from, to })
    }

    pub fn convert(&self, qty: f64, from: UnitId, to: UnitId) -> Result<f64, ConversionError> {
        Ok(qty * self.multiplier(from, to)?)
    }

    /// Configuration problems found while building (one per rejected chain or row).
    pub fn issues(&self) -> &[ConversionError] {
        &self.issues
    }

    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Number of memoized (ordered) unit pairs.
    pub fn len(&self) -> usize {
        self.multipliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.multipliers.is_empty()
    }
}

/// Every unit reachable from `root` over forward or reverse edges.
fn connected_chain(
    root: UnitId,
    forward: &HashMap<UnitId, Vec<(UnitId, f64)>>,
    reverse: &HashMap<UnitId, Vec<(UnitId, f64)>>,
) -> BTreeSet<UnitId> {
    let mut seen = BTreeSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(unit) = queue.pop_front() {
        for (next, _) in neighbours(unit, forward, reverse) {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

fn neighbours<'a>(
    unit: UnitId,
    forward: &'a HashMap<UnitId, Vec<(UnitId, f64)>>,
    reverse: &'a HashMap<UnitId, Vec<(UnitId, f64)>>,
) -> impl Iterator<Item = (UnitId, f64)> + 'a {
    let down = forward.get(&unit).into_iter().flatten();
    let up = reverse.get(&unit).into_iter().flatten();
    down.chain(up).copied()
}

/// Validate one chain and return each unit's ratio relative to `root`
/// (`potential[u]` = how many `u` make one `root`).
fn flatten_chain(
    root: UnitId,
    chain: &BTreeSet<UnitId>,
    forward: &HashMap<UnitId, Vec<(UnitId, f64)>>,
    reverse: &HashMap<UnitId, Vec<(UnitId, f64)>>,
    max_depth: usize,
) -> Result<HashMap<UnitId, f64>, String> {
    check_directed_chains(chain, forward, max_depth)?;

    let mut potentials: HashMap<UnitId, f64> = HashMap::from([(root, 1.0)]);
    let mut queue = VecDeque::from([(root, 0usize)]);

    while let Some((unit, depth)) = queue.pop_front() {
        let here = potentials[&unit];
        for (next, ratio) in neighbours(unit, forward, reverse) {
            let candidate = here * ratio;
            match potentials.get(&next) {
                Some(&known) => {
                    let scale = known.abs().max(candidate.abs()).max(1.0);
                    if (known - candidate).abs() > RATIO_TOLERANCE * scale {
                        return Err(format!(
                            "conflicting ratios reach unit {next} ({known} vs {candidate})"
                        ));
                    }
                }
                None => {
                    if depth + 1 > max_depth {
                        return Err(format!(
                            "conversion chain from unit {root} exceeds depth {max_depth}"
                        ));
                    }
                    potentials.insert(next, candidate);
                    queue.push_back((next, depth + 1));
                }
            }
        }
    }

    Ok(potentials)
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Mark {
    OnPath,
    Done,
}

/// Reject sale -> storage cycles and directed chains longer than `max_depth`.
fn check_directed_chains(
    chain: &BTreeSet<UnitId>,
    forward: &HashMap<UnitId, Vec<(UnitId, f64)>>,
    max_depth: usize,
) -> Result<(), String> {
    let mut marks: HashMap<UnitId, Mark> = HashMap::new();
    let mut lengths: HashMap<UnitId, usize> = HashMap::new();
    for &unit in chain {
        chain_length(unit, forward, max_depth, 0, &mut marks, &mut lengths)?;
    }
    Ok(())
}

/// Longest sale -> storage walk starting at `unit` (edges). Recursion depth is
/// bounded by `max_depth`.
fn chain_length(
    unit: UnitId,
    forward: &HashMap<UnitId, Vec<(UnitId, f64)>>,
    max_depth: usize,
    depth: usize,
    marks: &mut HashMap<UnitId, Mark>,
    lengths: &mut HashMap<UnitId, usize>,
) -> Result<usize, String> {
    match marks.get(&unit) {
        Some(Mark::Done) => return Ok(lengths.get(&unit).copied().unwrap_or(0)),
        Some(Mark::OnPath) => {
            return Err(format!("conversion chain through unit {unit} is cyclic"));
        }
        None => {}
    }
    if depth > max_depth {
        return Err(format!("conversion chain through unit {unit} exceeds depth {max_depth}"));
    }

    marks.insert(unit, Mark::OnPath);
    let mut longest = 0;
    for &(next, _) in forward.get(&unit).into_iter().flatten() {
        let below = chain_length(next, forward, max_depth, depth + 1, marks, lengths)?;
        longest = longest.max(below + 1);
    }
    if longest > max_depth {
        return Err(format!("conversion chain through unit {unit} exceeds depth {max_depth}"));
    }
    marks.insert(unit, Mark::Done);
    lengths.insert(unit, longest);
    Ok(longest)
}

/// A graph plus the caller's policy for unconnected units.
#[derive(Debug, Copy, Clone)]
pub struct Converter<'a> {
    graph: &'a ConversionGraph,
    policy: ConversionPolicy,
}

impl<'a> Converter<'a> {
    pub fn new(graph: &'a ConversionGraph, policy: ConversionPolicy) -> Self {
        Self { graph, policy }
    }

    pub fn strict(graph: &'a ConversionGraph) -> Self {
        Self::new(graph, ConversionPolicy::Strict)
    }

    pub fn policy(&self) -> ConversionPolicy {
        self.policy
    }

    pub fn multiplier(&self, from: UnitId, to: UnitId) -> Result<f64, ConversionError> {
        match self.graph.multiplier(from, to) {
            Err(ConversionError::MissingConversion { from, to })
                if self.policy == ConversionPolicy::BestEffort =>
            {
                tracing::warn!(%from, %to, "no unit conversion; counting contribution as zero");
                Ok(0.0)
            }
            other => other,
        }
    }

    pub fn convert(&self, qty: f64, from: UnitId, to: UnitId) -> Result<f64, ConversionError> {
        Ok(qty * self.multiplier(from, to)?)
    }
}

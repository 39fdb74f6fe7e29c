//! Index selection and pattern reordering
//!
//! Pure, deterministic decisions made before any I/O:
//! - which index to scan for a single pattern ([`select_index`])
//! - in what order to evaluate the patterns of a basic graph pattern, so
//!   that variables become bound as early as possible
//!
//! The greedy ordering in [`ReorderFixed`] is a heuristic. It never looks at
//! data statistics and is not guaranteed to find the cheapest join order.

use crate::dictionary::NodeId;
use crate::index::{IndexOrder, PatternShape, TriplePattern};
use std::collections::HashSet;
use std::fmt;

/// Order whose key has the most leading bound positions for `shape`
///
/// Ties go to the earlier order in [`IndexOrder::ALL`] (SPO, then POS, then
/// OSP), so the fully unbound and fully bound shapes both scan SPO.
pub fn select_index(shape: PatternShape) -> IndexOrder {
    let mut best = IndexOrder::Spo;
    let mut best_len = best.leading_bound(shape);
    for order in IndexOrder::ALL.into_iter().skip(1) {
        let len = order.leading_bound(shape);
        if len > best_len {
            best = order;
            best_len = len;
        }
    }
    best
}

/// One position of a basic graph pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    /// A term already translated to its id
    Const(NodeId),
    /// A named variable, bound once an earlier pattern has been evaluated
    Var(String),
    /// Anonymous wildcard that never binds anything
    Any,
}

impl Slot {
    /// Variable slot
    pub fn var(name: impl Into<String>) -> Self {
        Slot::Var(name.into())
    }

    fn var_name(&self) -> Option<&str> {
        match self {
            Slot::Var(name) => Some(name),
            _ => None,
        }
    }

    fn is_bound(&self, bound_vars: &HashSet<&str>) -> bool {
        match self {
            Slot::Const(_) => true,
            Slot::Var(name) => bound_vars.contains(name.as_str()),
            Slot::Any => false,
        }
    }
}

impl From<NodeId> for Slot {
    fn from(id: NodeId) -> Self {
        Slot::Const(id)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Const(id) => write!(f, "{id}"),
            Slot::Var(name) => write!(f, "?{name}"),
            Slot::Any => f.write_str("_"),
        }
    }
}

/// Triple pattern inside a basic graph pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BgpPattern {
    /// Subject slot
    pub subject: Slot,
    /// Predicate slot
    pub predicate: Slot,
    /// Object slot
    pub object: Slot,
}

impl BgpPattern {
    /// Create a new pattern
    pub fn new(subject: impl Into<Slot>, predicate: impl Into<Slot>, object: impl Into<Slot>) -> Self {
        BgpPattern {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }

    /// Slots in subject, predicate, object order
    pub fn slots(&self) -> [&Slot; 3] {
        [&self.subject, &self.predicate, &self.object]
    }

    /// Variables mentioned by this pattern
    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.slots().into_iter().filter_map(Slot::var_name)
    }

    /// Shape once the variables in `bound_vars` carry values
    pub fn shape_given(&self, bound_vars: &HashSet<&str>) -> PatternShape {
        let [s, p, o] = self.slots().map(|slot| slot.is_bound(bound_vars));
        PatternShape::new(s, p, o)
    }

    /// Shape with only the constants bound
    pub fn shape(&self) -> PatternShape {
        self.shape_given(&HashSet::new())
    }

    /// Lookup pattern with only the constants bound
    pub fn constants(&self) -> TriplePattern {
        let [s, p, o] = self.slots().map(|slot| match slot {
            Slot::Const(id) => Some(*id),
            _ => None,
        });
        TriplePattern::new(s, p, o)
    }

    fn connected_to(&self, bound_vars: &HashSet<&str>) -> bool {
        self.vars().any(|v| bound_vars.contains(v))
    }
}

impl fmt::Display for BgpPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

impl<S, P, O> From<(S, P, O)> for BgpPattern
where
    S: Into<Slot>,
    P: Into<Slot>,
    O: Into<Slot>,
{
    fn from((s, p, o): (S, P, O)) -> Self {
        BgpPattern::new(s, p, o)
    }
}

/// One step of an evaluation plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedStep {
    /// Position of the pattern in the caller's input
    pub pattern: usize,
    /// Shape with the variables of earlier steps bound
    pub shape: PatternShape,
    /// Index to scan for this step
    pub order: IndexOrder,
}

impl fmt::Display for PlannedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} via {}", self.pattern, self.shape, self.order)
    }
}

/// Chooses indexes and orders pattern sequences
pub trait ReorderTransformation: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Index to scan for a pattern of `shape`
    fn choose_index(&self, shape: PatternShape) -> IndexOrder {
        select_index(shape)
    }

    /// Evaluation order, as a permutation of input positions
    fn reorder(&self, patterns: &[BgpPattern]) -> Vec<usize>;

    /// Evaluation order paired with the index each step scans
    fn plan(&self, patterns: &[BgpPattern]) -> Vec<PlannedStep> {
        let mut bound_vars: HashSet<&str> = HashSet::new();
        self.reorder(patterns)
            .into_iter()
            .map(|i| {
                let shape = patterns[i].shape_given(&bound_vars);
                bound_vars.extend(patterns[i].vars());
                PlannedStep {
                    pattern: i,
                    shape,
                    order: self.choose_index(shape),
                }
            })
            .collect()
    }
}

/// Greedy most-bound-first ordering
///
/// Each step takes the remaining pattern with the most effectively bound
/// positions, counting variables bound by earlier steps. Ties prefer, in
/// turn: patterns sharing a variable with earlier steps, a higher positional
/// weight (subject over object over predicate), and the earlier input
/// position.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReorderFixed;

impl ReorderFixed {
    const WEIGHTS: [u32; 3] = [4, 1, 2];

    fn score(pattern: &BgpPattern, bound_vars: &HashSet<&str>) -> (usize, bool, u32) {
        let shape = pattern.shape_given(bound_vars);
        let weight = shape
            .positions()
            .iter()
            .zip(Self::WEIGHTS)
            .filter(|(bound, _)| **bound)
            .map(|(_, w)| w)
            .sum();
        (
            shape.bound_count(),
            pattern.connected_to(bound_vars),
            weight,
        )
    }
}

impl ReorderTransformation for ReorderFixed {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn reorder(&self, patterns: &[BgpPattern]) -> Vec<usize> {
        let mut remaining: Vec<usize> = (0..patterns.len()).collect();
        let mut bound_vars: HashSet<&str> = HashSet::new();
        let mut order = Vec::with_capacity(patterns.len());

        while !remaining.is_empty() {
            let mut best = 0;
            let mut best_score = Self::score(&patterns[remaining[0]], &bound_vars);
            for (pos, &i) in remaining.iter().enumerate().skip(1) {
                // strictly greater, so equal scores keep the earlier input
                let score = Self::score(&patterns[i], &bound_vars);
                if score > best_score {
                    best = pos;
                    best_score = score;
                }
            }
            let chosen = remaining.remove(best);
            bound_vars.extend(patterns[chosen].vars());
            order.push(chosen);
        }
        order
    }
}

/// Keeps the input order; only chooses indexes
#[derive(Debug, Clone, Copy, Default)]
pub struct ReorderIdentity;

impl ReorderTransformation for ReorderIdentity {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn reorder(&self, patterns: &[BgpPattern]) -> Vec<usize> {
        (0..patterns.len()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(n: u64) -> Slot {
        Slot::Const(NodeId::new(n))
    }

    fn v(name: &str) -> Slot {
        Slot::var(name)
    }

    #[test]
    fn test_select_index_all_shapes() {
        let cases = [
            ((false, false, false), IndexOrder::Spo),
            ((true, false, false), IndexOrder::Spo),
            ((false, true, false), IndexOrder::Pos),
            ((false, false, true), IndexOrder::Osp),
            ((true, true, false), IndexOrder::Spo),
            ((true, false, true), IndexOrder::Osp),
            ((false, true, true), IndexOrder::Pos),
            ((true, true, true), IndexOrder::Spo),
        ];
        for ((s, p, o), expected) in cases {
            let shape = PatternShape::new(s, p, o);
            assert_eq!(select_index(shape), expected, "{shape}");
        }
    }

    #[test]
    fn test_selected_index_has_longest_prefix() {
        for shape in PatternShape::all() {
            let chosen = select_index(shape).leading_bound(shape);
            for order in IndexOrder::ALL {
                assert!(chosen >= order.leading_bound(shape));
            }
            assert_eq!(chosen, shape.bound_count());
        }
    }

    #[test]
    fn test_most_bound_first() {
        let patterns = vec![
            BgpPattern::new(v("x"), v("p"), v("y")),
            BgpPattern::new(v("x"), c(7), c(9)),
            BgpPattern::new(v("y"), c(8), v("z")),
        ];
        let order = ReorderFixed.reorder(&patterns);
        // #1 has two constants; #0 and #2 then both have one bound position,
        // and #0 shares ?x with it
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn test_connected_pattern_wins_tie() {
        let patterns = vec![
            BgpPattern::new(c(1), c(2), v("a")),
            BgpPattern::new(c(9), c(3), v("r")),
            BgpPattern::new(v("a"), c(3), v("b")),
        ];
        // after #0 binds ?a, #1 and #2 both have subject and predicate bound
        assert_eq!(ReorderFixed.reorder(&patterns), vec![0, 2, 1]);
    }

    #[test]
    fn test_positional_weight_breaks_ties() {
        let patterns = vec![
            BgpPattern::new(v("s"), c(5), v("o")),
            BgpPattern::new(v("s2"), v("p2"), c(6)),
            BgpPattern::new(c(4), v("p3"), v("o3")),
        ];
        assert_eq!(ReorderFixed.reorder(&patterns), vec![2, 1, 0]);
    }

    #[test]
    fn test_equal_patterns_keep_input_order() {
        let patterns = vec![
            BgpPattern::new(v("a"), c(1), v("b")),
            BgpPattern::new(v("c"), c(1), v("d")),
        ];
        assert_eq!(ReorderFixed.reorder(&patterns), vec![0, 1]);
        assert!(ReorderFixed.reorder(&[]).is_empty());
    }

    #[test]
    fn test_reorder_is_deterministic_permutation() {
        let patterns: Vec<BgpPattern> = (0..8u64)
            .map(|i| {
                let s = if i % 2 == 0 { c(i + 1) } else { v("x") };
                let o = if i % 3 == 0 { c(i + 100) } else { v(&format!("o{i}")) };
                BgpPattern::new(s, c(50), o)
            })
            .collect();
        let first = ReorderFixed.reorder(&patterns);
        assert_eq!(first, ReorderFixed.reorder(&patterns));
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..patterns.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_plan_binds_earlier_variables() {
        let patterns = vec![
            BgpPattern::new(v("x"), c(2), v("y")),
            BgpPattern::new(c(1), c(2), v("x")),
        ];
        let plan = ReorderFixed.plan(&patterns);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].pattern, 1);
        assert_eq!(plan[0].order, IndexOrder::Spo);
        assert_eq!(plan[1].pattern, 0);
        assert_eq!(plan[1].shape, PatternShape::new(true, true, false));
        assert_eq!(plan[1].order, IndexOrder::Spo);
    }

    #[test]
    fn test_identity_keeps_order() {
        let patterns = vec![
            BgpPattern::new(v("x"), v("p"), v("y")),
            BgpPattern::new(c(1), c(2), c(3)),
        ];
        assert_eq!(ReorderIdentity.reorder(&patterns), vec![0, 1]);
        let plan = ReorderIdentity.plan(&patterns);
        assert_eq!(plan[0].order, IndexOrder::Spo);
        assert_eq!(plan[1].shape, PatternShape::new(true, true, true));
    }

    #[test]
    fn test_any_never_binds() {
        let pattern = BgpPattern::new(Slot::Any, c(3), v("o"));
        assert_eq!(pattern.vars().collect::<Vec<_>>(), vec!["o"]);
        assert_eq!(pattern.shape(), PatternShape::new(false, true, false));
        assert_eq!(
            pattern.constants(),
            TriplePattern::new(None, Some(NodeId::new(3)), None)
        );
        assert_eq!(pattern.to_string(), "_ #3 ?o");
    }
}

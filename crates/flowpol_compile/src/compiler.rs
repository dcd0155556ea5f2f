use fxhash::FxBuildHasher;
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use log::debug;

use flowpol_core::{
    action::{ActionSet, Emit},
    r#match::{
        engine::{Atom, HeaderSpaceEngine, PredicateEngine},
        HeaderSpace, MaskedValue, Predicate,
    },
};
use flowpol_policy::Policy;

use crate::{
    capability::DeviceCapability,
    error::CompileError,
    table::{CompiledRule, RuleTable},
};

type Leaf = (Predicate, Emit);

/// Turns policies into rule tables. Compilation only reads its inputs, so one compiler can be
/// shared by concurrent callers.
#[derive(Clone, Debug, Default)]
pub struct Compiler<E = HeaderSpaceEngine> {
    engine: E,
}

impl Compiler<HeaderSpaceEngine> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<E> Compiler<E>
where
    E: PredicateEngine<Space = HeaderSpace>,
{
    pub fn with_engine(engine: E) -> Self {
        Compiler { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn compile(
        &self,
        policy: &Policy,
        caps: &DeviceCapability,
    ) -> Result<RuleTable, CompileError> {
        // 1. leaves, grouped by predicate in declaration order
        let leaves: IndexSet<Leaf, FxBuildHasher> = flatten(policy).into_iter().collect();
        let mut grouped: IndexMap<Predicate, ActionSet, FxBuildHasher> = IndexMap::default();
        for (pred, emit) in leaves.iter() {
            let actions = grouped.entry(pred.clone()).or_default();
            *actions = actions.union(&ActionSet::from(emit.clone()));
        }
        let (preds, actions): (Vec<_>, Vec<_>) = grouped.into_iter().unzip();

        // 2. partition
        let atoms = self.engine.disjoint_partition(&preds)?;
        let matched = atoms
            .iter()
            .fold(HeaderSpace::empty(), |acc, a| acc.union(&a.region));
        let unmatched = matched.complement();

        // 3. most constrained first, declaration order among equals
        let atoms = atoms
            .into_iter()
            .map(|atom| {
                let set = atom
                    .member_indices()
                    .fold(ActionSet::drop(), |acc, i| acc.union(&actions[i]));
                (atom, set)
            })
            .sorted_by(|(a, _), (b, _)| {
                b.member_count()
                    .cmp(&a.member_count())
                    .then_with(|| a.member_indices().cmp(b.member_indices()))
            })
            .collect_vec();

        // 4. the default covers whichever region needs the most cubes: the drop region no leaf
        // matches, or an atom. Ties go to the drop region, then to the later atom.
        let default_at = atoms
            .iter()
            .enumerate()
            .max_by_key(|(_, (a, _))| a.region.len())
            .filter(|(_, (a, _))| a.region.len() > unmatched.len())
            .map(|(i, _)| i);
        let default_actions = default_at.map_or_else(ActionSet::drop, |i| atoms[i].1.clone());

        // covers lie inside the matched space, so the drop cubes overlap no other rule
        let mut candidates: Vec<(MaskedValue, ActionSet)> = match default_at {
            Some(_) => unmatched
                .cubes()
                .iter()
                .map(|c| (*c, ActionSet::drop()))
                .collect(),
            None => vec![],
        };
        for (i, (atom, set)) in atoms.iter().enumerate() {
            if Some(i) == default_at {
                continue;
            }
            let space = match default_at {
                Some(d) if is_strict_subset(atom, &atoms[d].0) => &atom.region,
                _ => &atom.cover,
            };
            candidates.extend(space.cubes().iter().map(|c| (*c, set.clone())));
        }
        let candidates = reorder(remove_redundant(candidates, &default_actions));

        // 5. device limits
        for (cube, _) in candidates.iter() {
            if let Some(fm) = cube.field_matches().find(|fm| !caps.supports(fm.field)) {
                return Err(CompileError::UnsupportedField(fm.field));
            }
        }
        let count = candidates.len() + 1;
        if count > caps.max_rules {
            return Err(CompileError::TableOverflow {
                rules: count,
                max_rules: caps.max_rules,
            });
        }
        if count > caps.max_priority_levels as usize {
            return Err(CompileError::PriorityOverflow {
                levels: count,
                max_levels: caps.max_priority_levels,
            });
        }

        let mut rules = candidates
            .into_iter()
            .zip((1..count as u32).rev())
            .map(|((cube, set), priority)| CompiledRule::new(priority, cube, set))
            .collect_vec();
        rules.push(CompiledRule::new(0, MaskedValue::ANY, default_actions));
        debug!(
            "compiled {} leaves over {} predicates into {} atoms, {} rules",
            leaves.len(),
            preds.len(),
            atoms.len(),
            rules.len()
        );
        Ok(RuleTable::new(rules))
    }
}

/// Compile with the default engine.
pub fn compile(policy: &Policy, caps: &DeviceCapability) -> Result<RuleTable, CompileError> {
    Compiler::new().compile(policy, caps)
}

/// Push sequencing and branching down to `(predicate, emit)` pairs: a packet matching the
/// predicate produces the emit. Leaves with a constant false predicate are dropped.
pub fn flatten(policy: &Policy) -> Vec<Leaf> {
    match policy {
        Policy::Filter(pred) if pred.is_false() => vec![],
        Policy::Filter(pred) => vec![(pred.clone(), Emit::identity())],
        Policy::Act(actions) => actions
            .iter()
            .map(|e| (Predicate::True, e.clone()))
            .collect(),
        Policy::Parallel(a, b) => {
            let mut leaves = flatten(a);
            leaves.extend(flatten(b));
            leaves
        }
        Policy::Sequential(a, b) => {
            let rhs = flatten(b);
            flatten(a)
                .into_iter()
                .flat_map(|(p1, e1)| {
                    rhs.iter()
                        .map(move |(p2, e2)| (p1.clone() & e1.pullback(p2), e1.then(e2)))
                        .collect_vec()
                })
                .filter(|(p, _)| !p.is_false())
                .collect()
        }
        Policy::IfThenElse(guard, a, b) => flatten(a)
            .into_iter()
            .map(|(p, e)| (guard.clone() & p, e))
            .chain(
                flatten(b)
                    .into_iter()
                    .map(|(p, e)| (!guard.clone() & p, e)),
            )
            .filter(|(p, _)| !p.is_false())
            .collect(),
    }
}

fn is_strict_subset(a: &Atom<HeaderSpace>, b: &Atom<HeaderSpace>) -> bool {
    a.member_count() < b.member_count() && a.member_indices().all(|i| b.members[i])
}

/// Drop rules no packet reaches, then rules whose packets would get the same actions from the
/// rules below them.
fn remove_redundant(
    candidates: Vec<(MaskedValue, ActionSet)>,
    default_actions: &ActionSet,
) -> Vec<(MaskedValue, ActionSet)> {
    let mut reachable: Vec<(MaskedValue, ActionSet)> = Vec::with_capacity(candidates.len());
    for (cube, set) in candidates {
        if !reachable.iter().any(|(c, _)| c.contains(&cube)) {
            reachable.push((cube, set));
        }
    }

    let mut kept: Vec<(MaskedValue, ActionSet)> = Vec::with_capacity(reachable.len());
    'rules: for (cube, set) in reachable.into_iter().rev() {
        // kept is bottom-up, so the rules right below come first
        for (lower, lower_set) in kept.iter().rev() {
            if !lower.overlaps(&cube) {
                continue;
            }
            if lower_set != &set {
                kept.push((cube, set));
                continue 'rules;
            }
            if lower.contains(&cube) {
                continue 'rules;
            }
        }
        if &set != default_actions {
            kept.push((cube, set));
        }
    }
    kept.reverse();
    kept
}

/// Stable topological sort preferring more specific rules. Overlapping rules with different
/// actions never swap.
fn reorder(rules: Vec<(MaskedValue, ActionSet)>) -> Vec<(MaskedValue, ActionSet)> {
    let n = rules.len();
    let mut blockers = vec![0usize; n];
    let mut blocked: Vec<Vec<usize>> = vec![vec![]; n];
    for (i, j) in (0..n).tuple_combinations() {
        if rules[i].0.overlaps(&rules[j].0) && rules[i].1 != rules[j].1 {
            blockers[j] += 1;
            blocked[i].push(j);
        }
    }
    let mut order = Vec::with_capacity(n);
    let mut done = vec![false; n];
    while order.len() < n {
        let next = (0..n)
            .filter(|&i| !done[i] && blockers[i] == 0)
            .max_by(|&a, &b| {
                rules[a]
                    .0
                    .specificity()
                    .cmp(&rules[b].0.specificity())
                    .then_with(|| b.cmp(&a))
            });
        let Some(next) = next else { break };
        done[next] = true;
        for &j in blocked[next].iter() {
            blockers[j] -= 1;
        }
        order.push(next);
    }
    let mut slots = rules.into_iter().map(Some).collect_vec();
    order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}

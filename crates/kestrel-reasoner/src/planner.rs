//! Ordering resolvables within a conjunction.
//!
//! ```text
//!   A generates $x ──► B requires $x      A before B
//!   A ◄──► B (each requires the other)    cycle: pick one, the partner
//!                                         then runs with the var bound
//! ```
//!
//! Among resolvables whose dependencies are satisfied, prefer one sharing a
//! variable with the last placed resolvable, then one sharing a variable
//! with anything bound so far, then the earliest. When every remaining
//! resolvable waits on another, the smallest dependency cycle is broken at
//! a member whose only unmet dependencies are mutual.
//!
//! Negated units bind nothing. They become available once every variable
//! they share with the conjunction is bound, and never break a cycle.

use kestrel_pattern::Variable;
use std::collections::BTreeSet;

/// What the planner needs to know about a unit of work.
pub trait Schedulable {
    fn variables(&self) -> &BTreeSet<Variable>;

    /// The variable this unit can bind to newly produced data.
    fn generating(&self) -> Option<&Variable>;

    /// Variables this unit uses that another unit generates.
    fn required(&self) -> &BTreeSet<Variable>;

    fn is_negated(&self) -> bool {
        false
    }
}

/// An execution order over the planned items, as indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    order: Vec<usize>,
}

impl Plan {
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Position of item `index` in the order.
    pub fn position(&self, index: usize) -> Option<usize> {
        self.order.iter().position(|&i| i == index)
    }
}

/// For each item, the items that generate a variable it requires. Variables
/// already bound on entry create no dependency.
pub fn dependencies<S: Schedulable>(items: &[S], bound: &BTreeSet<Variable>) -> Vec<BTreeSet<usize>> {
    items
        .iter()
        .enumerate()
        .map(|(b, item)| {
            items
                .iter()
                .enumerate()
                .filter(|&(a, other)| {
                    a != b
                        && other
                            .generating()
                            .is_some_and(|g| !bound.contains(g) && item.required().contains(g))
                })
                .map(|(a, _)| a)
                .collect()
        })
        .collect()
}

pub fn plan<S: Schedulable>(items: &[S], bound: &BTreeSet<Variable>) -> Plan {
    let deps = dependencies(items, bound);
    let mut placed = vec![false; items.len()];
    let mut order: Vec<usize> = Vec::with_capacity(items.len());
    let mut bound_vars = bound.clone();

    while order.len() < items.len() {
        let available: Vec<usize> = (0..items.len())
            .filter(|&i| !placed[i] && deps[i].iter().all(|&d| placed[d]))
            .filter(|&i| !items[i].is_negated() || items[i].variables().is_subset(&bound_vars))
            .collect();
        let next = if !available.is_empty() {
            pick_connected(items, &available, order.last().copied(), &bound_vars)
        } else if let Some(first) = (0..items.len()).find(|&i| !placed[i] && !items[i].is_negated()) {
            let settled: Vec<bool> = (0..items.len()).map(|i| placed[i] || items[i].is_negated()).collect();
            match break_cycle(&deps, &settled) {
                i if !settled[i] => i,
                _ => first,
            }
        } else {
            (0..items.len()).find(|&i| !placed[i]).unwrap_or(0)
        };
        placed[next] = true;
        order.push(next);
        bound_vars.extend(items[next].variables().iter().cloned());
    }

    tracing::trace!(order = ?order, "planned resolvables");
    Plan { order }
}

fn pick_connected<S: Schedulable>(
    items: &[S],
    available: &[usize],
    last: Option<usize>,
    bound_vars: &BTreeSet<Variable>,
) -> usize {
    if let Some(last) = last {
        let last_vars = items[last].variables();
        if let Some(&i) = available
            .iter()
            .find(|&&i| !items[i].variables().is_disjoint(last_vars))
        {
            return i;
        }
    }
    available
        .iter()
        .copied()
        .find(|&i| !items[i].variables().is_disjoint(bound_vars))
        .unwrap_or(available[0])
}

fn break_cycle(deps: &[BTreeSet<usize>], placed: &[bool]) -> usize {
    let unmet = move |i: usize| deps[i].iter().copied().filter(move |&d| !placed[d]);

    let mut groups: Vec<Vec<usize>> = strongly_connected(deps, placed)
        .into_iter()
        .filter(|group| group.len() > 1)
        .collect();
    for group in &mut groups {
        group.sort_unstable();
    }
    groups.sort_by_key(|group| (group.len(), group[0]));

    for group in &groups {
        let closed = |i: usize| unmet(i).all(|d| group.contains(&d));
        let mutual = |i: usize| unmet(i).all(|d| deps[d].contains(&i));
        if let Some(&i) = group.iter().find(|&&i| closed(i) && mutual(i)) {
            return i;
        }
        if let Some(&i) = group.iter().find(|&&i| closed(i)) {
            return i;
        }
    }

    (0..placed.len())
        .filter(|&i| !placed[i])
        .min_by_key(|&i| (unmet(i).count(), i))
        .unwrap_or(0)
}

/// Tarjan's algorithm over the unplaced items, edges pointing from an item
/// to its unmet dependencies.
fn strongly_connected(deps: &[BTreeSet<usize>], placed: &[bool]) -> Vec<Vec<usize>> {
    struct State<'a> {
        deps: &'a [BTreeSet<usize>],
        placed: &'a [bool],
        index: Vec<Option<usize>>,
        low: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next: usize,
        components: Vec<Vec<usize>>,
    }

    fn visit(state: &mut State<'_>, v: usize) {
        state.index[v] = Some(state.next);
        state.low[v] = state.next;
        state.next += 1;
        state.stack.push(v);
        state.on_stack[v] = true;

        let edges: Vec<usize> = state.deps[v].iter().copied().filter(|&w| !state.placed[w]).collect();
        for w in edges {
            match state.index[w] {
                None => {
                    visit(state, w);
                    state.low[v] = state.low[v].min(state.low[w]);
                }
                Some(index) if state.on_stack[w] => {
                    state.low[v] = state.low[v].min(index);
                }
                Some(_) => {}
            }
        }

        if Some(state.low[v]) == state.index[v] {
            let mut component = Vec::new();
            while let Some(w) = state.stack.pop() {
                state.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            state.components.push(component);
        }
    }

    let n = deps.len();
    let mut state = State {
        deps,
        placed,
        index: vec![None; n],
        low: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next: 0,
        components: Vec::new(),
    };
    for v in 0..n {
        if !placed[v] && state.index[v].is_none() {
            visit(&mut state, v);
        }
    }
    state.components
}

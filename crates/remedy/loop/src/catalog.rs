//! Repair action catalog and dispatch planning.

use std::collections::{BTreeSet, HashMap, VecDeque};

use remedy_types::{ActionId, FaultCategory, RepairAction};

use crate::effector::EffectorRegistry;
use crate::error::CatalogError;

/// Validated, immutable set of repair actions in declaration order.
///
/// Loading guarantees unique ids, resolvable dependencies and an acyclic
/// dependency graph.
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    actions: Vec<RepairAction>,
    index: HashMap<ActionId, usize>,
}

impl ActionCatalog {
    pub fn new(actions: Vec<RepairAction>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(actions.len());
        for (idx, action) in actions.iter().enumerate() {
            if index.insert(action.id.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateAction(action.id.clone()));
            }
        }

        for action in &actions {
            if action.timeout_ms == 0 {
                return Err(CatalogError::ZeroTimeout(action.id.clone()));
            }
            for dep in &action.depends_on {
                if !index.contains_key(dep) {
                    return Err(CatalogError::UnknownDependency {
                        action: action.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let catalog = Self { actions, index };
        catalog.check_acyclic()?;
        Ok(catalog)
    }

    /// Check every action's effector is registered.
    pub fn validate_effectors(&self, registry: &EffectorRegistry) -> Result<(), CatalogError> {
        for action in &self.actions {
            if !registry.contains(&action.effector) {
                return Err(CatalogError::UnknownEffector {
                    action: action.id.clone(),
                    effector: action.effector.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn actions(&self) -> &[RepairAction] {
        &self.actions
    }

    pub fn get(&self, id: &ActionId) -> Option<&RepairAction> {
        self.index.get(id).map(|&idx| &self.actions[idx])
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    // Kahn's algorithm over the whole catalog; leftovers are on a cycle.
    fn check_acyclic(&self) -> Result<(), CatalogError> {
        let n = self.actions.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (idx, action) in self.actions.iter().enumerate() {
            for dep in &action.depends_on {
                let dep_idx = self.index[dep];
                dependents[dep_idx].push(idx);
                in_degree[idx] += 1;
            }
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = 0;
        while let Some(idx) = queue.pop_front() {
            visited += 1;
            for &next in &dependents[idx] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if visited == n {
            Ok(())
        } else {
            let members = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.actions[i].id.clone())
                .collect();
            Err(CatalogError::Cycle(members))
        }
    }

    /// Plan the actions for a set of faulted categories.
    ///
    /// Selects the matching actions plus their transitive dependencies and
    /// layers them into dependency tiers. Within a tier actions are ordered
    /// by priority, then declaration order.
    pub fn plan(&self, categories: &BTreeSet<FaultCategory>) -> DispatchPlan {
        let mut selected = vec![false; self.actions.len()];
        let mut stack: Vec<usize> = self
            .actions
            .iter()
            .enumerate()
            .filter(|(_, a)| categories.contains(&a.category))
            .map(|(idx, _)| idx)
            .collect();
        while let Some(idx) = stack.pop() {
            if selected[idx] {
                continue;
            }
            selected[idx] = true;
            stack.extend(self.actions[idx].depends_on.iter().map(|d| self.index[d]));
        }

        let mut remaining: Vec<usize> = (0..self.actions.len()).filter(|&i| selected[i]).collect();
        let mut placed = vec![false; self.actions.len()];
        let mut tiers = Vec::new();

        while !remaining.is_empty() {
            let mut tier: Vec<usize> = remaining
                .iter()
                .copied()
                .filter(|&idx| {
                    self.actions[idx]
                        .depends_on
                        .iter()
                        .all(|d| placed[self.index[d]])
                })
                .collect();
            if tier.is_empty() {
                // Unreachable for a validated catalog.
                break;
            }
            tier.sort_by_key(|&idx| (self.actions[idx].priority, idx));
            for &idx in &tier {
                placed[idx] = true;
            }
            remaining.retain(|idx| !placed[*idx]);
            tiers.push(tier.into_iter().map(|idx| self.actions[idx].clone()).collect());
        }

        DispatchPlan { tiers }
    }
}

/// Actions to run, grouped into dependency tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchPlan {
    tiers: Vec<Vec<RepairAction>>,
}

impl DispatchPlan {
    pub fn tiers(&self) -> &[Vec<RepairAction>] {
        &self.tiers
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn action_count(&self) -> usize {
        self.tiers.iter().map(Vec::len).sum()
    }

    /// Tier index of an action, if planned.
    pub fn tier_of(&self, id: &ActionId) -> Option<usize> {
        self.tiers
            .iter()
            .position(|tier| tier.iter().any(|a| &a.id == id))
    }
}

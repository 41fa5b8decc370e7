//! Project reference graph of a solution snapshot.
//!
//! The graph is immutable and shared behind an `Arc`. Forks of a solution
//! derive their graph from the previous one, touching only the entries of
//! projects whose reference set changed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock};

use nova_core::{ProjectId, SolutionId};
use parking_lot::Mutex;

use crate::{ProjectState, SolutionState};

type Edges = BTreeMap<ProjectId, Arc<BTreeSet<ProjectId>>>;
pub(crate) type ProjectMap = BTreeMap<ProjectId, Arc<ProjectState>>;

pub struct ProjectDependencyGraph {
    solution: SolutionId,
    /// `p -> projects p references`. Every project has an entry.
    references: Arc<Edges>,
    /// `p -> projects referencing p`. Every project has an entry.
    referenced_by: Arc<Edges>,
    topological: OnceLock<Arc<[ProjectId]>>,
    dependency_sets: OnceLock<Arc<[BTreeSet<ProjectId>]>>,
    transitive_dependencies: Mutex<HashMap<ProjectId, Arc<BTreeSet<ProjectId>>>>,
    transitive_dependents: Mutex<HashMap<ProjectId, Arc<BTreeSet<ProjectId>>>>,
}

impl ProjectDependencyGraph {
    /// Builds the graph of `solution` from scratch.
    pub fn new(solution: &SolutionState) -> Self {
        Self::build(solution.id(), solution.project_map())
    }

    /// Derives the graph of `new` from this graph of `old`, sharing every
    /// entry whose reference set did not change.
    pub fn with_solution_changes(
        self: &Arc<Self>,
        old: &SolutionState,
        new: &SolutionState,
    ) -> Arc<Self> {
        self.with_project_changes(old.project_map(), new.id(), new.project_map())
    }

    /// Whether this graph describes exactly the references of `solution`.
    pub fn is_consistent_with(&self, solution: &SolutionState) -> bool {
        self.is_consistent_with_projects(solution.id(), solution.project_map())
    }

    pub(crate) fn build(solution: SolutionId, projects: &ProjectMap) -> Self {
        let references: Edges = projects
            .iter()
            .map(|(id, project)| (*id, project.project_references_arc().clone()))
            .collect();

        let mut reverse: BTreeMap<ProjectId, BTreeSet<ProjectId>> =
            projects.keys().map(|id| (*id, BTreeSet::new())).collect();
        for (from, targets) in &references {
            for to in targets.iter() {
                if let Some(set) = reverse.get_mut(to) {
                    set.insert(*from);
                }
            }
        }
        let referenced_by = reverse
            .into_iter()
            .map(|(id, set)| (id, Arc::new(set)))
            .collect();

        Self::from_edges(solution, Arc::new(references), Arc::new(referenced_by))
    }

    fn from_edges(solution: SolutionId, references: Arc<Edges>, referenced_by: Arc<Edges>) -> Self {
        Self {
            solution,
            references,
            referenced_by,
            topological: OnceLock::new(),
            dependency_sets: OnceLock::new(),
            transitive_dependencies: Mutex::new(HashMap::new()),
            transitive_dependents: Mutex::new(HashMap::new()),
        }
    }

    /// Derives the graph of `new` from this graph of `old`.
    ///
    /// Returns `self` when no reference set changed. Falls back to a full
    /// build when `new` belongs to another solution or this graph does not
    /// describe `old`.
    pub(crate) fn with_project_changes(
        self: &Arc<Self>,
        old: &ProjectMap,
        solution: SolutionId,
        new: &ProjectMap,
    ) -> Arc<Self> {
        if self.solution != solution || !self.is_consistent_with_projects(solution, old) {
            tracing::debug!(
                target = "nova.workspace",
                solution = %solution,
                projects = new.len(),
                "dependency graph rebuilt"
            );
            return Arc::new(Self::build(solution, new));
        }

        let mut references = self.references.clone();
        let mut referenced_by = self.referenced_by.clone();
        let mut touched = 0usize;

        for id in old.keys().filter(|id| !new.contains_key(id)) {
            if let Some(targets) = Arc::make_mut(&mut references).remove(id) {
                for to in targets.iter() {
                    if let Some(set) = Arc::make_mut(&mut referenced_by).get_mut(to) {
                        Arc::make_mut(set).remove(id);
                    }
                }
            }
            Arc::make_mut(&mut referenced_by).remove(id);
            touched += 1;
        }

        // Reverse entries of added projects must exist before any edge into
        // them is wired.
        for id in new.keys() {
            if !referenced_by.contains_key(id) {
                Arc::make_mut(&mut referenced_by).insert(*id, Arc::default());
            }
        }

        for (id, project) in new {
            if old.get(id).is_some_and(|prev| Arc::ptr_eq(prev, project)) {
                continue;
            }
            let targets = project.project_references_arc();
            let previous = match references.get(id) {
                Some(current) if Arc::ptr_eq(current, targets) || current == targets => continue,
                Some(current) => current.clone(),
                None => Arc::new(BTreeSet::new()),
            };
            Arc::make_mut(&mut references).insert(*id, targets.clone());

            for to in previous.difference(targets) {
                if let Some(set) = Arc::make_mut(&mut referenced_by).get_mut(to) {
                    Arc::make_mut(set).remove(id);
                }
            }
            for to in targets.difference(&previous) {
                if let Some(set) = Arc::make_mut(&mut referenced_by).get_mut(to) {
                    Arc::make_mut(set).insert(*id);
                }
            }
            touched += 1;
        }

        if touched == 0 {
            return self.clone();
        }

        tracing::debug!(
            target = "nova.workspace",
            solution = %solution,
            touched,
            "dependency graph derived"
        );
        Arc::new(Self::from_edges(solution, references, referenced_by))
    }

    pub fn solution_id(&self) -> SolutionId {
        self.solution
    }

    pub fn project_ids(&self) -> impl Iterator<Item = ProjectId> + '_ {
        self.references.keys().copied()
    }

    pub fn contains_project(&self, project: ProjectId) -> bool {
        self.references.contains_key(&project)
    }

    /// Projects `project` references directly. Empty for unknown projects.
    pub fn direct_dependencies(&self, project: ProjectId) -> Arc<BTreeSet<ProjectId>> {
        self.references.get(&project).cloned().unwrap_or_default()
    }

    /// Projects that reference `project` directly. Empty for unknown projects.
    pub fn direct_dependents(&self, project: ProjectId) -> Arc<BTreeSet<ProjectId>> {
        self.referenced_by.get(&project).cloned().unwrap_or_default()
    }

    /// Every project reachable through references from `project`, excluding
    /// `project` itself even when it sits on a cycle.
    pub fn transitive_dependencies(&self, project: ProjectId) -> Arc<BTreeSet<ProjectId>> {
        closure(&self.transitive_dependencies, &self.references, project)
    }

    /// Every project from which `project` is reachable, excluding `project`.
    pub fn transitive_dependents(&self, project: ProjectId) -> Arc<BTreeSet<ProjectId>> {
        closure(&self.transitive_dependents, &self.referenced_by, project)
    }

    /// All projects, each after every project it references.
    ///
    /// Ties are broken by project id. Projects on a reference cycle, and
    /// projects depending on one, come last in id order.
    pub fn topological_order(&self) -> Arc<[ProjectId]> {
        self.topological
            .get_or_init(|| {
                let mut pending: BTreeMap<ProjectId, usize> = self
                    .references
                    .iter()
                    .map(|(id, targets)| {
                        let known = targets
                            .iter()
                            .filter(|to| self.references.contains_key(to))
                            .count();
                        (*id, known)
                    })
                    .collect();
                let mut ready: BTreeSet<ProjectId> = pending
                    .iter()
                    .filter(|(_, count)| **count == 0)
                    .map(|(id, _)| *id)
                    .collect();

                let mut order = Vec::with_capacity(pending.len());
                while let Some(next) = ready.pop_first() {
                    pending.remove(&next);
                    order.push(next);
                    for dependent in self.direct_dependents(next).iter() {
                        if let Some(count) = pending.get_mut(dependent) {
                            *count -= 1;
                            if *count == 0 {
                                ready.insert(*dependent);
                            }
                        }
                    }
                }

                if !pending.is_empty() {
                    tracing::debug!(
                        target = "nova.workspace",
                        solution = %self.solution,
                        cyclic = pending.len(),
                        "project reference cycle"
                    );
                    order.extend(pending.keys().copied());
                }
                order.into()
            })
            .clone()
    }

    /// Weakly connected components, each in id order, ordered by their
    /// smallest project id.
    pub fn dependency_sets(&self) -> Arc<[BTreeSet<ProjectId>]> {
        self.dependency_sets
            .get_or_init(|| {
                let mut seen = BTreeSet::new();
                let mut sets = Vec::new();
                for start in self.references.keys() {
                    if !seen.insert(*start) {
                        continue;
                    }
                    let mut set = BTreeSet::from([*start]);
                    let mut stack = vec![*start];
                    while let Some(id) = stack.pop() {
                        let neighbours = self
                            .references
                            .get(&id)
                            .into_iter()
                            .chain(self.referenced_by.get(&id))
                            .flat_map(|targets| targets.iter());
                        for next in neighbours {
                            if seen.insert(*next) {
                                set.insert(*next);
                                stack.push(*next);
                            }
                        }
                    }
                    sets.push(set);
                }
                sets.into()
            })
            .clone()
    }

    pub(crate) fn is_consistent_with_projects(
        &self,
        solution: SolutionId,
        projects: &ProjectMap,
    ) -> bool {
        let forward_matches = self.solution == solution
            && self.references.len() == projects.len()
            && projects.iter().all(|(id, project)| {
                self.references.get(id).is_some_and(|targets| {
                    let expected = project.project_references_arc();
                    Arc::ptr_eq(targets, expected) || targets == expected
                })
            });
        forward_matches && self.reverse_matches_forward()
    }

    /// Whether `referenced_by` is exactly the transpose of `references`.
    fn reverse_matches_forward(&self) -> bool {
        if self.referenced_by.len() != self.references.len() {
            return false;
        }
        let mut edges = 0usize;
        for (from, targets) in self.references.iter() {
            for to in targets.iter().filter(|to| self.references.contains_key(to)) {
                let mirrored = self
                    .referenced_by
                    .get(to)
                    .is_some_and(|sources| sources.contains(from));
                if !mirrored {
                    return false;
                }
                edges += 1;
            }
        }
        self.referenced_by.values().map(|sources| sources.len()).sum::<usize>() == edges
    }
}

impl fmt::Debug for ProjectDependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectDependencyGraph")
            .field("solution", &self.solution)
            .field("references", &self.references)
            .finish_non_exhaustive()
    }
}

fn closure(
    cache: &Mutex<HashMap<ProjectId, Arc<BTreeSet<ProjectId>>>>,
    edges: &Edges,
    project: ProjectId,
) -> Arc<BTreeSet<ProjectId>> {
    if let Some(hit) = cache.lock().get(&project) {
        return hit.clone();
    }

    let mut visited = BTreeSet::new();
    let mut stack: Vec<ProjectId> = edges
        .get(&project)
        .map(|targets| targets.iter().copied().collect())
        .unwrap_or_default();
    while let Some(id) = stack.pop() {
        if id == project || !visited.insert(id) {
            continue;
        }
        if let Some(targets) = edges.get(&id) {
            stack.extend(targets.iter().copied());
        }
    }

    let result = Arc::new(visited);
    cache.lock().insert(project, result.clone());
    result
}

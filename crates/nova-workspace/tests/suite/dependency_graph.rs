use nova_syntax::OUTLINE_LANGUAGE;
use nova_workspace::{
    ProjectDependencyGraph, ProjectId, ProjectInfo, SolutionState, WorkspaceServices,
};
use proptest::prelude::*;

const PROPTEST_CASES: u32 = 64;
const SLOTS: usize = 6;

#[derive(Debug, Clone)]
enum Op {
    Link(usize, usize),
    Unlink(usize, usize),
    Remove(usize),
    Add(Vec<usize>),
    Rename(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..SLOTS, 0..SLOTS).prop_map(|(from, to)| Op::Link(from, to)),
        2 => (0..SLOTS, 0..SLOTS).prop_map(|(from, to)| Op::Unlink(from, to)),
        1 => (0..SLOTS).prop_map(Op::Remove),
        1 => proptest::collection::vec(0..SLOTS, 0..3).prop_map(Op::Add),
        1 => (0..SLOTS).prop_map(Op::Rename),
    ]
}

/// Applies `op` when it is valid for `solution`. With `acyclic`, links only
/// go from later projects to earlier ones.
fn apply(solution: &SolutionState, op: &Op, acyclic: bool) -> SolutionState {
    let ids = solution.project_ids().to_vec();
    let slot_of = |slot: usize| slot % ids.len().max(1);
    let pick = |slot: usize| ids.get(slot_of(slot)).copied();

    let next = match *op {
        Op::Link(from_slot, to_slot) => match (pick(from_slot), pick(to_slot)) {
            (Some(from), Some(to))
                if from != to
                    && (!acyclic || slot_of(from_slot) > slot_of(to_slot))
                    && !solution
                        .project(from)
                        .is_some_and(|p| p.project_references().contains(&to)) =>
            {
                solution.add_project_reference(from, to)
            }
            _ => return solution.clone(),
        },
        Op::Unlink(from, to) => match (pick(from), pick(to)) {
            (Some(from), Some(to))
                if solution
                    .project(from)
                    .is_some_and(|p| p.project_references().contains(&to)) =>
            {
                solution.remove_project_reference(from, to)
            }
            _ => return solution.clone(),
        },
        Op::Remove(slot) => match pick(slot) {
            Some(id) => solution.remove_project(id),
            None => return solution.clone(),
        },
        Op::Add(ref targets) => {
            let mut references: Vec<ProjectId> = targets.iter().filter_map(|t| pick(*t)).collect();
            references.sort();
            references.dedup();
            let info = references.into_iter().fold(
                ProjectInfo::new(ProjectId::new_unique(), "added", OUTLINE_LANGUAGE),
                ProjectInfo::project_reference,
            );
            solution.add_project(info)
        }
        Op::Rename(slot) => match pick(slot) {
            Some(id) => solution.with_project_name(id, "renamed"),
            None => return solution.clone(),
        },
    };
    next.expect("generated operations are valid")
}

fn initial() -> SolutionState {
    (0..SLOTS).fold(SolutionState::new(WorkspaceServices::default()), |solution, i| {
        solution
            .add_project(ProjectInfo::new(
                ProjectId::new_unique(),
                format!("p{i}"),
                OUTLINE_LANGUAGE,
            ))
            .unwrap()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    #[test]
    fn derived_graph_matches_a_fresh_build(ops in proptest::collection::vec(op(), 1..24)) {
        let mut solution = initial();
        solution.dependency_graph();

        for op in &ops {
            solution = apply(&solution, op, false);
            let derived = solution.dependency_graph();
            let fresh = ProjectDependencyGraph::new(&solution);

            prop_assert!(derived.is_consistent_with(&solution));
            prop_assert_eq!(derived.topological_order(), fresh.topological_order());
            for id in solution.project_ids() {
                prop_assert_eq!(derived.direct_dependencies(*id), fresh.direct_dependencies(*id));
                prop_assert_eq!(derived.direct_dependents(*id), fresh.direct_dependents(*id));
                prop_assert_eq!(
                    derived.transitive_dependencies(*id),
                    fresh.transitive_dependencies(*id)
                );

                for dependency in derived.direct_dependencies(*id).iter() {
                    prop_assert!(derived.direct_dependents(*dependency).contains(id));
                }
                for dependent in derived.direct_dependents(*id).iter() {
                    prop_assert!(derived.direct_dependencies(*dependent).contains(id));
                }
            }
        }
    }

    #[test]
    fn graph_derives_across_many_forks(ops in proptest::collection::vec(op(), 1..24)) {
        let start = initial();
        let graph = start.dependency_graph();
        let end = ops.iter().fold(start.clone(), |solution, op| apply(&solution, op, false));

        let derived = graph.with_solution_changes(&start, &end);
        let fresh = ProjectDependencyGraph::new(&end);
        prop_assert!(derived.is_consistent_with(&end));
        prop_assert_eq!(derived.topological_order(), fresh.topological_order());
        for id in end.project_ids() {
            prop_assert_eq!(derived.direct_dependencies(*id), fresh.direct_dependencies(*id));
            prop_assert_eq!(derived.direct_dependents(*id), fresh.direct_dependents(*id));
            prop_assert_eq!(derived.transitive_dependents(*id), fresh.transitive_dependents(*id));
        }
    }

    #[test]
    fn dependencies_precede_dependents(ops in proptest::collection::vec(op(), 1..24)) {
        let solution = ops.iter().fold(initial(), |solution, op| apply(&solution, op, true));
        let graph = solution.dependency_graph();
        let order = graph.topological_order();
        prop_assert_eq!(order.len(), solution.project_ids().len());

        let position = |id: ProjectId| order.iter().position(|p| *p == id);
        for id in solution.project_ids() {
            for dependency in graph.direct_dependencies(*id).iter() {
                prop_assert!(position(*dependency) < position(*id));
            }
        }
    }
}

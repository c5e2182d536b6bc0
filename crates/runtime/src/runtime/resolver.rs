//! Dependency resolution over a plan's subtask graph. Pure and stateless.

use std::collections::{HashMap, HashSet};

use ens_domain::error::{Error, Result};
use ens_domain::plan::{ExecutionPlan, Subtask, SubtaskStatus};

pub struct DependencyResolver;

impl DependencyResolver {
    /// Subtasks runnable right now: PENDING with every dependency DONE.
    /// Failed-dependency paths are excluded by construction (a failed
    /// dependency is not DONE).
    pub fn ready_set<'a>(plan: &'a ExecutionPlan) -> Vec<&'a Subtask> {
        let done = plan.done_ids();
        plan.subtasks
            .iter()
            .filter(|s| s.is_ready(&done))
            .collect()
    }

    /// Structural validation: unknown dependency ids, self-loops, cycles.
    /// Returns every problem found, not just the first.
    pub fn validate(plan: &ExecutionPlan) -> Vec<String> {
        let mut errors = Vec::new();
        let ids: HashSet<&str> = plan.subtasks.iter().map(|s| s.id.as_str()).collect();

        for subtask in &plan.subtasks {
            for dep in &subtask.dependencies {
                if dep == &subtask.id {
                    errors.push(format!("subtask {} depends on itself", subtask.id));
                } else if !ids.contains(dep.as_str()) {
                    errors.push(format!(
                        "subtask {} references unknown dependency {dep}",
                        subtask.id
                    ));
                }
            }
        }

        if let Some(back_edge) = Self::find_cycle(plan) {
            errors.push(format!(
                "circular dependencies: {} -> {}",
                back_edge.0, back_edge.1
            ));
        }

        errors
    }

    /// Topological layering: level 0 has no dependencies, level k depends
    /// only on earlier levels. Errors on cycles.
    pub fn execution_levels<'a>(plan: &'a ExecutionPlan) -> Result<Vec<Vec<&'a Subtask>>> {
        let mut remaining: HashMap<&str, &Subtask> =
            plan.subtasks.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut placed: HashSet<&str> = HashSet::new();
        let mut levels = Vec::new();

        while !remaining.is_empty() {
            let mut level: Vec<&Subtask> = remaining
                .values()
                .filter(|s| {
                    s.dependencies
                        .iter()
                        .all(|d| placed.contains(d.as_str()) || !remaining.contains_key(d.as_str()))
                })
                .copied()
                .collect();

            if level.is_empty() {
                return Err(Error::Validation(format!(
                    "circular dependencies among subtasks: {}",
                    remaining
                        .keys()
                        .map(|k| k.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }

            level.sort_by(|a, b| a.id.cmp(&b.id));
            for s in &level {
                placed.insert(s.id.as_str());
            }
            for s in &level {
                remaining.remove(s.id.as_str());
            }
            levels.push(level);
        }

        Ok(levels)
    }

    /// DFS three-coloring. Returns the offending back-edge `(from, to)`
    /// of the first cycle found.
    fn find_cycle(plan: &ExecutionPlan) -> Option<(String, String)> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let index: HashMap<&str, &Subtask> =
            plan.subtasks.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut colors: HashMap<&str, Color> = plan
            .subtasks
            .iter()
            .map(|s| (s.id.as_str(), Color::White))
            .collect();

        fn visit<'a>(
            id: &'a str,
            index: &HashMap<&'a str, &'a Subtask>,
            colors: &mut HashMap<&'a str, Color>,
        ) -> Option<(String, String)> {
            colors.insert(id, Color::Gray);
            if let Some(subtask) = index.get(id) {
                for dep in &subtask.dependencies {
                    match colors.get(dep.as_str()) {
                        Some(Color::Gray) => {
                            return Some((id.to_string(), dep.clone()));
                        }
                        Some(Color::White) => {
                            if let Some(found) = visit(dep.as_str(), index, colors) {
                                return Some(found);
                            }
                        }
                        // Black or unknown (dangling dep): no cycle here.
                        _ => {}
                    }
                }
            }
            colors.insert(id, Color::Black);
            None
        }

        let ids: Vec<&str> = plan.subtasks.iter().map(|s| s.id.as_str()).collect();
        for id in ids {
            if colors.get(id) == Some(&Color::White) {
                if let Some(found) = visit(id, &index, &mut colors) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Invariant helper: the ready set only ever contains PENDING
    /// subtasks whose dependencies are all DONE.
    pub fn check_ready_invariant(plan: &ExecutionPlan) -> bool {
        let done = plan.done_ids();
        Self::ready_set(plan).iter().all(|s| {
            s.status == SubtaskStatus::Pending
                && s.dependencies.iter().all(|d| done.contains(d.as_str()))
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ens_domain::agent::AgentKind;

    fn plan_of(specs: &[(&str, &[&str])]) -> ExecutionPlan {
        let mut plan = ExecutionPlan::new("p-1", "s-1", "goal").unwrap();
        for (id, deps) in specs {
            plan.add_subtask(
                Subtask::new(
                    *id,
                    format!("work {id}"),
                    AgentKind::Coder,
                    deps.iter().map(|d| d.to_string()).collect(),
                )
                .unwrap(),
            )
            .unwrap();
        }
        plan
    }

    #[test]
    fn ready_set_starts_with_independent_subtasks() {
        let plan = plan_of(&[("a", &[]), ("b", &["a"]), ("c", &[])]);
        let ready: Vec<&str> = DependencyResolver::ready_set(&plan)
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ready, vec!["a", "c"]);
    }

    #[test]
    fn ready_set_unlocks_after_dependency_done() {
        let mut plan = plan_of(&[("a", &[]), ("b", &["a"])]);
        plan.get_subtask_mut("a").unwrap().start().unwrap();
        assert!(DependencyResolver::ready_set(&plan).is_empty());

        plan.get_subtask_mut("a").unwrap().complete("ok").unwrap();
        let ready: Vec<&str> = DependencyResolver::ready_set(&plan)
            .iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(ready, vec!["b"]);
    }

    #[test]
    fn failed_dependency_blocks_dependents() {
        let mut plan = plan_of(&[("a", &[]), ("b", &["a"])]);
        plan.get_subtask_mut("a").unwrap().start().unwrap();
        plan.get_subtask_mut("a").unwrap().fail("boom").unwrap();
        assert!(DependencyResolver::ready_set(&plan).is_empty());
        assert!(DependencyResolver::check_ready_invariant(&plan));
    }

    #[test]
    fn validate_accepts_well_formed_dag() {
        let plan = plan_of(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
        assert!(DependencyResolver::validate(&plan).is_empty());
    }

    #[test]
    fn validate_reports_unknown_dependency() {
        let plan = plan_of(&[("a", &["ghost"])]);
        let errors = DependencyResolver::validate(&plan);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unknown dependency ghost"));
    }

    #[test]
    fn validate_reports_self_loop() {
        let plan = plan_of(&[("a", &["a"])]);
        let errors = DependencyResolver::validate(&plan);
        assert!(errors.iter().any(|e| e.contains("depends on itself")));
    }

    #[test]
    fn validate_reports_two_node_cycle_with_back_edge() {
        let plan = plan_of(&[("st-1", &["st-2"]), ("st-2", &["st-1"])]);
        let errors = DependencyResolver::validate(&plan);
        assert!(errors.iter().any(|e| e.contains("circular dependencies")));
    }

    #[test]
    fn validate_reports_longer_cycle() {
        let plan = plan_of(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]);
        let errors = DependencyResolver::validate(&plan);
        assert!(errors.iter().any(|e| e.contains("circular")));
    }

    #[test]
    fn execution_levels_layer_topologically() {
        let plan = plan_of(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        let levels = DependencyResolver::execution_levels(&plan).unwrap();
        let ids: Vec<Vec<&str>> = levels
            .iter()
            .map(|l| l.iter().map(|s| s.id.as_str()).collect())
            .collect();
        assert_eq!(ids, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn execution_levels_error_on_cycle() {
        let plan = plan_of(&[("a", &["b"]), ("b", &["a"])]);
        let err = DependencyResolver::execution_levels(&plan).unwrap_err();
        assert!(err.to_string().contains("circular"));
    }

    #[test]
    fn empty_plan_has_no_levels() {
        let plan = ExecutionPlan::new("p-1", "s-1", "goal").unwrap();
        assert!(DependencyResolver::execution_levels(&plan)
            .unwrap()
            .is_empty());
        assert!(DependencyResolver::ready_set(&plan).is_empty());
    }
}

//! Dependency ordering for resource handles.
//!
//! [`sort`] is a depth-first topological sort that tolerates cycles by
//! default: an item reached again while it is still on the visitation path is
//! skipped, which yields a best-effort partial order rather than an error.
//! Pass [`CycleMode::Strict`] to fail with [`CyclicDependencyError`] instead.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use thiserror::Error;

use crate::resource::ResourceHandle;

/// How [`sort`] treats a dependency cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CycleMode {
    /// Skip the item that closes the cycle and keep going.
    #[default]
    Lenient,
    /// Fail on the first cycle found.
    Strict,
}

/// A dependency cycle was found in strict mode.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cyclic dependency found at {item}")]
pub struct CyclicDependencyError {
    /// Debug rendering of the item that closed the cycle.
    pub item: String,
}

/// Topologically sort `items` so dependencies come before their dependents.
///
/// Items are visited in input order and dependencies in the order
/// `dependencies_of` yields them. Dependencies that are not members of
/// `items` are ignored. Each input item appears exactly once in the output.
pub fn sort<T, F, I>(
    items: &[T],
    dependencies_of: F,
    mode: CycleMode,
) -> Result<Vec<T>, CyclicDependencyError>
where
    T: Clone + Eq + Hash + fmt::Debug,
    F: Fn(&T) -> I,
    I: IntoIterator<Item = T>,
{
    let members: HashSet<&T> = items.iter().collect();
    let mut visited: HashSet<T> = HashSet::with_capacity(items.len());
    let mut emitted: HashSet<T> = HashSet::with_capacity(items.len());
    let mut sorted = Vec::with_capacity(items.len());

    // Each frame is an item whose dependencies are being visited, with the
    // dependencies still left to visit.
    let mut stack: Vec<(T, std::vec::IntoIter<T>)> = Vec::new();

    for root in items {
        if !visit(root, &mut visited, &emitted, mode)? {
            continue;
        }
        stack.push((root.clone(), member_deps(root, &dependencies_of, &members)));

        while let Some((_, pending)) = stack.last_mut() {
            match pending.next() {
                Some(dep) => {
                    if visit(&dep, &mut visited, &emitted, mode)? {
                        let deps = member_deps(&dep, &dependencies_of, &members);
                        stack.push((dep, deps));
                    }
                }
                None => {
                    if let Some((done, _)) = stack.pop() {
                        emitted.insert(done.clone());
                        sorted.push(done);
                    }
                }
            }
        }
    }

    Ok(sorted)
}

/// Mark `item` visited. Returns whether it still needs processing.
fn visit<T>(
    item: &T,
    visited: &mut HashSet<T>,
    emitted: &HashSet<T>,
    mode: CycleMode,
) -> Result<bool, CyclicDependencyError>
where
    T: Clone + Eq + Hash + fmt::Debug,
{
    if visited.insert(item.clone()) {
        return Ok(true);
    }
    if mode == CycleMode::Strict && !emitted.contains(item) {
        return Err(CyclicDependencyError {
            item: format!("{item:?}"),
        });
    }
    Ok(false)
}

fn member_deps<T, F, I>(
    item: &T,
    dependencies_of: &F,
    members: &HashSet<&T>,
) -> std::vec::IntoIter<T>
where
    T: Eq + Hash,
    F: Fn(&T) -> I,
    I: IntoIterator<Item = T>,
{
    dependencies_of(item)
        .into_iter()
        .filter(|dep| members.contains(dep))
        .collect::<Vec<_>>()
        .into_iter()
}

/// Order resource handles for loading, dependencies first.
///
/// Handles are first ordered by identity so that the first-visited order of
/// cycle members is stable across calls.
pub fn order_resources(
    handles: &[ResourceHandle],
    mode: CycleMode,
) -> Result<Vec<ResourceHandle>, CyclicDependencyError> {
    let mut by_identity: Vec<&ResourceHandle> = handles.iter().collect();
    by_identity.sort_by(|a, b| a.identity.cmp(&b.identity));
    by_identity.dedup_by(|a, b| a.identity == b.identity);

    let by_id: HashMap<&str, &ResourceHandle> =
        by_identity.iter().map(|h| (h.identity.as_str(), *h)).collect();
    let identities: Vec<String> = by_identity.iter().map(|h| h.identity.clone()).collect();
    let ordered = sort(
        &identities,
        |id| {
            by_id
                .get(id.as_str())
                .map(|h| h.dependencies.clone())
                .unwrap_or_default()
        },
        mode,
    )?;

    Ok(ordered
        .iter()
        .filter_map(|id| by_id.get(id.as_str()))
        .map(|h| (*h).clone())
        .collect())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn graph(
        edges: &[(&'static str, &[&'static str])],
    ) -> HashMap<&'static str, Vec<&'static str>> {
        edges.iter().map(|(k, v)| (*k, v.to_vec())).collect()
    }

    fn position(order: &[&str], item: &str) -> usize {
        order.iter().position(|x| *x == item).unwrap()
    }

    #[test]
    fn test_dependencies_precede_dependents() {
        let g = graph(&[
            ("app", &["ui", "net"]),
            ("ui", &["core"]),
            ("net", &["core", "tls"]),
            ("tls", &["core"]),
            ("core", &[]),
        ]);
        let items = vec!["app", "ui", "net", "tls", "core"];
        let order = sort(&items, |x| g[x].clone(), CycleMode::Lenient).unwrap();

        assert_eq!(order.len(), items.len());
        for (item, deps) in &g {
            for dep in deps {
                assert!(
                    position(&order, dep) < position(&order, item),
                    "{dep} should precede {item} in {order:?}"
                );
            }
        }
    }

    #[test]
    fn test_visits_in_input_order() {
        let g = graph(&[("b", &["a"]), ("a", &[]), ("c", &[])]);
        let order = sort(&["c", "b", "a"], |x| g[x].clone(), CycleMode::Lenient).unwrap();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_two_cycle_is_tolerated() {
        let g = graph(&[("A", &["B"]), ("B", &["A"])]);
        let order = sort(&["A", "B"], |x| g[x].clone(), CycleMode::Lenient).unwrap();
        assert_eq!(order, vec!["B", "A"]);
    }

    #[test]
    fn test_self_dependency_is_tolerated() {
        let g = graph(&[("A", &["A"])]);
        let order = sort(&["A"], |x| g[x].clone(), CycleMode::Lenient).unwrap();
        assert_eq!(order, vec!["A"]);
    }

    #[test]
    fn test_strict_mode_reports_cycle() {
        let g = graph(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"])]);
        let err = sort(&["A", "B", "C"], |x| g[x].clone(), CycleMode::Strict).unwrap_err();
        assert_eq!(err.item, "\"A\"");
    }

    #[test]
    fn test_strict_mode_accepts_diamond() {
        let g = graph(&[("top", &["l", "r"]), ("l", &["base"]), ("r", &["base"]), ("base", &[])]);
        let order = sort(&["top", "l", "r", "base"], |x| g[x].clone(), CycleMode::Strict).unwrap();
        assert_eq!(order, vec!["base", "l", "r", "top"]);
    }

    #[test]
    fn test_non_members_are_ignored() {
        let g = graph(&[("a", &["missing", "b"]), ("b", &[])]);
        let order = sort(&["a", "b"], |x| g[x].clone(), CycleMode::Strict).unwrap();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let items: Vec<u32> = (0..100_000).collect();
        let order = sort(
            &items,
            |&n| if n + 1 < 100_000 { vec![n + 1] } else { vec![] },
            CycleMode::Strict,
        )
        .unwrap();
        assert_eq!(order.first(), Some(&99_999));
        assert_eq!(order.last(), Some(&0));
    }

    #[test]
    fn test_order_resources_by_identity() {
        let handles = vec![
            ResourceHandle::new("libB.dll", ["libA.dll"]),
            ResourceHandle::new("libA.dll", Vec::<String>::new()),
        ];
        let ordered = order_resources(&handles, CycleMode::Lenient).unwrap();
        let ids: Vec<_> = ordered.iter().map(|h| h.identity.as_str()).collect();
        assert_eq!(ids, vec!["libA.dll", "libB.dll"]);
    }

    #[test]
    fn test_order_resources_with_cycle_keeps_each_once() {
        let handles = vec![
            ResourceHandle::new("b", ["a"]),
            ResourceHandle::new("a", ["b"]),
        ];
        let ordered = order_resources(&handles, CycleMode::Lenient).unwrap();
        let ids: Vec<_> = ordered.iter().map(|h| h.identity.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}

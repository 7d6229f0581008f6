use petgraph::{
    algo::toposort,
    graph::{DiGraph, NodeIndex},
};
use std::collections::HashMap;

use super::ModuleDescriptor;
use crate::error::RegistryError;

/// Orders `modules` so every module comes after the dependencies it shares with the set.
///
/// Dependencies outside the set are ignored here; the caller checks they are installed.
/// A cycle is reported instead of producing an arbitrary order.
pub fn root_to_leaf<'a>(
    modules: &[&'a ModuleDescriptor],
) -> Result<Vec<&'a ModuleDescriptor>, RegistryError> {
    let mut sorted: Vec<&ModuleDescriptor> = modules.to_vec();
    sorted.sort_by_key(|m| m.name);
    sorted.dedup_by_key(|m| m.name);

    let mut graph: DiGraph<&ModuleDescriptor, ()> = DiGraph::with_capacity(sorted.len(), 0);
    let index: HashMap<&str, NodeIndex> = sorted
        .iter()
        .map(|m| (m.name, graph.add_node(*m)))
        .collect();

    for module in &sorted {
        let to = index[module.name];
        for dep in &module.dependencies {
            if let Some(&from) = index.get(dep) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let order = toposort(&graph, None)
        .map_err(|cycle| RegistryError::DependencyCycle(graph[cycle.node_id()].name.to_string()))?;
    Ok(order.into_iter().map(|idx| graph[idx]).collect())
}

pub fn leaf_to_root<'a>(
    modules: &[&'a ModuleDescriptor],
) -> Result<Vec<&'a ModuleDescriptor>, RegistryError> {
    let mut order = root_to_leaf(modules)?;
    order.reverse();
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(order: &[&ModuleDescriptor]) -> Vec<&'static str> {
        order.iter().map(|m| m.name).collect()
    }

    #[test]
    fn dependencies_come_first_regardless_of_request_order() {
        let a = ModuleDescriptor::new("a");
        let b = ModuleDescriptor::new("b").depends_on(["a"]);
        assert_eq!(names(&root_to_leaf(&[&b, &a]).unwrap()), vec!["a", "b"]);
        assert_eq!(names(&leaf_to_root(&[&a, &b]).unwrap()), vec!["b", "a"]);
    }

    #[test]
    fn transitive_dependencies_are_respected() {
        // c depends on a only through b; a pairwise comparator cannot see that.
        let a = ModuleDescriptor::new("zeta");
        let b = ModuleDescriptor::new("mid").depends_on(["zeta"]);
        let c = ModuleDescriptor::new("alpha").depends_on(["mid"]);
        let unrelated = ModuleDescriptor::new("beta");

        let order = names(&root_to_leaf(&[&c, &unrelated, &a, &b]).unwrap());
        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
        assert!(pos("zeta") < pos("mid"));
        assert!(pos("mid") < pos("alpha"));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn cycles_fail_fast() {
        let a = ModuleDescriptor::new("a").depends_on(["b"]);
        let b = ModuleDescriptor::new("b").depends_on(["a"]);
        assert!(matches!(
            root_to_leaf(&[&a, &b]),
            Err(RegistryError::DependencyCycle(_))
        ));
    }
}

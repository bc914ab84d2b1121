use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use std::collections::HashMap;

use crate::error::EngineError;

/// Order nodes so every node comes after the nodes it names as prerequisites.
pub fn order_by_dependencies<'a, I, D>(nodes: I) -> Result<Vec<&'a str>, EngineError>
where
    I: IntoIterator<Item = (&'a str, D)>,
    D: IntoIterator<Item = &'a str>,
{
    let mut g: DiGraph<&'a str, ()> = DiGraph::new();
    let mut id_to_ix = HashMap::new();
    let mut edges = Vec::new();
    for (name, deps) in nodes {
        let ix = g.add_node(name);
        id_to_ix.insert(name, ix);
        edges.extend(deps.into_iter().map(|d| (d, name)));
    }
    for (from, to) in edges {
        let from_ix = *id_to_ix.get(from).ok_or_else(|| EngineError::UnknownDependency {
            node: to.to_string(),
            dependency: from.to_string(),
        })?;
        g.add_edge(from_ix, id_to_ix[to], ());
    }
    let ordered = toposort(&g, None).map_err(|c| EngineError::Cycle(g[c.node_id()].to_string()))?;
    Ok(ordered.into_iter().map(|ix| g[ix]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(order: &[&str], name: &str) -> usize { order.iter().position(|n| *n == name).unwrap() }

    #[test]
    fn prerequisites_come_first() {
        let order = order_by_dependencies(vec![
            ("user", vec!["acl"]),
            ("acl", vec!["cluster"]),
            ("cluster", vec![]),
            ("snapshot", vec![]),
        ])
        .unwrap();
        assert_eq!(order.len(), 4);
        assert!(pos(&order, "cluster") < pos(&order, "acl"));
        assert!(pos(&order, "acl") < pos(&order, "user"));
    }

    #[test]
    fn cycle_is_reported() {
        let err = order_by_dependencies(vec![("a", vec!["b"]), ("b", vec!["a"])]).unwrap_err();
        assert!(matches!(err, EngineError::Cycle(_)));
    }

    #[test]
    fn unknown_prerequisite_is_reported() {
        let err = order_by_dependencies(vec![("a", vec!["ghost"])]).unwrap_err();
        assert_eq!(err, EngineError::UnknownDependency { node: "a".into(), dependency: "ghost".into() });
    }
}

//! Graph analyses used to prepare a graph for conversion: cycle
//! removal, deterministic ordering, and reachability pruning.
//!
//! Input graphs do not guarantee a stable iteration order, so every
//! traversal here breaks ties lexicographically on node names. Two
//! imports of the same graph must produce identical output.

use crate::{Edge, Graph, NodeId, Port};
use std::collections::{HashMap, HashSet};

/// A cycle-forming edge detached from the graph, recorded so it can be
/// re-injected after conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovedEdge {
    pub src: NodeId,
    pub src_output: Port,
    pub dst: NodeId,
    pub dst_input: Port,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

/// Successors of every node with a deterministic visit order: sorted by
/// target node name, then by edge ports.
fn sorted_adjacency(graph: &Graph) -> HashMap<NodeId, Vec<(NodeId, Edge)>> {
    graph
        .node_ids()
        .map(|id| {
            let mut out = graph.out_edges(id);
            out.sort_by_key(|(dst, edge)| {
                (graph.node(*dst).name, edge.dst_input, edge.src_output)
            });
            (id, out)
        })
        .collect()
}

/// Detach every cycle-forming edge, returning the removed edges in
/// discovery order. Uses a depth-first traversal from the source with
/// explicit white/grey/black coloring: an edge into a grey (on-path)
/// node closes a cycle.
pub fn remove_backedges(graph: &mut Graph) -> Vec<RemovedEdge> {
    let adj = sorted_adjacency(graph);
    let mut color: HashMap<NodeId, Color> =
        graph.node_ids().map(|id| (id, Color::White)).collect();
    let mut removed = Vec::new();

    // Roots: the source first, then any node the source does not reach,
    // in name order.
    let mut roots = vec![graph.source()];
    let mut rest: Vec<_> = graph
        .node_ids()
        .filter(|&id| id != graph.source())
        .collect();
    rest.sort_by_key(|&id| graph.node(id).name);
    roots.extend(rest);

    for root in roots {
        if color[&root] != Color::White {
            continue;
        }
        // (node, index of the next successor to look at)
        let mut stack: Vec<(NodeId, usize)> = vec![(root, 0)];
        color.insert(root, Color::Grey);
        while let Some(&(u, next)) = stack.last() {
            let succs = &adj[&u];
            if next < succs.len() {
                stack.last_mut().unwrap().1 += 1;
                let (v, edge) = succs[next];
                match color[&v] {
                    Color::Grey => removed.push(RemovedEdge {
                        src: u,
                        src_output: edge.src_output,
                        dst: v,
                        dst_input: edge.dst_input,
                    }),
                    Color::White => {
                        color.insert(v, Color::Grey);
                        stack.push((v, 0));
                    }
                    Color::Black => {}
                }
            } else {
                color.insert(u, Color::Black);
                stack.pop();
            }
        }
    }

    for r in &removed {
        graph.remove_edge(r.src, r.src_output, r.dst, r.dst_input);
    }
    removed
}

/// Nodes in reverse post-order of a depth-first visit from the source,
/// with successors visited in lexicographic name order. The result is
/// the dependency order every conversion pass iterates in.
pub fn reverse_post_order(graph: &Graph) -> Vec<NodeId> {
    let adj = sorted_adjacency(graph);
    let mut color: HashMap<NodeId, Color> =
        graph.node_ids().map(|id| (id, Color::White)).collect();
    let mut post = Vec::with_capacity(graph.node_count());

    let mut stack: Vec<(NodeId, usize)> = vec![(graph.source(), 0)];
    color.insert(graph.source(), Color::Grey);
    while let Some(&(u, next)) = stack.last() {
        let succs = &adj[&u];
        if next < succs.len() {
            stack.last_mut().unwrap().1 += 1;
            let (v, _) = succs[next];
            if color[&v] == Color::White {
                color.insert(v, Color::Grey);
                stack.push((v, 0));
            }
        } else {
            color.insert(u, Color::Black);
            post.push(u);
            stack.pop();
        }
    }

    post.reverse();
    post
}

/// Delete every real node that does not reach one of `keep`. Returns
/// true if anything was deleted.
pub fn prune_reverse_reachable(graph: &mut Graph, keep: &HashSet<NodeId>) -> bool {
    let mut visited: HashSet<NodeId> = keep.clone();
    let mut work: Vec<NodeId> = keep.iter().copied().collect();
    work.sort();
    while let Some(id) = work.pop() {
        for (pred, _) in graph.in_edges(id) {
            if visited.insert(pred) {
                work.push(pred);
            }
        }
    }

    let doomed: Vec<NodeId> = graph
        .node_ids()
        .filter(|id| {
            *id != graph.source() && *id != graph.sink() && !visited.contains(id)
        })
        .collect();
    let pruned = !doomed.is_empty();
    for id in doomed {
        graph.remove_node(id);
    }
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ElementType, Node, OpKind};

    fn diamond() -> (Graph, NodeId, NodeId, NodeId, NodeId) {
        let mut g = Graph::new();
        let a = g
            .add_node(Node::op("a", "Const").with_output(ElementType::I32))
            .unwrap();
        let b = g
            .add_node(Node::op("b", "Neg").with_output(ElementType::I32))
            .unwrap();
        let c = g
            .add_node(Node::op("c", "Abs").with_output(ElementType::I32))
            .unwrap();
        let d = g
            .add_node(Node::op("d", "Add").with_output(ElementType::I32))
            .unwrap();
        g.add_edge(a, 0, b, 0);
        g.add_edge(a, 0, c, 0);
        g.add_edge(b, 0, d, 0);
        g.add_edge(c, 0, d, 1);
        g.fixup_source_and_sink();
        (g, a, b, c, d)
    }

    #[test]
    fn acyclic_graph_keeps_all_edges() {
        let (mut g, ..) = diamond();
        let removed = remove_backedges(&mut g);
        assert!(removed.is_empty());
    }

    #[test]
    fn rpo_is_a_dependency_order_with_name_tiebreak() {
        let (g, a, b, c, d) = diamond();
        let order = reverse_post_order(&g);
        let pos =
            |id: NodeId| order.iter().position(|&x| x == id).expect("node in order");
        assert!(pos(a) < pos(b));
        assert!(pos(a) < pos(c));
        assert!(pos(b) < pos(d));
        assert!(pos(c) < pos(d));
        // Siblings are visited in name order.
        assert!(pos(b) < pos(c));
        assert_eq!(order[0], g.source());
    }

    #[test]
    fn feedback_cycle_is_cut_exactly_once() {
        let mut g = Graph::new();
        let enter = g
            .add_node(Node::new("enter", OpKind::Enter).with_output(ElementType::I32))
            .unwrap();
        let merge = g
            .add_node(
                Node::new("merge", OpKind::Merge)
                    .with_output(ElementType::I32)
                    .with_output(ElementType::I32),
            )
            .unwrap();
        let next = g
            .add_node(
                Node::new("next", OpKind::Feedback).with_output(ElementType::I32),
            )
            .unwrap();
        g.add_edge(enter, 0, merge, 0);
        g.add_edge(merge, 0, next, 0);
        g.add_edge(next, 0, merge, 1);
        g.fixup_source_and_sink();

        let removed = remove_backedges(&mut g);
        assert_eq!(removed.len(), 1);
        let r = &removed[0];
        assert_eq!(r.src, next);
        assert_eq!(r.dst, merge);
        assert_eq!(r.dst_input, Port::Data(1));
        // The residual graph is now acyclic.
        assert!(remove_backedges(&mut g).is_empty());
    }

    #[test]
    fn pruning_removes_unreachable_nodes() {
        let (mut g, a, b, _c, d) = diamond();
        let isolated = g
            .add_node(Node::op("zzz", "Const").with_output(ElementType::I32))
            .unwrap();
        g.fixup_source_and_sink();
        let keep = [d].into_iter().collect();
        assert!(prune_reverse_reachable(&mut g, &keep));
        assert!(!g.contains(isolated));
        assert!(g.contains(a));
        assert!(g.contains(b));
    }
}

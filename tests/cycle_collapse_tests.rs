// Cycle collapsing on hand-built graphs

use codelet_callgraph::call_graph::{CallGraph, NodeId};
use codelet_callgraph::cycle_collapse::collapse_cycles;

fn id(graph: &CallGraph, profiler_id: &str) -> NodeId {
    graph.node_by_profiler_id(profiler_id).unwrap()
}

/// P -> A -> B -> C -> A with C -> S; B has the highest coverage
fn recursive_chain() -> CallGraph {
    let mut graph = CallGraph::new();
    graph.add_node("P", "main", 0.0, 100.0).unwrap();
    graph.add_node("A", "a", 1.0, 10.0).unwrap();
    graph.add_node("B", "b", 1.0, 40.0).unwrap();
    graph.add_node("C", "c", 1.0, 20.0).unwrap();
    graph.add_node("S", "__cere__sink", 3.0, 3.0).unwrap();
    graph.add_edge("P", "A", 5).unwrap();
    graph.add_edge("A", "B", 9).unwrap();
    graph.add_edge("B", "C", 8).unwrap();
    graph.add_edge("C", "A", 7).unwrap();
    graph.add_edge("C", "S", 3).unwrap();
    graph.add_total_samples(100);
    graph
}

#[test]
fn test_highest_coverage_member_survives() {
    let mut graph = recursive_chain();
    let report = collapse_cycles(&mut graph).unwrap();

    assert_eq!(report.cycles_collapsed(), 1);
    assert_eq!(report.cycles[0].survivor, "B");
    let mut removed = report.cycles[0].removed.clone();
    removed.sort();
    assert_eq!(removed, vec!["A".to_string(), "C".to_string()]);

    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.edge_weight(id(&graph, "P"), id(&graph, "B")), Some(5.0));
    assert_eq!(graph.edge_weight(id(&graph, "B"), id(&graph, "S")), Some(3.0));
    assert_eq!(graph.edge_count(), 2);
    assert_eq!(graph.node(id(&graph, "B")).unwrap().coverage, 5.0);
}

#[test]
fn test_graph_is_acyclic_after_collapse() {
    let mut graph = recursive_chain();
    collapse_cycles(&mut graph).unwrap();
    assert!(graph.is_acyclic());
    assert!(graph.topological_order().is_ok());
}

#[test]
fn test_collapse_is_idempotent() {
    let mut graph = recursive_chain();
    collapse_cycles(&mut graph).unwrap();
    let edges_before = graph.edges();

    let second = collapse_cycles(&mut graph).unwrap();
    assert_eq!(second.cycles_collapsed(), 0);
    assert_eq!(graph.edges(), edges_before);
}

#[test]
fn test_boundary_weight_is_conserved() {
    // Two callers enter the cycle at different members, two callees leave it
    let mut graph = CallGraph::new();
    graph.add_node("P1", "p1", 0.0, 50.0).unwrap();
    graph.add_node("P2", "p2", 0.0, 50.0).unwrap();
    graph.add_node("X", "x", 0.0, 30.0).unwrap();
    graph.add_node("Y", "y", 0.0, 35.0).unwrap();
    graph.add_node("S1", "s1", 0.0, 5.0).unwrap();
    graph.add_node("S2", "s2", 0.0, 5.0).unwrap();
    graph.add_edge("P1", "X", 20).unwrap();
    graph.add_edge("P2", "Y", 15).unwrap();
    graph.add_edge("P1", "Y", 4).unwrap();
    graph.add_edge("X", "Y", 11).unwrap();
    graph.add_edge("Y", "X", 6).unwrap();
    graph.add_edge("X", "S1", 5).unwrap();
    graph.add_edge("Y", "S2", 2).unwrap();
    graph.add_edge("Y", "S1", 1).unwrap();
    graph.add_total_samples(100);

    collapse_cycles(&mut graph).unwrap();

    let y = id(&graph, "Y");
    assert!(graph.node_by_profiler_id("X").is_none());
    // P1 reached the cycle through both members: 20 + 4
    assert_eq!(graph.edge_weight(id(&graph, "P1"), y), Some(24.0));
    assert_eq!(graph.edge_weight(id(&graph, "P2"), y), Some(15.0));
    assert_eq!(graph.edge_weight(y, id(&graph, "S1")), Some(6.0));
    assert_eq!(graph.edge_weight(y, id(&graph, "S2")), Some(2.0));
    assert_eq!(graph.in_weight(y), 39.0);
    assert_eq!(graph.out_weight(y), 8.0);
    assert_eq!(graph.node(y).unwrap().coverage, 39.0);
}

#[test]
fn test_cycles_exposed_by_a_collapse_are_collapsed_too() {
    // A <-> B and B <-> C share B; one pass may leave the second cycle
    let mut graph = CallGraph::new();
    graph.add_node("R", "main", 0.0, 100.0).unwrap();
    graph.add_node("A", "a", 0.0, 60.0).unwrap();
    graph.add_node("B", "b", 0.0, 50.0).unwrap();
    graph.add_node("C", "c", 0.0, 70.0).unwrap();
    graph.add_edge("R", "A", 10).unwrap();
    graph.add_edge("A", "B", 8).unwrap();
    graph.add_edge("B", "A", 2).unwrap();
    graph.add_edge("B", "C", 6).unwrap();
    graph.add_edge("C", "B", 1).unwrap();
    graph.add_total_samples(10);

    let report = collapse_cycles(&mut graph).unwrap();

    assert!(graph.is_acyclic());
    assert!(report.cycles_collapsed() >= 2);
    assert_eq!(graph.node_count(), 2);
    assert!(graph.node_by_profiler_id("R").is_some());
}

#[test]
fn test_self_recursion_keeps_node() {
    let mut graph = CallGraph::new();
    graph.add_node("R", "main", 0.0, 100.0).unwrap();
    graph.add_node("F", "__cere__fib", 50.0, 50.0).unwrap();
    graph.add_edge("R", "F", 50).unwrap();
    graph.add_edge("F", "F", 400).unwrap();
    graph.add_total_samples(100);

    let report = collapse_cycles(&mut graph).unwrap();

    assert_eq!(report.self_loops_stripped, 1);
    let f = id(&graph, "F");
    assert_eq!(graph.edge_weight(f, f), None);
    assert_eq!(graph.edge_weight(id(&graph, "R"), f), Some(50.0));
    assert_eq!(graph.node(f).unwrap().coverage, 50.0);
}

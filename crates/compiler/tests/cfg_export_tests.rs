//! CFG export and listing tests

use hotpath_compiler::{lower_trace, CfgEdge, LoweringConfig};
use hotpath_trace::{Builtin, Comparator, Kind, MethodRef, Trace, TraceBuilder, Value};
use petgraph::algo::has_path_connecting;
use petgraph::dot::Dot;

fn guarded_loop() -> Trace {
    let mut b = TraceBuilder::new(MethodRef::new("Counter", "run", vec![], Kind::Void), 4);
    let i = b.local(Kind::Int);
    let one = b.constant(Value::Int(1));
    let next = b.builtin(Builtin::IntAdd, &[i, one]);
    let limit = b.constant(Value::Int(100));
    let state = b.frame_state(9, &[]);
    b.guard(Kind::Int, Comparator::LessThan, next, limit, Some(state));
    b.store(i, next);
    b.build().unwrap()
}

#[test]
fn test_graph_edges_are_classified() {
    let method = lower_trace(&guarded_loop(), LoweringConfig::default()).unwrap();
    let graph = method.to_graph();

    assert_eq!(graph.node_count(), 3);
    let mut edges: Vec<CfgEdge> = graph.edge_weights().copied().collect();
    edges.sort_by_key(|edge| format!("{}", edge));
    assert_eq!(edges, vec![CfgEdge::Fallthrough, CfgEdge::GuardFailure, CfgEdge::LoopBack]);

    // Everything is reachable from the entry block
    let entry = graph.node_indices().next().unwrap();
    assert!(graph.node_indices().all(|node| has_path_connecting(&graph, entry, node, None)));
}

#[test]
fn test_dot_output_labels_edges() {
    let method = lower_trace(&guarded_loop(), LoweringConfig::default()).unwrap();
    let graph = method.to_graph();
    let dot = format!("{}", Dot::new(&graph));

    assert!(dot.contains("loop back"));
    assert!(dot.contains("guard failure"));
}

#[test]
fn test_listing_names_blocks_by_serial() {
    let method = lower_trace(&guarded_loop(), LoweringConfig::debug()).unwrap();
    let listing = method.to_string();

    assert!(listing.starts_with("trace Counter.run"));
    assert!(listing.contains("B2:"));
    assert!(listing.contains("B0 synthetic:"));
    assert!(listing.contains("goto B2"));
    assert!(listing.contains("iadd(i1, 1)"));
}

mod common;

use common::*;
use param_store::{StoreError, StoreGraph, StoreId, Variable, VariableKey};

fn graph_of(names: &[&str]) -> (StoreGraph, Vec<StoreId>) {
    init_tracing();
    let mut graph = StoreGraph::new();
    let key = VariableKey::float("Speed");
    let ids = names
        .iter()
        .map(|name| {
            let id = graph.create_store(*name);
            graph
                .add_parameter(id, Variable::with_value(key.clone(), 1.0f32).unwrap(), false)
                .unwrap();
            id
        })
        .collect();
    (graph, ids)
}

#[test]
fn test_destroy_source_detaches_destinations() {
    let (mut graph, ids) = graph_of(&["A", "B", "C"]);
    let (a, b, c) = (ids[0], ids[1], ids[2]);
    graph.bind(a, b).unwrap();
    graph.bind(a, c).unwrap();

    assert!(graph.destroy_store(a));
    for dest in [b, c] {
        let store = graph.store(dest).unwrap();
        assert_eq!(store.source_stores().count(), 0);
        graph.tick(dest).unwrap();
    }
    assert_eq!(graph.len(), 2);
}

#[test]
fn test_destroy_destination_removes_binding_from_sources() {
    let (mut graph, ids) = graph_of(&["A", "B", "C"]);
    let (a, b, c) = (ids[0], ids[1], ids[2]);
    graph.bind(a, c).unwrap();
    graph.bind(b, c).unwrap();
    graph.bind(a, b).unwrap();

    assert!(graph.destroy_store(c));
    assert!(graph.store(a).unwrap().bound_stores().eq([b]));
    assert_eq!(graph.store(b).unwrap().bound_stores().count(), 0);

    graph
        .store_mut(a)
        .unwrap()
        .set_parameter_value(&VariableKey::float("Speed"), 2.0f32)
        .unwrap();
    graph.tick(a).unwrap();
    graph.tick(b).unwrap();
}

#[test]
fn test_stale_handle_never_reaches_reused_slot() {
    let (mut graph, ids) = graph_of(&["A", "B"]);
    let (a, b) = (ids[0], ids[1]);
    graph.bind(a, b).unwrap();
    graph.destroy_store(b);

    let reused = graph.create_store("B2");
    assert_eq!(reused.index(), b.index());

    assert_eq!(graph.unbind(a, b), Ok(false));
    assert_eq!(graph.bind(a, b), Err(StoreError::StoreNotFound(b)));
    assert_eq!(graph.bind(b, a), Err(StoreError::StoreNotFound(b)));
    assert_eq!(graph.store(reused).unwrap().source_stores().count(), 0);
    assert_eq!(graph.store(a).unwrap().bound_stores().count(), 0);
}

#[test]
fn test_transfer_bindings_keeps_sources_consistent() {
    let (mut graph, ids) = graph_of(&["old", "new", "X", "Y"]);
    let (old, new, x, y) = (ids[0], ids[1], ids[2], ids[3]);
    graph.bind(old, x).unwrap();
    graph.bind(old, y).unwrap();
    graph.bind(old, new).unwrap();

    graph.transfer_bindings(old, new).unwrap();

    assert_eq!(graph.store(old).unwrap().bound_stores().count(), 0);
    assert!(graph.store(new).unwrap().bound_stores().eq([x, y]));
    for dest in [x, y] {
        assert!(graph.store(dest).unwrap().source_stores().eq([new]));
        assert!(graph.verify_binding(new, dest).unwrap());
    }
    assert_eq!(graph.store(new).unwrap().source_stores().count(), 0);
}

#[test]
fn test_unbind_all_releases_outgoing() {
    let (mut graph, ids) = graph_of(&["A", "B", "C"]);
    let (a, b, c) = (ids[0], ids[1], ids[2]);
    graph.bind(a, b).unwrap();
    graph.bind(a, c).unwrap();
    graph.bind(b, c).unwrap();

    graph.unbind_all(a).unwrap();
    assert_eq!(graph.store(a).unwrap().bound_stores().count(), 0);
    assert_eq!(graph.store(b).unwrap().source_stores().count(), 0);
    assert!(graph.store(c).unwrap().source_stores().eq([b]));
}

#[test]
fn test_transfer_bindings_onto_itself_is_rejected() {
    let (mut graph, ids) = graph_of(&["A", "B"]);
    let (a, b) = (ids[0], ids[1]);
    graph.bind(a, b).unwrap();

    assert_eq!(
        graph.transfer_bindings(a, a),
        Err(StoreError::SelfBinding(a))
    );
    assert!(graph.store(a).unwrap().bound_stores().eq([b]));
    assert!(graph.store(b).unwrap().source_stores().eq([a]));
    assert!(graph.verify_binding(a, b).unwrap());
}

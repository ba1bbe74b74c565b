//! Pull-based evaluation: each vertex recursively demands its producers
//! before running itself, so values flow producer-first along the edges.
//!
//! Memoization is per pass. A vertex evaluated once in a pass is never
//! revisited, so shared upstream work (diamonds) runs exactly once. Vertices
//! whose nodes are clean are still visited for value propagation, but their
//! compute step is skipped by the node's own dirty check.

use std::collections::HashSet;

use log::debug;

use crate::error::DataflowError;
use crate::model::composite::{CompositeNode, Endpoint};
use crate::model::port::PortValue;

#[derive(Default)]
struct PassState {
    evaluated: HashSet<Endpoint>,
    in_progress: HashSet<Endpoint>,
}

/// Evaluate the whole graph: pull from every sink vertex (out-degree zero).
/// Returns the number of vertices visited.
///
/// A non-empty graph where every vertex feeds another has no sink and
/// therefore contains a cycle; it is rejected outright. A cycle sitting in a
/// component that never reaches a sink is not traversed and stays silent.
pub fn full_pass(graph: &mut CompositeNode) -> Result<usize, DataflowError> {
    let vertices = graph.vertices();
    let sinks: Vec<Endpoint> = vertices
        .iter()
        .filter(|v| graph.out_degree(v) == 0)
        .cloned()
        .collect();
    if sinks.is_empty() && !vertices.is_empty() {
        return Err(DataflowError::Cycle(
            "graph has no sink vertex; every vertex feeds another".to_string(),
        ));
    }
    debug!("full pass from {} sink vertices", sinks.len());

    let mut state = PassState::default();
    for sink in &sinks {
        eval_vertex(graph, sink, &mut state)?;
    }
    Ok(state.evaluated.len())
}

/// Evaluate only `target` and its transitive producers. With no target this
/// degenerates to a full pass.
pub fn selective_pass(
    graph: &mut CompositeNode,
    target: Option<&Endpoint>,
) -> Result<usize, DataflowError> {
    let Some(target) = target else {
        return full_pass(graph);
    };
    debug!("selective pass from {}", target);

    let mut state = PassState::default();
    eval_vertex(graph, target, &mut state)?;
    Ok(state.evaluated.len())
}

/// Evaluate one vertex: demand every producer feeding its input ports,
/// aggregate fan-in, then run the vertex's compute step.
///
/// Fan-in of one forwards the producer value verbatim; more than one packs
/// the values into an array in connection-registration order. A vertex found
/// on the current recursion path means the edge set contains a cycle.
fn eval_vertex(
    graph: &mut CompositeNode,
    vertex: &Endpoint,
    state: &mut PassState,
) -> Result<(), DataflowError> {
    if state.evaluated.contains(vertex) {
        return Ok(());
    }
    if !state.in_progress.insert(vertex.clone()) {
        return Err(DataflowError::Cycle(format!(
            "evaluation reentered {} through a connection cycle",
            vertex
        )));
    }

    let nb_input = graph.input_count(vertex)?;
    for port in 0..nb_input {
        let producers = graph.producers_of(vertex, port);
        if producers.is_empty() {
            continue;
        }
        for (producer, _) in &producers {
            if !state.evaluated.contains(producer) {
                eval_vertex(graph, producer, state)?;
            }
        }

        let mut values = Vec::with_capacity(producers.len());
        for (producer, out_port) in &producers {
            values.push(graph.read_output(producer, *out_port)?);
        }
        if values.len() == 1 {
            if let Some(value) = values.pop() {
                graph.write_input(vertex, port, value)?;
            }
        } else {
            graph.write_input(vertex, port, PortValue::Array(values))?;
        }
    }

    graph.run_vertex(vertex)?;

    state.in_progress.remove(vertex);
    state.evaluated.insert(vertex.clone());
    Ok(())
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph execution.
//!
//! A run classifies the requested nodes, pushes literals and callable
//! references along their edges, sorts the remaining nodes into generations
//! and invokes them generation by generation. Whatever happens, every
//! node's argument map is cleared before the run returns.

use crate::callable::CallArgs;
use crate::definition::NodeDefinition;
use crate::error::ExecutionError;
use crate::graph::{generations, Graph};
use crate::marshal::invoke;
use crate::node::{NodeClass, NodeId, CALLABLE_OUTPUT_NAME};
use crate::socket::SocketId;
use crate::value::Value;
use indexmap::IndexSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Summary of a completed run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// Invoked nodes, in invocation order
    pub executed: Vec<NodeId>,
    /// Sum of tracked node execution times
    pub total_exec_time: Duration,
}

impl RunReport {
    /// Status line for the host
    pub fn status_message(&self) -> String {
        format!(
            "Executed {} node(s) in {:.6}s",
            self.executed.len(),
            self.total_exec_time.as_secs_f64()
        )
    }
}

/// How a run ended when it did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The graph has no node
    NoNodes,
    /// Every requested node is commented out
    AllCommentedOut,
    /// Nodes were executed
    Completed(RunReport),
}

impl RunOutcome {
    /// Message to show when nothing ran
    pub fn info_message(&self) -> Option<&'static str> {
        match self {
            Self::NoNodes => Some("There are no nodes to execute."),
            Self::AllCommentedOut => Some("All nodes to execute are commented out."),
            Self::Completed(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct Classified {
    redirect_nodes: Vec<NodeId>,
    data_nodes: Vec<NodeId>,
    callable_mode_nodes: Vec<NodeId>,
    nodes_to_sort: IndexSet<NodeId>,
}

/// Runs graphs
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    track_exec_time: bool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Scheduler tracking execution times
    pub fn new() -> Self {
        Self {
            track_exec_time: true,
        }
    }

    /// Set whether execution times are summed into the report
    pub fn with_exec_time_tracking(mut self, track: bool) -> Self {
        self.track_exec_time = track;
        self
    }

    /// Execute `requested` nodes, or every node when `None`
    pub fn execute_graph(
        &self,
        graph: &mut Graph,
        requested: Option<&IndexSet<NodeId>>,
    ) -> Result<RunOutcome, ExecutionError> {
        if graph.node_count() == 0 {
            return Ok(RunOutcome::NoNodes);
        }
        let nodes_to_visit: IndexSet<NodeId> = match requested {
            Some(ids) => ids.iter().copied().filter(|id| graph.node(*id).is_some()).collect(),
            None => graph.node_ids().collect(),
        };
        let nodes_to_visit: IndexSet<NodeId> = nodes_to_visit
            .into_iter()
            .filter(|id| graph.node(*id).is_some_and(|node| !node.is_commented_out()))
            .collect();
        if nodes_to_visit.is_empty() {
            return Ok(RunOutcome::AllCommentedOut);
        }

        let result = self.run(graph, &nodes_to_visit);
        for node in graph.nodes_mut() {
            if result.is_ok() {
                node.clear_argument_map();
            } else {
                node.reset_state();
            }
        }

        match result {
            Ok(report) => {
                tracing::info!("{}", report.status_message());
                Ok(RunOutcome::Completed(report))
            }
            Err(error) => {
                if error.is_user_facing() {
                    tracing::warn!("{}", error);
                } else {
                    tracing::error!("{}", error_chain(&error));
                }
                Err(error)
            }
        }
    }

    /// Execute `node_id` after every node feeding it
    pub fn execute_node_after_upstream_ones(
        &self,
        graph: &mut Graph,
        node_id: NodeId,
    ) -> Result<RunOutcome, ExecutionError> {
        let mut requested = graph.upstream_nodes(node_id);
        requested.insert(node_id);
        self.execute_graph(graph, Some(&requested))
    }

    fn run(&self, graph: &mut Graph, nodes_to_visit: &IndexSet<NodeId>) -> Result<RunReport, ExecutionError> {
        let classified = classify(graph, nodes_to_visit)?;
        tracing::debug!(
            "Classified {} redirect, {} data, {} callable-mode and {} schedulable node(s)",
            classified.redirect_nodes.len(),
            classified.data_nodes.len(),
            classified.callable_mode_nodes.len(),
            classified.nodes_to_sort.len()
        );

        propagate_data(graph, &classified.data_nodes)?;
        propagate_callables(graph, &classified.callable_mode_nodes);

        let sources = graph.input_sources(&classified.nodes_to_sort);
        for (id, ids) in &sources {
            if let Some(node) = graph.node_mut(*id) {
                node.input_source_ids = ids.clone();
            }
        }
        let generations = generations(sources)?;

        let mut report = RunReport::default();
        for generation in generations {
            for id in generation {
                let (exec_time, dismissed) = execute_node(graph, id)?;
                if self.track_exec_time && !dismissed {
                    report.total_exec_time += exec_time;
                }
                report.executed.push(id);
            }
        }
        Ok(report)
    }
}

fn classify(graph: &mut Graph, nodes_to_visit: &IndexSet<NodeId>) -> Result<Classified, ExecutionError> {
    let mut classified = Classified::default();
    for id in nodes_to_visit {
        let Some((node, tree)) = graph.node_and_tree_mut(*id) else {
            continue;
        };
        match node.classify_me(tree) {
            NodeClass::Redirect => classified.redirect_nodes.push(*id),
            NodeClass::Data => classified.data_nodes.push(*id),
            NodeClass::CallableMode => classified.callable_mode_nodes.push(*id),
            NodeClass::Schedulable => {
                node.perform_execution_setup(tree);
                node.check_and_setup_parameters()?;
                classified.nodes_to_sort.insert(*id);
            }
        }
    }
    Ok(classified)
}

fn propagate_data(graph: &mut Graph, data_nodes: &[NodeId]) -> Result<(), ExecutionError> {
    let lacking: Vec<NodeId> = data_nodes
        .iter()
        .copied()
        .filter(|id| graph.node(*id).is_some_and(|node| node.widget_value().is_none()))
        .collect();
    if !lacking.is_empty() {
        return Err(ExecutionError::ProxyNodesLackingData { node_ids: lacking });
    }
    for id in data_nodes {
        let value = graph.node(*id).and_then(|node| node.widget_value().cloned());
        if let Some(value) = value {
            graph.push_to_children(&SocketId::proxy(*id), &value);
        }
    }
    Ok(())
}

fn propagate_callables(graph: &mut Graph, callable_mode_nodes: &[NodeId]) {
    for id in callable_mode_nodes {
        let callable = graph
            .node(*id)
            .and_then(|node| node.definition())
            .map(|definition| definition.main_callable.clone());
        if let Some(callable) = callable {
            graph.push_to_children(
                &SocketId::output(*id, CALLABLE_OUTPUT_NAME),
                &Value::Callable(callable),
            );
        }
    }
}

/// Invoke one node and route its output, returning its execution time and
/// whether that time is left out of totals
fn execute_node(graph: &mut Graph, id: NodeId) -> Result<(Duration, bool), ExecutionError> {
    let Some(node) = graph.node_mut(id) else {
        return Ok((Duration::ZERO, true));
    };
    let Some(definition) = node.definition().map(Arc::clone) else {
        return Ok((Duration::ZERO, true));
    };
    let title = node.title();
    let wrap = |source| ExecutionError::NodeCallable {
        node_id: id,
        node_title: title.clone(),
        source,
    };

    node.perform_pre_execution_setups();
    let arguments = node.resolved_arguments()?;
    let callable = definition.backdoor.as_ref().unwrap_or(&definition.main_callable);

    tracing::debug!("Executing node '{}' (id {})", title, id);
    let start = Instant::now();
    let returned = invoke(callable, &arguments, &definition.signature);
    let exec_time = start.elapsed();
    let returned = returned.map_err(wrap)?;

    let output = if definition.backdoor.is_some() {
        let Value::Map(mut routed) = returned else {
            return Err(unexpected(id, &title, &["output".to_string()], "backdoor must return a mapping"));
        };
        node.set_visuals(
            routed.shift_remove("in_graph_visual"),
            routed.shift_remove("loop_data"),
        );
        routed.shift_remove("output").unwrap_or(Value::None)
    } else if let Some(side) = &definition.side_visual_from_output {
        let visuals = side
            .call(CallArgs::positional([returned.clone()]))
            .map_err(wrap)?;
        let visual_of = |key: &str| visuals.as_map().and_then(|map| map.get(key)).cloned();
        node.set_visuals(visual_of("in_graph_visual"), visual_of("loop_data"));
        returned
    } else {
        returned
    };

    route_output(graph, id, &title, &definition, output)?;

    if let Some((node, tree)) = graph.node_and_tree_mut(id) {
        node.perform_execution_setup(tree);
        node.mark_executed(exec_time);
    }
    Ok((exec_time, definition.dismisses_exec_time_tracking()))
}

fn route_output(
    graph: &mut Graph,
    id: NodeId,
    title: &str,
    definition: &NodeDefinition,
    output: Value,
) -> Result<(), ExecutionError> {
    let names = definition.signature.output_names();
    match names.as_slice() {
        [] => {}
        [name] => graph.push_to_children(&SocketId::output(id, name.as_str()), &output),
        _ => {
            let Value::Map(map) = &output else {
                let reason = format!("returned {} instead", output.type_name());
                return Err(unexpected(id, title, &names, &reason));
            };
            if let Some(missing) = names.iter().find(|name| !map.contains_key(name.as_str())) {
                let reason = format!("key '{missing}' is missing");
                return Err(unexpected(id, title, &names, &reason));
            }
            for name in &names {
                let value = map[name.as_str()].clone();
                graph.push_to_children(&SocketId::output(id, name.as_str()), &value);
            }
        }
    }
    Ok(())
}

fn unexpected(id: NodeId, title: &str, expected: &[String], reason: &str) -> ExecutionError {
    ExecutionError::UnexpectedOutput {
        node_id: id,
        node_title: title.to_string(),
        expected: expected.to_vec(),
        reason: reason.to_string(),
    }
}

/// Render an error followed by each of its causes, one per line
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::{CallError, Callable};
    use crate::definition::DefinitionKind;
    use crate::node::{ExecState, Node, NodeRecord, WidgetRecord, CALLABLE_MODE};
    use crate::signature::{Parameter, ParameterKind, Signature};
    use parking_lot::Mutex;

    fn node(id: NodeId, definition: NodeDefinition) -> Node {
        let record = NodeRecord {
            id,
            builtin_id: Some(definition.main_callable.name().to_string()),
            ..NodeRecord::default()
        };
        Node::new(record, Some(Arc::new(definition)))
    }

    fn builtin(signature: Signature, callable: Callable) -> NodeDefinition {
        let name = callable.name().to_string();
        NodeDefinition::new(DefinitionKind::Builtin(name), callable, signature)
    }

    fn data(id: NodeId, value: Value) -> Node {
        let mut record = NodeRecord::proxy(id);
        record.widget = Some(WidgetRecord::new(value));
        Node::new(record, None)
    }

    fn recorder(calls: Arc<Mutex<Vec<Value>>>) -> NodeDefinition {
        let signature = Signature::new(vec![Parameter::positional("v")]);
        let callable = Callable::with_bound("sink", signature.clone(), move |mut b| {
            let v = b.take("v")?;
            calls.lock().push(v.clone());
            Ok(v)
        });
        builtin(signature, callable)
    }

    #[test]
    fn test_empty_and_commented_graphs() {
        let scheduler = Scheduler::new();
        let mut graph = Graph::new();
        assert_eq!(scheduler.execute_graph(&mut graph, None), Ok(RunOutcome::NoNodes));

        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut sink = node(1, recorder(calls));
        sink.set_commented_out(true);
        graph.add_node(sink);
        let outcome = scheduler.execute_graph(&mut graph, None).unwrap();
        assert_eq!(outcome, RunOutcome::AllCommentedOut);
        assert!(outcome.info_message().is_some());
    }

    #[test]
    fn test_var_positional_subparameters_are_assembled() {
        let signature = Signature::new(vec![Parameter::new("args", ParameterKind::VarPositional)]);
        let callable = Callable::with_bound("count", signature.clone(), |b| {
            Ok(Value::Int(b.var_positional("args")?.len() as i64))
        });
        let mut count = node(2, builtin(signature, callable));
        let first = count.add_subparameter("args").unwrap();
        let second = count.add_subparameter("args").unwrap();
        count
            .record_mut()
            .subparam_unpacking_map
            .insert("args".into(), vec![second]);

        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut graph = Graph::new();
        graph.add_node(data(1, Value::Int(1)));
        graph.add_node(data(4, Value::List(vec![Value::Int(2), Value::Int(3)])));
        graph.add_node(count);
        graph.add_node(node(3, recorder(calls.clone())));
        graph.add_edge(&SocketId::proxy(1), &SocketId::subparam(2, "args", first)).unwrap();
        graph.add_edge(&SocketId::proxy(4), &SocketId::subparam(2, "args", second)).unwrap();
        graph.add_edge(&SocketId::output(2, "output"), &SocketId::input(3, "v")).unwrap();

        let outcome = Scheduler::new().execute_graph(&mut graph, None).unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.executed == vec![2, 3]));
        assert_eq!(*calls.lock(), vec![Value::Int(3)]);
    }

    #[test]
    fn test_unpacking_a_non_iterable_fails_cleanly() {
        let signature = Signature::new(vec![Parameter::new("args", ParameterKind::VarPositional)]);
        let callable = Callable::with_bound("count", signature.clone(), |_| Ok(Value::None));
        let mut count = node(2, builtin(signature, callable));
        let index = count.add_subparameter("args").unwrap();
        count
            .record_mut()
            .subparam_unpacking_map
            .insert("args".into(), vec![index]);

        let mut graph = Graph::new();
        graph.add_node(data(1, Value::Int(5)));
        graph.add_node(count);
        graph.add_edge(&SocketId::proxy(1), &SocketId::subparam(2, "args", index)).unwrap();

        let error = Scheduler::new().execute_graph(&mut graph, None).unwrap_err();
        assert!(matches!(error, ExecutionError::PositionalSubparameterUnpacking { subparam_index: 0, .. }));
        assert!(graph
            .node(2)
            .unwrap()
            .argument_map()
            .values()
            .all(|v| matches!(v, crate::marshal::ArgumentValue::Subparameters(m) if m.is_empty())));
    }

    #[test]
    fn test_callable_errors_are_wrapped() {
        let signature = Signature::new(vec![]);
        let callable = Callable::with_bound("boom", signature.clone(), |_| {
            Err(CallError::value_error("bad"))
        });
        let mut graph = Graph::new();
        graph.add_node(node(1, builtin(signature, callable)));
        let error = Scheduler::new().execute_graph(&mut graph, None).unwrap_err();
        assert!(!error.is_user_facing());
        assert_eq!(error.node_id(), Some(1));
        assert!(error_chain(&error).contains("caused by: ValueError: bad"));
    }

    #[test]
    fn test_backdoor_routes_visuals() {
        let library = crate::library::NativeLibrary::standard();
        let viewer = library.lookup("genviewer_id", "view_repr").unwrap();
        let mut record = NodeRecord::proxy(2);
        record.genviewer_id = Some("view_repr".into());
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut graph = Graph::new();
        graph.add_node(data(1, Value::str("hi")));
        graph.add_node(Node::new(record, Some(viewer)));
        graph.add_node(node(3, recorder(calls.clone())));
        graph.add_edge(&SocketId::proxy(1), &SocketId::input(2, "obj")).unwrap();
        graph.add_edge(&SocketId::output(2, "output"), &SocketId::input(3, "v")).unwrap();

        let outcome = Scheduler::new().execute_graph(&mut graph, None).unwrap();
        assert_eq!(graph.node(2).unwrap().in_graph_visual(), Some(&Value::str("'hi'")));
        assert_eq!(*calls.lock(), vec![Value::str("hi")]);
        let RunOutcome::Completed(report) = outcome else {
            panic!("expected a completed run");
        };
        assert_eq!(report.executed, vec![2, 3]);
    }

    #[test]
    fn test_callable_mode_node_is_not_invoked() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut sink = node(1, recorder(calls.clone()));
        sink.record_mut().mode = Some(CALLABLE_MODE.to_string());
        let mut graph = Graph::new();
        graph.add_node(sink);
        let outcome = Scheduler::new().execute_graph(&mut graph, None).unwrap();
        assert_eq!(outcome, RunOutcome::Completed(RunReport::default()));
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_upstream_run_skips_siblings_and_downstream() {
        let (first, second, sibling) = (
            Arc::new(Mutex::new(Vec::new())),
            Arc::new(Mutex::new(Vec::new())),
            Arc::new(Mutex::new(Vec::new())),
        );
        let mut graph = Graph::new();
        graph.add_node(data(1, Value::Int(1)));
        graph.add_node(node(2, recorder(first.clone())));
        graph.add_node(node(3, recorder(second.clone())));
        graph.add_node(node(4, recorder(sibling.clone())));
        graph.add_edge(&SocketId::proxy(1), &SocketId::input(2, "v")).unwrap();
        graph.add_edge(&SocketId::output(2, "output"), &SocketId::input(3, "v")).unwrap();
        graph.add_edge(&SocketId::proxy(1), &SocketId::input(4, "v")).unwrap();

        let scheduler = Scheduler::new();
        let outcome = scheduler.execute_node_after_upstream_ones(&mut graph, 2).unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.executed == vec![2]));
        assert_eq!(*first.lock(), vec![Value::Int(1)]);
        assert!(second.lock().is_empty());
        assert!(sibling.lock().is_empty());

        let outcome = scheduler.execute_node_after_upstream_ones(&mut graph, 3).unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.executed == vec![2, 3]));
        assert_eq!(*second.lock(), vec![Value::Int(1)]);
        assert!(sibling.lock().is_empty());
        assert_eq!(graph.node(4).unwrap().state(), ExecState::Idle);
    }

    #[test]
    fn test_proxy_without_data_stops_the_run() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut graph = Graph::new();
        graph.add_node(Node::new(NodeRecord::proxy(1), None));
        graph.add_node(node(2, recorder(calls.clone())));
        graph.add_edge(&SocketId::proxy(1), &SocketId::input(2, "v")).unwrap();

        let error = Scheduler::new().execute_graph(&mut graph, None).unwrap_err();
        assert_eq!(error, ExecutionError::ProxyNodesLackingData { node_ids: vec![1] });
        assert!(error.is_user_facing());
        assert!(calls.lock().is_empty());
        assert!(graph.nodes().all(|n| n.argument_map().is_empty() && n.state() == ExecState::Idle));
    }

    #[test]
    fn test_unpacking_a_non_mapping_keyword_fails_cleanly() {
        let signature = Signature::new(vec![Parameter::new("kwargs", ParameterKind::VarKeyword)]);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let callable = Callable::with_bound("keys", signature.clone(), move |b| {
            recorded.lock().push(Value::Map(b.var_keyword("kwargs")?.clone()));
            Ok(Value::None)
        });
        let mut keys = node(2, builtin(signature, callable));
        let index = keys.add_subparameter("kwargs").unwrap();
        keys.record_mut()
            .subparam_unpacking_map
            .insert("kwargs".into(), vec![index]);

        let mut graph = Graph::new();
        graph.add_node(data(1, Value::Int(3)));
        graph.add_node(keys);
        graph.add_edge(&SocketId::proxy(1), &SocketId::subparam(2, "kwargs", index)).unwrap();

        let error = Scheduler::new().execute_graph(&mut graph, None).unwrap_err();
        assert!(matches!(
            error,
            ExecutionError::KeywordSubparameterUnpacking { subparam_index, ref type_name, .. }
                if subparam_index == index && type_name == "int"
        ));
        assert!(error.is_user_facing());
        assert_eq!(error.node_id(), Some(2));
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_failed_run_returns_nodes_to_idle() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let signature = Signature::new(vec![Parameter::positional("v")]);
        let callable = Callable::with_bound("boom", signature.clone(), |_| {
            Err(CallError::value_error("bad"))
        });
        let mut graph = Graph::new();
        graph.add_node(data(1, Value::Int(1)));
        graph.add_node(node(2, recorder(calls.clone())));
        graph.add_node(node(3, builtin(signature, callable)));
        graph.add_edge(&SocketId::proxy(1), &SocketId::input(2, "v")).unwrap();
        graph.add_edge(&SocketId::output(2, "output"), &SocketId::input(3, "v")).unwrap();

        assert!(Scheduler::new().execute_graph(&mut graph, None).is_err());
        assert_eq!(*calls.lock(), vec![Value::Int(1)]);
        assert!(graph.nodes().all(|n| n.state() == ExecState::Idle));
        assert!(graph.nodes().all(|n| n.argument_map().is_empty()));

        graph.remove_edge(&SocketId::output(2, "output"), &SocketId::input(3, "v")).unwrap();
        graph.remove_node(3);
        Scheduler::new().execute_graph(&mut graph, None).unwrap();
        assert_eq!(graph.node(2).unwrap().state(), ExecState::Executed);
    }

    #[test]
    fn test_side_visual_hook_sets_visuals() {
        let library = crate::library::NativeLibrary::standard();
        let viewer = library.lookup("genviewer_id", "view_text_summary").unwrap();
        let mut record = NodeRecord::proxy(2);
        record.genviewer_id = Some("view_text_summary".into());
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut graph = Graph::new();
        graph.add_node(data(1, Value::str("first\nsecond")));
        graph.add_node(Node::new(record, Some(viewer)));
        graph.add_node(node(3, recorder(calls.clone())));
        graph.add_edge(&SocketId::proxy(1), &SocketId::input(2, "text")).unwrap();
        graph.add_edge(&SocketId::output(2, "output"), &SocketId::input(3, "v")).unwrap();

        Scheduler::new().execute_graph(&mut graph, None).unwrap();
        let viewer = graph.node(2).unwrap();
        assert!(matches!(viewer.in_graph_visual(), Some(Value::Str(text)) if text.contains("first")));
        assert_eq!(
            viewer.loop_data(),
            Some(&Value::map([("line_count", Value::Int(2))]))
        );
        assert_eq!(*calls.lock(), vec![Value::str("first\nsecond")]);
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Python script export.
//!
//! The exported script performs the same calls execution would, in the same
//! dependency order, without running anything. Upstream outputs become
//! `_<id>_<output>` variables, literals become their `repr`, and argument
//! layout goes through the same [`lay_out`] the marshaller uses.

use crate::definition::{DefinitionKind, NodeDefinition, ScriptId};
use crate::error::ExportError;
use crate::graph::{generations, Graph, TextBlock};
use crate::marshal::{lay_out, CallLayout, Slot};
use crate::node::{Node, NodeId};
use crate::signature::{Parameter, ParameterKind};
use crate::socket::SocketId;
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;

const INDENT: &str = "    ";

/// Turn arbitrary text into a valid identifier
pub fn identifier(text: &str) -> String {
    let mut name: String = text
        .chars()
        .map(|c| if c == '_' || c.is_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() {
        name.push_str("graph");
    }
    if name.chars().next().is_some_and(|c| c.is_numeric()) {
        name.insert(0, '_');
    }
    name
}

fn output_var(node_id: NodeId, output: &str) -> String {
    format!("_{node_id}_{}", identifier(output))
}

fn data_var(node_id: NodeId) -> String {
    format!("_{node_id}_value")
}

fn centre(rect: [f64; 4]) -> (f64, f64) {
    (rect[0] + rect[2] / 2.0, rect[1] + rect[3] / 2.0)
}

/// Export `graph` as a Python script whose main function is named after
/// `document_stem`
pub fn export_python(graph: &Graph, document_stem: &str) -> Result<String, ExportError> {
    Exporter::new(graph, document_stem).export()
}

struct Exporter<'g> {
    graph: &'g Graph,
    function_name: String,
    local_names: HashMap<ScriptId, String>,
    appended_sources: IndexMap<String, String>,
}

impl<'g> Exporter<'g> {
    fn new(graph: &'g Graph, document_stem: &str) -> Self {
        Self {
            graph,
            function_name: identifier(document_stem),
            local_names: HashMap::new(),
            appended_sources: IndexMap::new(),
        }
    }

    fn export(mut self) -> Result<String, ExportError> {
        let orphans: Vec<NodeId> = self
            .graph
            .nodes()
            .filter(|node| {
                node.is_proxy()
                    && node.widget_value().is_none()
                    && self.graph.tree().parent_of(&SocketId::proxy(node.id())).is_none()
            })
            .map(Node::id)
            .collect();
        if !orphans.is_empty() {
            return Err(ExportError::OrphanProxyNodes(orphans));
        }

        let header = self.imports();
        let docstring_block = self
            .graph
            .text_blocks()
            .iter()
            .position(|block| block.contains((0.0, 0.0)));
        let comments = self.comments(docstring_block);

        let graph = self.graph;
        let mut body: Vec<String> = Vec::new();
        for component in graph.components() {
            let ordered = self.order(&component)?;
            if ordered.is_empty() {
                continue;
            }
            if !body.is_empty() {
                body.push(String::new());
            }
            for id in ordered {
                if let Some(lines) = comments.get(&id) {
                    body.extend(lines.iter().cloned());
                }
                let Some(node) = graph.node(id) else {
                    continue;
                };
                let prefix = if node.is_commented_out() { "# " } else { "" };
                for line in self.statements(node) {
                    body.push(format!("{INDENT}{prefix}{line}"));
                }
            }
        }

        let mut script = String::new();
        for section in &header {
            if section.is_empty() {
                continue;
            }
            for line in section {
                script.push_str(line);
                script.push('\n');
            }
            script.push('\n');
        }
        if !script.is_empty() {
            script.push('\n');
        }

        script.push_str(&format!("def {}():\n", self.function_name));
        if let Some(block) = docstring_block.map(|i| &self.graph.text_blocks()[i]) {
            let text = block.text.trim().replace("\"\"\"", "\\\"\\\"\\\"");
            let text = text.replace('\n', &format!("\n{INDENT}"));
            script.push_str(&format!("{INDENT}\"\"\"{text}\"\"\"\n"));
        }
        if body.is_empty() {
            script.push_str(&format!("{INDENT}pass\n"));
        }
        for line in body {
            script.push_str(line.trim_end());
            script.push('\n');
        }

        for source in self.appended_sources.values() {
            script.push_str("\n\n");
            script.push_str(source.trim_end());
            script.push('\n');
        }
        script.push_str(&format!(
            "\n\nif __name__ == '__main__':\n{INDENT}{}()\n",
            self.function_name
        ));
        Ok(script)
    }

    /// Standard library, third-party and local import lines, from one walk
    /// over every node. The main function is renamed away from any imported
    /// name, and local imports are aliased away from everything else.
    fn imports(&mut self) -> [Vec<String>; 3] {
        let graph = self.graph;
        let mut stdlib = IndexSet::new();
        let mut third_party = IndexSet::new();
        let mut scripts = Vec::new();
        for node in graph.nodes() {
            let Some(definition) = node.definition() else {
                continue;
            };
            if let Some(text) = &definition.stlib_import_text {
                stdlib.extend(text.lines().map(str::to_string));
            }
            if let Some(text) = &definition.third_lib_import_text {
                third_party.extend(text.lines().map(str::to_string));
            }
            if let DefinitionKind::Script(id) = &definition.kind {
                scripts.push((id, definition.main_callable.name()));
            }
        }

        let mut taken: IndexSet<String> = stdlib
            .iter()
            .chain(third_party.iter())
            .flat_map(|line| imported_names(line))
            .collect();
        while taken.contains(&self.function_name) {
            self.function_name.push_str("_main");
        }
        taken.insert(self.function_name.clone());

        let mut local = Vec::new();
        for (id, callable_name) in scripts {
            if self.local_names.contains_key(id) {
                continue;
            }
            let name = identifier(callable_name);
            let mut alias = name.clone();
            if taken.contains(&alias) {
                alias = identifier(&format!("{}_{}_{}", id.pack, id.script, name));
            }
            let mut counter = 2;
            while taken.contains(&alias) {
                alias = format!("{name}_{counter}");
                counter += 1;
            }
            local.push(if alias == name {
                format!("from {} import {name}", id.module_key())
            } else {
                format!("from {} import {name} as {alias}", id.module_key())
            });
            taken.insert(alias.clone());
            self.local_names.insert(id.clone(), alias);
        }
        [
            stdlib.into_iter().collect(),
            third_party.into_iter().collect(),
            local,
        ]
    }

    /// Comment lines for each node closest to a text block
    fn comments(&self, docstring_block: Option<usize>) -> HashMap<NodeId, Vec<String>> {
        let mut comments: HashMap<NodeId, Vec<String>> = HashMap::new();
        let placed: Vec<(NodeId, (f64, f64))> = self
            .graph
            .nodes()
            .filter(|node| self.is_emitted(node))
            .filter_map(|node| node.record().rect.map(|rect| (node.id(), centre(rect))))
            .collect();
        for (index, block) in self.graph.text_blocks().iter().enumerate() {
            if Some(index) == docstring_block || block.text.trim().is_empty() {
                continue;
            }
            let (bx, by) = centre(block.rect);
            let closest = placed.iter().min_by(|(_, a), (_, b)| {
                let da = (a.0 - bx).powi(2) + (a.1 - by).powi(2);
                let db = (b.0 - bx).powi(2) + (b.1 - by).powi(2);
                da.total_cmp(&db)
            });
            if let Some((node_id, _)) = closest {
                comments.entry(*node_id).or_default().extend(comment_lines(block));
            }
        }
        comments
    }

    fn is_emitted(&self, node: &Node) -> bool {
        if node.is_callable_mode() {
            return false;
        }
        !(node.is_proxy() && self.graph.tree().parent_of(&SocketId::proxy(node.id())).is_some())
    }

    /// Data nodes first, then schedulable nodes by generation
    fn order(&self, component: &IndexSet<NodeId>) -> Result<Vec<NodeId>, ExportError> {
        let mut data: Vec<NodeId> = Vec::new();
        let mut schedulable = IndexSet::new();
        for id in component {
            let Some(node) = self.graph.node(*id) else {
                continue;
            };
            if !self.is_emitted(node) {
                continue;
            }
            if node.is_proxy() {
                data.push(*id);
            } else {
                schedulable.insert(*id);
            }
        }
        data.sort_unstable();
        let generations = generations(self.graph.input_sources(&schedulable))?;
        data.extend(generations.into_iter().flatten());
        Ok(data)
    }

    /// Expression the script uses to refer to a node's callable
    fn callable_expr(&mut self, definition: &NodeDefinition) -> String {
        match &definition.kind {
            DefinitionKind::Script(id) => definition.call_format.clone().unwrap_or_else(|| {
                self.local_names
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| identifier(definition.main_callable.name()))
            }),
            DefinitionKind::Operator(_) => match definition.main_callable.source() {
                Some(source) => format!("({source})"),
                None => definition.export_name().to_string(),
            },
            DefinitionKind::Capsule(_) | DefinitionKind::GenViewer(_) => {
                if let Some(source) = definition.main_callable.source() {
                    self.appended_sources
                        .entry(definition.main_callable.name().to_string())
                        .or_insert_with(|| source.to_string());
                }
                definition.export_name().to_string()
            }
            DefinitionKind::Builtin(_) | DefinitionKind::Stdlib(_) | DefinitionKind::ThirdParty(_) => {
                definition.export_name().to_string()
            }
        }
    }

    /// Expression feeding `socket`: the upstream variable, a callable
    /// reference, or the socket's widget literal
    fn input_expr(&mut self, node: &Node, socket: &SocketId) -> Option<String> {
        let graph = self.graph;
        let Some(mut current) = graph.tree().parent_of(socket).cloned() else {
            return node
                .input_widget(socket)
                .filter(|widget| !widget.default_holder)
                .map(|widget| widget.value.repr());
        };
        loop {
            match &current {
                SocketId::Proxy { node_id } => match graph.tree().parent_of(&current) {
                    Some(parent) => current = parent.clone(),
                    None => return Some(data_var(*node_id)),
                },
                SocketId::Output { node_id, name } => {
                    let upstream = graph.node(*node_id)?;
                    if upstream.is_callable_mode() {
                        let definition = upstream.definition()?;
                        return Some(self.callable_expr(definition));
                    }
                    return Some(output_var(*node_id, name));
                }
                SocketId::Input { .. } => return None,
            }
        }
    }

    /// Argument expression of a parameter, `None` when left to its default
    fn argument_expr(&mut self, node: &Node, param: &Parameter) -> Option<String> {
        let id = node.id();
        match param.kind {
            ParameterKind::VarPositional => {
                let items: Vec<String> = node
                    .subparameters(&param.name)
                    .into_iter()
                    .filter_map(|index| {
                        let socket = SocketId::subparam(id, &param.name, index);
                        let expr = self.input_expr(node, &socket)?;
                        Some(if node.is_unpacked(&param.name, index) {
                            format!("*{expr}")
                        } else {
                            expr
                        })
                    })
                    .collect();
                match items.as_slice() {
                    [] => None,
                    [single] => Some(format!("({single},)")),
                    _ => Some(format!("({})", items.join(", "))),
                }
            }
            ParameterKind::VarKeyword => {
                let entries: Vec<String> = node
                    .subparameters(&param.name)
                    .into_iter()
                    .filter_map(|index| {
                        let socket = SocketId::subparam(id, &param.name, index);
                        let expr = self.input_expr(node, &socket)?;
                        if node.is_unpacked(&param.name, index) {
                            return Some(format!("**{expr}"));
                        }
                        let keyword = node.subparam_keyword(&param.name, index)?;
                        Some(format!("{}: {expr}", Value::str(keyword).repr()))
                    })
                    .collect();
                if entries.is_empty() {
                    None
                } else {
                    Some(format!("{{{}}}", entries.join(", ")))
                }
            }
            _ => self.input_expr(node, &SocketId::input(id, &param.name)),
        }
    }

    fn statements(&mut self, node: &Node) -> Vec<String> {
        let id = node.id();
        let Some(definition) = node.definition() else {
            let value = node.widget_value().map_or_else(|| "None".to_string(), Value::repr);
            return vec![format!("{} = {value}", data_var(id))];
        };
        let outputs = definition.signature.output_names();

        if definition.kind.is_substituted() {
            let mut names = IndexMap::new();
            for param in &definition.signature.parameters {
                let expr = self.argument_expr(node, param).unwrap_or_else(|| match param.kind {
                    ParameterKind::VarPositional => "()".to_string(),
                    ParameterKind::VarKeyword => "{}".to_string(),
                    _ => param.default.as_ref().map_or_else(|| "None".to_string(), Value::repr),
                });
                names.insert(param.name.clone(), expr);
            }
            for output in &outputs {
                names.insert(output.clone(), output_var(id, output));
            }
            match definition.substitute(names) {
                Some(Ok(code)) => return code.lines().map(str::to_string).collect(),
                Some(Err(error)) => {
                    tracing::warn!("Substitution failed for node {}: {}; exporting a call", id, error);
                }
                None => {}
            }
        }

        let callee = self.callable_expr(definition);
        let layout = lay_out(
            &definition.signature,
            |param| self.argument_expr(node, param),
            Value::repr,
        );
        let call = format!("{callee}({})", render_arguments(layout));
        match outputs.as_slice() {
            [single] => vec![format!("{} = {call}", output_var(id, single))],
            _ => {
                let result = format!("_{id}_result");
                let mut lines = vec![format!("{result} = {call}")];
                for output in &outputs {
                    lines.push(format!(
                        "{} = {result}[{}]",
                        output_var(id, output),
                        Value::str(output.as_str()).repr()
                    ));
                }
                lines
            }
        }
    }
}

/// Names an import line binds: `import a.b` binds `a`, `from m import x as
/// y, z` binds `y` and `z`
fn imported_names(line: &str) -> Vec<String> {
    let line = line.trim();
    let bound = |item: &str| {
        let item = item.trim().trim_matches(|c| c == '(' || c == ')');
        item.rsplit_once(" as ")
            .map_or(item, |(_, alias)| alias)
            .trim()
            .to_string()
    };
    if let Some((_, names)) = line.split_once(" import ") {
        return names.split(',').map(bound).filter(|n| !n.is_empty()).collect();
    }
    match line.strip_prefix("import ") {
        Some(modules) => modules
            .split(',')
            .map(|module| {
                let module = module.trim();
                match module.rsplit_once(" as ") {
                    Some((_, alias)) => alias.trim().to_string(),
                    None => module.split('.').next().unwrap_or(module).to_string(),
                }
            })
            .collect(),
        None => Vec::new(),
    }
}

fn render_arguments(layout: CallLayout<String>) -> String {
    let mut arguments: Vec<String> = layout
        .positional
        .into_iter()
        .map(|slot| match slot {
            Slot::Plain(expr) => expr,
            Slot::Splat(expr) => format!("*{expr}"),
        })
        .collect();
    arguments.extend(layout.keyword.into_iter().map(|(name, expr)| format!("{name}={expr}")));
    if let Some(expr) = layout.double_splat {
        arguments.push(format!("**{expr}"));
    }
    arguments.join(", ")
}

/// `###` heads the first line of a block, `##` the rest
fn comment_lines(block: &TextBlock) -> Vec<String> {
    block
        .text
        .trim()
        .lines()
        .enumerate()
        .map(|(i, line)| {
            let marker = if i == 0 { "###" } else { "##" };
            format!("{marker} {line}").trim_end().to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::Callable;
    use crate::library::NativeLibrary;
    use crate::node::{NodeRecord, WidgetRecord, CALLABLE_MODE};
    use crate::signature::Signature;
    use std::sync::Arc;

    fn data(id: NodeId, value: Value) -> Node {
        let mut record = NodeRecord::proxy(id);
        record.widget = Some(WidgetRecord::new(value));
        Node::new(record, None)
    }

    fn builtin(library: &NativeLibrary, tag: &str, name: &str, id: NodeId) -> Node {
        let definition = library.lookup(tag, name).unwrap();
        let mut record = NodeRecord::proxy(id);
        match tag {
            "operation_id" => record.operation_id = Some(name.into()),
            "stlib_id" => record.stlib_id = Some(name.into()),
            _ => record.builtin_id = Some(name.into()),
        }
        Node::new(record, Some(definition))
    }

    fn chain() -> Graph {
        let library = NativeLibrary::standard();
        let mut graph = Graph::new();
        graph.add_node(data(1, Value::Int(3)));
        let mut minus = builtin(&library, "operation_id", "-", 2);
        minus
            .record_mut()
            .param_widget_value_map
            .insert("b".into(), WidgetRecord::new(5));
        graph.add_node(minus);
        graph.add_node(builtin(&library, "builtin_id", "abs", 3));
        graph.add_edge(&SocketId::proxy(1), &SocketId::input(2, "a")).unwrap();
        graph.add_edge(&SocketId::output(2, "output"), &SocketId::input(3, "x")).unwrap();
        graph
    }

    #[test]
    fn test_linear_chain() {
        let script = export_python(&chain(), "my graph").unwrap();
        assert_eq!(
            script,
            "def my_graph():\n    \
             _1_value = 3\n    \
             _2_output = _1_value - 5\n    \
             _3_output = abs(_2_output)\n\
             \n\nif __name__ == '__main__':\n    my_graph()\n"
        );
    }

    #[test]
    fn test_docstring_comments_and_commented_out_nodes() {
        let mut graph = chain();
        graph.node_mut(3).unwrap().record_mut().rect = Some([200.0, 0.0, 50.0, 20.0]);
        graph.node_mut(2).unwrap().record_mut().rect = Some([100.0, 0.0, 50.0, 20.0]);
        graph.node_mut(3).unwrap().set_commented_out(true);
        graph.add_text_block(TextBlock {
            text: "Distance".into(),
            rect: [-5.0, -5.0, 10.0, 10.0],
        });
        graph.add_text_block(TextBlock {
            text: "Take the magnitude\nof the difference".into(),
            rect: [210.0, 40.0, 30.0, 20.0],
        });

        let script = export_python(&graph, "dist").unwrap();
        assert!(script.contains("def dist():\n    \"\"\"Distance\"\"\"\n"));
        assert!(script.contains(
            "### Take the magnitude\n## of the difference\n    # _3_output = abs(_2_output)\n"
        ));
    }

    #[test]
    fn test_imports_and_callable_references() {
        let library = NativeLibrary::standard();
        let signature = Signature::new(vec![Parameter::positional("fn"), Parameter::positional("x")]);
        let apply = Callable::new("apply", Some(signature.clone()), |_| Ok(Value::None));
        let mut definition = NodeDefinition::new(DefinitionKind::ThirdParty("tools.apply".into()), apply, signature);
        definition.third_lib_import_text = Some("from tools import apply".into());

        let mut graph = Graph::new();
        let mut neg = builtin(&library, "operation_id", "neg", 1);
        neg.record_mut().mode = Some(CALLABLE_MODE.into());
        graph.add_node(neg);
        let mut record = NodeRecord::proxy(2);
        record.thirdlib_id = Some("tools.apply".into());
        graph.add_node(Node::new(record, Some(Arc::new(definition))));
        graph.add_node(builtin(&library, "stlib_id", "math.sqrt", 3));
        graph.add_node(data(4, Value::Int(7)));
        graph.add_edge(&SocketId::output(1, "callable"), &SocketId::input(2, "fn")).unwrap();
        graph.add_edge(&SocketId::proxy(4), &SocketId::input(2, "x")).unwrap();
        graph.add_edge(&SocketId::proxy(4), &SocketId::input(3, "x")).unwrap();

        let script = export_python(&graph, "apply").unwrap();
        assert!(script.starts_with("from math import sqrt\n\nfrom tools import apply\n\n\ndef apply_main():\n"));
        assert!(script.contains("_2_output = apply((lambda a: -a), _4_value)\n"));
        assert!(script.contains("_3_output = sqrt(_4_value)\n"));
    }

    #[test]
    fn test_variable_parameters_become_literals() {
        let library = NativeLibrary::standard();
        let mut print = builtin(&library, "builtin_id", "print", 2);
        let first = print.add_subparameter("values").unwrap();
        let second = print.add_subparameter("values").unwrap();
        let record = print.record_mut();
        record
            .subparam_widget_map
            .entry("values".into())
            .or_default()
            .insert(first, WidgetRecord::new("a"));
        record.subparam_unpacking_map.insert("values".into(), vec![second]);
        record.param_widget_value_map.insert("sep".into(), WidgetRecord::new("-"));

        let mut graph = Graph::new();
        graph.add_node(data(1, Value::List(vec![Value::Int(1)])));
        graph.add_node(print);
        graph
            .add_edge(&SocketId::proxy(1), &SocketId::subparam(2, "values", second))
            .unwrap();

        let script = export_python(&graph, "p").unwrap();
        assert!(script.contains("_2_output = print(*('a', *_1_value), sep='-')\n"));
    }

    #[test]
    fn test_capsule_substitution_and_orphans() {
        let library = NativeLibrary::standard();
        let mut graph = Graph::new();
        let mut record = NodeRecord::proxy(1);
        record.capsule_id = Some("get_item".into());
        record.param_widget_value_map.insert("obj".into(), WidgetRecord::new(Value::List(vec![])));
        record.param_widget_value_map.insert("key".into(), WidgetRecord::new(0));
        graph.add_node(Node::new(record, library.lookup("capsule_id", "get_item")));
        let script = export_python(&graph, "g").unwrap();
        assert!(script.contains("    _1_output = [][0]\n"));

        graph.add_node(Node::new(NodeRecord::proxy(9), None));
        assert_eq!(export_python(&graph, "g"), Err(ExportError::OrphanProxyNodes(vec![9])));
    }

    #[test]
    fn test_imported_names() {
        assert_eq!(imported_names("from os.path import join, basename as base"), vec!["join", "base"]);
        assert_eq!(imported_names("import numpy as np, os.path"), vec!["np", "os"]);
        assert!(imported_names("# not an import").is_empty());
    }

    #[test]
    fn test_identifier() {
        assert_eq!(identifier("my-graph v2"), "my_graph_v2");
        assert_eq!(identifier("3d"), "_3d");
        assert_eq!(identifier(""), "graph");
    }
}

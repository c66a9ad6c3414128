// SPDX-License-Identifier: MIT OR Apache-2.0
//! Snippet (capsule) nodes and general viewer nodes.

use super::{fill_fields, template_substitution};
use crate::callable::{CallError, Callable};
use crate::definition::{DefinitionKind, NodeDefinition};
use crate::signature::{BoundArguments, Parameter, ParameterKind, Signature};
use crate::value::Value;

struct Snippet {
    id: &'static str,
    parameters: fn() -> Vec<Parameter>,
    template: &'static str,
    source: &'static str,
    body: fn(BoundArguments) -> Result<Value, CallError>,
}

const SNIPPETS: &[Snippet] = &[
    Snippet {
        id: "return_untouched",
        parameters: || vec![Parameter::positional("obj")],
        template: "{output} = {obj}",
        source: "def return_untouched(obj):\n    return obj\n",
        body: |mut b| b.take("obj"),
    },
    Snippet {
        id: "pack_args",
        parameters: || vec![Parameter::new("args", ParameterKind::VarPositional)],
        template: "{output} = {args}",
        source: "def pack_args(*args):\n    return args\n",
        body: |mut b| b.take("args"),
    },
    Snippet {
        id: "pack_kwargs",
        parameters: || vec![Parameter::new("kwargs", ParameterKind::VarKeyword)],
        template: "{output} = {kwargs}",
        source: "def pack_kwargs(**kwargs):\n    return kwargs\n",
        body: |mut b| b.take("kwargs"),
    },
    Snippet {
        id: "get_item",
        parameters: || vec![Parameter::positional("obj"), Parameter::positional("key")],
        template: "{output} = {obj}[{key}]",
        source: "def get_item(obj, key):\n    return obj[key]\n",
        body: get_item,
    },
    Snippet {
        id: "format_text",
        parameters: || {
            vec![
                Parameter::positional("text"),
                Parameter::new("kwargs", ParameterKind::VarKeyword),
            ]
        },
        template: "{output} = {text}.format(**{kwargs})",
        source: "def format_text(text, **kwargs):\n    return text.format(**kwargs)\n",
        body: format_text,
    },
];

fn get_item(b: BoundArguments) -> Result<Value, CallError> {
    let (obj, key) = (b.get("obj")?, b.get("key")?);
    obj.get_item(key).ok_or_else(|| match obj {
        Value::Map(_) => CallError::Key(key.repr()),
        Value::List(_) | Value::Tuple(_) | Value::Str(_) if key.as_int().is_some() => {
            CallError::Index(format!("{} index out of range", obj.type_name()))
        }
        _ => CallError::type_error(format!(
            "'{}' object is not subscriptable with {}",
            obj.type_name(),
            key.type_name()
        )),
    })
}

fn format_text(b: BoundArguments) -> Result<Value, CallError> {
    let text = b.str("text")?;
    let kwargs = b.var_keyword("kwargs")?;
    if let Some(missing) = fields(text).into_iter().find(|f| !kwargs.contains_key(f)) {
        return Err(CallError::Key(format!("'{missing}'")));
    }
    let filled = fill_fields(&text.replace("{{", "\u{0}").replace("}}", "\u{1}"), |key| {
        kwargs.get(key).map(ToString::to_string)
    });
    Ok(Value::Str(filled.replace('\u{0}', "{").replace('\u{1}', "}")))
}

fn fields(text: &str) -> Vec<String> {
    let escaped = text.replace("{{", "").replace("}}", "");
    let mut found = Vec::new();
    let mut rest = escaped.as_str();
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            break;
        };
        found.push(after[..end].to_string());
        rest = &after[end + 1..];
    }
    found
}

/// Every snippet definition, keyed by capsule id
pub(super) fn capsule_definitions() -> Vec<(String, NodeDefinition)> {
    SNIPPETS
        .iter()
        .map(|snippet| {
            let signature = Signature::new((snippet.parameters)());
            let body = snippet.body;
            let callable = Callable::with_bound(snippet.id, signature.clone(), body)
                .with_source(snippet.source);
            let mut definition = NodeDefinition::new(
                DefinitionKind::Capsule(snippet.id.to_string()),
                callable,
                signature,
            );
            definition.substitution_callable = Some(template_substitution(
                &format!("{}_substitution", snippet.id),
                snippet.template,
            ));
            (snippet.id.to_string(), definition)
        })
        .collect()
}

fn summary(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut shown = lines[..lines.len().min(max_lines)].join("\n");
    if lines.len() > max_lines {
        shown.push_str(&format!("\n... ({} more lines)", lines.len() - max_lines));
    }
    shown
}

/// Every general viewer definition, keyed by viewer id
pub(super) fn genviewer_definitions() -> Vec<(String, NodeDefinition)> {
    let mut definitions = Vec::new();

    // view_repr: a backdoor returns the visual alongside the output
    let signature = Signature::new(vec![Parameter::positional("obj")]);
    let main = Callable::with_bound("view_repr", signature.clone(), |mut b| b.take("obj"))
        .with_source("def view_repr(obj):\n    print(repr(obj))\n    return obj\n")
        .dismissing_exec_time();
    let backdoor = Callable::with_bound("view_repr_backdoor", signature.clone(), |mut b| {
        let obj = b.take("obj")?;
        Ok(Value::map([
            ("in_graph_visual", Value::Str(obj.repr())),
            ("output", obj),
        ]))
    });
    let mut definition =
        NodeDefinition::new(DefinitionKind::GenViewer("view_repr".into()), main, signature);
    definition.backdoor = Some(backdoor);
    definitions.push(("view_repr".to_string(), definition));

    // view_text_summary: visuals are derived from the plain return value
    let signature = Signature::new(vec![
        Parameter::positional("text"),
        Parameter::positional("max_lines").with_default(Value::Int(5)),
    ]);
    let main = Callable::with_bound("view_text_summary", signature.clone(), |mut b| b.take("text"))
        .with_source(
            "def view_text_summary(text, max_lines=5):\n    \
             print('\\n'.join(text.splitlines()[:max_lines]))\n    \
             return text\n",
        );
    let side_signature = Signature::new(vec![Parameter::positional("output")]);
    let side = Callable::with_bound("view_text_summary_visual", side_signature, |b| {
        let text = b.get("output")?.to_string();
        Ok(Value::map([
            ("in_graph_visual", Value::Str(summary(&text, 5))),
            (
                "loop_data",
                Value::map([("line_count", Value::Int(text.lines().count() as i64))]),
            ),
        ]))
    });
    let mut definition = NodeDefinition::new(
        DefinitionKind::GenViewer("view_text_summary".into()),
        main,
        signature,
    );
    definition.side_visual_from_output = Some(side);
    definitions.push(("view_text_summary".to_string(), definition));

    definitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::CallArgs;
    use indexmap::IndexMap;

    #[test]
    fn test_capsule_runtime_and_substitution_agree() {
        let capsules = capsule_definitions();
        let (_, get) = capsules.iter().find(|(id, _)| id == "get_item").unwrap();
        let list = Value::List(vec![Value::Int(10), Value::Int(20)]);
        assert_eq!(
            get.main_callable.call(CallArgs::positional([list, Value::Int(-1)])),
            Ok(Value::Int(20))
        );
        let names: IndexMap<String, String> = [("obj", "_1_output"), ("key", "-1"), ("output", "_2_output")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(get.substitute(names).unwrap().unwrap(), "_2_output = _1_output[-1]");
    }

    #[test]
    fn test_format_text() {
        let capsules = capsule_definitions();
        let (_, format) = capsules.iter().find(|(id, _)| id == "format_text").unwrap();
        let args = CallArgs::positional([Value::str("{{x}} = {x}")]).with_keyword("x", Value::Int(3));
        assert_eq!(format.main_callable.call(args), Ok(Value::str("{x} = 3")));
        let missing = CallArgs::positional([Value::str("{y}")]);
        assert!(matches!(format.main_callable.call(missing), Err(CallError::Key(_))));
    }

    #[test]
    fn test_viewer_hooks() {
        let viewers = genviewer_definitions();
        let (_, repr) = viewers.iter().find(|(id, _)| id == "view_repr").unwrap();
        let out = repr
            .backdoor
            .as_ref()
            .unwrap()
            .call(CallArgs::positional([Value::str("a")]))
            .unwrap();
        assert_eq!(out.as_map().unwrap()["in_graph_visual"], Value::str("'a'"));
        assert!(repr.dismisses_exec_time_tracking());

        assert_eq!(summary("1\n2\n3", 2), "1\n2\n... (1 more lines)");
    }
}

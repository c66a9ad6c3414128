// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end runs over node packs loaded from disk.

use nodescript_graph::node::CALLABLE_MODE;
use nodescript_graph::signature::BoundArguments;
use nodescript_graph::{
    CallArgs, CallError, Callable, EdgeError, Engine, EngineConfig, EngineError, ExecutionError,
    GraphDocument, NativeLibrary, NodeRecord, Parameter, RecordingNotifier, RunOutcome, ScriptId,
    Signature, SocketId, Value, WidgetRecord,
};
use parking_lot::Mutex;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

type Calls = Arc<Mutex<Vec<(String, Value)>>>;

const ADD: u64 = 3;
const NEG: u64 = 4;
const OUT: u64 = 5;

fn recording(
    calls: &Calls,
    name: &'static str,
    signature: Signature,
    body: impl Fn(&BoundArguments) -> Result<Value, CallError> + Send + Sync + 'static,
) -> Callable {
    let calls = Arc::clone(calls);
    Callable::with_bound(name, signature, move |bound| {
        let result = body(&bound)?;
        calls.lock().push((name.to_string(), result.clone()));
        Ok(result)
    })
}

fn library(calls: &Calls) -> NativeLibrary {
    let mut library = NativeLibrary::new();
    let add = Signature::new(vec![Parameter::positional("a"), Parameter::positional("b")])
        .with_outputs(["sum"]);
    library.register_callable(
        "demo.add",
        recording(calls, "add", add, |b| Ok(Value::Int(b.int("a")? + b.int("b")?))),
    );
    let neg = Signature::new(vec![Parameter::positional("x")]).with_outputs(["neg"]);
    library.register_callable("demo.neg", recording(calls, "neg", neg, |b| Ok(Value::Int(-b.int("x")?))));
    let out = Signature::new(vec![Parameter::positional("v")]);
    library.register_callable("demo.out", recording(calls, "out", out, |b| Ok(b.get("v")?.clone())));

    let split = Signature::new(vec![Parameter::positional("s")]).with_outputs(["head", "tail"]);
    library.register_callable(
        "demo.split",
        recording(calls, "split", split.clone(), |b| {
            let s = b.str("s")?;
            let (head, tail) = s.split_at(s.chars().next().map_or(0, char::len_utf8));
            Ok(Value::map([("head", Value::str(head)), ("tail", Value::str(tail))]))
        }),
    );
    library.register_callable(
        "demo.split_broken",
        recording(calls, "split", split, |_| Ok(Value::str("x"))),
    );

    let relay = Signature::new(vec![Parameter::positional("x")]).with_outputs(["y"]);
    library.register_callable("demo.relay", recording(calls, "relay", relay, |b| Ok(b.get("x")?.clone())));

    let apply = Signature::new(vec![Parameter::positional("fn"), Parameter::positional("x")]);
    library.register_callable(
        "demo.apply",
        recording(calls, "apply", apply, |b| {
            let function = b
                .get("fn")?
                .as_callable()
                .ok_or_else(|| CallError::type_error("fn is not callable"))?;
            function.call(CallArgs::positional([b.get("x")?.clone()]))
        }),
    );
    library
}

fn write_pack(root: &Path) -> String {
    let pack = root.join("demo");
    for script in ["add", "neg", "out", "split", "relay", "apply"] {
        let dir = pack.join("math").join(script);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("__main__.ron"),
            format!("(main_callable: Native(\"demo.{script}\"))"),
        )
        .unwrap();
    }
    pack.to_string_lossy().into_owned()
}

fn data(id: u64, value: impl Into<Value>) -> NodeRecord {
    let mut record = NodeRecord::proxy(id);
    record.widget = Some(WidgetRecord::new(value));
    record
}

fn script(id: u64, name: &str) -> NodeRecord {
    let mut record = NodeRecord::proxy(id);
    record.script_id = Some(ScriptId::new("demo", "math", name));
    record
}

struct Session {
    engine: Engine,
    calls: Calls,
    notifier: RecordingNotifier,
    dir: TempDir,
}

impl Session {
    fn new(records: Vec<NodeRecord>) -> Self {
        let dir = TempDir::new().unwrap();
        let mut document = GraphDocument {
            node_packs: vec![write_pack(dir.path())],
            ..GraphDocument::default()
        };
        for record in records {
            document.nodes.insert(record.id.to_string(), record);
        }
        let path = dir.path().join("scenario.json");
        document.save(&path).unwrap();

        let calls = Calls::default();
        let notifier = RecordingNotifier::new();
        let mut engine =
            Engine::new(library(&calls), EngineConfig::default()).with_notifier(notifier.clone());
        engine.load_document(&path).unwrap();
        Self {
            engine,
            calls,
            notifier,
            dir,
        }
    }

    fn connect(&mut self, parent: SocketId, child: SocketId) {
        self.engine.add_edge(&parent, &child).unwrap();
    }

    fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }
}

fn chain() -> Session {
    let mut session = Session::new(vec![
        data(1, 3),
        data(2, 5),
        script(ADD, "add"),
        script(NEG, "neg"),
        script(OUT, "out"),
    ]);
    session.connect(SocketId::proxy(1), SocketId::input(ADD, "a"));
    session.connect(SocketId::proxy(2), SocketId::input(ADD, "b"));
    session.connect(SocketId::output(ADD, "sum"), SocketId::input(NEG, "x"));
    session.connect(SocketId::output(NEG, "neg"), SocketId::input(OUT, "v"));
    session
}

#[test]
fn test_linear_chain() {
    let mut session = chain();
    let outcome = session.engine.execute_graph(None).unwrap();

    let RunOutcome::Completed(report) = outcome else {
        panic!("expected a completed run, got {outcome:?}");
    };
    assert_eq!(report.executed, vec![ADD, NEG, OUT]);
    assert_eq!(
        session.calls(),
        vec![
            ("add".to_string(), Value::Int(8)),
            ("neg".to_string(), Value::Int(-8)),
            ("out".to_string(), Value::Int(-8)),
        ]
    );
    assert!(report.status_message().starts_with("Executed 3 node(s) in "));
    assert!(session
        .notifier
        .notifications()
        .iter()
        .any(|n| matches!(n, nodescript_graph::Notification::Status(_))));
}

#[test]
fn test_missing_input_is_reported_before_any_call() {
    let mut session = chain();
    session
        .engine
        .remove_edge(&SocketId::proxy(2), &SocketId::input(ADD, "b"))
        .unwrap();

    let error = session.engine.execute_graph(None).unwrap_err();
    let EngineError::Execution(ExecutionError::LackOfInput { node_id, params, .. }) = error else {
        panic!("expected missing input, got {error:?}");
    };
    assert_eq!(node_id, ADD);
    assert_eq!(params, vec!["b".to_string()]);
    assert!(session.calls().is_empty());
    assert!(session.engine.graph().nodes().all(|n| n.argument_map().is_empty()));
}

#[test]
fn test_multi_output_mapping_contract() {
    let mut session = Session::new(vec![
        data(1, "abc"),
        script(2, "split"),
        script(3, "out"),
        script(4, "out"),
    ]);
    session.connect(SocketId::proxy(1), SocketId::input(2, "s"));
    session.connect(SocketId::output(2, "head"), SocketId::input(3, "v"));
    session.connect(SocketId::output(2, "tail"), SocketId::input(4, "v"));
    session.engine.execute_graph(None).unwrap();

    let mut received: Vec<String> = session.calls()[1..]
        .iter()
        .map(|(name, value)| format!("{name}:{value}"))
        .collect();
    received.sort();
    assert_eq!(received, vec!["out:a".to_string(), "out:bc".to_string()]);

    let split_manifest = session.dir.path().join("demo/math/split/__main__.ron");
    fs::write(&split_manifest, "(main_callable: Native(\"demo.split_broken\"))").unwrap();
    session.engine.reload_packs().unwrap();

    let error = session.engine.execute_graph(None).unwrap_err();
    let EngineError::Execution(ExecutionError::UnexpectedOutput { node_id, expected, .. }) = error else {
        panic!("expected unexpected output, got {error:?}");
    };
    assert_eq!(node_id, 2);
    assert_eq!(expected, vec!["head".to_string(), "tail".to_string()]);
    assert!(session.engine.graph().tree().parent_of(&SocketId::input(3, "v")).is_some());
}

#[test]
fn test_cycle_is_rejected() {
    let mut session = Session::new(vec![script(1, "relay"), script(2, "relay")]);
    session.connect(SocketId::output(1, "y"), SocketId::input(2, "x"));

    let back = (SocketId::output(2, "y"), SocketId::input(1, "x"));
    assert!(matches!(
        session.engine.validate_edge(&back.0, &back.1),
        Err(EngineError::Edge(EdgeError::WouldCreateCycle { .. }))
    ));
    assert!(session.engine.add_edge(&back.0, &back.1).is_err());
    assert!(session.engine.graph().tree().parent_of(&back.1).is_none());
}

#[test]
fn test_redirect_node_is_transparent() {
    let mut session = Session::new(vec![
        data(1, 3),
        data(2, 5),
        NodeRecord::proxy(6),
        script(ADD, "add"),
        script(NEG, "neg"),
        script(OUT, "out"),
    ]);
    session.connect(SocketId::proxy(1), SocketId::proxy(6));
    session.connect(SocketId::proxy(6), SocketId::input(ADD, "a"));
    session.connect(SocketId::proxy(2), SocketId::input(ADD, "b"));
    session.connect(SocketId::output(ADD, "sum"), SocketId::input(NEG, "x"));
    session.connect(SocketId::output(NEG, "neg"), SocketId::input(OUT, "v"));

    let outcome = session.engine.execute_graph(None).unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.executed == vec![ADD, NEG, OUT]));
    assert_eq!(session.calls().last(), Some(&("out".to_string(), Value::Int(-8))));
}

#[test]
fn test_callable_mode_passes_the_callable() {
    let mut neg = script(2, "neg");
    neg.mode = Some(CALLABLE_MODE.to_string());
    let mut session = Session::new(vec![data(1, 7), neg, script(3, "apply")]);
    session.connect(SocketId::output(2, "callable"), SocketId::input(3, "fn"));
    session.connect(SocketId::proxy(1), SocketId::input(3, "x"));

    let outcome = session.engine.execute_graph(None).unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.executed == vec![3]));
    assert_eq!(
        session.calls(),
        vec![
            ("neg".to_string(), Value::Int(-7)),
            ("apply".to_string(), Value::Int(-7)),
        ]
    );
}

#[test]
fn test_exported_chain_mirrors_execution() {
    let session = chain();
    let script = session.engine.export_python().unwrap();
    assert!(script.contains("from demo.math.add import add"));
    assert!(script.contains("def scenario():"));
    assert!(script.contains("_3_sum = add(_1_value, _2_value)"));
    assert!(script.contains("_5_output = out(_4_neg)"));
}

#[test]
fn test_stashed_widget_survives_save_and_reload() {
    let mut add = script(ADD, "add");
    add.param_widget_value_map
        .insert("a".into(), WidgetRecord::new(10));
    let mut session = Session::new(vec![data(1, 3), add]);
    session.connect(SocketId::proxy(1), SocketId::input(ADD, "a"));
    let path = session.dir.path().join("saved.json");
    session.engine.save_document(&path).unwrap();

    let mut engine = Engine::new(library(&session.calls), EngineConfig::default());
    engine.load_document(&path).unwrap();
    let record = engine.graph().node(ADD).unwrap().record();
    assert!(record.param_widget_value_map.is_empty());
    assert_eq!(record.stashed_widget_map["a"].value, Value::Int(10));

    engine
        .remove_edge(&SocketId::proxy(1), &SocketId::input(ADD, "a"))
        .unwrap();
    let record = engine.graph().node(ADD).unwrap().record();
    assert_eq!(record.param_widget_value_map["a"].value, Value::Int(10));
    assert!(record.stashed_widget_map.is_empty());
}

//! Rhai API for leveled diagnostic messages
//!
//! Each of `msg_info`, `msg_warning`, `msg_error` and `msg_deprecated` accepts:
//!
//! ```rhai
//! msg_info("text");
//! msg_info("Emitter", "text");
//! msg_info("text", "file.rhai", 12);
//! msg_info("Emitter", "text", "file.rhai", 12);
//! msg_info(node, "text");          // the node's name is the emitter
//! msg_info(node, "text", "file.rhai", 12);
//! ```

use crate::graph_api::{ScriptNode, emitter_for};
use rhai::{Engine, ImmutableString, INT};
use std::sync::Arc;
use trellis_core::diagnostics::{DiagnosticSink, Message, Severity};

fn line_number(line: INT) -> u32 {
    u32::try_from(line).unwrap_or(0)
}

fn register_level(engine: &mut Engine, sink: &Arc<dyn DiagnosticSink>, severity: Severity) {
    let name = format!("msg_{}", severity.prefix().to_lowercase());

    let s = Arc::clone(sink);
    engine.register_fn(name.as_str(), move |text: ImmutableString| {
        s.emit(Message::new(severity, text.as_str()));
    });

    let s = Arc::clone(sink);
    engine.register_fn(
        name.as_str(),
        move |emitter: ImmutableString, text: ImmutableString| {
            s.emit(Message::new(severity, text.as_str()).with_emitter(emitter.as_str()));
        },
    );

    let s = Arc::clone(sink);
    engine.register_fn(
        name.as_str(),
        move |text: ImmutableString, file: ImmutableString, line: INT| {
            s.emit(Message::new(severity, text.as_str()).at(file.as_str(), line_number(line)));
        },
    );

    let s = Arc::clone(sink);
    engine.register_fn(
        name.as_str(),
        move |emitter: ImmutableString, text: ImmutableString, file: ImmutableString, line: INT| {
            s.emit(
                Message::new(severity, text.as_str())
                    .with_emitter(emitter.as_str())
                    .at(file.as_str(), line_number(line)),
            );
        },
    );

    let s = Arc::clone(sink);
    engine.register_fn(name.as_str(), move |node: ScriptNode, text: ImmutableString| {
        s.emit(Message::new(severity, text.as_str()).with_emitter(emitter_for(&node)));
    });

    let s = Arc::clone(sink);
    engine.register_fn(
        name.as_str(),
        move |node: ScriptNode, text: ImmutableString, file: ImmutableString, line: INT| {
            s.emit(
                Message::new(severity, text.as_str())
                    .with_emitter(emitter_for(&node))
                    .at(file.as_str(), line_number(line)),
            );
        },
    );
}

/// Register the message functions, forwarding to `sink`
pub fn register_message_api(engine: &mut Engine, sink: &Arc<dyn DiagnosticSink>) {
    for severity in [
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Deprecated,
    ] {
        register_level(engine, sink, severity);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::graph_api::BuildScope;
    use rhai::Scope;
    use trellis_core::diagnostics::MemorySink;
    use trellis_core::graph::SceneGraph;

    #[test]
    fn test_call_shapes() {
        let memory = MemorySink::new();
        let sink: Arc<dyn DiagnosticSink> = Arc::new(memory.clone());
        let mut engine = Engine::new();
        register_message_api(&mut engine, &sink);

        engine
            .run(
                r#"
                msg_info("plain");
                msg_warning("Emitter", "with emitter");
                msg_error("located", "scene.rhai", 7);
                msg_deprecated("Emitter", "everything", "scene.rhai", 9);
                "#,
            )
            .unwrap();

        let messages: Vec<String> = memory.snapshot().iter().map(ToString::to_string).collect();
        assert_eq!(
            messages,
            [
                "[INFO] plain",
                "[WARNING] [Emitter] with emitter",
                "[ERROR] located (scene.rhai:7)",
                "[DEPRECATED] [Emitter] everything (scene.rhai:9)",
            ]
        );
    }

    #[test]
    fn test_node_call_shapes() {
        let memory = MemorySink::new();
        let sink: Arc<dyn DiagnosticSink> = Arc::new(memory.clone());
        let mut engine = Engine::new();
        register_message_api(&mut engine, &sink);

        let mut graph = SceneGraph::new();
        let root = graph.add_root("tower");
        let mut scope = Scope::new();
        scope.push("node", ScriptNode::new(root));

        {
            let _scope = BuildScope::enter(&mut graph, root, "tower");
            engine
                .run_with_scope(
                    &mut scope,
                    r#"
                    msg_warning(node, "from node");
                    msg_error(node, "from node at", "tower.rhai", 3);
                    "#,
                )
                .unwrap();
        }

        let messages: Vec<String> = memory.snapshot().iter().map(ToString::to_string).collect();
        assert_eq!(
            messages,
            [
                "[WARNING] [tower] from node",
                "[ERROR] [tower] from node at (tower.rhai:3)",
            ]
        );
    }
}

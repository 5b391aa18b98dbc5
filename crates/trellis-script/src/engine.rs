//! Script engine for loading prefab scripts

use crate::graph_api::register_graph_api;
use crate::message_api::register_message_api;
use crate::prefab_api::{
    PrefabLibrary, register_prefab_api, reset_declarations, take_declarations,
};
use anyhow::{Result, anyhow};
use rhai::{AST, Engine};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use trellis_core::diagnostics::{DiagnosticSink, TracingSink};
use trellis_core::schema::SchemaDeriver;

/// Trellis script engine
pub struct ScriptEngine {
    engine: Rc<Engine>,
    sink: Arc<dyn DiagnosticSink>,
}

impl ScriptEngine {
    /// Create a script engine whose messages go to `sink`
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        let mut engine = Engine::new();

        register_graph_api(&mut engine);
        register_prefab_api(&mut engine);
        register_message_api(&mut engine, &sink);

        // Route script output through tracing
        engine.on_print(|text| tracing::info!(target: "trellis::script", "{text}"));
        engine.on_debug(|text, source, pos| {
            tracing::debug!(
                target: "trellis::script",
                source = source.unwrap_or(""),
                line = pos.line().unwrap_or(0),
                "{text}"
            );
        });

        // Configure engine for better errors
        engine.set_max_expr_depths(64, 64);

        Self {
            engine: Rc::new(engine),
            sink,
        }
    }

    pub fn sink(&self) -> &Arc<dyn DiagnosticSink> {
        &self.sink
    }

    /// Compile a script, tagging it with `source` for provenance
    pub fn compile(&self, script: &str, source: &str) -> Result<AST> {
        let mut ast = self
            .engine
            .compile(script)
            .map_err(|e| anyhow!("Script compilation failed in {}: {}", source, e))?;
        ast.set_source(source);
        Ok(ast)
    }

    /// Run a script for its side effects
    pub fn run(&self, script: &str) -> Result<()> {
        self.engine
            .run(script)
            .map_err(|e| anyhow!("Failed to run script: {}", e))?;
        Ok(())
    }

    /// Run a script and wrap every prefab it declares.
    ///
    /// `source` names the script in provenance and error messages.
    pub fn load_prefabs(
        &self,
        script: &str,
        source: &str,
        deriver: &SchemaDeriver,
    ) -> Result<PrefabLibrary> {
        let ast = Rc::new(self.compile(script, source)?);

        reset_declarations();
        let ran = self.engine.run_ast(&ast);
        let declarations = take_declarations();
        ran.map_err(|e| anyhow!("Failed to evaluate {}: {}", source, e))?;

        let library = PrefabLibrary::from_declarations(&self.engine, &ast, &declarations, deriver)?;
        tracing::info!(
            source = %source,
            prefabs = library.len(),
            "loaded prefab script"
        );
        Ok(library)
    }

    /// Read a script file and wrap every prefab it declares
    pub fn load_prefabs_file(&self, path: &Path, deriver: &SchemaDeriver) -> Result<PrefabLibrary> {
        let script = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read script file {}: {}", path.display(), e))?;
        self.load_prefabs(&script, &path.display().to_string(), deriver)
    }

    /// Get a reference to the underlying Rhai engine
    pub fn inner(&self) -> &Engine {
        &self.engine
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_load_declared_prefabs() {
        let engine = ScriptEngine::default();
        let library = engine
            .load_prefabs(
                r#"
                fn block(node, size) { node.add_object("Cube", #{ size: size }); }
                fn marker(node) { }
                prefab("block", #{ size: 1.0 });
                prefab("marker");
                "#,
                "scene.rhai",
                &SchemaDeriver::new(),
            )
            .unwrap();

        let names: Vec<_> = library.names().collect();
        assert_eq!(names, ["block", "marker"]);
        let block = library.get("block").unwrap();
        assert_eq!(block.provenance().source_file, "scene.rhai");
        assert_eq!(block.provenance().source_line, 4);
        assert_eq!(block.schema().len(), 1);
    }

    #[test]
    fn test_syntax_error() {
        let engine = ScriptEngine::default();
        let result = engine.load_prefabs("fn block(node {", "broken.rhai", &SchemaDeriver::new());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("broken.rhai"));
    }

    #[test]
    fn test_duplicate_declaration() {
        let engine = ScriptEngine::default();
        let result = engine.load_prefabs(
            r#"
            fn marker(node) { }
            prefab("marker");
            prefab("marker");
            "#,
            "dup.rhai",
            &SchemaDeriver::new(),
        );
        assert!(result.unwrap_err().to_string().contains("more than once"));
    }
}

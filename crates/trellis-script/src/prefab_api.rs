//! Rhai API for declaring prefabs
//!
//! A script declares a prefab by defining a builder function and naming it in
//! a top-level `prefab(...)` call:
//!
//! ```rhai
//! fn block(node, size, color) {
//!     node.add_object("Cube", #{ size: size, color: color });
//! }
//!
//! prefab("block", #{ size: 1.0, color: "red" }, "An axis-aligned block");
//! ```
//!
//! The function's first parameter receives the instance. Parameters listed in
//! the defaults map become fields; the others are passed as `()`.

use crate::convert::{to_dynamic, to_value};
use crate::graph_api::{BuildScope, ScriptNode};
use anyhow::{Result, anyhow};
use rhai::{
    AST, CallFnOptions, Dynamic, Engine, EvalAltResult, ImmutableString, Map, NativeCallContext,
    Scope,
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use trellis_core::prefab::{BuildContext, PrefabArgs, PrefabBuilder, PrefabFactory};
use trellis_core::provenance::Provenance;
use trellis_core::schema::{SchemaDeriver, Signature};
use trellis_core::value::Value;

/// A `prefab(...)` call recorded while a script ran
#[derive(Debug, Clone, PartialEq)]
pub struct PrefabDeclaration {
    pub name: String,
    pub defaults: BTreeMap<String, Value>,
    pub doc: Option<String>,
    pub help: BTreeMap<String, String>,
    pub provenance: Provenance,
}

// Declarations made by the script currently running
thread_local! {
    static DECLARATIONS: RefCell<Vec<PrefabDeclaration>> = const { RefCell::new(Vec::new()) };
}

/// Forget recorded declarations (called before each script run)
pub fn reset_declarations() {
    DECLARATIONS.with(|d| d.borrow_mut().clear());
}

/// Take the declarations recorded since the last reset
pub fn take_declarations() -> Vec<PrefabDeclaration> {
    DECLARATIONS.with(|d| std::mem::take(&mut *d.borrow_mut()))
}

fn string_map(map: &Map) -> Result<BTreeMap<String, String>, Box<EvalAltResult>> {
    map.iter()
        .map(|(key, value)| {
            value
                .clone()
                .into_string()
                .map(|text| (key.to_string(), text))
                .map_err(|_| format!("help text for '{key}' must be a string").into())
        })
        .collect()
}

fn declare(
    ctx: &NativeCallContext,
    name: &str,
    defaults: &Map,
    doc: Option<String>,
    help: &Map,
) -> Result<(), Box<EvalAltResult>> {
    let defaults: BTreeMap<String, Value> = defaults
        .iter()
        .map(|(key, value)| {
            to_value(value)
                .map(|v| (key.to_string(), v))
                .map_err(|e| format!("default for '{key}' in prefab '{name}': {e}").into())
        })
        .collect::<Result<_, Box<EvalAltResult>>>()?;

    let line = ctx.call_position().line().unwrap_or(0);
    let provenance = Provenance::new(
        ctx.call_source().unwrap_or("<script>"),
        u32::try_from(line).unwrap_or(u32::MAX),
    );

    DECLARATIONS.with(|d| {
        d.borrow_mut().push(PrefabDeclaration {
            name: name.to_string(),
            defaults,
            doc,
            help: string_map(help)?,
            provenance,
        });
        Ok(())
    })
}

/// Register `prefab(...)` in its four forms
pub fn register_prefab_api(engine: &mut Engine) {
    engine.register_fn(
        "prefab",
        |ctx: NativeCallContext, name: ImmutableString| {
            declare(&ctx, &name, &Map::new(), None, &Map::new())
        },
    );
    engine.register_fn(
        "prefab",
        |ctx: NativeCallContext, name: ImmutableString, defaults: Map| {
            declare(&ctx, &name, &defaults, None, &Map::new())
        },
    );
    engine.register_fn(
        "prefab",
        |ctx: NativeCallContext, name: ImmutableString, defaults: Map, doc: ImmutableString| {
            declare(&ctx, &name, &defaults, Some(doc.to_string()), &Map::new())
        },
    );
    engine.register_fn(
        "prefab",
        |ctx: NativeCallContext,
         name: ImmutableString,
         defaults: Map,
         doc: ImmutableString,
         help: Map| {
            declare(&ctx, &name, &defaults, Some(doc.to_string()), &help)
        },
    );
}

/// Combine a declaration with the script function it names
pub fn signature_for(ast: &AST, declaration: &PrefabDeclaration) -> Result<Signature> {
    let at = &declaration.provenance;
    let mut candidates = ast
        .iter_functions()
        .filter(|f| f.name == declaration.name);
    let function = candidates.next().ok_or_else(|| {
        anyhow!(
            "prefab '{}' (declared at {at}) names no script function",
            declaration.name
        )
    })?;
    if candidates.next().is_some() {
        return Err(anyhow!(
            "prefab '{}' (declared at {at}) names an overloaded function; keep a single definition",
            declaration.name
        ));
    }

    let params: Vec<String> = function.params.iter().map(|p| p.to_string()).collect();
    for key in declaration.defaults.keys() {
        if !params.contains(key) {
            return Err(anyhow!(
                "prefab '{}' (declared at {at}) has a default for '{key}', which is not a parameter of fn {}({})",
                declaration.name,
                declaration.name,
                params.join(", ")
            ));
        }
    }

    let mut signature = Signature::new(declaration.name.clone());
    for param in &params {
        match declaration.defaults.get(param) {
            Some(default) => {
                signature = signature.param_with_default(param.clone(), default.clone());
                if let Some(help) = declaration.help.get(param) {
                    signature = signature.help(help.clone());
                }
            }
            None => signature = signature.param(param.clone()),
        }
    }
    if let Some(doc) = &declaration.doc {
        signature = signature.doc(doc.clone());
    }
    Ok(signature)
}

/// [`PrefabBuilder`] that calls a script function
pub struct ScriptBuilder {
    engine: Rc<Engine>,
    ast: Rc<AST>,
    signature: Signature,
}

impl ScriptBuilder {
    pub fn new(engine: Rc<Engine>, ast: Rc<AST>, signature: Signature) -> Self {
        Self {
            engine,
            ast,
            signature,
        }
    }
}

impl PrefabBuilder for ScriptBuilder {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn build(&self, ctx: &mut BuildContext<'_>, args: &PrefabArgs) -> Result<()> {
        let instance = ctx.node();
        let prefab = ctx.prefab().to_string();

        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(Dynamic::from(ScriptNode::new(instance)));
        call_args.extend(args.values().map(to_dynamic));

        let _scope = BuildScope::enter(ctx.graph_mut(), instance, &prefab);
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        // The builder's return value is ignored
        let _ = self
            .engine
            .call_fn_with_options::<Dynamic>(
                options,
                &mut Scope::new(),
                &self.ast,
                self.signature.name(),
                call_args,
            )
            .map_err(|e| anyhow!("{}", e))?;
        Ok(())
    }
}

/// The prefabs declared by one script, in declaration order
#[derive(Debug, Clone, Default)]
pub struct PrefabLibrary {
    factories: Vec<PrefabFactory>,
}

impl PrefabLibrary {
    /// Wrap every declaration with its script function
    pub fn from_declarations(
        engine: &Rc<Engine>,
        ast: &Rc<AST>,
        declarations: &[PrefabDeclaration],
        deriver: &SchemaDeriver,
    ) -> Result<Self> {
        let mut factories: Vec<PrefabFactory> = Vec::with_capacity(declarations.len());
        for declaration in declarations {
            if factories.iter().any(|f| f.name() == declaration.name) {
                return Err(anyhow!(
                    "prefab '{}' is declared more than once (again at {})",
                    declaration.name,
                    declaration.provenance
                ));
            }
            let signature = signature_for(ast, declaration)?;
            let builder = ScriptBuilder::new(Rc::clone(engine), Rc::clone(ast), signature);
            let factory =
                PrefabFactory::wrap_with(builder, deriver, declaration.provenance.clone())?;
            factories.push(factory);
        }
        Ok(Self { factories })
    }

    pub fn get(&self, name: &str) -> Option<&PrefabFactory> {
        self.factories.iter().find(|f| f.name() == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.iter().map(|f| f.name())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PrefabFactory> {
        self.factories.iter()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

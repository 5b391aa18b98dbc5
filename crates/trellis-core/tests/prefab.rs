//! Integration tests for the prefab lifecycle

// Tests are allowed to use expect/unwrap for cleaner error messages
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use approx::assert_relative_eq;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use trellis_core::prefab::{DOCSTRING_FIELD, PREFABNAME_FIELD};
use trellis_core::prelude::*;

type Calls = Rc<RefCell<Vec<PrefabArgs>>>;

fn box_signature() -> Signature {
    Signature::new("box")
        .param("node")
        .param_with_default("size", 1.0)
        .param_with_default("color", "red")
        .doc("An axis-aligned box")
}

/// A box prefab that records the arguments of every build
fn recording_box(runtime: &PrefabRuntime) -> (PrefabFactory, Calls) {
    let calls: Calls = Rc::default();
    let seen = Rc::clone(&calls);
    let factory = runtime
        .wrap(FnBuilder::new(box_signature(), move |ctx, args| {
            seen.borrow_mut().push(args.clone());
            let size = args.get_double("size").unwrap_or_default();
            ctx.add_object(
                "Cube",
                BTreeMap::from([("size".to_string(), Value::from(size))]),
            )?;
            Ok(())
        }))
        .expect("box should wrap");
    (factory, calls)
}

#[test]
fn schema_derivation_is_deterministic() {
    let deriver = SchemaDeriver::new();
    let first = deriver.derive(&box_signature()).unwrap();
    let second = deriver.derive(&box_signature()).unwrap();
    assert_eq!(first, second);

    let names: Vec<_> = first.names().collect();
    assert_eq!(names, ["size", "color"]);
    assert_eq!(first.get("size").unwrap().field_type, FieldType::Double);
    assert_eq!(first.get("color").unwrap().field_type, FieldType::String);
}

#[test]
fn builder_without_parameters_is_rejected() {
    let sink = MemorySink::new();
    let runtime = PrefabRuntime::new(RuntimeConfig::default(), Arc::new(sink.clone()));

    let result = runtime.wrap(FnBuilder::new(Signature::new("nothing"), |_, _| Ok(())));

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        Error::Schema {
            source: SchemaError::MissingSelfParameter,
            ..
        }
    ));
    assert!(err.to_string().contains("MissingSelfParameter"));
    assert_eq!(sink.at_least(Severity::Error).len(), 1);
}

#[test]
fn instances_get_independent_fields() {
    let mut runtime = PrefabRuntime::default();
    let (factory, _) = recording_box(&runtime);

    let a = runtime.instantiate(&factory, "a").unwrap();
    let b = runtime.instantiate(&factory, "b").unwrap();
    runtime.set_field(a, "size", 3.0).unwrap();

    assert_eq!(runtime.field(a, "size").unwrap(), &Value::Double(3.0));
    assert_eq!(runtime.field(b, "size").unwrap(), &Value::Double(1.0));
    assert_eq!(
        runtime.field(b, PREFABNAME_FIELD).unwrap(),
        &Value::from("box")
    );
    assert_eq!(
        runtime.field(b, DOCSTRING_FIELD).unwrap(),
        &Value::from("An axis-aligned box")
    );
    // Two info fields plus two schema fields, each bound once
    assert_eq!(runtime.graph().node(a).unwrap().fields().len(), 4);
    assert_eq!(runtime.graph().node(b).unwrap().fields().len(), 4);
}

#[test]
fn end_to_end_box() {
    let mut runtime = PrefabRuntime::default();
    let (factory, calls) = recording_box(&runtime);

    let node = runtime.instantiate(&factory, "mybox").unwrap();
    assert_eq!(runtime.state(node), Some(InstanceState::Built));
    assert_eq!(calls.borrow().len(), 1);

    assert!(runtime.set_field(node, "size", 2.0).unwrap());
    assert_eq!(runtime.state(node), Some(InstanceState::Stale));

    let report = runtime.step();
    assert_eq!(report.rebuilt, 1);
    assert_eq!(runtime.state(node), Some(InstanceState::Built));

    let calls = calls.borrow();
    let last = calls.last().unwrap();
    assert_relative_eq!(last.get_double("size").unwrap(), 2.0);
    assert_eq!(last.get_str("color"), Some("red"));

    let objects = runtime.graph().node(node).unwrap().objects();
    assert_eq!(objects.len(), 1);
    let cube = runtime.graph().object(objects[0]).unwrap();
    assert_eq!(cube.params.get("size"), Some(&Value::Double(2.0)));
}

#[test]
fn many_changes_cause_one_rebuild() {
    let mut runtime = PrefabRuntime::default();
    let (factory, calls) = recording_box(&runtime);
    let node = runtime.instantiate(&factory, "mybox").unwrap();

    for size in 2..=6 {
        runtime.set_field(node, "size", f64::from(size)).unwrap();
    }
    let report = runtime.step();

    assert_eq!(report.passes, 1);
    assert_eq!(report.rebuilt, 1);
    assert_eq!(runtime.build_count(node), Some(2));
    assert_relative_eq!(
        calls.borrow().last().unwrap().get_double("size").unwrap(),
        6.0
    );

    // Nothing left to do
    assert_eq!(runtime.step(), StepReport::default());
    assert_eq!(runtime.build_count(node), Some(2));
}

#[test]
fn same_value_write_does_not_rebuild() {
    let mut runtime = PrefabRuntime::default();
    let (factory, _) = recording_box(&runtime);
    let node = runtime.instantiate(&factory, "mybox").unwrap();

    assert!(!runtime.set_field(node, "size", 1.0).unwrap());
    assert_eq!(runtime.state(node), Some(InstanceState::Built));
    runtime.step();
    assert_eq!(runtime.build_count(node), Some(1));
}

#[test]
fn self_modifying_builder_rebuilds_once_more() {
    let mut runtime = PrefabRuntime::default();
    let seen: Rc<RefCell<Vec<i64>>> = Rc::default();
    let log = Rc::clone(&seen);

    let factory = runtime
        .wrap(FnBuilder::new(
            Signature::new("counter")
                .param("node")
                .param_with_default("generation", 0),
            move |ctx, args| {
                let generation = args.get_int("generation").unwrap_or_default();
                log.borrow_mut().push(generation);
                if generation == 0 {
                    for next in 1..=5 {
                        ctx.set_field("generation", next)?;
                    }
                }
                Ok(())
            },
        ))
        .unwrap();

    let node = runtime.instantiate(&factory, "counter").unwrap();
    assert_eq!(runtime.state(node), Some(InstanceState::Stale));

    runtime.step();

    assert_eq!(runtime.build_count(node), Some(2));
    assert_eq!(*seen.borrow(), [0, 5]);
    assert_eq!(runtime.state(node), Some(InstanceState::Built));
}

#[test]
fn rebuild_replaces_whole_subtree() {
    let mut runtime = PrefabRuntime::default();
    let factory = runtime
        .wrap(FnBuilder::new(
            Signature::new("labelled")
                .param("node")
                .param_with_default("label", "A"),
            |ctx, args| {
                let label = args.get_str("label").unwrap_or("?").to_string();
                let child = ctx.add_child(&label)?;
                ctx.add_child_to(child, "inner")?;
                ctx.add_object_to(child, "Marker", BTreeMap::new())?;
                Ok(())
            },
        ))
        .unwrap();

    let node = runtime.instantiate(&factory, "root").unwrap();
    assert_eq!(runtime.graph().child_names(node).unwrap(), ["A"]);

    runtime.set_field(node, "label", "B").unwrap();
    runtime.step();

    assert_eq!(runtime.graph().child_names(node).unwrap(), ["B"]);
    assert!(runtime.graph().find_path("root/A").is_none());
    assert!(runtime.graph().find_path("root/B/inner").is_some());
    // root, B and inner
    assert_eq!(runtime.graph().node_count(), 3);
    assert_eq!(runtime.graph().object_count(), 1);
}

#[test]
fn failed_rebuild_reports_prefab_and_definition_site() {
    let sink = MemorySink::new();
    let mut runtime = PrefabRuntime::new(RuntimeConfig::default(), Arc::new(sink.clone()));

    let line = line!() + 1;
    let wrapped = runtime.wrap(FnBuilder::new(box_signature(), |ctx, args| {
        let size = args.get_double("size").unwrap_or_default();
        anyhow::ensure!(size > 0.0, "size must be positive, got {size}");
        ctx.add_object("Cube", BTreeMap::new())?;
        Ok(())
    }));
    let factory = wrapped.unwrap();
    assert_eq!(factory.provenance().source_line, line);
    assert!(factory.provenance().source_file.ends_with("prefab.rs"));

    let node = runtime.instantiate(&factory, "mybox").unwrap();
    runtime.set_field(node, "size", -1.0).unwrap();
    let report = runtime.step();

    assert_eq!(report.failed, 1);
    assert_eq!(runtime.state(node), Some(InstanceState::Failed));

    let errors = sink.at_least(Severity::Error);
    assert_eq!(errors.len(), 1);
    let text = errors[0].to_string();
    assert!(text.contains("'box'"), "{text}");
    assert!(text.contains(&factory.provenance().to_string()), "{text}");
    assert!(text.contains("size must be positive"), "{text}");
    assert_eq!(errors[0].source.as_ref(), Some(factory.provenance()));

    // A good value brings the instance back
    runtime.set_field(node, "size", 1.5).unwrap();
    runtime.step();
    assert_eq!(runtime.state(node), Some(InstanceState::Built));
}

#[test]
fn failed_first_build_leaves_no_node() {
    let sink = MemorySink::new();
    let mut runtime = PrefabRuntime::new(RuntimeConfig::default(), Arc::new(sink.clone()));
    let line = line!() + 1;
    let factory = runtime.wrap(FnBuilder::new(Signature::new("broken").param("node"), |_, _| {
        anyhow::bail!("always fails")
    }));
    let factory = factory.unwrap();

    let err = runtime.instantiate(&factory, "piece").unwrap_err();
    assert!(matches!(err, Error::Build { .. }));
    assert_eq!(runtime.graph().node_count(), 0);
    assert_eq!(runtime.instances().count(), 0);

    let errors = sink.at_least(Severity::Error);
    assert_eq!(errors.len(), 1);
    let text = &errors[0].text;
    assert!(text.contains("'broken'"), "{text}");
    assert!(text.contains(&format!("prefab.rs:{line}")), "{text}");
    assert!(text.contains("always fails"), "{text}");
    assert_eq!(errors[0].emitter.as_deref(), Some("piece"));
    assert_eq!(errors[0].source.as_ref().map(|p| p.source_line), Some(line));
}

#[test]
fn context_parameters_receive_nil() {
    let mut runtime = PrefabRuntime::default();
    let seen: Calls = Rc::default();
    let log = Rc::clone(&seen);
    let factory = runtime
        .wrap(FnBuilder::new(
            Signature::new("withctx")
                .param("node")
                .param("scene")
                .param_with_default("count", 3),
            move |_, args| {
                log.borrow_mut().push(args.clone());
                Ok(())
            },
        ))
        .unwrap();

    runtime.instantiate(&factory, "n").unwrap();
    let args = seen.borrow();
    assert_eq!(args[0].get("scene"), Some(&Value::Nil));
    assert_eq!(args[0].get_int("count"), Some(3));
}

#[test]
fn nested_instances_and_removal() {
    let mut runtime = PrefabRuntime::default();
    let (factory, _) = recording_box(&runtime);

    let scene = runtime.graph_mut().add_root("scene");
    let a = runtime.instantiate_under(&factory, scene, "a").unwrap();
    let b = runtime.instantiate_under(&factory, scene, "b").unwrap();
    assert_eq!(runtime.graph().child_names(scene).unwrap(), ["a", "b"]);

    runtime.set_field(a, "size", 4.0).unwrap();
    runtime.remove(a).unwrap();
    let report = runtime.step();

    assert_eq!(report.rebuilt, 0);
    assert!(!runtime.is_instance(a));
    assert!(runtime.is_instance(b));
    assert_eq!(runtime.graph().child_names(scene).unwrap(), ["b"]);
}

#[test]
fn rebind_keeps_values_and_adds_new_fields() {
    let mut runtime = PrefabRuntime::default();
    let (factory, _) = recording_box(&runtime);
    let node = runtime.instantiate(&factory, "mybox").unwrap();
    runtime.set_field(node, "size", 5.0).unwrap();
    runtime.step();

    let calls: Calls = Rc::default();
    let log = Rc::clone(&calls);
    let updated = runtime
        .wrap(FnBuilder::new(
            box_signature().param_with_default("visible", true),
            move |_, args| {
                log.borrow_mut().push(args.clone());
                Ok(())
            },
        ))
        .unwrap();

    runtime.rebind(node, &updated).unwrap();
    runtime.step();

    let calls = calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_relative_eq!(calls[0].get_double("size").unwrap(), 5.0);
    assert_eq!(calls[0].get_bool("visible"), Some(true));
    assert!(runtime.factory_of(node).unwrap().same_as(&updated));
}

#[test]
fn rebind_retypes_changed_fields() {
    let mut runtime = PrefabRuntime::default();
    let (factory, _) = recording_box(&runtime);
    let node = runtime.instantiate(&factory, "mybox").unwrap();
    runtime.set_field(node, "size", 5.0).unwrap();
    runtime.set_field(node, "color", "blue").unwrap();
    runtime.step();

    let calls: Calls = Rc::default();
    let log = Rc::clone(&calls);
    let updated = runtime
        .wrap(FnBuilder::new(
            Signature::new("box")
                .param("node")
                .param_with_default("size", Value::Nil)
                .param_with_default("color", 7),
            move |_, args| {
                log.borrow_mut().push(args.clone());
                Ok(())
            },
        ))
        .unwrap();

    runtime.rebind(node, &updated).unwrap();
    runtime.step();

    // `color` cannot hold "blue" as an int, so it restarts at the new default
    let color = runtime.graph().field(node, "color").unwrap();
    assert_eq!(color.field_type, FieldType::Int);
    assert_eq!(color.value, Value::Int(7));
    assert!(runtime.set_field(node, "color", 3).unwrap());
    // Any value fits the now untyped `size`
    let size = runtime.graph().field(node, "size").unwrap();
    assert_eq!(size.field_type, FieldType::Unknown);
    assert_eq!(size.value, Value::Double(5.0));

    let calls = calls.borrow();
    assert_eq!(calls[0].get_int("color"), Some(7));
}

#[test]
fn rebind_drops_undeclared_fields() {
    let mut runtime = PrefabRuntime::default();
    let (factory, _) = recording_box(&runtime);
    let node = runtime.instantiate(&factory, "mybox").unwrap();
    runtime.set_field(node, "size", 5.0).unwrap();
    runtime.step();

    let updated = runtime
        .wrap(FnBuilder::new(
            Signature::new("box")
                .param("node")
                .param_with_default("size", 1.0),
            |_, _| Ok(()),
        ))
        .unwrap();
    runtime.rebind(node, &updated).unwrap();

    let names: Vec<_> = runtime
        .graph()
        .node(node)
        .unwrap()
        .fields()
        .iter()
        .map(|f| f.name.clone())
        .collect();
    assert_eq!(names, [PREFABNAME_FIELD, DOCSTRING_FIELD, "size"]);
    assert_eq!(runtime.field(node, "size").unwrap(), &Value::Double(5.0));
    assert_eq!(runtime.field(node, DOCSTRING_FIELD).unwrap(), &Value::from(""));
}

#[test]
fn pass_limit_leaves_instances_pending() {
    let sink = MemorySink::new();
    let config = RuntimeConfig {
        max_rebuild_passes: 2,
        ..RuntimeConfig::default()
    };
    let mut runtime = PrefabRuntime::new(config, Arc::new(sink.clone()));

    // Every build bumps its own field, so it never settles
    let factory = runtime
        .wrap(FnBuilder::new(
            Signature::new("restless")
                .param("node")
                .param_with_default("tick", 0),
            |ctx, args| {
                let tick = args.get_int("tick").unwrap_or_default();
                ctx.set_field("tick", tick + 1)?;
                Ok(())
            },
        ))
        .unwrap();

    let node = runtime.instantiate(&factory, "restless").unwrap();
    let report = runtime.step();

    assert_eq!(report.passes, 2);
    assert_eq!(report.pending, 1);
    assert_eq!(runtime.build_count(node), Some(3));
    assert_eq!(sink.at_least(Severity::Warning).len(), 1);
}

mod common;

use std::sync::Arc;
use std::thread;

use agentloom::{
    AgentLoomError, AgentRegistry, ComponentKind, ComponentMetadata, EntryOrigin,
    RegisterOutcome, ToolInit, ToolRegistry,
};
use common::{sibling_ctor, tool_ctor};

fn discovered(root: &str, module: &str) -> EntryOrigin {
    EntryOrigin::discovered(root, module, "Sym")
}

fn register_manual(registry: &AgentRegistry, name: &str) {
    let metadata = ComponentMetadata::builder(name).build();
    registry.register(name, sibling_ctor(name), metadata, EntryOrigin::Manual).unwrap();
}

fn synthesized(template_id: &str) -> EntryOrigin {
    EntryOrigin::Synthesized {
        template_id: template_id.to_string(),
        source_path: format!("flows/{template_id}.yaml"),
    }
}

#[test]
fn first_registration_wins_and_second_is_rejected() {
    let registry = AgentRegistry::agents();
    let first = registry
        .register(
            "search",
            sibling_ctor("search"),
            ComponentMetadata::builder("search").description("first").build(),
            discovered("core", "core.search"),
        )
        .unwrap();
    assert_eq!(first, RegisterOutcome::Registered);

    let err = registry
        .register(
            "search",
            sibling_ctor("search"),
            ComponentMetadata::builder("search").description("second").build(),
            discovered("contrib", "contrib.search"),
        )
        .unwrap_err();
    match &err {
        AgentLoomError::DuplicateName { kind, name, existing, rejected } => {
            assert_eq!(*kind, ComponentKind::Agent);
            assert_eq!(name, "search");
            assert!(existing.contains("core.search"));
            assert!(rejected.contains("contrib.search"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("first-registered-wins"));

    let entry = registry.get("search").unwrap();
    assert_eq!(entry.metadata().description, "first");
    assert_eq!(registry.len(), 1);
}

#[test]
fn repeating_a_registration_with_the_same_origin_is_unchanged() {
    let registry = ToolRegistry::tools();
    let origin = discovered("core", "core.search.tools");
    let meta = ComponentMetadata::builder("web").build();
    assert_eq!(
        registry.register("web", tool_ctor("web"), meta.clone(), origin.clone()).unwrap(),
        RegisterOutcome::Registered
    );
    assert_eq!(
        registry.register("web", tool_ctor("web"), meta, origin).unwrap(),
        RegisterOutcome::Unchanged
    );
    assert_eq!(registry.names(), vec!["web"]);
}

#[test]
fn lookups_of_missing_names_fail_with_not_found() {
    let registry = ToolRegistry::tools();
    let err = registry.get("ghost").unwrap_err();
    assert!(matches!(
        err,
        AgentLoomError::NotFound { kind: ComponentKind::Tool, ref name } if name == "ghost"
    ));
    assert!(!registry.contains("ghost"));
    assert!(registry.is_empty());
}

#[test]
fn list_all_is_a_snapshot() {
    let registry = AgentRegistry::agents();
    register_manual(&registry, "a");
    let snapshot = registry.list_all();
    register_manual(&registry, "b");

    assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["a"]);
    assert_eq!(registry.list_all().len(), 2);
}

#[test]
fn entries_can_be_filtered_by_tag_and_summarised() {
    let registry = AgentRegistry::agents();
    let table = [
        ("planner", vec!["core", "planning"]),
        ("writer", vec!["core"]),
        ("triage", vec!["contrib"]),
    ];
    for (name, tags) in table {
        let meta = tags
            .iter()
            .fold(ComponentMetadata::builder(name), |b, tag| b.tag(*tag))
            .build();
        registry.register(name, sibling_ctor(name), meta, EntryOrigin::Manual).unwrap();
    }

    let core: Vec<String> = registry
        .list_by_tag("core")
        .iter()
        .map(|entry| entry.name().to_string())
        .collect();
    assert_eq!(core, vec!["planner", "writer"]);
    assert!(registry.list_by_tag("missing").is_empty());

    let summary = registry.summary();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.instantiated, 0);
    assert_eq!(summary.by_tag.get("core"), Some(&2));
}

#[test]
fn synthesized_entries_replace_only_synthesized_entries() {
    let registry = AgentRegistry::agents();
    let meta = || ComponentMetadata::builder("core_flow").tag("workflow").build();

    let synthesize = || {
        let origin = synthesized("core.flow");
        registry
            .register_synthesized("core_flow", sibling_ctor("core_flow"), meta(), origin)
            .unwrap()
    };
    assert_eq!(synthesize(), RegisterOutcome::Registered);
    assert_eq!(synthesize(), RegisterOutcome::Replaced);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.summary().synthesized, 1);

    register_manual(&registry, "manual");
    let err = registry
        .register_synthesized("manual", sibling_ctor("manual"), meta(), synthesized("core.manual"))
        .unwrap_err();
    assert!(matches!(
        err,
        AgentLoomError::SynthesisCollision { ref name, ref template_id }
            if name == "manual" && template_id == "core.manual"
    ));
    assert_eq!(registry.get("manual").unwrap().origin(), &EntryOrigin::Manual);
}

#[test]
fn tool_instances_are_memoized() {
    let registry = ToolRegistry::tools();
    let metadata = ComponentMetadata::builder("web").build();
    registry.register("web", tool_ctor("web"), metadata, EntryOrigin::Manual).unwrap();
    assert!(registry.cached_instance("web").is_none());

    let first = registry.get_or_create_instance("web", ToolInit::default()).unwrap();
    let second = registry.get_or_create_instance("web", ToolInit::default()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.summary().instantiated, 1);
}

#[test]
fn concurrent_readers_see_a_consistent_table() {
    let registry = Arc::new(AgentRegistry::agents());
    for i in 0..16 {
        register_manual(&registry, &format!("agent_{i:02}"));
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                (0..100).all(|_| registry.names().len() == 16 && registry.get("agent_07").is_ok())
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }
}

#[test]
fn dependencies_resolve_in_load_order() {
    let registry = AgentRegistry::agents();
    let add = |name: &str, deps: &[&str]| {
        let mut builder = ComponentMetadata::builder(name);
        for dep in deps {
            builder = builder.dependency(*dep);
        }
        registry
            .register(name, sibling_ctor(name), builder.build(), EntryOrigin::Manual)
            .unwrap();
    };
    add("report", &["collect", "index"]);
    add("index", &["collect"]);
    add("collect", &[]);
    add("loop_a", &["loop_b"]);
    add("loop_b", &["loop_a"]);
    add("dangling", &["missing"]);

    assert_eq!(
        registry.resolve_dependencies("report").unwrap(),
        vec!["collect", "index", "report"]
    );
    match registry.resolve_dependencies("loop_a").unwrap_err() {
        AgentLoomError::DependencyCycle { chain, .. } => {
            assert_eq!(chain, vec!["loop_a", "loop_b", "loop_a"]);
        }
        other => panic!("expected a cycle, got {other}"),
    }
    assert!(matches!(
        registry.resolve_dependencies("dangling"),
        Err(AgentLoomError::NotFound { .. })
    ));
}

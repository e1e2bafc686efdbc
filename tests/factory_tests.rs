mod common;

use std::fs;
use std::sync::Arc;

use serde_json::json;
use tempfile::tempdir;

use agentloom::{
    AgentLookup, AgentRegistry, ComponentMetadata, DynamicFactory, EntryOrigin, RegisterOutcome,
    SkipStage, TemplateScanner, ToolRegistry,
};
use common::{sibling_ctor, simple_workflow, write_doc, FixedLookup, ScriptedAgent};

struct Setup {
    agents: Arc<AgentRegistry>,
    factory: DynamicFactory,
}

fn setup(hand_authored: &[&str]) -> Setup {
    let agents = Arc::new(AgentRegistry::agents());
    let tools = Arc::new(ToolRegistry::tools());
    for name in hand_authored {
        let metadata = ComponentMetadata::builder(*name).build();
        agents
            .register(*name, sibling_ctor(name), metadata, EntryOrigin::Manual)
            .unwrap();
    }
    let factory = DynamicFactory::new(Arc::clone(&agents), tools);
    Setup { agents, factory }
}

#[test]
fn each_valid_document_yields_one_workflow_agent() {
    let dir = tempdir().unwrap();
    write_doc(dir.path(), "health.yaml", &simple_workflow("core.health-check", "worker"));
    write_doc(dir.path(), "nested/triage.json", &simple_workflow("contrib.triage", "worker"));
    fs::write(dir.path().join("notes.txt"), "not a workflow").unwrap();
    let s = setup(&["worker"]);

    let report = s.factory.synthesize_all(&[dir.path().to_path_buf()], None);

    assert_eq!(report.documents, 2);
    assert!(report.skipped.is_empty(), "{:?}", report.skipped);
    assert_eq!(
        report.synthesized.keys().collect::<Vec<_>>(),
        vec!["contrib_triage", "core_health_check"]
    );
    let entry = s.agents.get("core_health_check").unwrap();
    assert!(entry.origin().is_synthesized());
    assert!(entry.metadata().tags.contains("workflow"));
    assert!(entry.metadata().tags.contains("core"));
    assert_eq!(entry.metadata().dependencies, vec!["worker"]);
    assert!(report.synthesized["core_health_check"].instance.is_none());
}

#[test]
fn resynthesis_replaces_instead_of_duplicating() {
    let dir = tempdir().unwrap();
    write_doc(dir.path(), "flow.yaml", &simple_workflow("core.flow", "worker"));
    let s = setup(&["worker"]);

    let first = s.factory.synthesize_all(&[dir.path().to_path_buf()], None);
    let second = s.factory.synthesize_all(&[dir.path().to_path_buf()], None);

    assert_eq!(first.synthesized["core_flow"].outcome, RegisterOutcome::Registered);
    assert_eq!(second.synthesized["core_flow"].outcome, RegisterOutcome::Replaced);
    assert_eq!(s.agents.len(), 2);
    assert_eq!(s.agents.summary().synthesized, 1);
}

#[test]
fn hand_authored_agents_win_over_synthesized_ones() {
    let dir = tempdir().unwrap();
    write_doc(dir.path(), "planner.json", &simple_workflow("planner", "worker"));
    let s = setup(&["worker", "planner"]);

    let report = s.factory.synthesize_all(&[dir.path().to_path_buf()], None);

    assert!(report.synthesized.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].stage, SkipStage::Synthesis);
    assert!(report.skipped[0].reason.contains("hand-authored"));
    assert_eq!(s.agents.get("planner").unwrap().origin(), &EntryOrigin::Manual);
}

#[test]
fn invalid_documents_are_skipped_individually() {
    let dir = tempdir().unwrap();
    write_doc(dir.path(), "a_good.yaml", &simple_workflow("core.good", "worker"));
    write_doc(dir.path(), "b_dangling.yaml", &simple_workflow("core.dangling", "nobody"));
    fs::write(dir.path().join("c_broken.json"), "{ \"workflow_id\": ").unwrap();
    let s = setup(&["worker"]);

    let report = s.factory.synthesize_all(&[dir.path().to_path_buf()], None);

    assert_eq!(report.synthesized.keys().collect::<Vec<_>>(), vec!["core_good"]);
    let stages: Vec<SkipStage> = report.skipped.iter().map(|item| item.stage).collect();
    assert_eq!(stages, vec![SkipStage::Import, SkipStage::Compile]);
    assert!(report.skipped[1].reason.contains("unknown agent `nobody`"));
}

#[test]
fn workflows_may_bind_to_workflows_from_the_same_pass() {
    let dir = tempdir().unwrap();
    let outer = json!({
        "workflow_id": "core.outer",
        "workflow_name": "Outer",
        "core_phases": {
            "run": { "tasks": [{ "task_id": "nested", "agent": "core_inner" }] }
        }
    });
    write_doc(dir.path(), "a_outer.yaml", &outer);
    write_doc(dir.path(), "b_inner.yaml", &simple_workflow("core.inner", "worker"));
    let s = setup(&["worker"]);

    let report = s.factory.synthesize_all(&[dir.path().to_path_buf()], None);

    assert!(report.skipped.is_empty(), "{:?}", report.skipped);
    assert_eq!(report.synthesized.len(), 2);
    assert_eq!(
        s.agents.get("core_outer").unwrap().metadata().dependencies,
        vec!["core_inner"]
    );
}

#[test]
fn duplicate_ids_keep_the_first_document() {
    let dir = tempdir().unwrap();
    write_doc(dir.path(), "a.yaml", &simple_workflow("core.same", "worker"));
    write_doc(dir.path(), "b.yaml", &simple_workflow("core.same", "worker"));
    let s = setup(&["worker"]);

    let report = s.factory.synthesize_all(&[dir.path().to_path_buf()], None);

    assert_eq!(report.synthesized.len(), 1);
    assert!(report.synthesized["core_same"].source_path.ends_with("a.yaml"));
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].stage, SkipStage::Synthesis);
}

#[test]
fn colliding_derived_names_get_suffixes() {
    let dir = tempdir().unwrap();
    write_doc(dir.path(), "a.yaml", &simple_workflow("core.a-b", "worker"));
    write_doc(dir.path(), "b.yaml", &simple_workflow("core.a_b", "worker"));
    let s = setup(&["worker"]);

    let report = s.factory.synthesize_all(&[dir.path().to_path_buf()], None);

    assert_eq!(
        report.synthesized.keys().collect::<Vec<_>>(),
        vec!["core_a_b", "core_a_b_2"]
    );
    assert_eq!(report.synthesized["core_a_b_2"].template_id, "core.a_b");
}

#[test]
fn scanner_honours_skip_patterns_and_explicit_files() {
    let dir = tempdir().unwrap();
    write_doc(dir.path(), "flow.yaml", &simple_workflow("core.flow", "worker"));
    let template = write_doc(
        dir.path(),
        "workflow_template.json",
        &simple_workflow("core.tpl", "worker"),
    );
    write_doc(dir.path(), "example_flow.yml", &simple_workflow("core.example", "worker"));

    let scanner = TemplateScanner::default();
    let (found, skipped) = scanner.scan(&[dir.path().to_path_buf()]);
    assert_eq!(found, vec![dir.path().join("flow.yaml")]);
    assert!(skipped.is_empty());

    let (found, _) = scanner.scan(&[template.clone()]);
    assert_eq!(found, vec![template]);

    let (found, skipped) = scanner.scan(&[dir.path().join("missing")]);
    assert!(found.is_empty());
    assert_eq!(skipped[0].stage, SkipStage::Import);
}

#[tokio::test]
async fn supplied_lookup_produces_runnable_instances() {
    let dir = tempdir().unwrap();
    write_doc(dir.path(), "flow.yaml", &simple_workflow("core.flow", "worker"));
    let s = setup(&["worker"]);
    let lookup: Arc<dyn AgentLookup> =
        Arc::new(FixedLookup::default().with(ScriptedAgent::new("worker", common::call_log())));

    let report = s.factory.synthesize_all(&[dir.path().to_path_buf()], Some(lookup));

    let instance = report.synthesized["core_flow"].instance.clone().unwrap();
    assert!(instance.has_lookup());
    let run = instance.run("go", &serde_json::Map::new()).await;
    assert!(run.success);
    assert!(s.agents.cached_instance("core_flow").is_none());
}

#[test]
fn failed_documents_take_their_dependents_with_them() {
    let dir = tempdir().unwrap();
    let broken = json!({
        "workflow_id": "broken.flow",
        "workflow_name": "Broken",
        "core_phases": { "run": { "tasks": [] } }
    });
    write_doc(dir.path(), "a_broken.json", &broken);
    write_doc(dir.path(), "b_caller.json", &simple_workflow("caller", "broken_flow"));
    write_doc(dir.path(), "c_self.json", &simple_workflow("selfish", "selfish"));
    write_doc(dir.path(), "d_chained.json", &simple_workflow("chained", "caller"));
    write_doc(dir.path(), "e_good.json", &simple_workflow("core.good", "worker"));
    let s = setup(&["worker"]);

    let report = s.factory.synthesize_all(&[dir.path().to_path_buf()], None);

    assert_eq!(report.synthesized.keys().collect::<Vec<_>>(), vec!["core_good"]);
    let subjects: Vec<&str> = report
        .skipped
        .iter()
        .map(|item| {
            assert_eq!(item.stage, SkipStage::Compile);
            item.subject.rsplit('/').next().unwrap_or_default()
        })
        .collect();
    assert_eq!(
        subjects,
        vec!["a_broken.json", "b_caller.json", "c_self.json", "d_chained.json"]
    );
    assert!(report.skipped[1].reason.contains("unknown agent `broken_flow`"));
    assert!(report.skipped[2].reason.contains("the workflow's own agent"));
    assert!(report.skipped[3].reason.contains("unknown agent `caller`"));
    for name in ["broken_flow", "caller", "selfish", "chained"] {
        assert!(!s.agents.contains(name), "{name} should not be registered");
    }
}

#[test]
fn bindings_to_a_shadowed_name_resolve_to_the_hand_authored_agent() {
    let dir = tempdir().unwrap();
    write_doc(dir.path(), "a_planner.yaml", &simple_workflow("planner", "worker"));
    write_doc(dir.path(), "b_user.yaml", &simple_workflow("core.user", "planner"));
    let s = setup(&["worker", "planner"]);

    let report = s.factory.synthesize_all(&[dir.path().to_path_buf()], None);

    assert_eq!(report.synthesized.keys().collect::<Vec<_>>(), vec!["core_user"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].stage, SkipStage::Synthesis);
    assert_eq!(s.agents.get("planner").unwrap().origin(), &EntryOrigin::Manual);
}

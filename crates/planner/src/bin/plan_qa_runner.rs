use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Value, json};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing_subscriber::EnvFilter;

use chat_tree_planner::{
    ChatMessageOperations, ChatMutationPlan, ChatMutationPlanner, ChatPreBranchInfo,
    MessageCreateInput, MessageRef, MessageTreePlanner, MessageUpdate, PlanError, SettingsError,
    SettingsStore,
};

#[derive(Debug, Clone)]
struct RunnerArgs {
    mode: Mode,
    config_path: Option<PathBuf>,
    init_config: bool,
}

#[derive(Debug, Clone)]
enum Mode {
    Scenario(Scenario),
    Input(PathBuf),
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    SingleCreate,
    CreateWithTip,
    ImplicitChain,
    ExplicitChain,
    NestedInput,
    BranchingReject,
    CyclicCreates,
    DeleteReparent,
    DeleteRoot,
    CascadeDelete,
    MissingTopology,
    Combined,
    All,
}

const ALL_SCENARIOS: &[Scenario] = &[
    Scenario::SingleCreate,
    Scenario::CreateWithTip,
    Scenario::ImplicitChain,
    Scenario::ExplicitChain,
    Scenario::NestedInput,
    Scenario::BranchingReject,
    Scenario::CyclicCreates,
    Scenario::DeleteReparent,
    Scenario::DeleteRoot,
    Scenario::CascadeDelete,
    Scenario::MissingTopology,
    Scenario::Combined,
];

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "single_create" => Some(Self::SingleCreate),
            "create_with_tip" => Some(Self::CreateWithTip),
            "implicit_chain" => Some(Self::ImplicitChain),
            "explicit_chain" => Some(Self::ExplicitChain),
            "nested_input" => Some(Self::NestedInput),
            "branching_reject" => Some(Self::BranchingReject),
            "cyclic_creates" => Some(Self::CyclicCreates),
            "delete_reparent" => Some(Self::DeleteReparent),
            "delete_root" => Some(Self::DeleteRoot),
            "cascade_delete" => Some(Self::CascadeDelete),
            "missing_topology" => Some(Self::MissingTopology),
            "combined" => Some(Self::Combined),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::SingleCreate => "single_create",
            Self::CreateWithTip => "create_with_tip",
            Self::ImplicitChain => "implicit_chain",
            Self::ExplicitChain => "explicit_chain",
            Self::NestedInput => "nested_input",
            Self::BranchingReject => "branching_reject",
            Self::CyclicCreates => "cyclic_creates",
            Self::DeleteReparent => "delete_reparent",
            Self::DeleteRoot => "delete_root",
            Self::CascadeDelete => "cascade_delete",
            Self::MissingTopology => "missing_topology",
            Self::Combined => "combined",
            Self::All => "all",
        }
    }
}

/// Shape of an `--input` file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanRequest {
    #[serde(default)]
    operations: ChatMessageOperations,
    #[serde(default)]
    branch_info: ChatPreBranchInfo,
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing --scenario or --input argument"))]
    MissingMode { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("planning failed: {source}"))]
    Plan {
        stage: &'static str,
        source: PlanError,
    },
    #[snafu(display("settings failed: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
    #[snafu(display("file operation failed at '{path}': {source}"))]
    FileIo {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("invalid JSON: {source}"))]
    Json {
        stage: &'static str,
        source: serde_json::Error,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

fn main() {
    if let Err(error) = run() {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;

    let mut store = match args.config_path.clone() {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::load(),
    };
    init_tracing(&store.settings().log_filter);

    if args.init_config {
        let settings = store.settings().clone();
        store.update(settings).context(SettingsSnafu {
            stage: "init-config-persist",
        })?;
        println!("config_path={}", store.config_path().display());
    }

    let planner = MessageTreePlanner::new(store.settings().clone());
    match args.mode {
        Mode::Input(path) => run_input(&planner, path),
        Mode::Scenario(scenario) => {
            println!("scenario={}", scenario.name());
            match scenario {
                Scenario::All => {
                    for scenario in ALL_SCENARIOS {
                        run_scenario(&planner, *scenario)?;
                    }
                }
                scenario => run_scenario(&planner, scenario)?,
            }
            println!("runner_ok=true");
            Ok(())
        }
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    // stdout carries key=value results, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut mode = None;
    let mut config_path = None;
    let mut init_config = false;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                mode = Some(Mode::Scenario(parsed));
            }
            "--input" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-input-value",
                    arg: "--input",
                })?;
                mode = Some(Mode::Input(PathBuf::from(value)));
            }
            "--config" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-config-value",
                    arg: "--config",
                })?;
                config_path = Some(PathBuf::from(value));
            }
            "--init-config" => init_config = true,
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        mode: mode.context(MissingModeSnafu {
            stage: "parse-args-mode-required",
        })?,
        config_path,
        init_config,
    })
}

fn run_input(planner: &MessageTreePlanner, path: PathBuf) -> RunnerResult<()> {
    let raw = std::fs::read_to_string(&path).context(FileIoSnafu {
        stage: "input-read",
        path: path.display().to_string(),
    })?;
    let request: PlanRequest = serde_json::from_str(&raw).context(JsonSnafu {
        stage: "input-parse",
    })?;

    let plan = planner
        .plan(&request.operations, &request.branch_info)
        .context(PlanSnafu {
            stage: "input-plan",
        })?;

    let rendered = serde_json::to_string_pretty(&plan).context(JsonSnafu {
        stage: "input-render",
    })?;
    println!("{rendered}");
    Ok(())
}

fn run_scenario(planner: &MessageTreePlanner, scenario: Scenario) -> RunnerResult<()> {
    let name = scenario.name();
    match scenario {
        Scenario::SingleCreate => expect_plan(
            planner,
            name,
            &operations_create(vec![MessageCreateInput::new("1").with_content("Hello")]),
            &ChatPreBranchInfo::default(),
            json!({ "create": { "id": "1", "content": "Hello" } }),
        ),
        Scenario::CreateWithTip => expect_plan(
            planner,
            name,
            &operations_create(vec![MessageCreateInput::new("1").with_content("Hello")]),
            &ChatPreBranchInfo::new(Some("123".into())),
            json!({ "create": {
                "id": "1",
                "content": "Hello",
                "parent": { "connect": { "id": "123" } }
            } }),
        ),
        Scenario::ImplicitChain => expect_plan(
            planner,
            name,
            &operations_create(vec![
                MessageCreateInput::new("1").with_content("Hello"),
                MessageCreateInput::new("2").with_content("World"),
            ]),
            &ChatPreBranchInfo::new(Some("123".into())),
            json!({ "create": {
                "id": "2",
                "content": "World",
                "parent": { "create": {
                    "id": "1",
                    "content": "Hello",
                    "parent": { "connect": { "id": "123" } }
                } }
            } }),
        ),
        Scenario::ExplicitChain => {
            let plan = plan_or_fail(
                planner,
                name,
                &operations_create(vec![
                    MessageCreateInput::new("1").with_parent("3"),
                    MessageCreateInput::new("2").with_parent("1"),
                    MessageCreateInput::new("3").with_parent("4"),
                    MessageCreateInput::new("4"),
                ]),
                &ChatPreBranchInfo::new(Some("123".into())),
            )?;
            let chain = chain_ids(&plan);
            println!("{name}_chain={}", chain.join(">"));
            ensure(name, chain == ["2", "1", "3", "4"], "chain order mismatch")?;
            let anchor = plan
                .create
                .as_ref()
                .and_then(|create| create.anchor())
                .map(|id| id.to_string());
            ensure(name, anchor.as_deref() == Some("123"), "chain not anchored at tip")
        }
        Scenario::NestedInput => {
            let plan = plan_or_fail(
                planner,
                name,
                &operations_create(vec![
                    MessageCreateInput::new("3").with_parent("2"),
                    MessageCreateInput::new("2").with_nested_parent(MessageCreateInput::new("1")),
                ]),
                &ChatPreBranchInfo::new(Some("123".into())),
            )?;
            let chain = chain_ids(&plan);
            println!("{name}_chain={}", chain.join(">"));
            ensure(name, chain == ["3", "2", "1"], "nested input not unfolded")
        }
        Scenario::BranchingReject => {
            let result = planner.plan(
                &operations_create(vec![
                    MessageCreateInput::new("1"),
                    MessageCreateInput::new("2").with_parent("1"),
                    MessageCreateInput::new("3").with_parent("1"),
                ]),
                &ChatPreBranchInfo::new(Some("123".into())),
            );
            let rejected = matches!(result, Err(PlanError::BranchingDetected { .. }));
            println!("{name}_rejected={rejected}");
            ensure(name, rejected, "forked create batch was accepted")
        }
        Scenario::CyclicCreates => {
            let plan = plan_or_fail(
                planner,
                name,
                &operations_create(vec![
                    MessageCreateInput::new("1").with_parent("2"),
                    MessageCreateInput::new("2").with_parent("1"),
                    MessageCreateInput::new("3").with_parent("4"),
                    MessageCreateInput::new("4").with_parent("3"),
                ]),
                &ChatPreBranchInfo::default(),
            )?;
            let chain = chain_ids(&plan);
            let mut unique = chain.clone();
            unique.sort();
            unique.dedup();
            println!("{name}_chain={}", chain.join(">"));
            ensure(name, unique.len() == chain.len(), "nested chain repeats an id")
        }
        Scenario::DeleteReparent => expect_plan(
            planner,
            name,
            &operations_delete(&["B"]),
            &ChatPreBranchInfo::default().with_node("B", Some("A"), ["C", "D"]),
            json!({
                "update": [
                    { "id": "C", "parent": { "connect": { "id": "A" } } },
                    { "id": "D", "parent": { "connect": { "id": "A" } } }
                ],
                "delete": [{ "id": "B" }]
            }),
        ),
        Scenario::DeleteRoot => expect_plan(
            planner,
            name,
            &operations_delete(&["A"]),
            &ChatPreBranchInfo::default().with_node("A", None, ["B"]),
            json!({
                "update": [{ "id": "B", "parent": { "disconnect": true } }],
                "delete": [{ "id": "A" }]
            }),
        ),
        Scenario::CascadeDelete => expect_plan(
            planner,
            name,
            &operations_delete(&["B", "C"]),
            &ChatPreBranchInfo::default()
                .with_node("B", Some("A"), ["C"])
                .with_node("C", Some("B"), ["D"]),
            json!({
                "update": [
                    { "id": "C", "parent": { "connect": { "id": "A" } } },
                    { "id": "D", "parent": { "connect": { "id": "A" } } }
                ],
                "delete": [{ "id": "B" }, { "id": "C" }]
            }),
        ),
        Scenario::MissingTopology => {
            let result = planner.plan(&operations_delete(&["ghost"]), &ChatPreBranchInfo::default());
            let rejected = matches!(result, Err(PlanError::MissingTreeTopology { .. }));
            println!("{name}_rejected={rejected}");
            ensure(name, rejected, "delete without topology was accepted")
        }
        Scenario::Combined => expect_plan(
            planner,
            name,
            &ChatMessageOperations {
                create: vec![MessageCreateInput::new("n1").with_content("question")],
                update: vec![MessageUpdate::new("m1").with_content("edited")],
                delete: vec![MessageRef::new("m2")],
            },
            &ChatPreBranchInfo::new(Some("m3".into())).with_node("m2", Some("m1"), ["m3"]),
            json!({
                "create": {
                    "id": "n1",
                    "content": "question",
                    "parent": { "connect": { "id": "m3" } }
                },
                "update": [
                    { "id": "m1", "content": "edited" },
                    { "id": "m3", "parent": { "connect": { "id": "m1" } } }
                ],
                "delete": [{ "id": "m2" }]
            }),
        ),
        Scenario::All => ScenarioFailedSnafu {
            stage: "scenario-dispatch",
            scenario: name,
            reason: "'all' is expanded by the caller".to_string(),
        }
        .fail(),
    }
}

fn operations_create(records: Vec<MessageCreateInput>) -> ChatMessageOperations {
    ChatMessageOperations {
        create: records,
        ..ChatMessageOperations::default()
    }
}

fn operations_delete(ids: &[&str]) -> ChatMessageOperations {
    ChatMessageOperations {
        delete: ids.iter().map(|id| MessageRef::new(*id)).collect(),
        ..ChatMessageOperations::default()
    }
}

fn plan_or_fail(
    planner: &MessageTreePlanner,
    scenario: &'static str,
    operations: &ChatMessageOperations,
    branch_info: &ChatPreBranchInfo,
) -> RunnerResult<ChatMutationPlan> {
    planner
        .plan(operations, branch_info)
        .context(PlanSnafu {
            stage: "scenario-plan",
        })?
        .context(ScenarioFailedSnafu {
            stage: "scenario-plan-empty",
            scenario,
            reason: "planner returned no plan".to_string(),
        })
}

fn expect_plan(
    planner: &MessageTreePlanner,
    scenario: &'static str,
    operations: &ChatMessageOperations,
    branch_info: &ChatPreBranchInfo,
    expected: Value,
) -> RunnerResult<()> {
    let plan = plan_or_fail(planner, scenario, operations, branch_info)?;
    let actual = serde_json::to_value(&plan).context(JsonSnafu {
        stage: "scenario-render",
    })?;

    let matches = actual == expected;
    println!("{scenario}={matches}");
    tracing::info!(
        scenario,
        updates = plan.update.len(),
        deletes = plan.delete.len(),
        "scenario planned"
    );
    if !matches {
        return ScenarioFailedSnafu {
            stage: "scenario-compare",
            scenario,
            reason: format!("expected {expected}, got {actual}"),
        }
        .fail();
    }
    Ok(())
}

fn chain_ids(plan: &ChatMutationPlan) -> Vec<String> {
    plan.create
        .iter()
        .flat_map(|create| create.lineage())
        .map(|node| node.id.to_string())
        .collect()
}

fn ensure(scenario: &'static str, condition: bool, reason: &str) -> RunnerResult<()> {
    if condition {
        println!("{scenario}=true");
        return Ok(());
    }
    ScenarioFailedSnafu {
        stage: "scenario-check",
        scenario,
        reason: reason.to_string(),
    }
    .fail()
}

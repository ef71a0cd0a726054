use std::{path::PathBuf, sync::Arc, thread, time::Duration};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use settle_api::{CallContext, HttpObjectStore, MemoryStore, ObjectStore};
use settle_engine::{CallArgument, Operation, OrchestrationError, Orchestrator, OrchestratorConfig, failure_message};
use settle_types::{Bindings, GroupVersionKind, ListSelector, ResourceHandle};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Apply resource templates to an object store and wait for the changes to settle.
#[derive(Parser, Debug)]
#[command(name = "settle", version, about)]
struct Cli {
    /// Use an in-process store; nothing persists after the command exits
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create every resource in the template
    Create(MutateArgs),
    /// Merge-patch every resource in the template
    Update(MutateArgs),
    /// Delete every resource in the template
    Delete(MutateArgs),
    /// Print the stored state of every resource in the template
    Get(TemplateArgs),
    /// List stored resources of one type
    List(ListArgs),
    /// Print the rendered template without contacting the store
    Render(TemplateArgs),
}

#[derive(Args, Debug)]
struct TemplateArgs {
    /// Template file (YAML or JSON, documents separated by `---`)
    #[arg(short = 'f', long = "filename")]
    file: PathBuf,

    /// Template binding as NAME=VALUE; VALUE is read as YAML
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_binding)]
    bindings: Vec<(String, Value)>,
}

#[derive(Args, Debug)]
struct MutateArgs {
    #[command(flatten)]
    template: TemplateArgs,

    /// Wait until the store shows the change
    #[arg(long)]
    wait: bool,

    /// How long to wait (e.g. 30s, 1m30s)
    #[arg(long, value_parser = parse_duration_arg, requires = "wait")]
    timeout: Option<Duration>,

    /// How often to poll while waiting (e.g. 250ms)
    #[arg(long, value_parser = parse_duration_arg, requires = "wait")]
    interval: Option<Duration>,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// e.g. `v1` or `apps/v1`
    api_version: String,

    kind: String,

    #[arg(short, long)]
    namespace: Option<String>,

    /// Label selector as key=value[,key=value]
    #[arg(short = 'l', long)]
    selector: Option<String>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = OrchestratorConfig::load().context("failed to load settle config")?;
    let store: Arc<dyn ObjectStore> = if cli.memory {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(HttpObjectStore::from_env()?)
    };
    let orchestrator = Orchestrator::with_config(store, config);
    let context = CallContext::background();
    cancel_on_interrupt(&context);

    match cli.command {
        Command::Create(args) => mutate(&orchestrator, &context, Operation::Create, args),
        Command::Update(args) => mutate(&orchestrator, &context, Operation::Update, args),
        Command::Delete(args) => mutate(&orchestrator, &context, Operation::Delete, args),
        Command::Get(args) => {
            let mut handles = Vec::new();
            let mut arguments = template_arguments(&args);
            arguments.push(CallArgument::from(&mut handles));
            orchestrator
                .get(&context, arguments)
                .map_err(|error| fatal(Operation::Get, &error))?;
            print_handles(&handles)
        }
        Command::List(args) => {
            let gvk = GroupVersionKind::from_api_version(&args.api_version, args.kind)?;
            let mut selector = ListSelector::new(gvk);
            if let Some(namespace) = args.namespace {
                selector = selector.in_namespace(namespace);
            }
            if let Some(expression) = args.selector.as_deref() {
                selector = selector
                    .with_label_expression(expression)
                    .ok_or_else(|| anyhow!("invalid label selector '{expression}'"))?;
            }
            let mut handles = Vec::new();
            orchestrator
                .list(&context, settle_engine::args![selector, &mut handles])
                .map_err(|error| fatal(Operation::List, &error))?;
            print_handles(&handles)
        }
        Command::Render(args) => {
            let documents = orchestrator
                .render(template_arguments(&args))
                .map_err(|error| fatal(Operation::Render, &error))?;
            print_documents(&documents)
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .try_init();
}

/// `RUST_LOG` when set and valid, `warn` otherwise.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Cancel `context` on Ctrl-C so in-flight store calls and waits give up promptly.
fn cancel_on_interrupt(context: &CallContext) {
    let token = context.token().clone();
    let spawned = thread::Builder::new().name("settle-signal".into()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(error) => {
                debug!(%error, "signal handler unavailable");
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
    });
    if let Err(error) = spawned {
        debug!(%error, "failed to spawn signal handler");
    }
}

fn mutate(orchestrator: &Orchestrator<Arc<dyn ObjectStore>>, context: &CallContext, operation: Operation, args: MutateArgs) -> Result<()> {
    // Keys to report for delete, which returns no state.
    let rendered = orchestrator
        .render(template_arguments(&args.template))
        .map_err(|error| fatal(Operation::Render, &error))?;

    let mut handles = Vec::new();
    let mut arguments = template_arguments(&args.template);
    if let Some(timeout) = args.timeout {
        arguments.push(CallArgument::timeout(timeout));
    }
    if let Some(interval) = args.interval {
        arguments.push(CallArgument::interval(interval));
    }
    let deleting = operation == Operation::Delete;
    if !deleting {
        arguments.push(CallArgument::from(&mut handles));
    }

    let operation = if args.wait { waiting(operation) } else { operation };
    let outcome = match operation {
        Operation::Create => orchestrator.create(context, arguments),
        Operation::CreateAndWait => orchestrator.try_create_and_wait(context, arguments),
        Operation::Update => orchestrator.update(context, arguments),
        Operation::UpdateAndWait => orchestrator.try_update_and_wait(context, arguments),
        Operation::Delete => orchestrator.delete(context, arguments),
        Operation::DeleteAndWait => orchestrator.try_delete_and_wait(context, arguments),
        other => return Err(anyhow!("{other} is not a mutation")),
    };
    outcome.map_err(|error| fatal(operation, &error))?;

    if deleting {
        for document in &rendered {
            if let Ok(key) = settle_types::ObjectKey::from_document(document) {
                println!("{key} deleted");
            }
        }
        return Ok(());
    }
    print_handles(&handles)
}

fn waiting(operation: Operation) -> Operation {
    match operation {
        Operation::Create => Operation::CreateAndWait,
        Operation::Update => Operation::UpdateAndWait,
        Operation::Delete => Operation::DeleteAndWait,
        other => other,
    }
}

fn template_arguments<'a>(args: &TemplateArgs) -> Vec<CallArgument<'a>> {
    let mut arguments = vec![CallArgument::template_file(args.file.clone())];
    if !args.bindings.is_empty() {
        arguments.push(CallArgument::from(args.bindings.iter().cloned().collect::<Bindings>()));
    }
    arguments
}

fn fatal(operation: Operation, error: &OrchestrationError) -> anyhow::Error {
    anyhow!(failure_message(operation, error))
}

fn print_handles(handles: &[ResourceHandle]) -> Result<()> {
    let documents: Vec<Value> = handles.iter().filter_map(ResourceHandle::document).collect();
    print_documents(&documents)
}

fn print_documents(documents: &[Value]) -> Result<()> {
    let mut rendered = Vec::with_capacity(documents.len());
    for document in documents {
        rendered.push(serde_yaml::to_string(document).context("failed to serialize document")?);
    }
    print!("{}", rendered.join("---\n"));
    Ok(())
}

fn parse_binding(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw.split_once('=').ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("binding name is empty in '{raw}'"));
    }
    let value = if value.is_empty() {
        Value::String(String::new())
    } else {
        serde_yaml::from_str(value).map_err(|error| format!("invalid value for '{name}': {error}"))?
    };
    Ok((name.to_string(), value))
}

fn parse_duration_arg(raw: &str) -> Result<Duration, String> {
    settle_util::parse_duration(raw).ok_or_else(|| format!("invalid duration '{raw}' (expected e.g. 10s, 250ms, 1m30s)"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn binding_values_are_yaml() {
        assert_eq!(parse_binding("replicas=3"), Ok(("replicas".into(), json!(3))));
        assert_eq!(parse_binding("name=web"), Ok(("name".into(), json!("web"))));
        assert_eq!(parse_binding("labels={app: web}"), Ok(("labels".into(), json!({ "app": "web" }))));
        assert_eq!(parse_binding("empty="), Ok(("empty".into(), json!(""))));
        assert!(parse_binding("novalue").is_err());
        assert!(parse_binding("=x").is_err());
    }

    #[test]
    fn wait_flags_require_wait() {
        let parsed = Cli::try_parse_from(["settle", "create", "-f", "app.yaml", "--timeout", "30s"]);
        assert!(parsed.is_err());
        let parsed = Cli::try_parse_from(["settle", "create", "-f", "app.yaml", "--wait", "--timeout", "30s", "--set", "name=web"])
            .expect("parse");
        let Command::Create(args) = parsed.command else {
            panic!("expected create");
        };
        assert_eq!(args.timeout, Some(Duration::from_secs(30)));
        assert_eq!(args.template.bindings, vec![("name".to_string(), json!("web"))]);
    }

    #[test]
    fn log_level_follows_rust_log() {
        let chosen = temp_env::with_var("RUST_LOG", Some("settle_engine=debug"), || log_filter().to_string());
        assert_eq!(chosen, "settle_engine=debug");
        let fallback = temp_env::with_var_unset("RUST_LOG", || log_filter().to_string());
        assert_eq!(fallback, "warn");
    }

    #[test]
    fn waiting_variants() {
        assert_eq!(waiting(Operation::Update), Operation::UpdateAndWait);
        assert_eq!(waiting(Operation::Get), Operation::Get);
    }
}

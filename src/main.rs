//! Test Orchestrator - concurrent test execution CLI
//!
//! Runs tests defined in a configuration file or as cluster custom resources
//! through local executor processes, with bounded concurrency, persisted
//! executions, and webhook/Slack lifecycle notifications.
//!
//! ## Usage
//!
//! ```bash
//! # Write a sample configuration
//! test-orchestrator config init
//!
//! # Run one test and wait for its result
//! test-orchestrator run --test api-health --param URL=http://localhost:8080/health
//!
//! # Run every test labelled app=api, four at a time
//! test-orchestrator run --selector app=api -j 4
//!
//! # Inspect executions
//! test-orchestrator executions list --status error
//! test-orchestrator executions export executions.csv
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use test_orchestrator::api::{ApiService, ExecuteQuery, TestsQuery};
use test_orchestrator::artifacts::LocalArtifactStore;
use test_orchestrator::cli::{
    Args, ArtifactsAction, Command, ConfigAction, ExecutionsAction, RunArgs, TestsArgs,
};
use test_orchestrator::config::{
    print_env_help, AppConfig, DefinitionsSource, EnvConfig, StorageKind,
};
use test_orchestrator::definitions::ExecutorDefinitions;
use test_orchestrator::events::{EventEmitter, Notifier, SlackSink, WebhookClient};
use test_orchestrator::executor::{ExecutorRegistry, ProcessExecutor};
use test_orchestrator::k8s::{K8sClient, K8sDefinitions, KubeCronScheduler};
use test_orchestrator::models::{
    Execution, ExecutionFilter, ExecutionRequest, ExecutionStatus, ExecutorDefinition,
};
use test_orchestrator::orchestrator::{ExecutionTarget, Orchestrator};
use test_orchestrator::output::{ExecutionFormatter, OutputFormat};
use test_orchestrator::storage::{
    export_executions, ExecutionStore, ExportFormat, FileExecutionStore, MemoryExecutionStore,
};
use test_orchestrator::utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env = EnvConfig::load();
    let config_path = args.config.clone().or_else(|| env.config_file.clone());
    let mut config = AppConfig::load_or_default(config_path.as_deref())?;
    config.apply_env(&env);
    config.validate()?;

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        config.log_level()
    };
    init_logger(level);

    match args.command {
        Command::Run(run_args) => {
            run_tests(&config, run_args).await?;
        }
        Command::Executions(executions_args) => {
            manage_executions(&config, executions_args.action).await?;
        }
        Command::Tests(tests_args) => {
            list_tests(&config, tests_args).await?;
        }
        Command::Artifacts(artifacts_args) => {
            manage_artifacts(&config, artifacts_args.action).await?;
        }
        Command::Config(config_args) => {
            manage_config(&config, config_path.as_deref(), config_args.action)?;
        }
        Command::Env => {
            print_env_help();
            println!();
            env.print_summary();
        }
    }

    Ok(())
}

fn open_store(config: &AppConfig) -> Result<Arc<dyn ExecutionStore>> {
    match config.storage.kind {
        StorageKind::Memory => Ok(Arc::new(MemoryExecutionStore::new())),
        StorageKind::File => {
            let store = match &config.storage.path {
                Some(path) => FileExecutionStore::new(path),
                None => FileExecutionStore::default_dir(),
            };
            store.ensure_dir().with_context(|| {
                format!(
                    "Failed to create execution store at {}",
                    store.base_dir().display()
                )
            })?;
            info!(path = %store.base_dir().display(), "Using file execution store");
            Ok(Arc::new(store))
        }
    }
}

fn artifacts_dir(config: &AppConfig) -> PathBuf {
    config.artifacts_dir.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("test-orchestrator")
            .join("artifacts")
    })
}

/// Every executor definition with a command runs as a local process
fn process_registry(definitions: &[ExecutorDefinition], process: Arc<ProcessExecutor>) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    for definition in definitions {
        if definition.command.is_empty() {
            warn!(executor = %definition.name, "Executor has no command, skipping");
            continue;
        }
        registry.register_definition(definition, process.clone());
    }
    registry
}

/// Wire the orchestrator from configuration. The returned task delivers
/// events until every emitter handle is dropped.
async fn build_service(config: &AppConfig) -> Result<(ApiService, JoinHandle<()>)> {
    let store = open_store(config)?;
    let process = Arc::new(ProcessExecutor::new(store.clone()));
    let client = WebhookClient::new(config.webhook_timeout_secs)?;

    let mut notifier = Notifier::new(client.clone());
    if let Some(slack) = SlackSink::from_url(client, config.slack_webhook_url.as_deref()) {
        notifier = notifier.with_sink(Arc::new(slack));
    }

    let orchestrator = match config.definitions {
        DefinitionsSource::Static => {
            let definitions = Arc::new(config.static_definitions());
            let registry = process_registry(definitions.executors(), process);
            notifier = notifier.with_webhooks(definitions.clone());

            Orchestrator::new(store, registry)
                .with_tests(definitions.clone())
                .with_executors(definitions.clone())
                .with_secrets(definitions)
        }
        DefinitionsSource::Kubernetes => {
            let client = K8sClient::new(config.namespace.clone())
                .await
                .context("Failed to connect to Kubernetes")?;
            if !client.namespace_exists(client.namespace()).await? {
                anyhow::bail!("Namespace {} does not exist", client.namespace());
            }
            if !client.crds_installed().await? {
                warn!("Test custom resource definitions are not installed");
            }

            let definitions = Arc::new(K8sDefinitions::new(client.clone()));
            let executors = ExecutorDefinitions::list(definitions.as_ref(), "")
                .await
                .context("Failed to list executors")?;
            let registry = process_registry(&executors, process);
            notifier = notifier.with_webhooks(definitions.clone());

            Orchestrator::new(store, registry)
                .with_tests(definitions.clone())
                .with_executors(definitions.clone())
                .with_secrets(definitions)
                .with_scheduler(Arc::new(KubeCronScheduler::new(
                    client,
                    config.api_uri.clone(),
                )))
        }
    };

    let (events, delivery) = EventEmitter::spawn(notifier);
    let orchestrator = orchestrator
        .with_namespace(config.namespace.clone())
        .with_concurrency(config.concurrency)
        .with_events(events);

    let artifacts = Arc::new(LocalArtifactStore::new(artifacts_dir(config)));
    Ok((ApiService::new(orchestrator, artifacts), delivery))
}

/// Service over stored executions only, no definitions or executors
fn local_service(config: &AppConfig) -> Result<ApiService> {
    let orchestrator = Orchestrator::new(open_store(config)?, ExecutorRegistry::new());
    let artifacts = Arc::new(LocalArtifactStore::new(artifacts_dir(config)));
    Ok(ApiService::new(orchestrator, artifacts))
}

fn output_format(format: &str) -> OutputFormat {
    OutputFormat::from_str(format).unwrap_or_else(|| {
        warn!("Unknown output format '{format}', using table");
        OutputFormat::Table
    })
}

async fn run_tests(config: &AppConfig, args: RunArgs) -> Result<()> {
    let target = match (args.test, args.selector) {
        (Some(test), _) => ExecutionTarget::Test(test),
        (None, Some(selector)) => ExecutionTarget::Selector(selector),
        (None, None) => anyhow::bail!("Either --test or --selector is required"),
    };
    let request = ExecutionRequest {
        name: args.name,
        namespace: args.namespace.unwrap_or_default(),
        params: args.params.into_iter().collect(),
        args: args.args,
        sync: !args.run_async,
    };
    let query = ExecuteQuery {
        concurrency: args.concurrency,
        callback: args.run_now,
    };

    let (service, delivery) = build_service(config).await?;
    let shutdown = CancellationToken::new();
    let service = service.with_shutdown(shutdown.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running tests");
            shutdown.cancel();
        }
    });

    info!(batch = ?target, concurrency = ?query.concurrency, "Starting test executions");
    let mut executions = service.execute(target, request, &query).await?.into_executions();

    if args.run_async {
        executions = wait_for_completion(service.orchestrator().store().as_ref(), executions).await;
    }

    let format = output_format(&args.format);
    let formatter = ExecutionFormatter::new(format);
    println!("{}", formatter.format_batch(&executions));
    if format == OutputFormat::Summary {
        print!("{}", formatter.format_metrics(&service.metrics()));
    }

    // let queued notifications go out before exiting
    drop(service);
    if tokio::time::timeout(
        Duration::from_secs(config.webhook_timeout_secs + 1),
        delivery,
    )
    .await
    .is_err()
    {
        warn!("Timed out delivering lifecycle notifications");
    }

    let failed = executions.iter().filter(|e| e.is_failed()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} executions failed", executions.len());
    }
    Ok(())
}

/// Poll the store until every dispatched execution finished
async fn wait_for_completion(store: &dyn ExecutionStore, executions: Vec<Execution>) -> Vec<Execution> {
    let pending = executions
        .iter()
        .filter(|e| !e.id.is_empty() && !e.is_completed())
        .count();
    if pending > 0 {
        info!(pending, "Waiting for running executions");
    }

    let mut finished = Vec::with_capacity(executions.len());
    for mut execution in executions {
        while !execution.id.is_empty() && !execution.is_completed() {
            tokio::time::sleep(Duration::from_millis(200)).await;
            match store.get(&execution.id).await {
                Ok(stored) => execution = stored,
                Err(e) => {
                    warn!(execution = %execution.id, "Can't reload execution: {e}");
                    break;
                }
            }
        }
        finished.push(execution);
    }
    finished
}

async fn manage_executions(config: &AppConfig, action: ExecutionsAction) -> Result<()> {
    let service = local_service(config)?;

    match action {
        ExecutionsAction::List {
            test,
            status,
            search,
            selector,
            page,
            page_size,
            format,
        } => {
            let filter = ExecutionFilter {
                test_name: test,
                text_search: search,
                status: status
                    .as_deref()
                    .map(ExecutionStatus::from_str)
                    .transpose()?,
                selector,
                page,
                page_size,
                ..Default::default()
            };
            let listing = service.list_executions(&filter).await?;
            println!(
                "{}",
                ExecutionFormatter::new(output_format(&format)).format_executions(&listing)
            );
        }
        ExecutionsAction::Get { id, test, format } => {
            let execution = match test {
                Some(test) => service.get_test_execution(&test, &id).await?,
                None => service.get_execution(&id).await?,
            };
            println!(
                "{}",
                ExecutionFormatter::new(output_format(&format)).format_execution(&execution)
            );
        }
        ExecutionsAction::Export { output, test } => {
            let format = ExportFormat::from_extension(&output).ok_or_else(|| {
                anyhow::anyhow!("Unsupported export format: {}", output.display())
            })?;

            let mut executions = Vec::new();
            for page in 0.. {
                let filter = ExecutionFilter {
                    test_name: test.clone(),
                    ..Default::default()
                }
                .with_page(page, 500);
                let batch = service.orchestrator().store().list(&filter).await?;
                if batch.is_empty() {
                    break;
                }
                executions.extend(batch);
            }

            export_executions(&executions, &output, format)?;
            println!("Exported {} executions to {}", executions.len(), output.display());
        }
    }

    Ok(())
}

async fn list_tests(config: &AppConfig, args: TestsArgs) -> Result<()> {
    let (service, _delivery) = build_service(config).await?;
    let tests = service
        .list_tests_with_executions(&TestsQuery {
            selector: args.selector,
            text_search: args.search,
            test_type: args.test_type,
            status: args.status,
        })
        .await?;

    if tests.is_empty() {
        println!("No tests found");
        return Ok(());
    }

    println!("{:28} {:20} {:10} {}", "NAME", "TYPE", "STATUS", "LAST EXECUTION");
    for entry in tests {
        let (status, last) = match &entry.latest_execution {
            Some(e) => (
                e.status().to_string(),
                e.start_time
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default(),
            ),
            None => ("-".to_string(), "never".to_string()),
        };
        let schedule = entry
            .test
            .schedule
            .as_deref()
            .map(|s| format!(" [{s}]"))
            .unwrap_or_default();
        println!(
            "{:28} {:20} {:10} {}{}",
            entry.test.name, entry.test.test_type, status, last, schedule
        );
    }
    Ok(())
}

async fn manage_artifacts(config: &AppConfig, action: ArtifactsAction) -> Result<()> {
    let service = local_service(config)?;

    match action {
        ArtifactsAction::List { execution_id } => {
            let artifacts = service.list_artifacts(&execution_id).await?;
            if artifacts.is_empty() {
                println!("No artifacts for execution {execution_id}");
            }
            for artifact in artifacts {
                println!("{:10} {}", artifact.size, artifact.name);
            }
        }
        ArtifactsAction::Download {
            execution_id,
            name,
            output,
        } => {
            let mut reader = service.download_artifact(&execution_id, &name).await?;
            let destination = output.unwrap_or_else(|| {
                Path::new(&name)
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(&name))
            });
            let mut file = tokio::fs::File::create(&destination)
                .await
                .with_context(|| format!("Failed to create {}", destination.display()))?;
            let bytes = tokio::io::copy(&mut reader, &mut file).await?;
            println!("Saved {bytes} bytes to {}", destination.display());
        }
    }

    Ok(())
}

fn manage_config(config: &AppConfig, path: Option<&Path>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            match path.map(Path::to_path_buf).or_else(test_orchestrator::config::find_config) {
                Some(path) => println!("# {}", path.display()),
                None => println!("# defaults (no configuration file found)"),
            }
            print!("{}", serde_yaml::to_string(config)?);
        }
        ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists, use --force to overwrite",
                    path.display()
                );
            }
            AppConfig::example().save(&path)?;
            println!("Wrote sample configuration to {}", path.display());
        }
    }
    Ok(())
}

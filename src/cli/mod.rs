//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

/// Concurrent test execution orchestrator
#[derive(Parser, Debug)]
#[command(name = "test-orchestrator")]
#[command(version)]
#[command(about = "Run test workloads against pluggable executors with bounded concurrency")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute one test or every test matching a selector
    Run(RunArgs),

    /// Inspect stored executions
    Executions(ExecutionsArgs),

    /// List tests with their latest execution
    Tests(TestsArgs),

    /// Inspect execution artifacts
    Artifacts(ArtifactsArgs),

    /// Show or create the configuration file
    Config(ConfigArgs),

    /// Show supported environment variables
    Env,
}

/// Arguments for run command
#[derive(Parser, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["test", "selector"])))]
pub struct RunArgs {
    /// Test name
    #[arg(short, long)]
    pub test: Option<String>,

    /// Label selector, e.g. `app=api,tier=backend`
    #[arg(short, long)]
    pub selector: Option<String>,

    /// Tests running at once
    #[arg(short = 'j', long)]
    pub concurrency: Option<String>,

    /// Execution name (single test only)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Namespace override
    #[arg(long)]
    pub namespace: Option<String>,

    /// Parameter as KEY=VALUE, repeatable
    #[arg(short, long = "param", value_parser = parse_key_val)]
    pub params: Vec<(String, String)>,

    /// Extra executor arguments
    #[arg(long = "arg")]
    pub args: Vec<String>,

    /// Dispatch without waiting in the executor, then poll stored results
    #[arg(long = "async")]
    pub run_async: bool,

    /// Run scheduled tests now instead of registering their schedule
    #[arg(long)]
    pub run_now: bool,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

/// Arguments for executions command
#[derive(Parser, Debug)]
pub struct ExecutionsArgs {
    #[command(subcommand)]
    pub action: ExecutionsAction,
}

#[derive(Subcommand, Debug)]
pub enum ExecutionsAction {
    /// List executions, newest first
    List {
        /// Only executions of this test
        #[arg(short, long)]
        test: Option<String>,

        /// Only executions with this status
        #[arg(short, long)]
        status: Option<String>,

        /// Substring of the execution name
        #[arg(long)]
        search: Option<String>,

        /// Label selector
        #[arg(long)]
        selector: Option<String>,

        /// Page number, starting at 0
        #[arg(long, default_value = "0")]
        page: usize,

        /// Executions per page
        #[arg(long, default_value = "100")]
        page_size: usize,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show one execution by id, or by name with --test
    Get {
        /// Execution id, or execution name with --test
        id: String,

        /// Test the named execution belongs to
        #[arg(short, long)]
        test: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Export executions to a JSON or CSV file
    Export {
        /// Destination file; format follows the extension
        output: PathBuf,

        /// Only executions of this test
        #[arg(short, long)]
        test: Option<String>,
    },
}

/// Arguments for tests command
#[derive(Parser, Debug)]
pub struct TestsArgs {
    /// Label selector
    #[arg(short, long, default_value = "")]
    pub selector: String,

    /// Substring of the test name
    #[arg(long)]
    pub search: Option<String>,

    /// Only tests of this type
    #[arg(long = "type")]
    pub test_type: Option<String>,

    /// Comma separated statuses of the latest execution
    #[arg(long)]
    pub status: Option<String>,
}

/// Arguments for artifacts command
#[derive(Parser, Debug)]
pub struct ArtifactsArgs {
    #[command(subcommand)]
    pub action: ArtifactsAction,
}

#[derive(Subcommand, Debug)]
pub enum ArtifactsAction {
    /// List files of an execution
    List {
        /// Execution id
        execution_id: String,
    },

    /// Copy one artifact to a local file
    Download {
        /// Execution id
        execution_id: String,

        /// Artifact name
        name: String,

        /// Destination file; the artifact name when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write a sample configuration file
    Init {
        /// Destination file
        #[arg(default_value = "./test-orchestrator.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Parse `KEY=VALUE`
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid KEY=VALUE: no `=` found in `{s}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let args = Args::parse_from([
            "test-orchestrator",
            "run",
            "--selector",
            "app=api",
            "-j",
            "4",
            "--param",
            "URL=http://x/?a=b",
            "--async",
        ]);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.selector.as_deref(), Some("app=api"));
                assert_eq!(run.concurrency.as_deref(), Some("4"));
                assert_eq!(
                    run.params,
                    vec![("URL".to_string(), "http://x/?a=b".to_string())]
                );
                assert!(run.run_async);
                assert!(!run.run_now);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_requires_target() {
        assert!(Args::try_parse_from(["test-orchestrator", "run"]).is_err());
        assert!(Args::try_parse_from([
            "test-orchestrator",
            "run",
            "--test",
            "a",
            "--selector",
            "b"
        ])
        .is_err());
    }

    #[test]
    fn test_executions_get() {
        let args = Args::parse_from([
            "test-orchestrator",
            "executions",
            "get",
            "run-1",
            "--test",
            "api",
            "--config",
            "cfg.yaml",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("cfg.yaml")));
        match args.command {
            Command::Executions(ExecutionsArgs {
                action: ExecutionsAction::Get { id, test, .. },
            }) => {
                assert_eq!(id, "run-1");
                assert_eq!(test.as_deref(), Some("api"));
            }
            _ => panic!("Expected executions get"),
        }
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("a=b=c").unwrap(),
            ("a".to_string(), "b=c".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }
}

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use domain_inference::{
    exception::{InferenceException, InferenceResult},
    model::vo::{LogStream, RecipeKind, RecipePatch, StartRequest},
};
use serde_json::{json, Value};

use crate::infrastructure::{config::InferenceConfig, service_provider::ServiceProvider};

/// Run inference servers, benchmark clients and monitoring stacks as Slurm jobs.
#[derive(Parser, Debug)]
#[command(name = "inferbench", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (YAML), applied after `./config.yaml`. Repeatable.
    #[arg(long = "config", global = true)]
    pub config: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List recipes, of one kind or all
    Recipes {
        #[arg(long)]
        kind: Option<RecipeKind>,
    },
    /// Submit a job from a recipe
    Start(StartArgs),
    /// Cancel the job of an instance
    Stop {
        kind: RecipeKind,
        /// Instance id or scheduler job id
        id: String,
        /// Mark the instance stopped even if the scheduler refuses
        #[arg(long)]
        force: bool,
    },
    /// Show an instance, reconciled with the scheduler
    Status { kind: RecipeKind, id: String },
    /// List instances of a kind
    List {
        kind: RecipeKind,
        /// Only instances that have not reached a final status
        #[arg(long)]
        active: bool,
    },
    /// Print the tail of a job's output or error file
    Logs {
        kind: RecipeKind,
        id: String,
        #[arg(long, default_value = "output")]
        stream: LogStream,
        #[arg(short = 'n', long, default_value_t = 100)]
        lines: usize,
    },
    /// Show the results of a client run
    Results { id: String },
    /// Probe the health endpoint of a running service
    Health { id: String },
    /// Remove finished instances older than the configured age
    Cleanup {
        #[arg(long)]
        kind: Option<RecipeKind>,
        /// Overrides `orchestrator.registry.stale_after_hours`
        #[arg(long)]
        older_than_hours: Option<u64>,
    },
    /// Drop cached recipes and load them again from disk
    Reload,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    pub kind: RecipeKind,
    pub recipe: String,
    /// Block until the instance is ready (or, for client runs, finished)
    #[arg(long)]
    pub wait: bool,
    /// Seconds to wait, overriding the configured timeout
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Client runs: service id or URL to benchmark
    #[arg(long)]
    pub target: Option<String>,
    /// Monitors: service id to scrape. Repeatable.
    #[arg(long = "scrape")]
    pub targets: Vec<String>,
    /// Recipe overrides as JSON, e.g. `{"resources":{"gpus":2}}`
    #[arg(long)]
    pub overrides: Option<String>,
}

impl StartArgs {
    fn into_request(self) -> InferenceResult<StartRequest> {
        let overrides = self
            .overrides
            .as_deref()
            .map(serde_json::from_str::<RecipePatch>)
            .transpose()
            .map_err(|e| InferenceException::Configuration {
                setting: "overrides".to_owned(),
                reason: e.to_string(),
            })?;
        Ok(StartRequest {
            recipe_name: self.recipe,
            overrides,
            wait: self.wait,
            timeout: self.timeout.map(Duration::from_secs),
            target: self.target,
            targets: self.targets,
        })
    }
}

/// Execute one command, returning what should be printed.
pub async fn run(
    provider: &ServiceProvider,
    config: &InferenceConfig,
    command: Commands,
) -> InferenceResult<Value> {
    let value = match command {
        Commands::Recipes { kind } => {
            let kinds = kind.map_or_else(|| RecipeKind::ALL.to_vec(), |kind| vec![kind]);
            let mut recipes = serde_json::Map::new();
            for kind in kinds {
                let names = provider.lifecycle(kind).list_recipes().await?;
                recipes.insert(kind.dir_name().to_owned(), json!(names));
            }
            Value::Object(recipes)
        }
        Commands::Start(args) => {
            let lifecycle = provider.lifecycle(args.kind);
            json!(lifecycle.start(args.into_request()?).await?)
        }
        Commands::Stop { kind, id, force } => {
            let stopped = provider.lifecycle(kind).stop(&id, force).await?;
            json!({ "id": id, "stopped": stopped })
        }
        Commands::Status { kind, id } => json!(provider.lifecycle(kind).get_status(&id).await?),
        Commands::List { kind, active } => {
            json!(provider.lifecycle(kind).list_instances(active).await?)
        }
        Commands::Logs {
            kind,
            id,
            stream,
            lines,
        } => {
            let content = provider.lifecycle(kind).get_logs(&id, stream, lines).await?;
            Value::String(content)
        }
        Commands::Results { id } => {
            let results = provider
                .lifecycle(RecipeKind::Client)
                .get_results(&id)
                .await?;
            results.unwrap_or(Value::Null)
        }
        Commands::Health { id } => {
            json!(provider.lifecycle(RecipeKind::Server).check_health(&id).await?)
        }
        Commands::Cleanup {
            kind,
            older_than_hours,
        } => {
            let hours =
                older_than_hours.unwrap_or(config.orchestrator.registry.stale_after_hours);
            let max_age = Duration::from_secs(hours * 3600);
            let kinds = kind.map_or_else(|| RecipeKind::ALL.to_vec(), |kind| vec![kind]);
            let mut removed = serde_json::Map::new();
            for kind in kinds {
                let count = provider.lifecycle(kind).cleanup(max_age).await?;
                removed.insert(kind.dir_name().to_owned(), json!(count));
            }
            json!({ "removed": removed })
        }
        Commands::Reload => json!({ "loaded": provider.recipe_repo.reload().await? }),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_line_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn start_arguments_become_a_request() {
        let cli = Cli::parse_from([
            "inferbench",
            "start",
            "client",
            "load-test",
            "--wait",
            "--timeout",
            "600",
            "--target",
            "ab12cd34",
            "--overrides",
            r#"{"resources":{"gpus":2}}"#,
        ]);
        let Commands::Start(args) = cli.command else {
            panic!("expected start");
        };
        assert_eq!(args.kind, RecipeKind::Client);
        let request = args.into_request().unwrap();
        assert_eq!(request.recipe_name, "load-test");
        assert!(request.wait);
        assert_eq!(request.timeout, Some(Duration::from_secs(600)));
        assert_eq!(request.target.as_deref(), Some("ab12cd34"));
        assert!(request.overrides.is_some());
    }

    #[test]
    fn malformed_overrides_are_a_configuration_error() {
        let cli = Cli::parse_from(["inferbench", "start", "server", "vllm", "--overrides", "{"]);
        let Commands::Start(args) = cli.command else {
            panic!("expected start");
        };
        let err = args.into_request().unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[test]
    fn logs_accept_stream_names() {
        let cli = Cli::parse_from([
            "inferbench",
            "--config",
            "cluster.yaml",
            "logs",
            "servers",
            "12345678",
            "--stream",
            "stderr",
            "-n",
            "20",
        ]);
        assert_eq!(cli.config, [PathBuf::from("cluster.yaml")]);
        match cli.command {
            Commands::Logs {
                kind,
                stream,
                lines,
                ..
            } => {
                assert_eq!(kind, RecipeKind::Server);
                assert_eq!(stream, LogStream::Error);
                assert_eq!(lines, 20);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

//! plab CLI
//!
//! Entry point for the `plab` command-line tool.

use clap::{Parser, Subcommand};
use plab_runner::callback::{CallbackError, CommandCallback, JobCallback, JobContext};
use plab_runner::compose::{plan, settings_overrides};
use plab_runner::runner::CONFIG_FILE;
use plab_runner::{
    logging, parse_overrides, CancelToken, EngineSettings, Error, ExitCode, GroupStore, JobRunner,
    PrimaryConfig, ResolvedConfig, ResolverRegistry, RunPlan, SignalHandler, Status,
};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "plab")]
#[command(about = "Compose experiment configs and run parameter sweeps", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose the config and run one job (or one per sweep point with -m)
    Run {
        /// Config directory holding the primary config and group directories
        #[arg(long, short = 'c', default_value = "conf")]
        config_dir: PathBuf,

        /// Primary config name (without extension)
        #[arg(long, short = 'n', default_value = "config")]
        config_name: String,

        /// Expand sweeps into one job per point
        #[arg(long, short = 'm')]
        multirun: bool,

        /// Compose and resolve, print the configs, create nothing
        #[arg(long)]
        dry_run: bool,

        /// Concurrent jobs
        #[arg(long, short = 'j')]
        parallelism: Option<usize>,

        /// Reuse non-empty working directories
        #[arg(long)]
        overwrite: bool,

        /// What happens to running jobs on Ctrl-C
        #[arg(long, value_parser = ["drain", "abandon"])]
        cancel_policy: Option<String>,

        /// Increase log verbosity (-v, -vv, -vvv)
        #[arg(long, short = 'v', action = clap::ArgAction::Count)]
        verbose: u8,

        /// Overrides, e.g. fit=gamma extreme.threshold=0.9,0.95 +viz.dpi=300
        overrides: Vec<String>,

        /// Command run inside each job directory (after --)
        #[arg(last = true)]
        cmd: Vec<String>,
    },

    /// List config groups and their fragments
    Groups {
        /// Config directory
        #[arg(long, short = 'c', default_value = "conf")]
        config_dir: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

struct RunArgs {
    config_dir: PathBuf,
    config_name: String,
    multirun: bool,
    dry_run: bool,
    parallelism: Option<usize>,
    overwrite: bool,
    cancel_policy: Option<String>,
    overrides: Vec<String>,
    cmd: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config_dir,
            config_name,
            multirun,
            dry_run,
            parallelism,
            overwrite,
            cancel_policy,
            verbose,
            overrides,
            cmd,
        } => {
            logging::init(verbose);
            let args = RunArgs {
                config_dir,
                config_name,
                multirun,
                dry_run,
                parallelism,
                overwrite,
                cancel_policy,
                overrides,
                cmd,
            };
            let code = match run(args) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    e.exit_code()
                }
            };
            process::exit(code.as_i32());
        }
        Commands::Groups { config_dir, json } => {
            logging::init(0);
            run_groups(&config_dir, json);
        }
    }
}

fn run(args: RunArgs) -> Result<ExitCode, Error> {
    let overrides = parse_overrides(&args.overrides)?;
    let store = GroupStore::load(&args.config_dir)?;
    let primary = PrimaryConfig::load(&args.config_dir, &args.config_name)?;

    let settings = EngineSettings::build(
        &primary.settings,
        &settings_overrides(&overrides),
        Some(cli_settings_layer(&args)),
    )?;

    let run_plan = plan(&store, &primary, &overrides, args.multirun)?;
    let runner = JobRunner::new(settings, ResolverRegistry::new());

    if args.dry_run {
        return print_dry_run(&runner, run_plan);
    }

    let token = CancelToken::new();
    if let Err(e) = SignalHandler::new(token.clone()).install() {
        tracing::warn!(error = %e, "Failed to install signal handler");
    }
    let runner = runner.with_cancel_token(token);

    let config_file = Path::new(&runner.settings().output_subdir).join(CONFIG_FILE);
    let summary = match CommandCallback::new(&args.cmd, &config_file.to_string_lossy()) {
        Some(command) => runner.run(run_plan, &command)?,
        None => runner.run(run_plan, &PrintConfig)?,
    };

    eprintln!("{}", summary.human_summary);
    for job in summary.jobs.iter().filter(|j| j.status != Status::Success) {
        eprintln!("  job {} ({}): {}", job.num(), job.job_id(), job.human_summary);
    }

    Ok(summary.exit_code_enum().unwrap_or(ExitCode::JobExecution))
}

/// Settings layer from explicit CLI flags
fn cli_settings_layer(args: &RunArgs) -> Value {
    let mut launcher = Map::new();
    if let Some(n) = args.parallelism {
        launcher.insert("parallelism".to_string(), json!(n));
    }
    if let Some(policy) = &args.cancel_policy {
        launcher.insert("cancel_policy".to_string(), json!(policy));
    }

    let mut layer = Map::new();
    if !launcher.is_empty() {
        layer.insert("launcher".to_string(), Value::Object(launcher));
    }
    if args.overwrite {
        layer.insert("job".to_string(), json!({"overwrite": true}));
    }
    Value::Object(layer)
}

/// Default callback: print the resolved config
struct PrintConfig;

impl JobCallback for PrintConfig {
    fn run(&self, config: &ResolvedConfig, dir: &Path, ctx: &JobContext) -> Result<(), CallbackError> {
        println!("# job {} -> {}", ctx.num, dir.display());
        println!("{}", config.to_json()?);
        Ok(())
    }
}

fn print_dry_run(runner: &JobRunner, run_plan: RunPlan) -> Result<ExitCode, Error> {
    let jobs = runner.dry_run(run_plan)?;
    let mut code = ExitCode::Success;

    for job in jobs {
        let dir = job
            .working_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("# job {} [{}] -> {}", job.num, job.overrides.join(" "), dir);
        match job.result {
            Ok(config) => println!("{}", config.to_json()?),
            Err(e) => {
                println!("# error: {}", e);
                if code.is_success() {
                    code = e.failure_kind().exit_code();
                }
            }
        }
    }

    Ok(code)
}

fn run_groups(config_dir: &Path, json_output: bool) {
    let store = match GroupStore::load(config_dir) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error loading config directory: {}", e);
            process::exit(ExitCode::Config.as_i32());
        }
    };

    if json_output {
        let groups: Map<String, Value> = store
            .group_names()
            .into_iter()
            .map(|g| (g.to_string(), json!(store.fragment_names(g))))
            .collect();
        match serde_json::to_string_pretty(&groups) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let groups = store.group_names();
    if groups.is_empty() {
        println!("No config groups found in {}.", config_dir.display());
        return;
    }

    println!("Config groups ({} total):\n", groups.len());
    for group in groups {
        println!("  {}: {}", group, store.fragment_names(group).join(", "));
    }
}

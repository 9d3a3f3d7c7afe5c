use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use stackferry_core::StackName;
use stackferry_lookups::Lookups;
use stackferry_proxy::{run_with_intercepted_providers, RunMode, RunOptions};

mod errfmt;

#[derive(Parser)]
#[command(name = "stackferry")]
#[command(about = "Import CDK-managed CloudFormation resources into Pulumi state")]
struct Cli {
    /// Enable verbose engine logging (0-9)
    #[arg(short, long, global = true, default_value_t = 0)]
    verbose: u32,

    /// Enable importer debug logs
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import resources from the pulumi-cdk runtime program in the current
    /// directory
    Runtime {
        /// CloudFormation stack name (repeatable or comma-separated)
        #[arg(long = "stack", required = true, value_delimiter = ',')]
        stacks: Vec<String>,

        /// Path to write a Pulumi bulk import file after importing
        #[arg(long)]
        import_file: Option<PathBuf>,

        /// Stub out creation of unsupported resources
        #[arg(long)]
        skip_create: bool,
    },

    /// Operate on an existing Pulumi program generated from a CDK app
    Program {
        #[command(subcommand)]
        command: ProgramCommands,
    },
}

#[derive(Subcommand)]
enum ProgramCommands {
    /// Import into the selected stack using an existing Pulumi program
    Import {
        /// Path to the Pulumi program generated from a CDK app
        #[arg(long)]
        program_dir: PathBuf,

        /// CloudFormation stack name (repeatable or comma-separated)
        #[arg(long = "stack", required = true, value_delimiter = ',')]
        stacks: Vec<String>,

        /// Path to write a Pulumi bulk import file after importing
        #[arg(long)]
        import_file: Option<PathBuf>,

        /// Stub out creation of unsupported resources
        #[arg(long)]
        skip_create: bool,
    },

    /// Iterate on imports using a local backend and import file capture
    Iterate {
        /// Path to the Pulumi program generated from a CDK app
        #[arg(long)]
        program_dir: PathBuf,

        /// CloudFormation stack name (repeatable or comma-separated)
        #[arg(long = "stack", required = true, value_delimiter = ',')]
        stacks: Vec<String>,

        /// Path to write the Pulumi bulk import file
        #[arg(long)]
        import_file: PathBuf,

        /// Keep the temporary local backend after capture runs finish
        #[arg(long)]
        keep_import_state: bool,

        /// Local backend file to re-use across capture runs
        #[arg(long)]
        local_stack_file: Option<PathBuf>,

        /// Emit only resources whose import ID is still unresolved
        #[arg(long)]
        placeholders_only: bool,
    },
}

struct RunConfig {
    mode: RunMode,
    stacks: Vec<String>,
    import_file: Option<PathBuf>,
    skip_create: bool,
    keep_import_state: bool,
    local_stack_file: Option<PathBuf>,
    work_dir: PathBuf,
    use_preview_import: bool,
    filter_placeholders_only: bool,
    verbose: u32,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let result = dispatch(cli).await;
    if let Err(err) = result {
        eprintln!("{} {}", "Error:".red().bold(), errfmt::format_cli_error(&err));
        std::process::exit(1);
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    let invocation_dir = std::env::current_dir().context("resolving current directory")?;
    let verbose = cli.verbose;

    let cfg = match cli.command {
        Commands::Runtime {
            stacks,
            import_file,
            skip_create,
        } => RunConfig {
            mode: RunMode::RunPulumi,
            stacks,
            import_file: resolve_path(&invocation_dir, import_file),
            skip_create,
            keep_import_state: false,
            local_stack_file: None,
            work_dir: invocation_dir.clone(),
            use_preview_import: false,
            filter_placeholders_only: false,
            verbose,
        },
        Commands::Program { command } => match command {
            ProgramCommands::Import {
                program_dir,
                stacks,
                import_file,
                skip_create,
            } => RunConfig {
                mode: RunMode::RunPulumi,
                stacks,
                import_file: resolve_path(&invocation_dir, import_file),
                skip_create,
                keep_import_state: false,
                local_stack_file: None,
                work_dir: join_path(&invocation_dir, &program_dir),
                use_preview_import: false,
                filter_placeholders_only: false,
                verbose,
            },
            ProgramCommands::Iterate {
                program_dir,
                stacks,
                import_file,
                keep_import_state,
                local_stack_file,
                placeholders_only,
            } => RunConfig {
                mode: RunMode::CaptureImports,
                stacks,
                import_file: Some(join_path(&invocation_dir, &import_file)),
                skip_create: true,
                keep_import_state,
                local_stack_file: resolve_path(&invocation_dir, local_stack_file),
                work_dir: join_path(&invocation_dir, &program_dir),
                use_preview_import: true,
                filter_placeholders_only: placeholders_only,
                verbose,
            },
        },
    };

    run(cfg).await
}

async fn run(cfg: RunConfig) -> Result<()> {
    validate_config(&cfg)?;

    let lookups = Lookups::connect().await?;

    for stack_ref in &cfg.stacks {
        let stack_name = StackName::new(stack_ref.clone());
        info!(stack = %stack_ref, "Getting stack resources");
        lookups
            .load_stack(&stack_name)
            .await
            .with_context(|| format!("loading CloudFormation stack {stack_ref}"))?;
    }

    let skip_create = cfg.skip_create || cfg.mode == RunMode::CaptureImports;
    let options = RunOptions {
        mode: cfg.mode,
        import_file_path: cfg.import_file.clone(),
        skip_create,
        keep_import_state: cfg.keep_import_state,
        local_stack_file: cfg.local_stack_file.clone(),
        stack_names: cfg.stacks.clone(),
        verbose: cfg.verbose,
        use_preview_import: cfg.use_preview_import,
        filter_placeholders_only: cfg.filter_placeholders_only,
    };

    run_with_intercepted_providers(Arc::new(lookups), &cfg.work_dir, options).await
}

fn validate_config(cfg: &RunConfig) -> Result<()> {
    if std::env::var_os("AWS_REGION").is_none() && std::env::var_os("AWS_DEFAULT_REGION").is_none()
    {
        bail!("AWS_REGION or AWS_DEFAULT_REGION environment variable must be set");
    }
    if cfg.stacks.is_empty() {
        bail!("stack is required");
    }
    if cfg.work_dir.as_os_str().is_empty() {
        bail!("program directory is required");
    }
    if cfg.mode == RunMode::CaptureImports && cfg.import_file.is_none() {
        bail!("--import-file is required in iterate mode");
    }
    if cfg.mode == RunMode::RunPulumi {
        if cfg.keep_import_state {
            bail!("--keep-import-state is only supported in iterate mode");
        }
        if cfg.local_stack_file.is_some() {
            bail!("--local-stack-file is only supported in iterate mode");
        }
    }
    Ok(())
}

fn resolve_path(base: &Path, path: Option<PathBuf>) -> Option<PathBuf> {
    path.map(|p| join_path(base, &p))
}

fn join_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> RunConfig {
        RunConfig {
            mode: RunMode::RunPulumi,
            stacks: vec!["app-dev".to_string()],
            import_file: None,
            skip_create: false,
            keep_import_state: false,
            local_stack_file: None,
            work_dir: PathBuf::from("."),
            use_preview_import: false,
            filter_placeholders_only: false,
            verbose: 0,
        }
    }

    // One test owns the region env vars; parallel tests mutating the
    // process environment would race.
    #[test]
    fn test_validate_config() {
        std::env::remove_var("AWS_REGION");
        std::env::remove_var("AWS_DEFAULT_REGION");
        assert!(validate_config(&base_config()).is_err());

        std::env::set_var("AWS_REGION", "us-west-2");
        assert!(validate_config(&base_config()).is_ok());

        let mut cfg = base_config();
        cfg.keep_import_state = true;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = base_config();
        cfg.local_stack_file = Some(PathBuf::from("state.json"));
        assert!(validate_config(&cfg).is_err());

        let mut cfg = base_config();
        cfg.stacks.clear();
        assert!(validate_config(&cfg).is_err());

        let mut cfg = base_config();
        cfg.mode = RunMode::CaptureImports;
        assert!(validate_config(&cfg).is_err());
        cfg.import_file = Some(PathBuf::from("import.json"));
        assert!(validate_config(&cfg).is_ok());
    }

    #[test]
    fn test_join_path() {
        assert_eq!(
            join_path(Path::new("/work"), Path::new("import.json")),
            PathBuf::from("/work/import.json")
        );
        assert_eq!(
            join_path(Path::new("/work"), Path::new("/abs/import.json")),
            PathBuf::from("/abs/import.json")
        );
    }
}

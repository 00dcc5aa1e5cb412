mod commands;

use anyhow::Result;
use assay_common::config::EngineConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "assay")]
#[command(about = "Assay - Grade exercise submissions across execution environments", long_about = None)]
struct Cli {
    /// JSON engine configuration (environment variables still override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true, default_value = "false")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade one submission and print the result as JSON
    Run {
        /// Environment tag (e.g., code, sql, notebook, spreadsheet)
        #[arg(short, long)]
        environment: String,

        /// Full execution request file (content, testcase, options)
        #[arg(short, long, conflicts_with_all = ["content", "testcase"])]
        request: Option<PathBuf>,

        /// Submission file, graded as text
        #[arg(short, long)]
        content: Option<PathBuf>,

        /// Testcase JSON file
        #[arg(short, long, requires = "content")]
        testcase: Option<PathBuf>,
    },

    /// Grade a JSON-lines file of `{environment, request}` entries
    Batch {
        /// Input file, one entry per line
        #[arg(short, long)]
        input: PathBuf,

        /// Submissions graded at the same time
        #[arg(short = 'n', long, default_value = "4")]
        concurrency: usize,
    },

    /// List registered environment tags
    Environments,

    /// List code languages the sandbox accepts, with backend ids
    Languages,

    /// List installed notebook kernels and the one that would be selected
    Kernels {
        /// Interpreter the selection is made for
        #[arg(short, long, default_value = "python")]
        interpreter: String,
    },
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = match &cli.config {
        Some(path) => EngineConfig::load_file(path)?,
        None => EngineConfig::load()?,
    };
    info!(
        sandbox = %config.sandbox.url,
        datasets = %config.datasets.root.display(),
        "Assay configuration loaded"
    );

    match cli.command {
        Commands::Run {
            environment,
            request,
            content,
            testcase,
        } => {
            let request =
                commands::load_request(request.as_deref(), content.as_deref(), testcase.as_deref())?;
            commands::run_one(&config, &environment, request).await?;
        }
        Commands::Batch { input, concurrency } => {
            commands::run_batch(&config, &input, concurrency).await?;
        }
        Commands::Environments => {
            commands::list_environments(&config);
        }
        Commands::Languages => {
            commands::list_languages(&config);
        }
        Commands::Kernels { interpreter } => {
            commands::list_kernels(&config, &interpreter).await?;
        }
    }

    Ok(())
}

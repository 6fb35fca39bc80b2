use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use marksman::config::{load_config, save_config, AppConfig};

#[derive(Parser)]
#[command(name = "marksman", version, about = "Set-of-Mark browser automation agent")]
struct Cli {
    /// Path to config.toml (defaults to the executable's directory, then the working directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a natural-language task in the browser.
    Run {
        #[arg(long)]
        task: String,
        /// Page to open before the first step.
        #[arg(long)]
        url: Option<String>,
        /// Directory for screenshots and manifest.json.
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        headless: bool,
        #[arg(long)]
        max_steps: Option<u32>,
    },
    /// Write a config.toml with every default filled in.
    InitConfig {
        #[arg(default_value = "config.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    marksman::init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::InitConfig { path } => match save_config(&AppConfig::default(), &path) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "could not write config");
                ExitCode::FAILURE
            }
        },
        Command::Run {
            task,
            url,
            output,
            headless,
            max_steps,
        } => {
            let mut config = match load_config(cli.config.as_deref()) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(error = %e, "could not load config");
                    return ExitCode::FAILURE;
                }
            };
            if let Some(output) = output {
                config.run.output_dir = output;
            }
            if headless {
                config.browser.headless = true;
            }
            if let Some(n) = max_steps {
                config.run.max_steps = n;
            }

            match marksman::run_task(&config, &task, url.as_deref()).await {
                Ok(report) => {
                    println!("{}", report.outcome);
                    if let Some(path) = &report.manifest_path {
                        println!("manifest: {}", path.display());
                    }
                    if report.outcome.is_success() {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::FAILURE
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "run could not start");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

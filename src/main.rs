//! PocketGen - local text generation playground
//!
//! Opens the desktop window by default. `generate` runs the same load and
//! generate flow in the terminal, `bundle` stages the engine assets.

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dioxus::desktop::{Config, LogicalSize, WindowBuilder};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pocketgen::app::App;
use pocketgen::bundle::{stage, BundlePlan};
use pocketgen::console::{run_once, ConsolePresenter};
use pocketgen::inference::{LlamaEngine, ModelFetcher};
use pocketgen::playground::{Playground, PlaygroundConfig};
use pocketgen::session::Session;
use pocketgen::storage::settings::load_settings;

#[derive(Parser, Debug)]
#[command(name = "pocketgen")]
#[command(author, version, about = "Load a quantized model and generate text locally")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the desktop window (default)
    Ui,

    /// Load the configured model and complete one prompt
    Generate {
        #[arg(short, long)]
        prompt: String,

        /// Maximum number of tokens to generate
        #[arg(long)]
        n_predict: Option<u32>,

        #[arg(long)]
        temp: Option<f32>,

        #[arg(long)]
        top_k: Option<u32>,

        #[arg(long)]
        top_p: Option<f32>,
    },

    /// Copy the engine assets into a distribution directory
    Bundle {
        #[arg(short, long, default_value = "dist")]
        out: PathBuf,

        /// Directory holding `single-thread/` and `multi-thread/`
        #[arg(short, long, default_value = "node_modules/@wllama/wllama/esm")]
        source: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("pocketgen=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Ui) {
        Command::Ui => launch_desktop(),
        Command::Generate {
            prompt,
            n_predict,
            temp,
            top_k,
            top_p,
        } => {
            let settings = load_settings();
            let mut config = PlaygroundConfig::from(&settings);
            if let Some(n) = n_predict {
                config.completion.n_predict = n;
            }
            if let Some(t) = temp {
                config.completion.sampling.temp = t;
            }
            if let Some(k) = top_k {
                config.completion.sampling.top_k = k;
            }
            if let Some(p) = top_p {
                config.completion.sampling.top_p = p;
            }
            config.completion = config.completion.normalized();

            let fetcher = ModelFetcher::new(settings.hub_endpoint, settings.models_directory);
            let playground = Playground::new(
                Session::new(LlamaEngine::new(fetcher)),
                ConsolePresenter::new(),
                config,
            );

            // The desktop launcher owns its runtime, so the headless path builds one here
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_once(&playground, &prompt))?;
        }
        Command::Bundle { out, source } => {
            let settings = load_settings();
            let plan =
                BundlePlan::for_assets(&source, &out, &settings.assets, &settings.public_path)?;
            for path in stage(&plan)? {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}

fn launch_desktop() {
    info!("Starting PocketGen v{}", env!("CARGO_PKG_VERSION"));

    dioxus::LaunchBuilder::desktop()
        .with_cfg(
            Config::default().with_window(
                WindowBuilder::new()
                    .with_title("PocketGen")
                    .with_inner_size(LogicalSize::new(900.0, 720.0)),
            ),
        )
        .launch(App);
}

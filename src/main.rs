//! Aigne CLI - run and validate agent projects

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use futures::StreamExt;
use serde_json::Value;

use aigne_runtime::runnable::TEXT_KEY;
use aigne_runtime::{
    sse, AigneError, DeltaMerger, FixSuggestion, Output, Project, RunOptions, RunOutput, Runtime,
    RuntimeConfig,
};

#[derive(Parser)]
#[command(name = "aigne")]
#[command(about = "Aigne - run pipelines of AI agents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    /// `$text` as plain text, other outputs as JSON
    Text,
    /// Final output as pretty JSON
    Json,
    /// Server-sent event frames
    Sse,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an agent from a project file
    Run {
        /// Path to the project YAML file
        file: PathBuf,

        /// Agent id to run
        #[arg(short, long)]
        agent: String,

        /// Input value as key=value (value parsed as JSON when possible)
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Stream the response
        #[arg(short, long)]
        stream: bool,

        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,

        /// Runtime configuration file
        #[arg(short, long, default_value = "aigne.toml")]
        config: PathBuf,

        /// Override provider (openai, mock)
        #[arg(short, long)]
        provider: Option<String>,

        /// Override default model
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Validate a project file and plan its pipelines
    Validate {
        /// Path to the project YAML file
        file: PathBuf,

        #[arg(short, long, default_value = "aigne.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            file,
            agent,
            inputs,
            stream,
            format,
            config,
            provider,
            model,
        } => {
            let options = RunArgs {
                agent,
                inputs,
                stream,
                format,
                provider,
                model,
            };
            run_agent(&file, &config, options).await
        }
        Commands::Validate { file, config } => validate_project(&file, &config).await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.downcast_ref::<AigneError>().and_then(|e| e.fix_suggestion()) {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

struct RunArgs {
    agent: String,
    inputs: Vec<String>,
    stream: bool,
    format: Format,
    provider: Option<String>,
    model: Option<String>,
}

fn load_config(path: &Path) -> Result<RuntimeConfig> {
    Ok(RuntimeConfig::load_or_default(path)?.with_env())
}

/// `key=value` pairs into an input object
fn parse_inputs(pairs: &[String]) -> Result<Output> {
    let mut input = Output::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Invalid --input '{}': expected KEY=VALUE", pair);
        };
        if key.is_empty() {
            bail!("Invalid --input '{}': empty key", pair);
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        input.insert(key.to_string(), value);
    }
    Ok(input)
}

async fn run_agent(file: &Path, config_path: &Path, args: RunArgs) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(provider) = args.provider {
        config.provider = provider;
    }
    if let Some(model) = args.model {
        config.model = model;
    }

    let project = Project::load(file).with_context(|| format!("Failed to load {}", file.display()))?;
    let input = parse_inputs(&args.inputs)?;
    let runtime = Runtime::from_project(project, config)?;

    let stream = args.stream || matches!(args.format, Format::Sse);
    let options = RunOptions { stream };
    let output = runtime.run(&args.agent, input, options).await?;

    let mut stdout = std::io::stdout();
    match (args.format, output) {
        (Format::Sse, output) => {
            let mut frames = sse::encode_stream(output.into_stream()).boxed();
            while let Some(frame) = frames.next().await {
                stdout.write_all(frame.as_bytes())?;
                stdout.flush()?;
            }
        }
        (Format::Json, output) => {
            let output = output.into_output().await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        (Format::Text, RunOutput::Stream(mut deltas)) => {
            let mut merger = DeltaMerger::new();
            while let Some(delta) = deltas.next().await {
                let delta = delta?;
                if let Some(fragment) = &delta.text {
                    stdout.write_all(fragment.as_bytes())?;
                    stdout.flush()?;
                }
                merger.apply(&delta);
            }
            if merger.text().is_some() {
                println!();
            }
            print_text_output(merger.into_output(), true)?;
        }
        (Format::Text, RunOutput::Complete(output)) => print_text_output(output, false)?,
    }
    Ok(())
}

/// Print `$text` (unless already streamed) then any other outputs as JSON
fn print_text_output(mut output: Output, text_printed: bool) -> Result<()> {
    if let Some(text) = output.remove(TEXT_KEY) {
        if !text_printed {
            match text {
                Value::String(text) => println!("{}", text),
                other => println!("{}", other),
            }
        }
    }
    if !output.is_empty() {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

async fn validate_project(file: &Path, config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let project = Project::load(file).with_context(|| format!("Failed to load {}", file.display()))?;
    let pipelines = project.validate(&config).await?;

    println!("{} Project '{}' is valid", "✓".green(), project.id);
    println!("  Agents: {}", project.agents.len());
    println!("  Pipelines: {}", pipelines);
    Ok(())
}

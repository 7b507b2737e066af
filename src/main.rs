use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Parser, Subcommand};
use elastica::training::SyntheticTasks;
use elastica::{Config, ContinualLearning};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "elastica")]
#[command(about = "Continual learning with EWC and dynamic capacity expansion", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a sequence of permuted-feature tasks
    Run {
        /// Number of tasks in the sequence
        #[arg(short, long, default_value_t = 3)]
        tasks: usize,

        /// Configuration file path (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate configuration file
    Config {
        /// Configuration file to validate
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show system information
    Info,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { tasks, config } => {
            run_experiment(tasks, config)?;
        }

        Commands::Config { file } => {
            validate_config(file)?;
        }

        Commands::Info => {
            show_system_info();
        }
    }

    Ok(())
}

fn run_experiment(num_tasks: usize, config_path: Option<PathBuf>) -> Result<()> {
    info!("Starting continual-learning experiment");

    let config = match config_path {
        Some(path) => Config::from_file(&path).context("Failed to load configuration file")?,
        None => Config::default(),
    };

    let device = Device::Cpu;
    let mut data_rng = StdRng::seed_from_u64(config.training.seed);
    let tasks = SyntheticTasks::new(
        &config.network,
        &config.data,
        config.training.batch_size,
        &mut data_rng,
    )?
    .sequence(num_tasks, &device, &mut data_rng)
    .context("Failed to generate task sequence")?;

    info!(tasks = tasks.len(), "Task data generated");

    let mut system = ContinualLearning::new(config, device)
        .context("Failed to initialize continual-learning system")?;
    let report = system
        .run_sequence(&tasks)
        .context("Continual-learning run failed")?;

    for round in &report.rounds {
        for evaluation in &round.evaluations {
            info!(
                trained_through = round.task,
                task = evaluation.task,
                accuracy = evaluation.accuracy,
                average_loss = evaluation.average_loss,
                "final round evaluation"
            );
        }
    }
    for event in &report.expansion_events {
        info!(
            task = event.task,
            from = event.previous_hidden,
            to = event.new_hidden,
            "capacity expansion"
        );
    }
    info!(final_hidden = report.final_hidden_size, "Experiment complete");

    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    info!("Validating configuration file: {}", config_path.display());

    let config = Config::from_file(&config_path).context("Failed to load configuration file")?;

    println!("Configuration is valid");
    println!("  Network: {} -> {} -> {} ({} extra hidden layers)",
        config.network.input_size,
        config.network.hidden_size,
        config.network.output_size,
        config.network.hidden_layer_count,
    );
    println!("  EWC: enabled={}, lambda={}, fisher_samples={}",
        config.ewc.enabled, config.ewc.lambda, config.ewc.fisher_samples,
    );
    println!("  Expansion: threshold={}%, scale_factor={}, max_expansions={}",
        config.expansion.accuracy_threshold,
        config.expansion.scale_factor,
        config.expansion.max_expansions,
    );

    Ok(())
}

fn show_system_info() {
    println!("elastica {}", env!("CARGO_PKG_VERSION"));
    println!("Continual learning with EWC and dynamic capacity expansion");
    println!();
    println!("Features:");
    println!("  cuda:       {}", cfg!(feature = "cuda"));
    println!("  metal:      {}", cfg!(feature = "metal"));
    println!("  accelerate: {}", cfg!(feature = "accelerate"));
}

//! hedoc: command-line front end for the HE document service
//!
//! Validates parameter sets, writes config files, and runs documents through
//! the encrypted pipeline.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use hedoc::params::{HeConfig, SecurityLevel};
use hedoc::pipeline::{JobState, PipelineConfig};
use hedoc::service::{ComputeOp, HeService};

#[derive(Parser)]
#[command(name = "hedoc")]
#[command(about = "Homomorphic encryption context manager and document pipeline")]
#[command(version)]
struct Args {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a parameter set and print its modulus chain
    Params {
        /// JSON config file (defaults to the built-in 128-bit preset)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Write a config file
    InitConfig {
        /// Output path
        #[arg(long)]
        out: PathBuf,

        /// Ring degree
        #[arg(long, default_value = "8192")]
        degree: usize,

        /// Skip the security bound (tests and benchmarks only)
        #[arg(long)]
        insecure: bool,
    },

    /// Run a document through the encrypted pipeline and print the report
    Process {
        /// Document to process
        file: PathBuf,

        /// JSON config file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Tokens per encrypted chunk
        #[arg(long, default_value = "256")]
        chunk_tokens: usize,

        /// Comma-separated vocabulary terms with dedicated lanes
        #[arg(long, value_delimiter = ',')]
        vocab: Vec<String>,
    },

    /// Encrypt two values and show sum, difference and product
    Demo {
        #[arg(long, default_value = "12.5")]
        a: f64,

        #[arg(long, default_value = "-3.25")]
        b: f64,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<HeConfig> {
    match path {
        Some(path) => HeConfig::load(path)
            .wrap_err_with(|| format!("failed to load config from {}", path.display())),
        None => Ok(HeConfig::default()),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Params { config } => params(load_config(config.as_ref())?),
        Command::InitConfig {
            out,
            degree,
            insecure,
        } => init_config(out, degree, insecure),
        Command::Process {
            file,
            config,
            chunk_tokens,
            vocab,
        } => process(file, load_config(config.as_ref())?, chunk_tokens, vocab),
        Command::Demo { a, b } => demo(a, b),
    }
}

fn params(config: HeConfig) -> Result<()> {
    config.validate().wrap_err("invalid parameters")?;
    let ctx = hedoc::Context::new(config, 0).wrap_err("failed to build context")?;

    info!("Ring degree: {}", ctx.config().poly_degree);
    info!("Slots: {}", ctx.slot_count());
    info!("Depth: {}", ctx.max_level());
    info!("Security: {:?}", ctx.config().security_level);
    for (i, q) in ctx.basis().primes().iter().enumerate() {
        let role = if i == 0 {
            "base"
        } else if i == ctx.basis().special_index() {
            "special"
        } else {
            "rescale"
        };
        info!("  q[{}] = {} ({:.2} bits, {})", i, q, (*q as f64).log2(), role);
    }
    info!("Max value: {}", ctx.codec().max_value());
    info!("Precision: {:e}", ctx.codec().precision());
    Ok(())
}

fn init_config(out: PathBuf, degree: usize, insecure: bool) -> Result<()> {
    let config = HeConfig {
        poly_degree: degree,
        security_level: if insecure {
            SecurityLevel::None
        } else {
            SecurityLevel::Bits128
        },
        ..HeConfig::default()
    };
    config.validate().wrap_err("refusing to write an invalid config")?;
    config
        .save(&out)
        .wrap_err_with(|| format!("failed to write {}", out.display()))?;
    info!("Wrote {}", out.display());
    Ok(())
}

fn process(file: PathBuf, config: HeConfig, chunk_tokens: usize, vocab: Vec<String>) -> Result<()> {
    let document =
        fs::read(&file).wrap_err_with(|| format!("failed to read {}", file.display()))?;

    let service = HeService::new(PipelineConfig {
        chunk_tokens,
        vocabulary: vocab,
        ..PipelineConfig::default()
    })?;

    let start = Instant::now();
    let summary = service.initialize(config)?;
    info!(
        "Context {} ready in {:.2?} (n = {}, depth {})",
        summary.id,
        start.elapsed(),
        summary.poly_degree,
        summary.max_level
    );

    let start = Instant::now();
    let id = service.submit_document(document)?;
    let snapshot = service.wait_job(&id, Duration::from_secs(3600))?;
    info!("Job {} finished in {:.2?}", id, start.elapsed());

    if let JobState::Failed(reason) = &snapshot.state {
        return Err(eyre::eyre!("job {} failed: {}", id, reason));
    }
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn demo(a: f64, b: f64) -> Result<()> {
    let service = HeService::new(PipelineConfig::default())?;
    service.initialize(HeConfig::default())?;

    let ha = service.encrypt_value(a)?;
    let hb = service.encrypt_value(b)?;
    info!("Encrypted a = {} as {}, b = {} as {}", a, ha, b, hb);

    for (name, op) in [
        ("a + b", ComputeOp::Add),
        ("a - b", ComputeOp::Subtract),
        ("a * b", ComputeOp::Multiply),
    ] {
        let handle = service.compute(&op, &[ha, hb])?;
        let stats = service.stats(&handle)?;
        let value = service.decrypt_value(&handle)?;
        println!(
            "{} = {:.6}  (level {}, noise budget {:.1} bits)",
            name, value, stats.level, stats.noise_budget_bits
        );
        service.release(&handle)?;
    }
    Ok(())
}

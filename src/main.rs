use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use tracing::info;

use collateral_loan::{
    config::LoanConfig,
    contracts::CollateralizedLoan,
    ledger::format_units,
    logging,
    scenario::{reference_scenario, Session, Step, StepOutcome},
    signer::Signer,
};

#[derive(Parser)]
#[command(name = "loan-cli", version, about = "Collateralized loan ledger tools")]
struct Cli {
    /// Path to a TOML config; defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy a fresh contract and print its address
    Deploy {
        /// Deployer account, overrides genesis.deployer
        #[arg(long)]
        deployer: Option<String>,
    },
    /// Generate an ed25519 party key and its account address
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Run the reference request/fund/repay/claim walk-through
    Demo {
        /// Skip the final ledger snapshot
        #[arg(long)]
        quiet: bool,
    },
    /// Run a JSON script of steps against a fresh ledger
    Run {
        script: PathBuf,
        /// Exit with an error if any step fails
        #[arg(long)]
        strict: bool,
        #[arg(long)]
        quiet: bool,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<LoanConfig> {
    match path {
        Some(path) => LoanConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(LoanConfig::default()),
    }
}

fn deploy_cmd(config: &LoanConfig, deployer: Option<String>) -> anyhow::Result<()> {
    println!("Starting deployment...");
    let mut ledger = config.build_ledger()?;
    let deployer = deployer.unwrap_or_else(|| config.genesis.deployer.clone());
    let contract = CollateralizedLoan::deploy(&mut ledger, &deployer, config.loan_policy());
    println!("CollateralizedLoan deployed successfully");
    println!("Deployed contract address: {}", contract.address());
    Ok(())
}

fn keygen_cmd(out_dir: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let signer = Signer::generate(&mut OsRng);
    fs::write(out_dir.join("sk.hex"), signer.secret_hex())?;
    fs::write(out_dir.join("pk.hex"), signer.public_hex())?;
    fs::write(out_dir.join("address.txt"), signer.address())?;
    println!("keypair for {} written → {}", signer.address(), out_dir.display());
    Ok(())
}

fn print_outcomes(outcomes: &[StepOutcome]) -> anyhow::Result<()> {
    for outcome in outcomes {
        println!("{}", serde_json::to_string(outcome)?);
    }
    Ok(())
}

fn run_steps(config: &LoanConfig, steps: &[Step], quiet: bool) -> anyhow::Result<bool> {
    let mut session = Session::new(config)?;
    info!(address = session.contract.address(), steps = steps.len(), "running script");
    let outcomes = session.run(steps);
    print_outcomes(&outcomes)?;

    if !quiet {
        println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
    }
    for (account, balance) in session.ledger.accounts() {
        info!(
            %account,
            available = %format_units(balance.available),
            locked = %format_units(balance.locked),
            "final balance"
        );
    }
    Ok(outcomes.iter().all(|o| o.ok))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    logging::init(&level, cli.log_json || config.logging.json)?;

    match cli.command {
        Command::Deploy { deployer } => deploy_cmd(&config, deployer),
        Command::Keygen { out_dir } => keygen_cmd(&out_dir),
        Command::Demo { quiet } => {
            run_steps(&config, &reference_scenario(), quiet)?;
            Ok(())
        }
        Command::Run {
            script,
            strict,
            quiet,
        } => {
            let raw = fs::read_to_string(&script)
                .with_context(|| format!("reading script {}", script.display()))?;
            let steps: Vec<Step> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing script {}", script.display()))?;
            let all_ok = run_steps(&config, &steps, quiet)?;
            if strict && !all_ok {
                anyhow::bail!("one or more steps failed");
            }
            Ok(())
        }
    }
}

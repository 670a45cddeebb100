// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! `invariant` — run mediated turns and verify their receipts.
//!
//! Exit codes: `run` returns 0 for a sealed turn, 2 for an aborted one,
//! 1 for any internal error. `verify` returns 0 when the replay matches,
//! 3 on drift, 1 on error.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use inv_api::{
    BoundaryConfig, ContextSource, ContextSpec, Identity, Invariant, ModelSpec, ReplayOptions,
    Sensitivity, SourceKind, Turn, TurnStatus, VerificationResult,
};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const EXIT_ERROR: i32 = 1;
const EXIT_ABORTED: i32 = 2;
const EXIT_DRIFT: i32 = 3;

#[derive(Parser, Debug)]
#[command(name = "invariant", version, about = "Mediated execution boundary for LLM inference")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute one turn and write its receipt to stdout.
    Run {
        /// Policy name (resolved against the policies directory) or path.
        #[arg(long)]
        policy: String,

        /// Model spec as provider:name[:version].
        #[arg(long)]
        model: String,

        /// Sampling seed (required for replayability; zero is valid).
        #[arg(long, default_value_t = 0)]
        seed: i64,

        /// Decoding strategy, e.g. greedy or temperature=0.7.
        #[arg(long, default_value = "greedy")]
        decoding: String,

        /// Input file, or '-' for stdin.
        #[arg(long, default_value = "-")]
        input: String,

        /// Context file(s) to hash-bind into the proof. Can be repeated.
        #[arg(long = "context")]
        context: Vec<PathBuf>,

        /// Requesting user id.
        #[arg(long, default_value = "operator")]
        user: String,
        /// Requesting role.
        #[arg(long, default_value = "cli")]
        role: String,
        /// Requesting organisation.
        #[arg(long, default_value = "local")]
        org: String,
        /// Execution environment.
        #[arg(long, default_value = "dev")]
        env: String,

        /// Write the receipt here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Override the policies directory (else INVARIANT_POLICY_DIR).
        #[arg(long)]
        policy_dir: Option<PathBuf>,
    },

    /// Replay a receipt and report drift.
    Verify {
        /// Path to the receipt JSON file.
        receipt: PathBuf,

        /// Allow contacting a live remote backend during replay.
        #[arg(long)]
        remote: bool,

        /// Override the policies directory (else INVARIANT_POLICY_DIR).
        #[arg(long)]
        policy_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("inv=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("inv=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    };
    std::process::exit(code);
}

async fn run(command: Commands) -> Result<i32> {
    match command {
        Commands::Run {
            policy,
            model,
            seed,
            decoding,
            input,
            context,
            user,
            role,
            org,
            env,
            out,
            policy_dir,
        } => {
            let config = config_with(policy_dir)?;
            let invariant = Invariant::new(config)?;

            let identity = Identity::new(user, role, org, env)?;
            let (provider, name, version) = parse_model_flag(&model)?;
            let spec = ModelSpec::new(provider, name, version, seed, decoding, BTreeMap::new())?;

            let input_payload = read_input(&input)?;
            let sources = context
                .iter()
                .map(|p| {
                    ContextSource::addressable(
                        SourceKind::File,
                        Sensitivity::Public,
                        p.display().to_string(),
                    )
                })
                .collect::<Result<Vec<_>, _>>()?;

            let turn = invariant
                .execute(&input_payload, identity, spec, ContextSpec::new(sources), &policy)
                .await
                .context("turn execution failed")?;

            emit_receipt(&invariant, &turn, out.as_deref())?;
            report_turn(&turn);

            Ok(if turn.is_sealed() { 0 } else { EXIT_ABORTED })
        }

        Commands::Verify {
            receipt,
            remote,
            policy_dir,
        } => {
            let config = config_with(policy_dir)?;
            let invariant = Invariant::new(config)?;

            let options = ReplayOptions {
                contact_remote: remote,
            };
            let verdict = invariant
                .verify_path(&receipt, &options)
                .await
                .with_context(|| format!("verify '{}'", receipt.display()))?;

            match verdict {
                VerificationResult::Verified => {
                    println!("VERIFIED");
                    Ok(0)
                }
                VerificationResult::Drift(report) => {
                    println!("DRIFT {}", report.field);
                    println!("  recorded: {}", report.recorded);
                    println!("  observed: {}", report.observed);
                    Ok(EXIT_DRIFT)
                }
            }
        }
    }
}

fn config_with(policy_dir: Option<PathBuf>) -> Result<BoundaryConfig> {
    let mut config = BoundaryConfig::from_env()?;
    if let Some(dir) = policy_dir {
        config.policy_dir = dir;
    }
    Ok(config)
}

/// Parse `provider:name[:version]`; version defaults to `latest`.
fn parse_model_flag(raw: &str) -> Result<(String, String, String)> {
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [provider, name] => Ok((provider.to_string(), name.to_string(), "latest".to_string())),
        [provider, name, version] => {
            Ok((provider.to_string(), name.to_string(), version.to_string()))
        }
        _ => bail!("--model must be provider:name[:version], got '{raw}'"),
    }
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read input from stdin")?;
        Ok(buf.trim_end_matches('\n').to_string())
    } else {
        std::fs::read_to_string(input).with_context(|| format!("read input file '{input}'"))
    }
}

fn emit_receipt(invariant: &Invariant, turn: &Turn, out: Option<&std::path::Path>) -> Result<()> {
    match out {
        Some(path) => {
            invariant
                .save_receipt(turn, path)
                .with_context(|| format!("write receipt to '{}'", path.display()))?;
            eprintln!("receipt: {}", path.display());
        }
        None => {
            let receipt = invariant.receipt_for(turn);
            print!("{}", receipt.to_canonical_json()?);
        }
    }
    Ok(())
}

fn report_turn(turn: &Turn) {
    match turn.status() {
        TurnStatus::Sealed => {
            eprintln!("sealed: {}", turn.proof());
        }
        TurnStatus::Aborted => {
            eprintln!(
                "aborted: {} ({})",
                turn.proof(),
                turn.abort_reason().unwrap_or("no reason recorded")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_flag_parses_two_and_three_parts() {
        assert_eq!(
            parse_model_flag("mock:m").unwrap(),
            ("mock".into(), "m".into(), "latest".into())
        );
        assert_eq!(
            parse_model_flag("openai:gpt-4o:2024-08").unwrap(),
            ("openai".into(), "gpt-4o".into(), "2024-08".into())
        );
    }

    #[test]
    fn model_flag_rejects_other_shapes() {
        assert!(parse_model_flag("mock").is_err());
        assert!(parse_model_flag("a:b:c:d").is_err());
    }
}

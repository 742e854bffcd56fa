//! gravity-pool - operator tooling
//!
//! key generation, config checks and an in-process walk through the
//! deposit / transfer / withdraw lifecycle

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use ark_serialize::CanonicalSerialize;
use clap::Parser;
use gravity_pool::{
    build_transfer, build_withdrawal, circuit, config::WITHDRAWAL_TIMELOCK_SECS, DepositRequest,
    FieldElement, Groth16Verifier, Lsag, ManualClock, MemoryLedger, Payout, PointNote, PoolConfig,
    PoolError, SelectionSeed, SettlementGate, SpendOutcome, WithdrawalOutcome,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "gravity-pool")]
#[command(about = "Fixed-denomination anonymity pool with gravity-weighted decoy rings")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate spend proving/verifying keys
    Setup {
        /// Merkle tree depth the circuit is built for
        #[arg(short, long, default_value = "20")]
        depth: usize,

        /// Collateral per point
        #[arg(short, long, default_value = "10")]
        unit: u64,

        /// Output directory for spend.pk / spend.vk
        #[arg(short, long, default_value = "keys")]
        out: PathBuf,

        /// Deterministic setup seed (testing only)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Load and validate a pool config
    CheckConfig {
        /// Path to the TOML config
        path: PathBuf,
    },

    /// Run deposit, transfer and withdrawal against an in-memory gate
    Simulate {
        /// Points deposited before the transfer
        #[arg(short, long, default_value = "16")]
        points: usize,

        /// Ring size (protocol-wide)
        #[arg(short, long, default_value = "5")]
        ring_size: usize,

        /// Merkle tree depth
        #[arg(short, long, default_value = "6")]
        depth: usize,

        /// Rng seed
        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("gravity_pool=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Setup { depth, unit, out, seed } => run_setup(depth, unit, &out, seed),
        Command::CheckConfig { path } => check_config(&path),
        Command::Simulate { points, ring_size, depth, seed } => simulate(points, ring_size, depth, seed),
    }
}

fn run_setup(depth: usize, unit: u64, out: &Path, seed: Option<u64>) -> Result<()> {
    let config = PoolConfig {
        tree_depth: depth,
        unit_value: unit,
        ..PoolConfig::default()
    };
    config.validate()?;

    let mut rng = match seed {
        Some(s) => ChaCha20Rng::seed_from_u64(s),
        None => ChaCha20Rng::from_entropy(),
    };

    info!(depth, unit, "running circuit setup");
    let start = std::time::Instant::now();
    let (pk, vk) = circuit::setup(depth, unit, &mut rng)?;

    let mut pk_bytes = Vec::new();
    pk.serialize_compressed(&mut pk_bytes).map_err(PoolError::from)?;
    let mut vk_bytes = Vec::new();
    vk.serialize_compressed(&mut vk_bytes).map_err(PoolError::from)?;

    std::fs::create_dir_all(out)
        .with_context(|| format!("Failed to create key directory: {}", out.display()))?;
    let pk_path = out.join("spend.pk");
    let vk_path = out.join("spend.vk");
    std::fs::write(&pk_path, &pk_bytes)
        .with_context(|| format!("Failed to write proving key: {}", pk_path.display()))?;
    std::fs::write(&vk_path, &vk_bytes)
        .with_context(|| format!("Failed to write verifying key: {}", vk_path.display()))?;

    println!("setup done in {:?}", start.elapsed());
    println!("  proving key:   {} ({} bytes)", pk_path.display(), pk_bytes.len());
    println!("  verifying key: {} ({} bytes)", vk_path.display(), vk_bytes.len());
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = PoolConfig::load(path)
        .with_context(|| format!("Failed to load config file: {}", path.display()))?;

    if let Some(vk) = &config.verifying_key {
        Groth16Verifier::from_file(vk)
            .with_context(|| format!("Failed to load verifying key: {}", vk.display()))?;
    }

    println!("config ok");
    println!("  unit value:     {}", config.unit_value);
    println!("  tree depth:     {} (capacity {})", config.tree_depth, 1u64 << config.tree_depth);
    println!("  root history:   {}", config.root_history_size);
    println!("  ring size:      {}", config.ring_size);
    println!("  gravity:        {}", config.gravity_constant);
    println!("  fees (bps):     deposit {} / withdrawal {}", config.deposit_fee_bps, config.withdrawal_fee_bps);
    match &config.verifying_key {
        Some(vk) => println!("  verifying key:  {}", vk.display()),
        None => println!("  verifying key:  (none)"),
    }
    Ok(())
}

fn simulate(points: usize, ring_size: usize, depth: usize, seed: u64) -> Result<()> {
    if points < ring_size {
        bail!("need at least {} points for a ring of {}", ring_size, ring_size);
    }

    let config = PoolConfig {
        tree_depth: depth,
        ring_size,
        ..PoolConfig::default()
    };
    config.validate()?;
    let unit = config.unit_value;

    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    info!(depth, unit, "generating keys");
    let (pk, vk) = circuit::setup(depth, unit, &mut rng)?;

    let clock = Arc::new(ManualClock::new(0));
    let gate = SettlementGate::new(config, Groth16Verifier::new(&vk)?, Lsag, MemoryLedger::new(), clock.clone())?;

    // === deposits ===
    let notes: Vec<PointNote> = (0..points).map(|_| PointNote::random(&mut rng)).collect();
    for note in &notes {
        gate.deposit(DepositRequest {
            commitment: note.commitment(unit),
            owner: note.owner_key(),
        })?;
    }
    println!("deposited {} points, root {}", gate.point_count(), gate.current_root());

    // === transfer ===
    clock.set(1_000);
    let spender = &notes[0];
    let output = PointNote::random(&mut rng);
    let mut known_spent = HashSet::new();

    let request = build_transfer(
        &gate,
        &pk,
        spender,
        &output,
        &known_spent,
        &SelectionSeed::from_bytes(rng.gen()),
        &mut rng,
    )?;
    match gate.spend(request) {
        SpendOutcome::Committed(minted) => {
            for id in &minted {
                println!("transfer committed, minted {}", id);
            }
        }
        SpendOutcome::Rejected(e) => bail!("transfer rejected: {}", e),
    }
    known_spent.insert(spender.id(unit));

    // === withdrawal ===
    let recipient = FieldElement::from_u64(0xbeef);
    let request = build_withdrawal(
        &gate,
        &pk,
        &output,
        Payout {
            recipient,
            ..Payout::default()
        },
        &known_spent,
        &SelectionSeed::from_bytes(rng.gen()),
        &mut rng,
    )?;
    let id = match gate.request_withdrawal(request) {
        WithdrawalOutcome::PendingTimelock { id, unlock_at } => {
            println!("withdrawal {} pending until t={}", id, unlock_at);
            id
        }
        WithdrawalOutcome::Rejected(e) => bail!("withdrawal rejected: {}", e),
    };

    clock.advance(WITHDRAWAL_TIMELOCK_SECS);
    let receipt = gate.complete_withdrawal(&id)?;
    println!(
        "withdrawal complete: {} to recipient, {} protocol fee",
        receipt.paid_to_recipient, receipt.protocol_fee
    );

    gate.reconcile()?;
    println!();
    println!("points outstanding: {}", gate.outstanding_points());
    println!("collateral held:    {}", gate.collateral_held());
    println!("paid to recipient:  {}", gate.ledger().paid_to(&recipient));
    Ok(())
}

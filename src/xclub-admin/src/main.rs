//! X Club Admin — membership tier administration CLI.
//!
//! Validates tier policy files, previews and applies tier decisions over a
//! member roster, and prints the member list and dashboard numbers.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use xclub_core::config::AppConfig;
use xclub_core::loyalty::{Member, MemberStatus, Tier, TierPolicySet};
use xclub_loyalty::{
    preview, sweep, validate_policy_list, DirectoryOverview, LoyaltyEngine, MemberDirectory,
    TierFilter,
};

#[derive(Parser, Debug)]
#[command(name = "xclub-admin")]
#[command(about = "X Club membership tier administration")]
#[command(version)]
struct Cli {
    /// Policy configuration file (TOML or JSON)
    #[arg(long, global = true, env = "XCLUB_CONFIG")]
    config: Option<PathBuf>,

    /// Member roster as a JSON array (default: demo roster)
    #[arg(long, global = true)]
    members: Option<PathBuf>,

    /// Evaluation time as RFC 3339 (default: now)
    #[arg(long, global = true)]
    now: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the stock tier policies
    Defaults,

    /// Check a policy file against every tier invariant
    Validate,

    /// Dry run: show the tier decision for every member
    Evaluate,

    /// Apply tier decisions and write the updated roster
    Sweep {
        /// Output path for the updated roster (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List members, optionally filtered
    Members {
        /// all, bronze, silver, gold or vip
        #[arg(long, default_value = "all")]
        tier: String,

        /// Match on name or email
        #[arg(long)]
        search: Option<String>,
    },

    /// Dashboard totals and top spenders
    Overview {
        #[arg(long, default_value_t = 4)]
        top: usize,
    },
}

#[derive(Serialize)]
struct MemberRow<'a> {
    id: &'a str,
    name: &'a str,
    email: &'a str,
    tier: Tier,
    points: u32,
    total_spent: f64,
    last_visit: DateTime<Utc>,
    status: MemberStatus,
    discount_percent: f64,
}

#[derive(Serialize)]
struct OverviewOutput<'a> {
    #[serde(flatten)]
    overview: DirectoryOverview,
    top_spenders: Vec<&'a Member>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "xclub_admin=info,xclub_loyalty=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let now = parse_now(cli.now.as_deref())?;

    match cli.command {
        Commands::Defaults => print_json(&TierPolicySet::default()),
        Commands::Validate => cmd_validate(cli.config.as_deref()),
        Commands::Evaluate => {
            let engine = build_engine(cli.config.as_deref())?;
            let directory = load_members(cli.members.as_deref())?;
            let report = preview(directory.members(), &engine.snapshot(), now);
            print_json(&report)
        }
        Commands::Sweep { output } => {
            let engine = build_engine(cli.config.as_deref())?;
            let mut members = load_members(cli.members.as_deref())?.into_members();
            let report = sweep(&mut members, &engine.snapshot(), now);
            write_roster(&members, output.as_deref())?;
            eprintln!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Members { tier, search } => {
            let engine = build_engine(cli.config.as_deref())?;
            let directory = load_members(cli.members.as_deref())?;
            cmd_members(&engine, &directory, &tier, search.as_deref(), now)
        }
        Commands::Overview { top } => {
            let engine = build_engine(cli.config.as_deref())?;
            let directory = load_members(cli.members.as_deref())?;
            let overview = directory.overview(engine.snapshot().policies(), now)?;
            print_json(&OverviewOutput {
                overview,
                top_spenders: directory.top_spenders(top),
            })
        }
    }
}

fn parse_now(raw: Option<&str>) -> anyhow::Result<DateTime<Utc>> {
    match raw {
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid --now timestamp '{s}'"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load(path).context("failed to load configuration")?;
    info!(
        program = %config.program_name,
        tiers = config.loyalty.tiers.len(),
        "Configuration loaded"
    );
    Ok(config)
}

fn build_engine(path: Option<&Path>) -> anyhow::Result<LoyaltyEngine> {
    let config = load_config(path)?;
    LoyaltyEngine::new(&config.loyalty).context("tier policies rejected")
}

fn load_members(path: Option<&Path>) -> anyhow::Result<MemberDirectory> {
    match path {
        Some(p) => MemberDirectory::load(p)
            .with_context(|| format!("failed to load members from {}", p.display())),
        None => {
            warn!("No --members given, using the demo roster");
            Ok(MemberDirectory::demo())
        }
    }
}

fn cmd_validate(path: Option<&Path>) -> anyhow::Result<()> {
    let Some(path) = path else {
        bail!("validate needs a policy file: pass --config or set XCLUB_CONFIG");
    };
    let config = load_config(Some(path))?;
    let set = validate_policy_list(&config.loyalty.tiers)
        .with_context(|| format!("{} is not a valid policy set", path.display()))?;

    println!("{}: OK", path.display());
    for p in set.iter() {
        println!(
            "  {:<6}  min ${:>9.2}  discount {:>5.1}%  visit {:>3}d  downgrade {:>3}d  auto-up {:<5}  auto-down {}",
            p.tier.as_str(),
            p.min_spend,
            p.discount_percent,
            p.visit_frequency_days,
            p.downgrade_threshold_days,
            p.auto_upgrade,
            p.auto_downgrade,
        );
    }
    Ok(())
}

fn cmd_members(
    engine: &LoyaltyEngine,
    directory: &MemberDirectory,
    tier: &str,
    search: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let filter: TierFilter = tier.parse()?;
    let snapshot = engine.snapshot();
    let mut rows = Vec::new();
    for m in directory.query(filter, search) {
        rows.push(MemberRow {
            id: &m.id,
            name: &m.name,
            email: &m.email,
            tier: m.current_tier,
            points: m.points,
            total_spent: m.total_spent,
            last_visit: m.last_visit,
            status: directory.status(m, snapshot.policies(), now)?,
            discount_percent: engine.discount_for(m),
        });
    }
    print_json(&rows)
}

fn write_roster(members: &[Member], output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(members)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), count = members.len(), "Roster written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

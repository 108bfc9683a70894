//! Operator CLI for the one-DB reset/migrate/validate workflow (spec.md §6).
//! Exit codes: `0` success, `2` config error or failed validation, `3`
//! unexpected error, `130` interrupted — same contract as the original
//! `one_db_migration_reset_workflow.py` this is ported from.

mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use workflow::{CliError, ResetScope};

#[derive(Parser)]
#[command(name = "butler", about = "Butler platform operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// One-DB reset/migrate/validate workflow.
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    /// Destructive reset only.
    Reset(ResetArgs),
    /// Replay embedded migrations only.
    Migrate(TargetArgs),
    /// Run table/connectivity validation only.
    Validate(TargetArgs),
    /// Reset, then migrate, then validate, in one command.
    Run(ResetArgs),
}

#[derive(clap::Args, Clone)]
struct TargetArgs {
    /// Env var containing the target DB URL.
    #[arg(long, default_value = butler_db::ENV_DB_URL)]
    target_env: String,
    /// Optional JSON report output path.
    #[arg(long)]
    report_path: Option<PathBuf>,
}

#[derive(clap::Args, Clone)]
struct ResetArgs {
    #[command(flatten)]
    target: TargetArgs,
    /// 'database' drops/recreates the whole database; 'schema' drops/recreates `public`.
    #[arg(long, value_enum, default_value = "schema")]
    scope: ResetScope,
    /// Safety guard. Must equal RESET for non-dry-run reset operations.
    #[arg(long)]
    confirm_destructive_reset: Option<String>,
    /// Allow target DB names that look production-like (contain "prod").
    #[arg(long)]
    allow_production_db_name: bool,
    /// Preview reset actions without executing destructive statements.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::from_filename(".env.local");
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).try_init().ok();

    let cli = Cli::parse();

    let outcome = tokio::select! {
        outcome = run(&cli) => outcome,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted.");
            std::process::exit(130);
        }
    };

    let (exit_code, report_path, report) = outcome;
    print_summary(&report);
    if let Some(path) = report_path {
        if let Err(e) = write_report(&path, &report) {
            eprintln!("failed to write report to {}: {e}", path.display());
        } else {
            println!("Report written to {}", path.display());
        }
    }
    std::process::exit(exit_code);
}

async fn run(cli: &Cli) -> (i32, Option<PathBuf>, Value) {
    let Commands::Db { cmd } = &cli.cmd;
    let (command_name, target_env, report_path) = command_meta(cmd);

    match dispatch(cmd).await {
        Ok((exit_code, report)) => (exit_code, report_path, report),
        Err(e) => {
            let (exit_code, message) = match &e {
                CliError::Config(msg) => (2, format!("CONFIG ERROR: {msg}")),
                CliError::Unexpected(err) => (3, format!("UNEXPECTED ERROR: {err}")),
            };
            eprintln!("{message}");
            let target_db = std::env::var(&target_env)
                .ok()
                .and_then(|url| workflow::parse_target(&url).ok())
                .map(|t| t.db_name)
                .unwrap_or_else(|| "<unknown>".to_string());
            let report = workflow::build_report(command_name, &target_env, &target_db, "error", serde_json::json!({}), Some(e.to_string()));
            (exit_code, report_path, report)
        }
    }
}

fn command_meta(cmd: &DbCmd) -> (&'static str, String, Option<PathBuf>) {
    match cmd {
        DbCmd::Reset(args) => ("reset", args.target.target_env.clone(), args.target.report_path.clone()),
        DbCmd::Migrate(args) => ("migrate", args.target_env.clone(), args.report_path.clone()),
        DbCmd::Validate(args) => ("validate", args.target_env.clone(), args.report_path.clone()),
        DbCmd::Run(args) => ("run", args.target.target_env.clone(), args.target.report_path.clone()),
    }
}

async fn dispatch(cmd: &DbCmd) -> Result<(i32, Value), CliError> {
    match cmd {
        DbCmd::Reset(args) => {
            let db_url = require_env(&args.target.target_env)?;
            let target = workflow::parse_target(&db_url)?;
            workflow::check_reset_safety(&target.db_name, args.allow_production_db_name)?;
            workflow::require_confirm_reset(args.dry_run, args.confirm_destructive_reset.as_deref())?;

            let reset_result = workflow::reset(&target, args.scope, args.dry_run).await?;
            let details = serde_json::json!({ "scope": args.scope.as_str(), "dry_run": args.dry_run, "reset": reset_result });
            let report =
                workflow::build_report("reset", &args.target.target_env, &target.db_name, "ok", details, None);
            Ok((0, report))
        }

        DbCmd::Migrate(args) => {
            let db_url = require_env(&args.target_env)?;
            let target = workflow::parse_target(&db_url)?;
            let migrate_result = workflow::migrate(&target).await?;
            let details = serde_json::json!({ "migrations": migrate_result });
            let report = workflow::build_report("migrate", &args.target_env, &target.db_name, "ok", details, None);
            Ok((0, report))
        }

        DbCmd::Validate(args) => {
            let db_url = require_env(&args.target_env)?;
            let target = workflow::parse_target(&db_url)?;
            let validation = workflow::validate(&target).await?;
            let status = validation["status"].as_str().unwrap_or("failed").to_string();
            let exit_code = if status == "ok" { 0 } else { 2 };
            let details = serde_json::json!({ "validation": validation });
            let report = workflow::build_report("validate", &args.target_env, &target.db_name, &status, details, None);
            Ok((exit_code, report))
        }

        DbCmd::Run(args) => {
            let db_url = require_env(&args.target.target_env)?;
            let target = workflow::parse_target(&db_url)?;
            workflow::check_reset_safety(&target.db_name, args.allow_production_db_name)?;
            workflow::require_confirm_reset(args.dry_run, args.confirm_destructive_reset.as_deref())?;

            let reset_result = workflow::reset(&target, args.scope, args.dry_run).await?;
            let mut details = serde_json::json!({ "scope": args.scope.as_str(), "dry_run": args.dry_run, "reset": reset_result });

            if args.dry_run {
                details["note"] = serde_json::json!("dry-run stops after reset planning; migrate/validate not executed");
                let report = workflow::build_report("run", &args.target.target_env, &target.db_name, "ok", details, None);
                return Ok((0, report));
            }

            let migrate_result = workflow::migrate(&target).await?;
            let validation = workflow::validate(&target).await?;
            details["migrations"] = migrate_result;
            details["validation"] = validation.clone();

            let status = validation["status"].as_str().unwrap_or("failed").to_string();
            let exit_code = if status == "ok" { 0 } else { 2 };
            let report = workflow::build_report("run", &args.target.target_env, &target.db_name, &status, details, None);
            Ok((exit_code, report))
        }
    }
}

fn require_env(var: &str) -> Result<String, CliError> {
    std::env::var(var).map_err(|_| CliError::Config(format!("environment variable {var:?} is not set; cannot resolve target DB")))
}

fn print_summary(report: &Value) {
    let command = report["command"].as_str().unwrap_or("?");
    let status = report["status"].as_str().unwrap_or("?");
    let target_db = report["target_db"].as_str().unwrap_or("?");
    println!("{} status={status} target_db={target_db}", command.to_uppercase());

    if let Some(summary) = report.pointer("/details/validation/summary") {
        println!(
            "  validation: tables={} missing_tables={}",
            summary["tables_checked"], summary["missing_tables"]
        );
    }
}

fn write_report(path: &PathBuf, report: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, format!("{}\n", serde_json::to_string_pretty(report)?))?;
    Ok(())
}

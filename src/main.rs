//! reposettings CLI
//!
//! Command line tool applying declarative settings to GitHub repositories

use clap::Parser;
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::debug;

use gh_reposettings::{
    config::{access_token_from_env, load_document},
    labels::{LabelOperation, LabelStatus},
    metadata::MetadataOutcome,
    protection::{BranchOutcome, SkipReason},
    settings::{ReconcileOutcome, RepoReport},
    GitHubClient, RepoSettingsConfig, Result, RunReport,
};

/// reposettings CLI
///
/// Declarative GitHub repository settings tool
#[derive(Parser)]
#[command(
    name = "reposettings",
    version,
    about = "Apply declarative settings to GitHub repositories",
    long_about = "Reconciles repository features, merge strategies, branch protection and labels \
    of GitHub repositories with a YAML document. The access token is read from $GITHUB_TOKEN."
)]
struct Cli {
    /// Settings document path (YAML)
    path: Option<PathBuf>,

    /// Settings document path, alternative to the positional argument
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Dry run mode (don't make actual changes)
    #[arg(long)]
    dry_run: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Settings document path; the positional argument wins over `--config`
    fn settings_path(&self) -> Option<&Path> {
        self.path.as_deref().or(self.config.as_deref())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(path) = cli.settings_path() else {
        eprintln!("{}", "Usage: reposettings <reposettings.yml>".red());
        eprintln!("Use {} for help", "reposettings --help".cyan());
        std::process::exit(1);
    };

    if let Err(error) = run(path, cli.dry_run, cli.verbose).await {
        eprintln!("{} {}", "✗".red(), error.to_string().red());
        std::process::exit(error.exit_code());
    }
}

/// Install the `tracing` subscriber; `RUST_LOG` overrides the default level
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Load, validate and apply the settings document
async fn run(path: &Path, dry_run: bool, verbose: bool) -> Result<()> {
    let document = load_document(path)?;
    let token = access_token_from_env()?;
    let config = RepoSettingsConfig::from_document(&document)?;

    if dry_run {
        println!(
            "{} Running in dry-run mode (no changes will be made)",
            "!".yellow()
        );
    }

    let client = GitHubClient::new(&token).await?;
    if let Ok(rate_limit) = client.get_rate_limit().await {
        debug!(
            "GitHub API rate limit: {}/{} remaining, resets at {}",
            rate_limit.remaining, rate_limit.limit, rate_limit.reset_at
        );
    }

    let report = gh_reposettings::apply_settings(client, &config, dry_run).await?;
    display_run_report(&report, dry_run, verbose);

    Ok(())
}

/// Display the result of a run
fn display_run_report(report: &RunReport, dry_run: bool, verbose: bool) {
    if dry_run {
        println!("\n{} Run preview (dry-run mode):", "📋".blue());
    } else {
        println!("\n{} Run completed:", "✓".green());
    }

    for repository in &report.repositories {
        display_repo_report(repository, verbose);
    }

    let failures = report.label_failures();
    if failures > 0 {
        eprintln!(
            "\n{} {} label operation(s) failed",
            "✗".red(),
            failures.to_string().red()
        );
    }
}

fn display_repo_report(report: &RepoReport, verbose: bool) {
    println!("\n{}", report.repository.cyan().bold());

    for (name, outcome) in &report.outcomes {
        match outcome {
            ReconcileOutcome::Metadata(metadata) => match metadata {
                MetadataOutcome::NotManaged => {
                    println!("  {}: {}", name, "not managed".dimmed())
                }
                MetadataOutcome::Unchanged => println!("  {}: {}", name, "unchanged".white()),
                MetadataOutcome::Applied(fields) => {
                    println!(
                        "  {}: {} field(s) applied",
                        name,
                        fields.len().to_string().green()
                    );
                    if verbose {
                        for (field, value) in fields {
                            println!("      {}", format!("{}: {}", field, value).dimmed());
                        }
                    }
                }
            },

            ReconcileOutcome::BranchProtection(protection) => {
                if !protection.managed {
                    println!("  {}: {}", name, "not managed".dimmed());
                    continue;
                }
                println!(
                    "  {}: {} applied, {} unchanged",
                    name,
                    protection.applied().to_string().green(),
                    protection.unchanged().to_string().white()
                );
                if verbose {
                    for branch in &protection.branches {
                        display_branch_outcome(branch);
                    }
                }
            }

            ReconcileOutcome::Labels(labels) => {
                if !labels.managed {
                    println!("  {}: {}", name, "not managed".dimmed());
                    continue;
                }
                println!("  {}:", name);
                println!("    📝 Created: {}", labels.created().to_string().green());
                println!("    🔄 Edited: {}", labels.edited().to_string().yellow());
                println!("    🗑️ Deleted: {}", labels.deleted().to_string().red());
                println!("    📛 Replaced: {}", labels.replaced().to_string().blue());
                println!("    ➖ Unchanged: {}", labels.unchanged().to_string().white());
                println!("    ✗ Failed: {}", labels.failures().len().to_string().red());

                if verbose {
                    for (i, result) in labels.results.iter().enumerate() {
                        let prefix = format!("    {}.", i + 1);
                        display_label_operation(&prefix, &result.operation);
                        if let LabelStatus::Failed(reason) = &result.status {
                            println!("      {}", reason.red());
                        }
                    }
                }
            }
        }
    }
}

fn display_branch_outcome(outcome: &BranchOutcome) {
    match outcome {
        BranchOutcome::Applied {
            branch,
            settings,
            first_time,
        } => {
            let note = if *first_time { " (newly protected)" } else { "" };
            println!("      {} {}{}", "🔒".green(), branch.cyan(), note);
            for (field, value) in settings {
                println!("        {}", format!("{}: {}", field, value).dimmed());
            }
        }
        BranchOutcome::Unchanged { branch } => {
            println!("      {} {}", "➖".white(), branch.white());
        }
        BranchOutcome::Skipped { branch, reason } => {
            let reason = match reason {
                SkipReason::OutOfScope => "not protected",
                SkipReason::NoRules => "no rules",
            };
            println!("      {} {} ({})", "⏭".dimmed(), branch.dimmed(), reason);
        }
    }
}

fn display_label_operation(prefix: &str, operation: &LabelOperation) {
    match operation {
        LabelOperation::Create { name, color, .. } => {
            println!(
                "{} {} Create label: {} (#{})",
                prefix,
                "📝".green(),
                name.cyan(),
                color.as_deref().unwrap_or("default")
            );
        }
        LabelOperation::Edit {
            current_name,
            new_name,
            changes,
        } => {
            println!(
                "{} {} Edit label: {} -> {}",
                prefix,
                "🔄".yellow(),
                current_name.cyan(),
                new_name.cyan()
            );
            for change in changes {
                println!("      {}", change.dimmed());
            }
        }
        LabelOperation::Delete { name, reason } => {
            println!(
                "{} {} Delete label: {} ({})",
                prefix,
                "🗑️".red(),
                name.red(),
                reason.dimmed()
            );
        }
        LabelOperation::Replace {
            name,
            replacement,
            retagged,
        } => {
            println!(
                "{} {} Replace label: {} -> {} ({} issue(s) retagged)",
                prefix,
                "📛".blue(),
                name.cyan(),
                replacement.cyan(),
                retagged.len()
            );
        }
        LabelOperation::NoChange { name } => {
            println!("{} {} No change: {}", prefix, "➖".white(), name.white());
        }
    }
}

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::{distributions::Alphanumeric, Rng};
use serde_json::json;
use sha2::{Digest, Sha256};

use depot_core::DepotError;
use depot_domain::timestamp_secs;

mod commands;

use commands::CommandOutput;

#[derive(Parser)]
#[command(name = "depot", about = "Administer a depot storage root", version)]
struct DepotCli {
    /// Storage root (defaults to DEPOT_STORAGE_PATH or ./storage).
    #[arg(long, global = true, env = "DEPOT_STORAGE_PATH")]
    root: Option<PathBuf>,

    /// Acting account for authenticated operations.
    #[arg(long, global = true, env = "DEPOT_USER")]
    user: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: DepotCommand,
}

#[derive(Subcommand)]
enum DepotCommand {
    /// Account administration.
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    /// Push one file (or a deletion) under a commit.
    Push(PushArgs),
    /// Download a project's current tree as a zip archive.
    Pull {
        owner: String,
        project: String,
        /// Destination path (defaults to <project>.zip).
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show the newest commit of a project.
    Fetch { owner: String, project: String },
    /// Show the repository view: files, readme, stars, deploy state.
    Repo { owner: String, project: String },
    /// Fetch one file from the current tree.
    File {
        owner: String,
        project: String,
        path: String,
    },
    /// List commits, newest first.
    Log { owner: String, project: String },
    /// Language percentages over the current tree.
    Languages { owner: String, project: String },
    /// Toggle a star on a project.
    Star { owner: String, project: String },
    /// Fork a project under the acting account.
    Fork { owner: String, project: String },
    /// Mark a project as deployed from a source file.
    Deploy {
        project: String,
        #[arg(long, default_value = "index.html")]
        source: String,
    },
    /// Clear a project's deployed flag.
    Undeploy { project: String },
    /// Delete an owned project and all its records.
    Delete { project: String },
    /// Search projects by name.
    Search { query: String },
    /// Show a user's profile.
    Profile { username: String },
    /// Run the catalog/filesystem consistency sweep.
    Audit {
        /// Ignore the cooldown and sweep unconditionally.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum UserCommand {
    /// Register an account and print its generated API key.
    Add { username: String, email: String },
}

#[derive(Args)]
struct PushArgs {
    project: String,
    /// Local file to upload. Omit together with --delete to record a
    /// deletion.
    file: Option<PathBuf>,
    /// Path inside the project (defaults to the local file name).
    #[arg(long)]
    path: Option<String>,
    /// Commit identifier (generated when omitted).
    #[arg(long)]
    commit: Option<String>,
    #[arg(short, long, default_value = "update")]
    message: String,
    /// Record a deletion of --path instead of an upload.
    #[arg(long)]
    delete: bool,
}

fn main() -> ExitCode {
    let cli = DepotCli::parse();
    init_tracing(cli.verbose);
    match run(&cli) {
        Ok(output) => {
            output.emit(cli.json);
            ExitCode::SUCCESS
        }
        Err(err) => {
            if cli.json {
                let payload = json!({
                    "status": "error",
                    "message": format!("{err:#}"),
                });
                println!("{payload}");
            } else {
                eprintln!("error: {err:#}");
            }
            if err.downcast_ref::<DepotError>().is_some() {
                ExitCode::from(1)
            } else {
                ExitCode::from(2)
            }
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = format!("depot_core={level},depot_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run(cli: &DepotCli) -> Result<CommandOutput> {
    let depot = depot_core::Depot::open(cli.root.clone())?;
    match &cli.command {
        DepotCommand::User { command } => match command {
            UserCommand::Add { username, email } => {
                let api_key = generate_api_key(username, email);
                let user = depot.catalog().create_user(username, email, &api_key)?;
                Ok(CommandOutput::user_created(&user.username, &api_key))
            }
        },
        DepotCommand::Push(args) => commands::push(&depot, acting_user(cli)?, args),
        DepotCommand::Pull { owner, project, out } => {
            let handle = depot_core::pull_archive(&depot, owner, project)?;
            let dest = out
                .clone()
                .unwrap_or_else(|| PathBuf::from(handle.filename()));
            fs::copy(handle.path(), &dest).with_context(|| {
                format!("failed to write archive to {}", dest.display())
            })?;
            Ok(CommandOutput::archive_written(&dest))
        }
        DepotCommand::Fetch { owner, project } => {
            let latest = depot_core::latest_commit(&depot, owner, project)?;
            Ok(CommandOutput::latest_commit(latest))
        }
        DepotCommand::Repo { owner, project } => {
            let view =
                depot_core::get_repository(&depot, owner, project, cli.user.as_deref())?;
            Ok(CommandOutput::repository(view))
        }
        DepotCommand::File { owner, project, path } => {
            let content = depot_core::get_file(&depot, owner, project, path)?;
            Ok(CommandOutput::file(path, content))
        }
        DepotCommand::Log { owner, project } => {
            let commits = depot_core::list_commits(&depot, owner, project)?;
            Ok(CommandOutput::commits(commits))
        }
        DepotCommand::Languages { owner, project } => {
            commands::languages(&depot, owner, project)
        }
        DepotCommand::Star { owner, project } => {
            let state =
                depot_core::star_project(&depot, acting_user(cli)?, owner, project)?;
            Ok(CommandOutput::star(state))
        }
        DepotCommand::Fork { owner, project } => {
            let fork_name =
                depot_core::fork_project(&depot, acting_user(cli)?, owner, project)?;
            Ok(CommandOutput::forked(&fork_name))
        }
        DepotCommand::Deploy { project, source } => {
            let user = acting_user(cli)?;
            depot_core::deploy_project(&depot, user, user, project, source)?;
            Ok(CommandOutput::message(format!(
                "{project} deployed from {source}"
            )))
        }
        DepotCommand::Undeploy { project } => {
            let user = acting_user(cli)?;
            depot_core::undeploy_project(&depot, user, user, project)?;
            Ok(CommandOutput::message(format!("{project} undeployed")))
        }
        DepotCommand::Delete { project } => {
            let user = acting_user(cli)?;
            depot_core::delete_project(&depot, user, user, project)?;
            Ok(CommandOutput::message(format!("{project} deleted")))
        }
        DepotCommand::Search { query } => {
            let hits = depot_core::search_projects(&depot, query)?;
            Ok(CommandOutput::search(hits))
        }
        DepotCommand::Profile { username } => {
            let profile = depot_core::get_profile(&depot, username)?;
            Ok(CommandOutput::profile(profile))
        }
        DepotCommand::Audit { force } => {
            let summary = if *force {
                Some(depot_core::sweep(&depot)?)
            } else {
                depot_core::run_if_due(&depot)?
            };
            Ok(CommandOutput::audit(summary))
        }
    }
}

fn acting_user(cli: &DepotCli) -> Result<&str> {
    cli.user.as_deref().ok_or_else(|| {
        anyhow!(DepotError::Validation(
            "this command needs an acting account (--user or DEPOT_USER)".to_string()
        ))
    })
}

fn generate_api_key(username: &str, email: &str) -> String {
    let nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    hex::encode(Sha256::digest(
        format!("{username}{email}{}{nonce}", timestamp_secs()).as_bytes(),
    ))
}

use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

use anyhow::{anyhow, Context, Result};
use rand::{distributions::Alphanumeric, Rng};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use depot_core::{
    AuditSummary, CommitSummary, Depot, DepotError, FileContent, ProfileView, PushRequest,
    RepositoryView, ScratchCache, SearchHit, StarState,
};
use depot_domain::timestamp_secs;

use crate::PushArgs;

/// One command's result: a JSON payload plus the human rendering of it.
pub struct CommandOutput {
    payload: Value,
    human: String,
}

impl CommandOutput {
    pub fn emit(&self, as_json: bool) {
        if as_json {
            let envelope = json!({ "status": "ok", "data": self.payload });
            println!("{envelope}");
        } else if !self.human.is_empty() {
            println!("{}", self.human);
        }
    }

    pub fn message(text: String) -> Self {
        Self {
            payload: json!({ "message": text }),
            human: text,
        }
    }

    pub fn user_created(username: &str, api_key: &str) -> Self {
        Self {
            payload: json!({ "username": username, "api_key": api_key }),
            human: format!("registered {username}\napi key: {api_key}"),
        }
    }

    pub fn archive_written(dest: &Path) -> Self {
        Self {
            payload: json!({ "archive": dest.display().to_string() }),
            human: format!("archive written to {}", dest.display()),
        }
    }

    pub fn latest_commit(latest: Option<CommitSummary>) -> Self {
        match latest {
            Some(commit) => Self {
                human: format!("{} {} ({})", commit.id, commit.message, commit.date),
                payload: json!({ "latest_commit": commit }),
            },
            None => Self {
                payload: json!({ "latest_commit": Value::Null }),
                human: "no commits yet".to_string(),
            },
        }
    }

    pub fn repository(view: RepositoryView) -> Self {
        let mut human = format!(
            "{}/{}: {} file(s), {} star(s)",
            view.owner,
            view.project,
            view.files.len(),
            view.stars
        );
        if let Some(commit) = &view.latest_commit {
            human.push_str(&format!("\nlatest: {} {}", commit.id, commit.message));
        }
        for file in &view.files {
            human.push_str(&format!("\n  {} ({} bytes)", file.path, file.size));
        }
        Self {
            payload: serde_json::to_value(&view).unwrap_or(Value::Null),
            human,
        }
    }

    pub fn file(path: &str, content: FileContent) -> Self {
        let human = match &content {
            FileContent::Text(body) => body.clone(),
            FileContent::Base64(_) => format!("{path}: binary content (base64 in --json output)"),
        };
        Self {
            payload: serde_json::to_value(&content).unwrap_or(Value::Null),
            human,
        }
    }

    pub fn commits(commits: Vec<CommitSummary>) -> Self {
        let human = if commits.is_empty() {
            "no commits yet".to_string()
        } else {
            commits
                .iter()
                .map(|c| format!("{} {} by {} ({})", c.id, c.message, c.author, c.date))
                .collect::<Vec<_>>()
                .join("\n")
        };
        Self {
            payload: json!({ "commits": commits }),
            human,
        }
    }

    pub fn star(state: StarState) -> Self {
        Self {
            human: if state.starred {
                format!("starred ({} total)", state.total_stars)
            } else {
                format!("unstarred ({} total)", state.total_stars)
            },
            payload: serde_json::to_value(state).unwrap_or(Value::Null),
        }
    }

    pub fn forked(fork_name: &str) -> Self {
        Self {
            payload: json!({ "forked_project": fork_name }),
            human: format!("forked as {fork_name}"),
        }
    }

    pub fn search(hits: Vec<SearchHit>) -> Self {
        let human = if hits.is_empty() {
            "no matches".to_string()
        } else {
            hits.iter()
                .map(|hit| format!("{}/{}", hit.owner, hit.project))
                .collect::<Vec<_>>()
                .join("\n")
        };
        Self {
            payload: json!({ "results": hits }),
            human,
        }
    }

    pub fn profile(profile: ProfileView) -> Self {
        let mut human = format!("{} (joined {})", profile.username, profile.joined_at);
        for project in &profile.projects {
            human.push_str(&format!("\n  {}", project.name));
        }
        Self {
            payload: serde_json::to_value(&profile).unwrap_or(Value::Null),
            human,
        }
    }

    pub fn audit(summary: Option<AuditSummary>) -> Self {
        match summary {
            Some(summary) => Self {
                human: format!(
                    "swept {} project(s): {} orphaned, {} missing trees, {} stale records",
                    summary.projects_checked,
                    summary.orphaned_projects_removed,
                    summary.missing_tree_projects_removed,
                    summary.stale_records_removed
                ),
                payload: json!({
                    "projects_checked": summary.projects_checked,
                    "orphaned_projects_removed": summary.orphaned_projects_removed,
                    "missing_tree_projects_removed": summary.missing_tree_projects_removed,
                    "stale_records_removed": summary.stale_records_removed,
                    "projects_skipped": summary.projects_skipped,
                }),
            },
            None => Self {
                payload: json!({ "skipped": "cooldown" }),
                human: "audit skipped (cooldown has not elapsed)".to_string(),
            },
        }
    }
}

/// Upload one local file (or record a deletion) under a commit.
pub fn push(depot: &Depot, owner: &str, args: &PushArgs) -> Result<CommandOutput> {
    let (content, last_modified) = if args.delete {
        (None, timestamp_secs())
    } else {
        let file = args.file.as_ref().ok_or_else(|| {
            anyhow!(DepotError::Validation(
                "a local file is required unless --delete is set".to_string()
            ))
        })?;
        let bytes = fs::read(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        let mtime = fs::metadata(file)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|ts| ts.duration_since(UNIX_EPOCH).ok())
            .map_or_else(timestamp_secs, |d| i64::try_from(d.as_secs()).unwrap_or(0));
        (Some(bytes), mtime)
    };

    let path = match (&args.path, &args.file) {
        (Some(path), _) => path.clone(),
        (None, Some(file)) => file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                anyhow!(DepotError::Validation(format!(
                    "cannot derive a project path from {}",
                    file.display()
                )))
            })?,
        (None, None) => {
            return Err(anyhow!(DepotError::Validation(
                "--delete needs --path to name the file being removed".to_string()
            )))
        }
    };

    let commit_id = args.commit.clone().unwrap_or_else(generate_commit_id);
    let declared_hash = content
        .as_deref()
        .map(|bytes| hex::encode(Sha256::digest(bytes)))
        .unwrap_or_default();

    let summary = depot_core::push_file(
        depot,
        &PushRequest {
            owner: owner.to_string(),
            project: args.project.clone(),
            commit_id: commit_id.clone(),
            path,
            declared_hash,
            last_modified,
            message: args.message.clone(),
            author: owner.to_string(),
            content,
        },
    )?;

    Ok(CommandOutput {
        human: format!(
            "pushed {} ({} bytes) under commit {}",
            summary.path, summary.size, summary.commit_id
        ),
        payload: serde_json::to_value(&summary).unwrap_or(Value::Null),
    })
}

/// Language percentages, served from the scratch cache when a fresh entry
/// exists.
pub fn languages(depot: &Depot, owner: &str, project: &str) -> Result<CommandOutput> {
    let cache = ScratchCache::new(depot.cache_dir());
    let endpoint = format!("languages/{owner}/{project}");
    let payload = match cache.load(&endpoint) {
        Some(cached) => cached,
        None => {
            let stats = depot_core::language_stats(depot, owner, project)?;
            let value = serde_json::to_value(&stats).context("failed to encode language stats")?;
            if let Err(err) = cache.store(&endpoint, &value) {
                tracing::debug!(%err, endpoint, "failed to cache language stats");
            }
            value
        }
    };

    let human = match payload.as_object() {
        Some(map) if !map.is_empty() => map
            .iter()
            .map(|(lang, pct)| format!("{lang}: {pct}%"))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => "no recognized source files".to_string(),
    };
    Ok(CommandOutput { payload, human })
}

fn generate_commit_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

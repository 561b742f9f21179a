//! Text output for CLI commands.

use crate::cli::{Client, ClientError};
use crate::cluster::{MemberRecord, now_unix};
use crate::protocol::RemotesResult;
use crate::sync::PeerOutcome;
use crate::task::{CycleOutcome, CycleReport};

/// Format a duration in a human-readable way.
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Format a Unix timestamp relative to `now`.
fn format_age(ts: i64, now: i64) -> String {
    let diff = now - ts;
    if diff < 0 {
        return format!("in {}s", -diff);
    }
    format!("{} ago", format_duration(diff as u64))
}

fn short(commit: &str) -> &str {
    commit.get(..12).unwrap_or(commit)
}

fn outcome_label(outcome: CycleOutcome) -> &'static str {
    match outcome {
        CycleOutcome::Completed => "completed",
        CycleOutcome::NotClustered => "skipped (not clustered)",
        CycleOutcome::Busy => "skipped (another sync in progress)",
        CycleOutcome::TopologyUnavailable => "failed (cluster members unavailable)",
        CycleOutcome::BootstrapFailed => "failed (could not clone global repository)",
        CycleOutcome::Aborted => "aborted",
    }
}

/// Print the daemon status.
pub fn print_status() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = match Client::connect() {
        Ok(c) => c,
        Err(ClientError::NotRunning) => {
            println!("Daemon: not running");
            return Ok(());
        }
        Err(e) => return Err(Box::new(e)),
    };

    // If the daemon exits between connect and request, treat it as not
    // running instead of surfacing transport errors.
    let status = match client.status() {
        Ok(status) => status,
        Err(ClientError::NotRunning) => {
            println!("Daemon: not running");
            return Ok(());
        }
        Err(e) => return Err(Box::new(e)),
    };

    println!("Daemon");
    println!("  Status:     running");
    println!("  PID:        {}", status.pid);
    println!("  Version:    {}", status.version);
    println!("  Uptime:     {}", format_duration(status.uptime_secs));
    println!();

    let task = &status.task;
    println!("Global repository sync");
    match &task.local_address {
        Some(address) if task.clustered => println!("  Node:       {}", address),
        _ => println!("  Node:       not clustered"),
    }
    println!("  Every:      {} ticks", task.execute_every_n_cycles);
    println!("  Syncing:    {}", if task.running { "yes" } else { "no" });
    println!("  Remotes:    {} verified", task.cached_remotes);
    println!(
        "  Ticks:      {} ({} cycles, {} skipped busy)",
        task.stats.ticks, task.stats.cycles, task.stats.skipped_busy
    );
    match (task.stats.last_outcome, task.stats.last_cycle_at) {
        (Some(outcome), Some(at)) => println!(
            "  Last cycle: {} {} ({}ms)",
            outcome_label(outcome),
            format_age(at as i64, now_unix()),
            task.stats.last_duration_ms.unwrap_or(0)
        ),
        _ => println!("  Last cycle: never"),
    }

    Ok(())
}

/// Print the result of one sync cycle.
pub fn print_cycle_report(report: &CycleReport) {
    println!(
        "Sync {} in {}ms ({} peers)",
        outcome_label(report.outcome),
        report.duration_ms,
        report.peers
    );

    if let Some(bootstrap) = &report.bootstrap {
        println!();
        println!("Clone");
        for attempt in &bootstrap.attempts {
            match &attempt.error {
                None => println!("  {:<32} ok", attempt.remote),
                Some(e) => println!("  {:<32} {}", attempt.remote, e),
            }
        }
    }

    if let Some(reconcile) = &report.reconcile {
        println!();
        println!(
            "Remotes ({} added, {} updated, {} unchanged)",
            reconcile.added.len(),
            reconcile.updated.len(),
            reconcile.skipped
        );
        for name in &reconcile.added {
            println!("  + {}", name);
        }
        for name in &reconcile.updated {
            println!("  ~ {}", name);
        }
        for name in &reconcile.legacy_removed {
            println!("  - {}", name);
        }
        for failure in &reconcile.failures {
            println!("  ! {} ({}): {}", failure.remote, failure.url, failure.error);
        }
    }

    if let Some(sync) = &report.sync {
        println!();
        println!(
            "Content ({} changed, {} failed)",
            sync.changed(),
            sync.failed()
        );
        for peer in &sync.peers {
            let detail = match &peer.outcome {
                PeerOutcome::Initialized { commit } => format!("initialized at {}", short(commit)),
                PeerOutcome::UpToDate => "up to date".to_string(),
                PeerOutcome::FastForward { commit } => {
                    format!("fast-forwarded to {}", short(commit))
                }
                PeerOutcome::Merged {
                    commit,
                    peer_commit,
                } => format!("merged {} as {}", short(peer_commit), short(commit)),
                PeerOutcome::NothingAdvertised => "no main branch".to_string(),
                PeerOutcome::Failed { error } => format!("failed: {}", error),
            };
            println!("  {:<32} {}", peer.remote, detail);
        }
    }

    if !report.errors.is_empty() {
        println!();
        println!("Errors");
        for error in &report.errors {
            println!("  {}", error);
        }
    }
}

pub fn print_remotes(result: &RemotesResult) {
    if result.remotes.is_empty() {
        println!("No remotes configured");
        return;
    }

    println!("{:<32} {:<9} URL", "REMOTE", "VERIFIED");
    println!("{}", "-".repeat(80));
    for remote in &result.remotes {
        let verified = if result.cached.contains(&remote.name) {
            "yes"
        } else {
            "-"
        };
        println!(
            "{:<32} {:<9} {}",
            remote.name,
            verified,
            remote.url.as_deref().unwrap_or("-")
        );
    }
}

pub fn print_members(members: &[MemberRecord]) {
    if members.is_empty() {
        println!("No cluster members registered");
        return;
    }

    let now = now_unix();
    println!(
        "{:<24} {:<12} {:>15} GIT URL",
        "ADDRESS", "AUTH", "HEARTBEAT"
    );
    println!("{}", "-".repeat(80));
    for member in members {
        println!(
            "{:<24} {:<12} {:>15} {}",
            member.local_address,
            member.auth.kind(),
            format_age(member.last_heartbeat_at, now),
            member.git_url
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(7260), "2h 1m");
        assert_eq!(format_duration(90000), "1d 1h");
    }

    #[test]
    fn formats_ages() {
        assert_eq!(format_age(100, 130), "30s ago");
        assert_eq!(format_age(130, 100), "in 30s");
    }

    #[test]
    fn shortens_commit_ids() {
        assert_eq!(short("0123456789abcdef"), "0123456789ab");
        assert_eq!(short("abc"), "abc");
    }
}

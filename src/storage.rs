//! Disk spill-over for batches the flush controller has given up on, plus
//! the crash-recovery protocol that replays them on the next startup.
//!
//! Each line of the spill file is a complete batch — a JSON array of
//! event records — rather than one event per line. That keeps the
//! recovery path symmetric with the send path: a line is exactly the
//! body of a send that did not happen, and a spill never needs more than
//! one file operation. The write path never panics and never blocks the
//! caller on anything but the append itself; a write that would push the
//! file over `max_bytes` is skipped rather than attempted, since a
//! partial append would otherwise corrupt the last line.
//!
//! Recovery follows a rename-then-load protocol so a crash mid-read can
//! never destroy events: the spill file is renamed to a `.recovering`
//! sibling before anything in it is trusted, and that sibling is deleted
//! only once every recovered event has been handed back to the caller
//! and a subsequent send has actually succeeded. If the process dies
//! between those two steps, the next startup finds the `.recovering`
//! file still present and resumes from it in preference to the
//! (possibly empty, possibly freshly-written) main file.

use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::event::Event;

/// Derive a storage file path unique to a given endpoint, inside
/// `base_dir`. Using a hash of the endpoint (rather than the endpoint
/// itself) keeps the filename filesystem-safe and avoids leaking the
/// destination host into a directory listing.
pub fn storage_path(base_dir: &Path, endpoint: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(endpoint.as_bytes());
    let digest = hasher.finalize();
    let hex = digest.iter().take(12).map(|b| format!("{b:02x}")).collect::<String>();
    base_dir.join(format!("httpbeacon-{hex}.jsonl"))
}

fn recovering_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".recovering");
    PathBuf::from(name)
}

/// Append one batch to `path` as a single JSON-array line, refusing to
/// write past `max_bytes` total file size. Creates the file (and its
/// parent directory) if absent.
pub async fn persist(path: &Path, batch: &[Event], max_bytes: u64) -> std::io::Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut line = match serde_json::to_vec(batch) {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize batch for spill, dropping it");
            return Ok(());
        }
    };
    line.push(b'\n');

    let existing_len = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
    if existing_len + line.len() as u64 > max_bytes {
        tracing::warn!(
            existing_len,
            incoming_len = line.len(),
            max_bytes,
            "storage ceiling reached, dropping spill batch"
        );
        return Ok(());
    }

    let mut file = open_append(path).await?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(unix)]
async fn open_append(path: &Path) -> std::io::Result<tokio::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path)
        .await
}

#[cfg(not(unix))]
async fn open_append(path: &Path) -> std::io::Result<tokio::fs::File> {
    tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
}

/// Load and parse every event spilled at `path`, preferring a
/// previously-abandoned `.recovering` file over the main one.
///
/// Each line is expected to hold a JSON array of event records (a
/// batch); a bare object is also accepted as a single-event line.
/// Anything else — blank lines, truncated trailing lines from a crash
/// mid-append, garbage — is skipped rather than failing the whole load.
pub async fn recover(path: &Path) -> std::io::Result<Vec<Event>> {
    let recovering = recovering_path(path);

    let source = if tokio::fs::try_exists(&recovering).await.unwrap_or(false) {
        recovering.clone()
    } else if tokio::fs::try_exists(path).await.unwrap_or(false) {
        tokio::fs::rename(path, &recovering).await?;
        recovering.clone()
    } else {
        return Ok(Vec::new());
    };

    let contents = tokio::fs::read_to_string(&source).await?;
    let mut events = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Array(items)) => {
                for item in items {
                    match serde_json::from_value::<Event>(item) {
                        Ok(event) => events.push(event),
                        Err(e) => tracing::warn!(error = %e, "skipping unparseable spilled event"),
                    }
                }
            }
            Ok(obj @ Value::Object(_)) => match serde_json::from_value::<Event>(obj) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!(error = %e, "skipping unparseable spilled event"),
            },
            Ok(_) => tracing::warn!("skipping spilled line that is neither an array nor an object"),
            Err(e) => tracing::warn!(error = %e, "skipping unparseable spilled line"),
        }
    }

    Ok(events)
}

/// Delete the `.recovering` file once its contents have been
/// successfully re-buffered or re-sent.
pub async fn cleanup_recovery_file(path: &Path) -> std::io::Result<()> {
    let recovering = recovering_path(path);
    match tokio::fs::remove_file(&recovering).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

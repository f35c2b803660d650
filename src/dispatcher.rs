//! The Command Dispatcher (spec.md §4.5): resolves one framed command
//! against the Command Catalog, consults the Virtual Filesystem or the
//! time anchor where the command calls for it, shapes the reply, and
//! enforces the artificial per-command delay.

use std::time::Duration;

use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::time_anchor::TimeAnchor;
use crate::vfs::{VfsError, VfsOps};

/// What the dispatcher decided to do with one framed command.
///
/// `BeginUpload`/`BeginDownload` hand the connection off to the XMODEM
/// Engine (spec.md §4.3) — the caller (`connection.rs`) owns the
/// socket halves needed to bridge the transfer and is responsible for
/// writing any post-transfer error reply (`error:md5 mismatch`,
/// `error:transfer failed`) once the engine returns.
pub enum DispatchOutcome {
    Reply(Vec<u8>),
    BeginUpload { path: String },
    BeginDownload { path: String, bytes: Vec<u8>, md5: String },
}

const IDLE_FLOOR: Duration = Duration::from_millis(100);

fn effective_delay(time_ms: u64) -> Duration {
    Duration::from_millis(time_ms).max(IDLE_FLOOR)
}

/// Indents continuation lines of a multi-line log body so they line up
/// under the first line's text, matching the width of `prefix`
/// (spec.md §4.5.9).
fn align_multiline(prefix: &str, body: &str) -> String {
    let pad = " ".repeat(prefix.len());
    body.lines().collect::<Vec<_>>().join(&format!("\n{}", pad))
}

fn vfs_error_reply(err: &VfsError) -> String {
    format!("error:{}", err)
}

/// Logs a SEND line at the descriptor's effective level (spec.md
/// §4.5.9), aligning continuation lines of multi-line bodies.
fn log_send(body: &str, debug_output_only: bool) {
    let log_body = align_multiline("SEND ", body);
    if debug_output_only {
        debug!(reply = %log_body, "SEND");
    } else {
        info!(reply = %log_body, "SEND");
    }
}

/// Dispatches one already-framed command. `cwd` is the connection's
/// current working directory; filesystem commands may update it
/// (`cd`) in place.
pub async fn dispatch(
    command: &str,
    cwd: &mut String,
    catalog: &Catalog,
    vfs: &(dyn VfsOps + Send + Sync),
    time_anchor: &TimeAnchor,
) -> DispatchOutcome {
    let trimmed = command.trim();
    let mut head_rest = trimmed.splitn(2, char::is_whitespace);
    let key = head_rest.next().unwrap_or("");
    let rest = head_rest.next().unwrap_or("").trim();

    let descriptor = match catalog.lookup(key) {
        Some(d) => d,
        None => {
            info!(command = %trimmed, "RECV");
            let reply = b"error:unsupported command\n".to_vec();
            log_send("error:unsupported command", false);
            return DispatchOutcome::Reply(reply);
        }
    };

    if descriptor.debug_output_only {
        debug!(command = %trimmed, "RECV");
    } else {
        info!(command = %trimmed, "RECV");
    }

    let outcome = match key {
        "upload" => {
            return dispatch_upload(rest, descriptor.time_ms, descriptor.debug_output_only).await
        }
        "download" => {
            return dispatch_download(rest, cwd, vfs, descriptor.time_ms, descriptor.debug_output_only)
                .await
        }
        "ls" => {
            let (path, with_sizes) = parse_ls_args(rest, cwd);
            match vfs.list(cwd, &path, with_sizes).await {
                Ok(body) => body,
                Err(err) => vfs_error_reply(&err),
            }
        }
        "pwd" => cwd.clone(),
        "cd" => {
            let path = if rest.is_empty() { "/" } else { rest };
            match vfs.cd(cwd, path).await {
                Ok(new_cwd) => {
                    *cwd = new_cwd;
                    String::new()
                }
                Err(err) => vfs_error_reply(&err),
            }
        }
        "cat" => {
            let mut parts = rest.split_whitespace();
            let path = parts.next().unwrap_or("");
            let limit = parts.next().and_then(|n| n.parse::<usize>().ok());
            if path.is_empty() {
                "error:cat requires a path".to_string()
            } else {
                match vfs.cat(cwd, path, limit).await {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).trim_end().to_string(),
                    Err(err) => vfs_error_reply(&err),
                }
            }
        }
        "mv" => {
            let mut parts = rest.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(src), Some(dst)) => match vfs.mv(cwd, src, dst).await {
                    Ok(()) => String::new(),
                    Err(err) => vfs_error_reply(&err),
                },
                _ => "error:mv requires src and dst".to_string(),
            }
        }
        "rm" => {
            if rest.is_empty() {
                "error:rm requires a path".to_string()
            } else {
                match vfs.rm(cwd, rest).await {
                    Ok(()) => String::new(),
                    Err(err) => vfs_error_reply(&err),
                }
            }
        }
        "mkdir" => {
            if rest.is_empty() {
                "error:mkdir requires a path".to_string()
            } else {
                match vfs.mkdir(cwd, rest).await {
                    Ok(()) => String::new(),
                    Err(err) => vfs_error_reply(&err),
                }
            }
        }
        "time" => dispatch_time(rest, time_anchor),
        _ => descriptor.response.clone(),
    };

    tokio::time::sleep(effective_delay(descriptor.time_ms)).await;

    let reply = compose_reply(&outcome, descriptor.sends_ok, descriptor.eot_terminated);
    log_send(&outcome, descriptor.debug_output_only);

    DispatchOutcome::Reply(reply)
}

fn parse_ls_args<'a>(rest: &'a str, cwd: &str) -> (String, bool) {
    let mut with_sizes = false;
    let mut path = None;
    for token in rest.split_whitespace() {
        if token == "-s" {
            with_sizes = true;
        } else {
            path = Some(token);
        }
    }
    (path.unwrap_or(cwd).to_string(), with_sizes)
}

fn dispatch_time(rest: &str, time_anchor: &TimeAnchor) -> String {
    if let Some(value) = rest.strip_prefix('=') {
        if let Ok(epoch) = value.trim().parse::<i64>() {
            time_anchor.set(epoch);
        }
        String::new()
    } else if rest.is_empty() {
        time_anchor.query().to_string()
    } else {
        String::new()
    }
}

async fn dispatch_upload(rest: &str, time_ms: u64, debug_output_only: bool) -> DispatchOutcome {
    if rest.is_empty() {
        tokio::time::sleep(effective_delay(time_ms)).await;
        log_send("error:upload requires a path", debug_output_only);
        return DispatchOutcome::Reply(b"error:upload requires a path\n".to_vec());
    }
    tokio::time::sleep(effective_delay(time_ms)).await;
    log_send(&format!("(handing off to XMODEM receiver for {rest})"), debug_output_only);
    DispatchOutcome::BeginUpload { path: rest.to_string() }
}

async fn dispatch_download(
    rest: &str,
    cwd: &str,
    vfs: &(dyn VfsOps + Send + Sync),
    time_ms: u64,
    debug_output_only: bool,
) -> DispatchOutcome {
    if rest.is_empty() {
        tokio::time::sleep(effective_delay(time_ms)).await;
        log_send("error:download requires a path", debug_output_only);
        return DispatchOutcome::Reply(b"error:download requires a path\n".to_vec());
    }
    let result = vfs.download_fetch(cwd, rest).await;
    tokio::time::sleep(effective_delay(time_ms)).await;
    match result {
        Ok((bytes, md5)) => {
            log_send(&format!("(handing off to XMODEM sender for {rest})"), debug_output_only);
            DispatchOutcome::BeginDownload { path: rest.to_string(), bytes, md5 }
        }
        Err(err) => {
            let reply = format!("error:{}", err);
            log_send(&reply, debug_output_only);
            DispatchOutcome::Reply(format!("{reply}\n").into_bytes())
        }
    }
}

/// Composes the final reply body: `body`; a trailing `\n` if
/// non-empty; `ok\n` if `sends_ok`; `0x04` if `eot_terminated`
/// (spec.md §4.5.7).
fn compose_reply(body: &str, sends_ok: bool, eot_terminated: bool) -> Vec<u8> {
    let mut out = Vec::new();
    if !body.is_empty() {
        out.extend_from_slice(body.as_bytes());
        out.push(b'\n');
    }
    if sends_ok {
        out.extend_from_slice(b"ok\n");
    }
    if eot_terminated {
        out.push(0x04);
    }
    out
}

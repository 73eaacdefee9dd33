mod db;
mod ipc;
mod normalize;
mod render;
mod roster;
mod session;
mod sources;

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// MyClara content sidecar: answers JSON requests on stdin, one per line.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Workspace holding the roster store, selected at startup
    #[arg(long, env = "CLARAD_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Deepest content tree accepted for rendering
    #[arg(
        long,
        env = "CLARAD_MAX_TREE_DEPTH",
        default_value_t = normalize::DEFAULT_MAX_TREE_DEPTH as u16,
        value_parser = clap::value_parser!(u16).range(3..)
    )]
    max_tree_depth: u16,
}

fn main() {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clarad=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut state = ipc::AppState::new(usize::from(args.max_tree_depth));
    info!(
        version = env!("CARGO_PKG_VERSION"),
        max_tree_depth = args.max_tree_depth,
        "clarad starting"
    );

    if let Some(path) = args.workspace.as_deref() {
        if let Err(e) = ipc::select_workspace(&mut state, path) {
            warn!(workspace = %path.display(), "could not open workspace: {e:#}");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                warn!("rejected request line: {e}");
                let _ = writeln!(stdout, "{}", ipc::bad_json(e.to_string()));
                let _ = stdout.flush();
                continue;
            }
        };

        debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    if !state.sessions.is_empty() {
        debug!(open = state.sessions.len(), "dropping open mindmap sessions");
    }
    info!("stdin closed; exiting");
}

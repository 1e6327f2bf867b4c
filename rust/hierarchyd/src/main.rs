use std::io::{self, BufRead, Write};

use hierarchyd::config::DaemonConfig;
use hierarchyd::ipc;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

fn main() -> anyhow::Result<()> {
    let config = DaemonConfig::from_env();

    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    let mut state = ipc::AppState::default();

    if let Some(workspace) = config.workspace.as_deref() {
        if let Err(e) = ipc::open_workspace(&mut state, workspace) {
            error!(workspace = %workspace.display(), error = %e, "configured workspace failed to open");
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "hierarchyd ready");

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
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = runtime.block_on(ipc::handle_request(&mut state, req));
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    Ok(())
}

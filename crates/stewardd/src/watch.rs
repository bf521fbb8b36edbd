//! Watch mode: follows keys on a running daemon and prints every change.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use steward_longpoll::{HttpSource, LongPollClient};
use steward_state::UpdatedObject;

pub async fn run(address: String, keys: Vec<String>, timeout_s: f64) -> anyhow::Result<()> {
    let timeout = Duration::try_from_secs_f64(timeout_s)
        .map_err(|e| anyhow::anyhow!("invalid --timeout-s {timeout_s}: {e}"))?;
    anyhow::ensure!(!keys.is_empty(), "at least one --key is required");

    info!(%address, keys = ?keys, "watching daemon keys");
    let mut client = LongPollClient::new(HttpSource::new(address), timeout);
    for key in keys {
        let label = key.clone();
        client = client.on_update(
            key,
            Box::new(move |object: &UpdatedObject| println!("{}", render(&label, object))),
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C; stopping");
        }
        let _ = shutdown_tx.send(true);
    });

    client.run(shutdown_rx).await;
    Ok(())
}

/// `<key> @<snapshot id> <value>`; non-UTF-8 values are shown lossily.
fn render(key: &str, object: &UpdatedObject) -> String {
    format!(
        "{key} @{} {}",
        object.snapshot_id,
        String::from_utf8_lossy(&object.object_snapshot)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_shows_key_id_and_value() {
        let object = UpdatedObject {
            object_snapshot: bytes::Bytes::from_static(b"{\"a\":1}"),
            snapshot_id: 7,
        };
        assert_eq!(render("endpoints", &object), "endpoints @7 {\"a\":1}");
    }

    #[tokio::test]
    async fn watch_requires_a_key() {
        assert!(run("127.0.0.1:1".to_string(), Vec::new(), 1.0).await.is_err());
    }
}

//! Supervisor for the local inference daemon.
//!
//! Detects the daemon binary, checks health via its tags endpoint, launches
//! it when needed, and lists locally available models.

use std::{path::PathBuf, time::Duration};

use {
    anyhow::{Context, Result, bail},
    tracing::{debug, info, warn},
};

/// Well-known install locations probed after `$PATH`.
const BINARY_CANDIDATES: &[&str] = &[
    "/usr/local/bin/ollama",
    "/opt/homebrew/bin/ollama",
    "/usr/bin/ollama",
];

/// Poll cadence and budget for `ensure_running`.
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const POLL_BUDGET: Duration = Duration::from_secs(10);

pub struct LocalDaemon {
    base_url: String,
    client: reqwest::Client,
}

impl LocalDaemon {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Locate the daemon binary: `$PATH` first, then well-known paths.
    pub fn binary_path() -> Option<PathBuf> {
        if let Ok(path) = which::which("ollama") {
            return Some(path);
        }
        BINARY_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
    }

    pub fn is_installed() -> bool {
        Self::binary_path().is_some()
    }

    /// A 200 from the tags endpoint means healthy.
    pub async fn is_healthy(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Confirm health, or launch the daemon and poll until it answers.
    pub async fn ensure_running(&self) -> Result<()> {
        if self.is_healthy().await {
            debug!("local daemon already healthy");
            return Ok(());
        }

        let binary = Self::binary_path().context("local inference daemon is not installed")?;
        info!(binary = %binary.display(), "launching local inference daemon");

        // Detached child, output discarded; the daemon manages its own
        // lifecycle once started.
        tokio::process::Command::new(&binary)
            .arg("serve")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .stdin(std::process::Stdio::null())
            .spawn()
            .with_context(|| format!("failed to launch {}", binary.display()))?;

        let deadline = tokio::time::Instant::now() + POLL_BUDGET;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
            if self.is_healthy().await {
                info!("local daemon is up");
                return Ok(());
            }
        }

        warn!("local daemon did not become healthy in time");
        bail!(
            "local daemon did not answer on {} within {}s",
            self.base_url,
            POLL_BUDGET.as_secs()
        )
    }

    /// Names of locally available models, from the tags endpoint.
    pub async fn fetch_model_names(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = resp.json().await?;
        Ok(body["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

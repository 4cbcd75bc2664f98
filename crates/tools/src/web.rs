//! Web tools: `web_fetch` with SSRF protection and `web_search` against a
//! SearXNG-compatible endpoint.

use std::net::IpAddr;

use {
    anyhow::{Result, bail},
    tracing::debug,
    url::Url,
};

use {torbo_common::text::truncate_output, torbo_config::WebSearchConfig};

const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const DEFAULT_SEARCH_RESULTS: usize = 5;

/// SSRF protection: reject unsafe schemes and private/loopback hosts, then
/// re-check every resolved address before connecting.
pub async fn ssrf_check(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => {},
        s => bail!("unsupported URL scheme: {s}"),
    }

    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("URL has no host"))?;

    let lowered = host.to_ascii_lowercase();
    if lowered == "localhost" || lowered == "metadata.google.internal" {
        bail!("SSRF blocked: {host}");
    }

    if let Ok(ip) = lowered.trim_matches(['[', ']']).parse::<IpAddr>() {
        if is_private_ip(&ip) {
            bail!("SSRF blocked: {host} is a private address");
        }
        return Ok(());
    }

    // DNS resolution; the resolved addresses get the same check.
    let port = url.port_or_known_default().unwrap_or(443);
    let addrs: Vec<_> = tokio::net::lookup_host(format!("{host}:{port}"))
        .await?
        .collect();
    if addrs.is_empty() {
        bail!("DNS resolution failed for {host}");
    }
    for addr in &addrs {
        if is_private_ip(&addr.ip()) {
            bail!("SSRF blocked: {host} resolves to private IP {}", addr.ip());
        }
    }
    Ok(())
}

/// Private, loopback, link-local, unspecified, or carrier-grade NAT.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (CGNAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        },
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 (unique local)
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                // fe80::/10 (link-local)
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
        },
    }
}

/// Fetch a URL and return its content, truncated to `max_chars`.
pub async fn web_fetch(raw_url: &str, max_chars: usize) -> Result<String> {
    let url = Url::parse(raw_url)?;
    ssrf_check(&url).await?;

    let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
    let resp = client.get(url.as_str()).send().await?;
    let status = resp.status();
    if !status.is_success() {
        bail!("HTTP {status}");
    }

    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let body = resp.text().await?;

    // JSON pretty-prints; everything else passes through as text.
    let mut content = if content_type.contains("json") {
        serde_json::from_str::<serde_json::Value>(&body)
            .and_then(|v| serde_json::to_string_pretty(&v))
            .unwrap_or(body)
    } else {
        body
    };
    truncate_output(&mut content, max_chars);
    debug!(url = %url, chars = content.len(), "web_fetch");
    Ok(content)
}

/// Search through the configured SearXNG-compatible endpoint.
pub async fn web_search(
    cfg: &WebSearchConfig,
    query: &str,
    max_results: Option<usize>,
) -> Result<String> {
    let Some(ref endpoint) = cfg.endpoint else {
        bail!("web search is not configured");
    };
    let limit = max_results
        .or(cfg.max_results)
        .unwrap_or(DEFAULT_SEARCH_RESULTS);

    let client = reqwest::Client::builder().timeout(FETCH_TIMEOUT).build()?;
    let resp = client
        .get(format!("{endpoint}/search"))
        .query(&[("q", query), ("format", "json")])
        .send()
        .await?
        .error_for_status()?;
    let body: serde_json::Value = resp.json().await?;

    let results = body["results"].as_array().cloned().unwrap_or_default();
    if results.is_empty() {
        return Ok(format!("No results for \"{query}\""));
    }

    let formatted: Vec<String> = results
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}. {} — {}\n   {}",
                i + 1,
                r["title"].as_str().unwrap_or("(untitled)"),
                r["url"].as_str().unwrap_or(""),
                r["content"].as_str().unwrap_or("").trim(),
            )
        })
        .collect();
    Ok(formatted.join("\n"))
}

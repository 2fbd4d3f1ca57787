use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    /// API root of the flag store, e.g. `http://localhost:8080/api/v1`.
    /// Set via FLAGCTL_BASE_URL. Required.
    pub base_url: Url,
    /// Total request timeout. Set via FLAGCTL_TIMEOUT_SECS. Default: 10.
    pub timeout: Duration,
    /// Set via FLAGCTL_CONNECT_TIMEOUT_SECS. Default: 5.
    pub connect_timeout: Duration,
}

/// Read configuration from the environment (and `.env`, if present).
/// `base_url_override` takes precedence over FLAGCTL_BASE_URL.
pub fn load(base_url_override: Option<&str>) -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let raw_base = match base_url_override {
        Some(url) => url.to_string(),
        None => std::env::var("FLAGCTL_BASE_URL").map_err(|_| {
            anyhow::anyhow!("FLAGCTL_BASE_URL is not set (or pass --base-url)")
        })?,
    };
    let base_url = parse_base_url(&raw_base)?;

    Ok(Config {
        base_url,
        timeout: Duration::from_secs(secs_from_env("FLAGCTL_TIMEOUT_SECS", 10)),
        connect_timeout: Duration::from_secs(secs_from_env("FLAGCTL_CONNECT_TIMEOUT_SECS", 5)),
    })
}

pub fn parse_base_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| anyhow::anyhow!("invalid flag store url '{}': {}", raw, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("flag store url must be http or https, got '{}'", url.scheme());
    }
    Ok(url)
}

fn secs_from_env(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

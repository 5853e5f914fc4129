use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;

pub const DEFAULT_DATA_DIR: &str = "readrecall-data";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub supabase: Option<SupabaseConfig>,
    pub github_token: Option<String>,
    pub github_api_url: String,
    pub watch_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let data_dir = get("READRECALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let supabase = match (
            get("READRECALL_SUPABASE_URL"),
            get("READRECALL_SUPABASE_ANON_KEY"),
        ) {
            (Some(url), Some(anon_key)) => {
                let url = http_url(&url).context("invalid READRECALL_SUPABASE_URL")?;
                Some(SupabaseConfig { url, anon_key })
            }
            (None, None) => None,
            (Some(_), None) => anyhow::bail!(
                "READRECALL_SUPABASE_ANON_KEY is required when READRECALL_SUPABASE_URL is set"
            ),
            (None, Some(_)) => anyhow::bail!(
                "READRECALL_SUPABASE_URL is required when READRECALL_SUPABASE_ANON_KEY is set"
            ),
        };

        let github_api_url = match get("READRECALL_GITHUB_API_URL") {
            Some(raw) => http_url(&raw).context("invalid READRECALL_GITHUB_API_URL")?,
            None => DEFAULT_GITHUB_API_URL.to_owned(),
        };

        let watch_interval = match get("READRECALL_WATCH_INTERVAL_SECS") {
            Some(raw) => parse_interval(&raw).with_context(|| {
                format!("invalid READRECALL_WATCH_INTERVAL_SECS={raw:?}. expected 1..=3600")
            })?,
            None => Duration::from_secs(DEFAULT_WATCH_INTERVAL_SECS),
        };

        Ok(Self {
            data_dir,
            supabase,
            github_token: get("READRECALL_GITHUB_TOKEN"),
            github_api_url,
            watch_interval,
        })
    }
}

fn http_url(raw: &str) -> anyhow::Result<String> {
    let url = url::Url::parse(raw).with_context(|| format!("parse url: {raw}"))?;
    match url.scheme() {
        "http" | "https" => Ok(raw.trim_end_matches('/').to_owned()),
        other => anyhow::bail!("unsupported url scheme: {other}"),
    }
}

fn parse_interval(raw: &str) -> anyhow::Result<Duration> {
    let secs: u64 = raw.parse().context("parse seconds")?;
    if !(1..=3600).contains(&secs) {
        anyhow::bail!("interval out of range: {secs}");
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() -> anyhow::Result<()> {
        let cfg = config(&[])?;
        assert_eq!(cfg.data_dir, PathBuf::from("readrecall-data"));
        assert_eq!(cfg.supabase, None);
        assert_eq!(cfg.github_token, None);
        assert_eq!(cfg.github_api_url, "https://api.github.com");
        assert_eq!(cfg.watch_interval, Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn reads_every_variable() -> anyhow::Result<()> {
        let cfg = config(&[
            ("READRECALL_DATA_DIR", "/tmp/rr"),
            ("READRECALL_SUPABASE_URL", "https://project.supabase.co/"),
            ("READRECALL_SUPABASE_ANON_KEY", " anon "),
            ("READRECALL_GITHUB_TOKEN", "ghp_x"),
            ("READRECALL_GITHUB_API_URL", "http://127.0.0.1:8080"),
            ("READRECALL_WATCH_INTERVAL_SECS", "30"),
        ])?;
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/rr"));
        assert_eq!(
            cfg.supabase,
            Some(SupabaseConfig {
                url: "https://project.supabase.co".into(),
                anon_key: "anon".into(),
            })
        );
        assert_eq!(cfg.github_token.as_deref(), Some("ghp_x"));
        assert_eq!(cfg.github_api_url, "http://127.0.0.1:8080");
        assert_eq!(cfg.watch_interval, Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn blank_values_count_as_unset() -> anyhow::Result<()> {
        let cfg = config(&[("READRECALL_GITHUB_TOKEN", "  "), ("READRECALL_DATA_DIR", "")])?;
        assert_eq!(cfg.github_token, None);
        assert_eq!(cfg.data_dir, PathBuf::from("readrecall-data"));
        Ok(())
    }

    #[test]
    fn supabase_needs_both_values() {
        assert!(config(&[("READRECALL_SUPABASE_URL", "https://x.supabase.co")]).is_err());
        assert!(config(&[("READRECALL_SUPABASE_ANON_KEY", "anon")]).is_err());
        assert!(
            config(&[
                ("READRECALL_SUPABASE_URL", "ftp://x"),
                ("READRECALL_SUPABASE_ANON_KEY", "anon"),
            ])
            .is_err()
        );
    }

    #[test]
    fn interval_is_range_checked() {
        for raw in ["0", "3601", "-1", "soon"] {
            assert!(
                config(&[("READRECALL_WATCH_INTERVAL_SECS", raw)]).is_err(),
                "{raw}"
            );
        }
        assert!(config(&[("READRECALL_WATCH_INTERVAL_SECS", "3600")]).is_ok());
    }
}

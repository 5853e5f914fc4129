use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: &str = "info";

/// HTTP stack crates held at `warn` unless `RUST_LOG` names them.
const QUIET_CRATES: [&str; 4] = ["hyper", "hyper_util", "reqwest", "rustls"];

/// Installs the stderr subscriber. `RUST_LOG` overrides the default `info`
/// level; stdout stays reserved for command output.
pub fn init() -> anyhow::Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = EnvFilter::try_new(filter_directives(rust_log.as_deref()))
        .or_else(|_| EnvFilter::try_new(filter_directives(None)))
        .context("build log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "logging initialized");
    Ok(())
}

fn filter_directives(rust_log: Option<&str>) -> String {
    let base = rust_log
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_LEVEL);
    let mut directives = vec![base.to_owned()];
    for name in QUIET_CRATES {
        if !base.contains(name) {
            directives.push(format!("{name}=warn"));
        }
    }
    directives.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_or_blank_uses_info_with_quiet_http_crates() {
        let expected = "info,hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn";
        assert_eq!(filter_directives(None), expected);
        assert_eq!(filter_directives(Some("  ")), expected);
    }

    #[test]
    fn named_crates_keep_the_requested_level() {
        assert_eq!(
            filter_directives(Some("debug,reqwest=trace")),
            "debug,reqwest=trace,hyper=warn,hyper_util=warn,rustls=warn"
        );
    }

    #[test]
    fn directives_parse_as_env_filter() {
        for rust_log in [None, Some("debug"), Some("readrecall=trace")] {
            assert!(EnvFilter::try_new(filter_directives(rust_log)).is_ok());
        }
    }
}

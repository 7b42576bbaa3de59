//! Tracing setup and secret redaction for log fields.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` takes precedence over `config.filter`. Returns `false` when a
/// global subscriber was already installed, which leaves that one in place.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .try_init()
    };

    result.is_ok()
}

/// Loggable form of a token.
///
/// A JWT loses its signature segment, so the logged value can no longer be
/// replayed. Opaque tokens keep only a three-character prefix.
#[must_use]
pub fn redact_jwt(token: &str) -> String {
    let mut parts = token.splitn(3, '.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(_signature)) => format!("{header}.{payload}.<redacted>"),
        _ => {
            let prefix: String = token.chars().take(3).collect();
            format!("{prefix}***")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_signature_is_dropped() {
        assert_eq!(redact_jwt("aaa.bbb.ccc"), "aaa.bbb.<redacted>");
    }

    #[test]
    fn opaque_token_keeps_prefix_only() {
        assert_eq!(redact_jwt("secret-refresh-token"), "sec***");
        assert_eq!(redact_jwt("ab"), "ab***");
        assert_eq!(redact_jwt("a.b"), "a.b***");
    }

    #[test]
    fn second_init_reports_existing_subscriber() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }
}

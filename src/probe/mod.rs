//! Probe module for uptime checks.
//!
//! A probe never fails: every outcome is classified into an [`Observation`].

mod http;

pub use http::*;

use async_trait::async_trait;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::db::Observation;

/// Default bound on a single check.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Probe error types.
///
/// These are only used internally to log why a target was classified offline.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// How a received HTTP response maps to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Classification {
    /// Any response means the target is online, whatever its status code.
    #[default]
    AnyResponse,
    /// Only 2xx responses are online; other codes are recorded as offline.
    SuccessOnly,
}

impl Classification {
    pub fn classify(&self, status_code: u16) -> Observation {
        let online = match self {
            Classification::AnyResponse => true,
            Classification::SuccessOnly => (200..300).contains(&status_code),
        };
        if online {
            Observation::online(status_code)
        } else {
            Observation::offline(status_code)
        }
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any-response" | "any" => Ok(Classification::AnyResponse),
            "success-only" | "success" => Ok(Classification::SuccessOnly),
            other => Err(format!("unknown classification: {}", other)),
        }
    }
}

/// Something that can check a URL.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> Observation;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_response_is_online() {
        let c = Classification::AnyResponse;
        assert_eq!(c.classify(200), Observation::online(200));
        assert_eq!(c.classify(503), Observation::online(503));
    }

    #[test]
    fn test_success_only() {
        let c = Classification::SuccessOnly;
        assert_eq!(c.classify(204), Observation::online(204));
        assert_eq!(c.classify(404), Observation::offline(404));
        assert_eq!(c.classify(500), Observation::offline(500));
    }

    #[test]
    fn test_parse_classification() {
        assert_eq!("any-response".parse(), Ok(Classification::AnyResponse));
        assert_eq!("success-only".parse(), Ok(Classification::SuccessOnly));
        assert!("strict".parse::<Classification>().is_err());
    }
}

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

use crate::error::join;

/// The closed set of backend services this gateway fronts. The set is fixed
/// at compile time; configuration supplies addresses only, never shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Upstream {
    Account,
    Catalog,
    Order,
}

impl Upstream {
    pub const ALL: [Upstream; 3] = [Upstream::Account, Upstream::Catalog, Upstream::Order];

    pub fn name(self) -> &'static str {
        match self {
            Upstream::Account => "account",
            Upstream::Catalog => "catalog",
            Upstream::Order => "order",
        }
    }

    /// Environment variable carrying this upstream's base URL.
    pub fn env_key(self) -> &'static str {
        match self {
            Upstream::Account => "ACCOUNT_SERVICE_URL",
            Upstream::Catalog => "CATALOG_SERVICE_URL",
            Upstream::Order => "ORDER_SERVICE_URL",
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("unknown upstream {0:?}")]
pub struct UnknownUpstream(pub String);

impl FromStr for Upstream {
    type Err = UnknownUpstream;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "account" => Ok(Upstream::Account),
            "catalog" => Ok(Upstream::Catalog),
            "order" => Ok(Upstream::Order),
            other => Err(UnknownUpstream(other.to_string())),
        }
    }
}

/// One problem found while reading the environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigProblem {
    #[error("{key} is not set")]
    Missing { key: &'static str },
    #[error("{key} is empty")]
    Empty { key: &'static str },
    #[error("{key} is not a valid URL: {reason}")]
    MalformedUrl { key: &'static str, reason: String },
}

impl ConfigProblem {
    pub fn key(&self) -> &'static str {
        match self {
            ConfigProblem::Missing { key }
            | ConfigProblem::Empty { key }
            | ConfigProblem::MalformedUrl { key, .. } => *key,
        }
    }
}

/// Fatal startup error: one or more required environment variables are
/// unusable. Carries every problem found so the operator gets a single
/// complete report instead of fixing keys one restart at a time.
#[derive(Debug, Error)]
#[error("invalid gateway configuration: {}", join(.problems))]
pub struct ConfigError {
    pub problems: Vec<ConfigProblem>,
}

impl ConfigError {
    /// Keys that were absent or blank.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        self.problems
            .iter()
            .filter(|p| matches!(p, ConfigProblem::Missing { .. } | ConfigProblem::Empty { .. }))
            .map(|p| p.key())
            .collect()
    }
}

/// Base URL for every upstream, loaded once at startup and immutable
/// afterwards.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub account_url: Url,
    pub catalog_url: Url,
    pub order_url: Url,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Reads one URL per upstream from the given lookup. All required keys
    /// are checked before returning, never just the first broken one.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut problems = Vec::new();

        let account = read_url(&lookup, Upstream::Account, &mut problems);
        let catalog = read_url(&lookup, Upstream::Catalog, &mut problems);
        let order = read_url(&lookup, Upstream::Order, &mut problems);

        match (account, catalog, order) {
            (Some(account_url), Some(catalog_url), Some(order_url)) if problems.is_empty() => {
                Ok(GatewayConfig {
                    account_url,
                    catalog_url,
                    order_url,
                })
            }
            _ => Err(ConfigError { problems }),
        }
    }

    pub fn url(&self, upstream: Upstream) -> &Url {
        match upstream {
            Upstream::Account => &self.account_url,
            Upstream::Catalog => &self.catalog_url,
            Upstream::Order => &self.order_url,
        }
    }
}

fn read_url(
    lookup: &impl Fn(&str) -> Option<String>,
    upstream: Upstream,
    problems: &mut Vec<ConfigProblem>,
) -> Option<Url> {
    let key = upstream.env_key();
    let Some(raw) = lookup(key) else {
        problems.push(ConfigProblem::Missing { key });
        return None;
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        problems.push(ConfigProblem::Empty { key });
        return None;
    }
    match Url::parse(trimmed) {
        Ok(url) => Some(url),
        Err(e) => {
            problems.push(ConfigProblem::MalformedUrl {
                key,
                reason: e.to_string(),
            });
            None
        }
    }
}

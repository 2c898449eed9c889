//! Access-point resolution via `apresolve.spotify.com`: picks a random
//! address for each service category (`accesspoint`, `dealer`, `spclient`)
//! and caches the result for a short time so repeated lookups don't hit
//! the resolver for every reconnect.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

const RESOLVE_URL: &str = "https://apresolve.spotify.com/";
const CACHE_TTL: Duration = Duration::from_secs(300);

static HTTP: Lazy<reqwest::blocking::Client> = Lazy::new(reqwest::blocking::Client::new);

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    #[serde(flatten)]
    services: HashMap<String, Vec<String>>,
}

struct Cache {
    fetched_at: Instant,
    services: HashMap<String, Vec<String>>,
}

/// Resolves `type=accesspoint,dealer,spclient` against Spotify's public
/// resolver and caches each category independently.
pub struct ApResolver {
    cache: Mutex<Option<Cache>>,
}

impl ApResolver {
    pub fn new() -> ApResolver {
        ApResolver {
            cache: Mutex::new(None),
        }
    }

    fn refresh(&self) -> Result<()> {
        let response: ResolveResponse = HTTP
            .get(RESOLVE_URL)
            .query(&[("type", "accesspoint,dealer,spclient")])
            .send()?
            .error_for_status()?
            .json()?;
        debug!(categories = response.services.len(), "refreshed ap resolver cache");
        *self.cache.lock() = Some(Cache {
            fetched_at: Instant::now(),
            services: response.services,
        });
        Ok(())
    }

    fn addresses(&self, category: &str) -> Result<Vec<String>> {
        {
            let cache = self.cache.lock();
            if let Some(cache) = cache.as_ref() {
                if cache.fetched_at.elapsed() < CACHE_TTL {
                    if let Some(addrs) = cache.services.get(category) {
                        return Ok(addrs.clone());
                    }
                }
            }
        }
        self.refresh()?;
        let cache = self.cache.lock();
        cache
            .as_ref()
            .and_then(|c| c.services.get(category).cloned())
            .ok_or_else(|| Error::HandshakeFailed(format!("no {category} addresses resolved")))
    }

    /// A random address for the given category, e.g. `host:port`.
    pub fn random(&self, category: &str) -> Result<String> {
        let addrs = self.addresses(category)?;
        addrs
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| Error::HandshakeFailed(format!("empty {category} address list")))
    }
}

impl Default for ApResolver {
    fn default() -> Self {
        ApResolver::new()
    }
}

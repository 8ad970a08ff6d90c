/*
 * Copyright (C) 2020 Oakes, Gregory <gregoryoakes@fastmail.com>
 * Author: Oakes, Gregory <gregory.oakes@fastmail.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of the
 * License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Verification of Firebase ID tokens.
//!
//! Tokens are RS256 JWTs signed with one of the identity provider's rotating
//! keys. The key named by the token header's `kid` is looked up in a
//! [`KeyCache`] which refreshes itself from a [`KeySource`].

use std::{
    collections::HashMap,
    fs,
    path::Path,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use reqwest::header::CACHE_CONTROL;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{
    config::{Config, KeyConfig},
    store::{clean_display_name, MAX_DISPLAY_NAME_CHARS},
    Error,
};

pub const ISSUER_PREFIX: &str = "https://securetoken.google.com/";

const LEEWAY_SECONDS: u64 = 60;
const MAX_UID_LEN: usize = 128;
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// The claims of a Firebase ID token that the backend cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The caller of an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Identity {
            uid: claims.sub,
            email: claims.email.filter(|e| !e.is_empty()),
            email_verified: claims.email_verified,
            name: claims
                .name
                .as_deref()
                .and_then(clean_display_name)
                .map(|n| n.chars().take(MAX_DISPLAY_NAME_CHARS).collect()),
        }
    }
}

/// A batch of verification keys and how long they may be cached.
pub struct KeySet {
    pub keys: HashMap<String, DecodingKey>,
    /// `None` means the keys never expire.
    pub max_age: Option<Duration>,
}

#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<KeySet, Error>;
}

/// The identity provider's published JWK set.
pub struct GoogleJwks {
    client: reqwest::Client,
    url: String,
}

impl GoogleJwks {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        GoogleJwks {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl KeySource for GoogleJwks {
    async fn fetch(&self) -> Result<KeySet, Error> {
        let resp = self
            .client
            .get(self.url.as_str())
            .send()
            .await?
            .error_for_status()?;
        let max_age = resp
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(max_age)
            .unwrap_or(DEFAULT_MAX_AGE);
        let body = resp.bytes().await?;
        Ok(KeySet {
            keys: parse_jwk_set(&body)?,
            max_age: Some(max_age),
        })
    }
}

/// A fixed set of keys, for local development and tests.
#[derive(Clone, Default)]
pub struct StaticKeys {
    keys: HashMap<String, DecodingKey>,
}

impl StaticKeys {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_key(mut self, kid: impl Into<String>, key: DecodingKey) -> Self {
        self.keys.insert(kid.into(), key);
        self
    }

    pub fn with_rsa_pem(self, kid: impl Into<String>, pem: &[u8]) -> Result<Self, Error> {
        Ok(self.with_key(kid, DecodingKey::from_rsa_pem(pem)?))
    }

    pub fn from_pem_file<P: AsRef<Path>>(path: P, kid: impl Into<String>) -> Result<Self, Error> {
        StaticKeys::new().with_rsa_pem(kid, fs::read(path)?.as_ref())
    }
}

#[async_trait]
impl KeySource for StaticKeys {
    async fn fetch(&self) -> Result<KeySet, Error> {
        Ok(KeySet {
            keys: self.keys.clone(),
            max_age: None,
        })
    }
}

/// Decode a JWK set document into verification keys by key id. Keys without
/// an id or of an unsupported type are skipped.
pub fn parse_jwk_set(body: &[u8]) -> Result<HashMap<String, DecodingKey>, Error> {
    let set: JwkSet =
        serde_json::from_slice(body).map_err(|e| Error::KeySetError(e.to_string()))?;
    let mut keys = HashMap::with_capacity(set.keys.len());
    for jwk in set.keys.iter() {
        let kid = match jwk.common.key_id.as_ref() {
            Some(kid) => kid.clone(),
            None => continue,
        };
        match DecodingKey::from_jwk(jwk) {
            Ok(key) => {
                keys.insert(kid, key);
            }
            Err(e) => warn!(kid = %kid, error = %e, "skipping unusable signing key"),
        }
    }
    if keys.is_empty() {
        return Err(Error::KeySetError("no usable keys".to_string()));
    }
    Ok(keys)
}

/// Extract `max-age` from a `Cache-Control` header value.
pub fn max_age(cache_control: &str) -> Option<Duration> {
    cache_control
        .split(',')
        .filter_map(|directive| {
            let (name, value) = directive.trim().split_once('=')?;
            if name.trim().eq_ignore_ascii_case("max-age") {
                value.trim().trim_matches('"').parse::<u64>().ok()
            } else {
                None
            }
        })
        .next()
        .map(Duration::from_secs)
}

#[derive(Default)]
struct CachedKeys {
    keys: HashMap<String, DecodingKey>,
    expires_at: Option<Instant>,
    fetched: bool,
    /// Start of the most recent fetch, successful or not.
    attempted_at: Option<Instant>,
    failed: bool,
}

impl CachedKeys {
    fn is_fresh(&self) -> bool {
        self.fetched && self.expires_at.map_or(true, |t| Instant::now() < t)
    }

    fn throttled(&self, interval: Duration) -> bool {
        self.attempted_at.map_or(false, |t| t.elapsed() < interval)
    }

    fn replace(&mut self, set: KeySet) {
        let now = Instant::now();
        self.keys = set.keys;
        self.fetched = true;
        self.failed = false;
        self.expires_at = set.max_age.map(|age| now + age);
    }
}

/// Caches keys from a [`KeySource`]. Refreshes are serialized behind the
/// write lock and spaced at least `refresh_interval` apart after a failure,
/// so a burst of requests triggers a single fetch.
pub struct KeyCache {
    source: Box<dyn KeySource>,
    state: RwLock<CachedKeys>,
    refresh_interval: Duration,
}

impl KeyCache {
    pub fn new(source: Box<dyn KeySource>) -> Self {
        KeyCache::with_refresh_interval(source, MIN_REFRESH_INTERVAL)
    }

    /// `interval` bounds how often an unknown key id or a failing source can
    /// trigger a fetch.
    pub fn with_refresh_interval(source: Box<dyn KeySource>, interval: Duration) -> Self {
        KeyCache {
            source,
            state: RwLock::new(Default::default()),
            refresh_interval: interval,
        }
    }

    pub async fn get(&self, kid: &str) -> Result<DecodingKey, Error> {
        {
            let cached = self.state.read().await;
            if cached.is_fresh() {
                if let Some(key) = cached.keys.get(kid) {
                    return Ok(key.clone());
                }
            }
        }

        let mut cached = self.state.write().await;
        let throttled = cached.throttled(self.refresh_interval);
        let refresh = if !cached.is_fresh() {
            !(cached.failed && throttled)
        } else {
            !cached.keys.contains_key(kid) && !throttled
        };

        if refresh {
            cached.attempted_at = Some(Instant::now());
            match self.source.fetch().await {
                Ok(set) => {
                    debug!(count = set.keys.len(), "refreshed signing keys");
                    cached.replace(set);
                }
                Err(e) => {
                    cached.failed = true;
                    match cached.keys.get(kid) {
                        Some(key) => {
                            warn!(error = %e, "key refresh failed, using cached keys");
                            return Ok(key.clone());
                        }
                        None => return Err(e),
                    }
                }
            }
        }

        match cached.keys.get(kid) {
            Some(key) => Ok(key.clone()),
            None if cached.failed => Err(Error::KeysUnavailable),
            None => Err(Error::UnknownKey(kid.to_string())),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Verifies ID tokens issued for one Firebase project.
pub struct Verifier {
    project_id: String,
    validation: Validation,
    keys: KeyCache,
}

impl Verifier {
    pub fn new(project_id: impl Into<String>, source: Box<dyn KeySource>) -> Self {
        let project_id = project_id.into();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = LEEWAY_SECONDS;
        validation.set_audience(&[project_id.as_str()]);
        validation.set_issuer(&[issuer(&project_id)]);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);
        Verifier {
            project_id,
            validation,
            keys: KeyCache::new(source),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, Error> {
        let source: Box<dyn KeySource> = match &cfg.keys {
            KeyConfig::Pem { path, key_id } => {
                Box::new(StaticKeys::from_pem_file(path, key_id.as_str())?)
            }
            KeyConfig::Remote { jwks_url } => {
                let client = reqwest::Client::builder()
                    .timeout(FETCH_TIMEOUT)
                    .build()?;
                Box::new(GoogleJwks::new(client, jwks_url.as_str()))
            }
        };
        Ok(Verifier::new(cfg.project_id.as_str(), source))
    }

    /// Replace the key cache, keeping the token rules.
    pub fn with_key_cache(mut self, keys: KeyCache) -> Self {
        self.keys = keys;
        self
    }

    pub fn project_id(&self) -> &str {
        self.project_id.as_str()
    }

    pub async fn verify(&self, token: &str) -> Result<Identity, Error> {
        let header = decode_header(token)?;
        if header.alg != Algorithm::RS256 {
            return Err(Error::Unauthorized);
        }
        let kid = header.kid.ok_or(Error::Unauthorized)?;
        let key = self.keys.get(kid.as_str()).await?;
        let claims = decode::<Claims>(token, &key, &self.validation)?.claims;

        let latest = unix_now() + LEEWAY_SECONDS;
        if claims.iat > latest || claims.auth_time.map_or(false, |t| t > latest) {
            return Err(Error::Unauthorized);
        }
        if claims.sub.is_empty() || claims.sub.len() > MAX_UID_LEN {
            return Err(Error::Unauthorized);
        }
        Ok(Identity::from(claims))
    }
}

pub fn issuer(project_id: &str) -> String {
    format!("{}{}", ISSUER_PREFIX, project_id)
}

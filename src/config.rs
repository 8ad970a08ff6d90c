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

//! Runtime configuration, read from the process environment.

use std::{env, net::SocketAddr, path::PathBuf};

use crate::Error;

pub const DEFAULT_DATABASE_URL: &str = "postgres://postgres@0.0.0.0:5432";
pub const DEFAULT_BIND: &str = "0.0.0.0:8000";
pub const DEFAULT_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
pub const DEFAULT_KEY_ID: &str = "local";
pub const DEFAULT_LOG: &str = "info";

#[derive(Debug, Clone, PartialEq)]
pub enum KeyConfig {
    /// Fetch the identity provider's published key set.
    Remote { jwks_url: String },
    /// Verify against a single PEM encoded public key.
    Pem { path: PathBuf, key_id: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind: SocketAddr,
    pub project_id: String,
    pub keys: KeyConfig,
    pub asset_url: Option<String>,
    pub cors_origins: Vec<String>,
    pub log: String,
}

impl Config {
    pub fn from_env() -> Result<Config, Error> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_raw = var("COBEY_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("COBEY_BIND={:?}: {}", bind_raw, e)))?;

        let project_id = var("FIREBASE_PROJECT_ID")
            .ok_or_else(|| Error::Config("FIREBASE_PROJECT_ID is required".to_string()))?;

        let keys = match var("FIREBASE_PUBLIC_KEY") {
            Some(path) => KeyConfig::Pem {
                path: PathBuf::from(path),
                key_id: var("FIREBASE_KEY_ID").unwrap_or_else(|| DEFAULT_KEY_ID.to_string()),
            },
            None => KeyConfig::Remote {
                jwks_url: var("FIREBASE_JWKS_URL").unwrap_or_else(|| DEFAULT_JWKS_URL.to_string()),
            },
        };

        let cors_origins = match var("COBEY_CORS_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(parse_origin)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        Ok(Config {
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            bind,
            project_id,
            keys,
            asset_url: var("COBEY_ASSET_URL"),
            cors_origins,
            log: var("COBEY_LOG").unwrap_or_else(|| DEFAULT_LOG.to_string()),
        })
    }
}

/// Origins are `scheme://host[:port]` with an http(s) scheme.
fn parse_origin(raw: &str) -> Result<String, Error> {
    let origin = raw.trim_end_matches('/');
    let invalid = || Error::Config(format!("COBEY_CORS_ORIGINS: invalid origin {:?}", raw));
    let url = reqwest::Url::parse(origin).map_err(|_| invalid())?;
    let plain = matches!(url.scheme(), "http" | "https")
        && url.host_str().is_some()
        && url.path() == "/"
        && url.query().is_none();
    if plain {
        Ok(origin.to_string())
    } else {
        Err(invalid())
    }
}

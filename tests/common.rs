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

#![allow(dead_code)]

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use lazy_static::lazy_static;
use warp::{Filter, Rejection, Reply};

use cobey::{
    auth::{issuer, Claims, StaticKeys},
    memory::MemoryStore,
    ClientConfig, SharedStore, Verifier,
};

pub const PROJECT: &str = "cobey-test";
pub const KEY_ID: &str = "k1";
pub const ASSET_URL: &str = "https://cdn.example.com/scene.glb";

lazy_static! {
    static ref ENCODING_KEY: EncodingKey =
        EncodingKey::from_rsa_pem(include_bytes!("keys/test_rsa.pem")).expect("test signing key");
    static ref FOREIGN_KEY: EncodingKey =
        EncodingKey::from_rsa_pem(include_bytes!("keys/other_rsa.pem")).expect("other signing key");
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs()
}

pub fn claims(uid: &str) -> Claims {
    let now = now();
    Claims {
        iss: issuer(PROJECT),
        aud: PROJECT.to_string(),
        sub: uid.to_string(),
        iat: now - 30,
        exp: now + 3600,
        auth_time: Some(now - 30),
        email: Some(format!("{}@example.com", uid)),
        email_verified: true,
        name: None,
    }
}

pub fn sign_with(kid: &str, key: &EncodingKey, claims: &Claims) -> String {
    let header = Header {
        kid: Some(kid.to_string()),
        ..Header::new(Algorithm::RS256)
    };
    encode(&header, claims, key).expect("signed token")
}

pub fn sign(claims: &Claims) -> String {
    sign_with(KEY_ID, &ENCODING_KEY, claims)
}

pub fn sign_foreign(claims: &Claims) -> String {
    sign_with(KEY_ID, &FOREIGN_KEY, claims)
}

/// An `Authorization` header value for a freshly signed token.
pub fn bearer(uid: &str) -> String {
    format!("Bearer {}", sign(&claims(uid)))
}

pub fn verifier() -> Arc<Verifier> {
    let keys = StaticKeys::new()
        .with_rsa_pem(KEY_ID, include_bytes!("keys/test_rsa.pub.pem"))
        .expect("test verification key");
    Arc::new(Verifier::new(PROJECT, Box::new(keys)))
}

pub fn store() -> SharedStore {
    Arc::new(MemoryStore::new())
}

pub fn client_config() -> ClientConfig {
    ClientConfig {
        project_id: PROJECT.to_string(),
        asset_url: Some(ASSET_URL.to_string()),
    }
}

pub fn app_with(store: SharedStore) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    cobey::app(store, verifier(), client_config(), &[])
}

pub fn app_with_verifier(
    verifier: Arc<Verifier>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    cobey::app(store(), verifier, client_config(), &[])
}

pub fn app() -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    app_with(store())
}

pub fn body_json(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).expect("JSON response body")
}

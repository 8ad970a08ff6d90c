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

//! Session state for the visualization client.
//!
//! Each user owns any number of named sessions; a session's state is an
//! opaque JSON document produced and consumed by the client.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use warp::{
    http::StatusCode,
    reply::{json, with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

use crate::{
    auth::Verifier,
    guard,
    store::{SharedStore, User},
    Error,
};

pub const SESSION_LIMIT: u64 = 1024 * 1024;
pub const MAX_KEY_LEN: usize = 64;
pub const DEFAULT_PAGE: i64 = 50;
pub const MAX_PAGE: i64 = 200;

pub fn api(
    store: SharedStore,
    verifier: Arc<Verifier>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let list_sessions = warp::path("data")
        .and(warp::path::end())
        .and(warp::get())
        .and(guard::current_user(verifier.clone(), store.clone()))
        .and(warp::query())
        .and(guard::with_store(store.clone()))
        .and_then(list_sessions);

    let read_session = warp::path("data")
        .and(warp::path::param())
        .and(warp::path::end())
        .and(warp::get())
        .and(guard::current_user(verifier.clone(), store.clone()))
        .and(guard::with_store(store.clone()))
        .and_then(read_session);

    let write_session = warp::path("data")
        .and(warp::path::param())
        .and(warp::path::end())
        .and(warp::put())
        .and(guard::current_user(verifier.clone(), store.clone()))
        .and(warp::body::content_length_limit(SESSION_LIMIT))
        .and(warp::body::json())
        .and(guard::with_store(store.clone()))
        .and_then(write_session);

    let delete_session = warp::path("data")
        .and(warp::path::param())
        .and(warp::path::end())
        .and(warp::delete())
        .and(guard::current_user(verifier, store.clone()))
        .and(guard::with_store(store))
        .and_then(delete_session);

    list_sessions
        .or(read_session)
        .or(write_session)
        .or(delete_session)
}

/// Session keys are 1 to 64 characters of `[A-Za-z0-9_-]`.
pub fn validate_key(key: &str) -> Result<(), Error> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(Error::BadRequest(format!("invalid session key {:?}", key)))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

impl ListQuery {
    fn limit(&self) -> Result<i64, Error> {
        match self.limit {
            None => Ok(DEFAULT_PAGE),
            Some(n) if n < 1 => Err(Error::BadRequest("limit must be positive".to_string())),
            Some(n) => Ok(n.min(MAX_PAGE)),
        }
    }
}

async fn list_sessions(
    user: User,
    query: ListQuery,
    store: SharedStore,
) -> Result<Json, Rejection> {
    let sessions = store.list_sessions(user.id, query.limit()?).await?;
    Ok(json(&sessions))
}

async fn read_session(key: String, user: User, store: SharedStore) -> Result<Json, Rejection> {
    validate_key(key.as_str())?;
    Ok(json(&store.read_session(user.id, key.as_str()).await?))
}

async fn write_session(
    key: String,
    user: User,
    state: Value,
    store: SharedStore,
) -> Result<WithStatus<Json>, Rejection> {
    validate_key(key.as_str())?;
    let (session, created) = store.write_session(user.id, key.as_str(), state).await?;
    info!(uid = %user.uid, key = %session.key, created, "stored session");
    let code = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok(with_status(json(&session), code))
}

async fn delete_session(
    key: String,
    user: User,
    store: SharedStore,
) -> Result<StatusCode, Rejection> {
    validate_key(key.as_str())?;
    store.delete_session(user.id, key.as_str()).await?;
    info!(uid = %user.uid, key = %key, "deleted session");
    Ok(StatusCode::NO_CONTENT)
}

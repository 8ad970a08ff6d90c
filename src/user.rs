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

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;
use warp::{
    http::StatusCode,
    reply::{json, Json},
    Filter, Rejection, Reply,
};

use crate::{
    auth::Verifier,
    guard,
    store::{clean_display_name, SharedStore, User, MAX_DISPLAY_NAME_CHARS},
    Error,
};

const UPDATE_LIMIT: u64 = 4 * 1024;

pub fn api(
    store: SharedStore,
    verifier: Arc<Verifier>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let read_user = warp::path("user")
        .and(warp::path::end())
        .and(warp::get())
        .and(guard::current_user(verifier.clone(), store.clone()))
        .and_then(read_user);

    let update_user = warp::path("user")
        .and(warp::path::end())
        .and(warp::patch())
        .and(guard::current_user(verifier.clone(), store.clone()))
        .and(warp::body::content_length_limit(UPDATE_LIMIT))
        .and(warp::body::json())
        .and(guard::with_store(store.clone()))
        .and_then(update_user);

    let delete_user = warp::path("user")
        .and(warp::path::end())
        .and(warp::delete())
        .and(guard::current_user(verifier, store.clone()))
        .and(guard::with_store(store))
        .and_then(delete_user);

    read_user.or(update_user).or(delete_user)
}

/// `display_name` must be present; `null` clears the name.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserUpdate {
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<Option<String>>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

fn display_name(update: UserUpdate) -> Result<Option<String>, Error> {
    let name = update
        .display_name
        .ok_or_else(|| Error::BadRequest("display_name is required".to_string()))?;
    let name = name.as_deref().and_then(clean_display_name);
    match name {
        Some(n) if n.chars().count() > MAX_DISPLAY_NAME_CHARS => Err(Error::BadRequest(format!(
            "display_name is longer than {} characters",
            MAX_DISPLAY_NAME_CHARS
        ))),
        _ => Ok(name),
    }
}

async fn read_user(user: User) -> Result<Json, Rejection> {
    Ok(json(&user))
}

async fn update_user(
    user: User,
    update: UserUpdate,
    store: SharedStore,
) -> Result<Json, Rejection> {
    let name = display_name(update)?;
    let user = store.update_user(user.id, name).await?;
    info!(uid = %user.uid, "updated user profile");
    Ok(json(&user))
}

async fn delete_user(user: User, store: SharedStore) -> Result<StatusCode, Rejection> {
    store.delete_user(user.id).await?;
    info!(uid = %user.uid, "deleted user");
    Ok(StatusCode::NO_CONTENT)
}

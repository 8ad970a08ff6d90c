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

//! User preferences, stored as a single JSON object per user.

use std::sync::Arc;

use tracing::info;
use warp::{
    reply::{json, Json},
    Filter, Rejection, Reply,
};

use crate::{
    auth::Verifier,
    guard,
    store::{Settings, SharedStore, User},
};

pub const SETTINGS_LIMIT: u64 = 64 * 1024;

pub fn api(
    store: SharedStore,
    verifier: Arc<Verifier>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let read_settings = warp::path("settings")
        .and(warp::path::end())
        .and(warp::get())
        .and(guard::current_user(verifier.clone(), store.clone()))
        .and(guard::with_store(store.clone()))
        .and_then(read_settings);

    let replace_settings = warp::path("settings")
        .and(warp::path::end())
        .and(warp::put())
        .and(guard::current_user(verifier.clone(), store.clone()))
        .and(warp::body::content_length_limit(SETTINGS_LIMIT))
        .and(warp::body::json())
        .and(guard::with_store(store.clone()))
        .and_then(replace_settings);

    let merge_settings = warp::path("settings")
        .and(warp::path::end())
        .and(warp::patch())
        .and(guard::current_user(verifier, store.clone()))
        .and(warp::body::content_length_limit(SETTINGS_LIMIT))
        .and(warp::body::json())
        .and(guard::with_store(store))
        .and_then(merge_settings);

    read_settings.or(replace_settings).or(merge_settings)
}

async fn read_settings(user: User, store: SharedStore) -> Result<Json, Rejection> {
    Ok(json(&store.read_settings(user.id).await?))
}

async fn replace_settings(
    user: User,
    settings: Settings,
    store: SharedStore,
) -> Result<Json, Rejection> {
    let settings = store.replace_settings(user.id, settings).await?;
    info!(uid = %user.uid, keys = settings.len(), "replaced settings");
    Ok(json(&settings))
}

async fn merge_settings(
    user: User,
    patch: Settings,
    store: SharedStore,
) -> Result<Json, Rejection> {
    let settings = store.merge_settings(user.id, patch).await?;
    info!(uid = %user.uid, keys = settings.len(), "merged settings");
    Ok(json(&settings))
}

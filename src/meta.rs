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

//! Unauthenticated endpoints: liveness and the configuration the web client
//! needs before signing in.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use warp::{
    http::StatusCode,
    reply::{self, with_status, Json, WithStatus},
    Filter, Rejection, Reply,
};

use crate::{guard, store::SharedStore};

/// Public configuration handed to the web client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub project_id: String,
    /// Location of the visualization asset on the CDN.
    pub asset_url: Option<String>,
}

pub fn api(
    store: SharedStore,
    client: ClientConfig,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(guard::with_store(store))
        .and_then(health);

    let config = warp::path("config")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || reply::json(&client));

    health.or(config)
}

async fn health(store: SharedStore) -> Result<WithStatus<Json>, Rejection> {
    match store.ping().await {
        Ok(()) => Ok(with_status(
            reply::json(&json!({"status": "ok"})),
            StatusCode::OK,
        )),
        Err(e) => {
            warn!(error = %e, "health check failed");
            Ok(with_status(
                reply::json(&json!({"status": "unavailable"})),
                StatusCode::SERVICE_UNAVAILABLE,
            ))
        }
    }
}

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

use warp::{Filter, Rejection, Reply};

pub mod config;
pub mod guard;

pub mod auth;
pub mod data;
pub mod meta;
pub mod settings;
pub mod user;

pub mod db;
pub mod memory;
pub mod store;

mod error;
pub use error::{handle_rejects, Error, ErrorBody, ErrorResp};

pub use auth::Verifier;
pub use config::Config;
pub use meta::ClientConfig;
pub use store::SharedStore;

const CORS_METHODS: [&str; 5] = ["GET", "PUT", "PATCH", "DELETE", "OPTIONS"];
const CORS_HEADERS: [&str; 2] = ["authorization", "content-type"];

fn cors(origins: &[String]) -> warp::cors::Builder {
    let builder = warp::cors()
        .allow_methods(CORS_METHODS)
        .allow_headers(CORS_HEADERS);
    if origins.is_empty() {
        builder.allow_any_origin()
    } else {
        builder.allow_origins(origins.iter().map(String::as_str))
    }
}

/// The complete HTTP interface, mounted under `/api`.
pub fn app(
    store: SharedStore,
    verifier: Arc<Verifier>,
    client: ClientConfig,
    cors_origins: &[String],
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let meta_api = meta::api(store.clone(), client);
    let user_api = user::api(store.clone(), verifier.clone());
    let settings_api = settings::api(store.clone(), verifier.clone());
    let data_api = data::api(store, verifier);

    warp::path("api")
        .and(meta_api.or(user_api).or(settings_api).or(data_api))
        .recover(handle_rejects)
        .with(cors(cors_origins).build())
        .with(warp::trace::request())
}

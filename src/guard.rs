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

use std::{convert::Infallible, sync::Arc};

use warp::{Filter, Rejection};

use crate::{
    auth::{Identity, Verifier},
    store::{SharedStore, User},
    Error,
};

pub fn with_store(
    store: SharedStore,
) -> impl Filter<Extract = (SharedStore,), Error = Infallible> + Clone {
    warp::any().map(move || store.clone())
}

pub fn with_verifier(
    verifier: Arc<Verifier>,
) -> impl Filter<Extract = (Arc<Verifier>,), Error = Infallible> + Clone {
    warp::any().map(move || verifier.clone())
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

pub fn authentic_user_header(
    verifier: Arc<Verifier>,
) -> impl Filter<Extract = (Identity,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_verifier(verifier))
        .and_then(|h: Option<String>, verifier: Arc<Verifier>| async move {
            let token = h
                .as_deref()
                .and_then(bearer_token)
                .ok_or(Error::Unauthorized)?;
            verifier.verify(token).await.map_err(Rejection::from)
        })
}

/// The user row for the caller, created on the first authenticated request.
pub fn current_user(
    verifier: Arc<Verifier>,
    store: SharedStore,
) -> impl Filter<Extract = (User,), Error = Rejection> + Clone {
    authentic_user_header(verifier)
        .and(with_store(store))
        .and_then(|identity: Identity, store: SharedStore| async move {
            store
                .ensure_user(&identity)
                .await
                .map_err(Rejection::from)
        })
}

#[cfg(test)]
mod tests {
    use super::bearer_token;

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("bearer  abc "), Some("abc"));
        assert_eq!(bearer_token("Basic Zm9vOmJhcg=="), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("abc"), None);
    }
}

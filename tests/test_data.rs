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

use std::{thread, time::Duration};

use serde_json::{json, Value};

use cobey::{
    data::{MAX_PAGE, SESSION_LIMIT},
    ErrorResp,
};

mod common;

fn put(auth: &str, key: &str, state: &Value) -> warp::test::RequestBuilder {
    warp::test::request()
        .method("PUT")
        .path(&format!("/api/data/{}", key))
        .header("Authorization", auth)
        .json(state)
}

fn keys(listing: &Value) -> Vec<&str> {
    listing
        .as_array()
        .expect("session listing")
        .iter()
        .map(|s| s["key"].as_str().expect("session key"))
        .collect()
}

#[tokio::test]
async fn session_lifecycle() {
    let api = common::app();
    let auth = common::bearer("ada");
    let state = json!({"camera": {"fov": 60}, "layers": ["terrain", "roads"]});

    assert_eq!(put(&auth, "orbit-1", &state).reply(&api).await.status(), 201, "created");

    let res = warp::test::request()
        .method("GET")
        .path("/api/data/orbit-1")
        .header("Authorization", auth.as_str())
        .reply(&api)
        .await;
    assert_eq!(res.status(), 200);
    let body = common::body_json(res.body());
    assert_eq!(body["key"], "orbit-1");
    assert_eq!(body["state"], state);
    let created_at = body["created_at"].clone();

    let replaced = json!([1, 2, 3]);
    assert_eq!(put(&auth, "orbit-1", &replaced).reply(&api).await.status(), 200, "replaced");

    let res = warp::test::request()
        .method("GET")
        .path("/api/data/orbit-1")
        .header("Authorization", auth.as_str())
        .reply(&api)
        .await;
    let body = common::body_json(res.body());
    assert_eq!(body["state"], replaced);
    assert_eq!(body["created_at"], created_at, "creation time survives a replace");

    let res = warp::test::request()
        .method("DELETE")
        .path("/api/data/orbit-1")
        .header("Authorization", auth.as_str())
        .reply(&api)
        .await;
    assert_eq!(res.status(), 204);

    let res = warp::test::request()
        .method("DELETE")
        .path("/api/data/orbit-1")
        .header("Authorization", auth.as_str())
        .reply(&api)
        .await;
    assert_eq!(res.status(), 404, "already deleted");

    let res = warp::test::request()
        .method("GET")
        .path("/api/data/orbit-1")
        .header("Authorization", auth.as_str())
        .reply(&api)
        .await;
    assert_eq!(res.status(), 404);
    let body = serde_json::from_slice::<ErrorResp>(res.body()).expect("error body");
    assert_eq!(body.error.code, "NOT_FOUND");
}

#[tokio::test]
async fn listing_is_newest_first() {
    let api = common::app();
    let auth = common::bearer("ada");

    for key in ["first", "second", "third"] {
        let res = put(&auth, key, &json!({ "name": key })).reply(&api).await;
        assert_eq!(res.status(), 201);
        thread::sleep(Duration::from_millis(5));
    }
    // Touching a session moves it to the front.
    assert_eq!(put(&auth, "first", &json!(null)).reply(&api).await.status(), 200);

    let res = warp::test::request()
        .method("GET")
        .path("/api/data")
        .header("Authorization", auth.as_str())
        .reply(&api)
        .await;
    assert_eq!(res.status(), 200);
    let listing = common::body_json(res.body());
    assert_eq!(keys(&listing), vec!["first", "third", "second"]);
    assert!(listing[0].get("state").is_none(), "listing omits state");

    let res = warp::test::request()
        .method("GET")
        .path("/api/data?limit=2")
        .header("Authorization", auth.as_str())
        .reply(&api)
        .await;
    assert_eq!(keys(&common::body_json(res.body())), vec!["first", "third"]);

    let res = warp::test::request()
        .method("GET")
        .path(&format!("/api/data?limit={}", MAX_PAGE * 10))
        .header("Authorization", auth.as_str())
        .reply(&api)
        .await;
    assert_eq!(res.status(), 200, "oversized limits are clamped");

    for bad in ["0", "-3", "many"] {
        let res = warp::test::request()
            .method("GET")
            .path(&format!("/api/data?limit={}", bad))
            .header("Authorization", auth.as_str())
            .reply(&api)
            .await;
        assert_eq!(res.status(), 400, "limit={}", bad);
    }
}

#[tokio::test]
async fn empty_listing() {
    let res = warp::test::request()
        .method("GET")
        .path("/api/data")
        .header("Authorization", common::bearer("newcomer"))
        .reply(&common::app())
        .await;
    assert_eq!(res.status(), 200);
    assert_eq!(common::body_json(res.body()), json!([]));
}

#[tokio::test]
async fn invalid_keys() {
    let api = common::app();
    let auth = common::bearer("ada");
    let too_long = "k".repeat(65);

    for key in ["has%20space", "dots.in.key", too_long.as_str()] {
        let res = put(&auth, key, &json!(1)).reply(&api).await;
        assert_eq!(res.status(), 400, "PUT {}", key);

        let res = warp::test::request()
            .method("GET")
            .path(&format!("/api/data/{}", key))
            .header("Authorization", auth.as_str())
            .reply(&api)
            .await;
        assert_eq!(res.status(), 400, "GET {}", key);
    }
}

#[tokio::test]
async fn oversized_state() {
    let api = common::app();
    let blob = "x".repeat(SESSION_LIMIT as usize);
    let status = put(&common::bearer("ada"), "big", &json!({ "blob": blob }))
        .reply(&api)
        .await
        .status();
    assert_eq!(status, 413);
}

#[tokio::test]
async fn sessions_require_authentication() {
    let api = common::app();
    for (method, path) in [
        ("GET", "/api/data"),
        ("GET", "/api/data/orbit-1"),
        ("DELETE", "/api/data/orbit-1"),
    ] {
        let res = warp::test::request()
            .method(method)
            .path(path)
            .reply(&api)
            .await;
        assert_eq!(res.status(), 401, "{} {}", method, path);
    }

    let res = warp::test::request()
        .method("PUT")
        .path("/api/data/orbit-1")
        .json(&json!({}))
        .reply(&api)
        .await;
    assert_eq!(res.status(), 401);
}

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

//! Persistence of user profiles, settings and visualization sessions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{auth::Identity, Error};

pub type Settings = Map<String, Value>;

pub const MAX_DISPLAY_NAME_CHARS: usize = 100;

pub type SharedStore = Arc<dyn Store>;

/// A row of the `users` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(skip)]
    pub id: i32,
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Saved state of one visualization session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub state: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        SessionSummary {
            key: s.key.clone(),
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<(), Error>;

    /// Fetch the user for an identity, creating the row on first sight.
    /// A non-empty email in the identity replaces the stored one.
    async fn ensure_user(&self, identity: &Identity) -> Result<User, Error>;

    async fn update_user(&self, user_id: i32, display_name: Option<String>)
        -> Result<User, Error>;

    /// Remove a user together with its settings and sessions.
    async fn delete_user(&self, user_id: i32) -> Result<(), Error>;

    async fn read_settings(&self, user_id: i32) -> Result<Settings, Error>;

    async fn replace_settings(&self, user_id: i32, settings: Settings) -> Result<Settings, Error>;

    /// Merge top-level keys into the stored settings. A `null` value removes
    /// the key.
    async fn merge_settings(&self, user_id: i32, patch: Settings) -> Result<Settings, Error>;

    /// Newest first.
    async fn list_sessions(&self, user_id: i32, limit: i64)
        -> Result<Vec<SessionSummary>, Error>;

    async fn read_session(&self, user_id: i32, key: &str) -> Result<Session, Error>;

    /// Store a session's state, returning it and whether it was newly created.
    async fn write_session(
        &self,
        user_id: i32,
        key: &str,
        state: Value,
    ) -> Result<(Session, bool), Error>;

    async fn delete_session(&self, user_id: i32, key: &str) -> Result<(), Error>;
}

/// Trim a display name; blank names are treated as absent.
pub fn clean_display_name(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Split a settings patch into the entries to set and the keys to remove.
pub fn split_patch(patch: Settings) -> (Settings, Vec<String>) {
    let mut set = Settings::new();
    let mut removed = Vec::new();
    for (k, v) in patch {
        if v.is_null() {
            removed.push(k);
        } else {
            set.insert(k, v);
        }
    }
    (set, removed)
}

pub fn apply_patch(settings: &mut Settings, patch: Settings) {
    let (set, removed) = split_patch(patch);
    for k in removed.iter() {
        settings.remove(k);
    }
    settings.extend(set);
}

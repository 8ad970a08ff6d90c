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

//! A process-local [`Store`] with the same semantics as the PostgreSQL one.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    auth::Identity,
    store::{apply_patch, Session, SessionSummary, Settings, Store, User},
    Error,
};

struct Record {
    user: User,
    settings: Settings,
    sessions: BTreeMap<String, Session>,
}

#[derive(Default)]
struct State {
    next_id: i32,
    records: HashMap<i32, Record>,
    by_uid: HashMap<String, i32>,
}

impl State {
    fn record(&mut self, user_id: i32) -> Result<&mut Record, Error> {
        self.records.get_mut(&user_id).ok_or(Error::NotFound)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Default::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn ensure_user(&self, identity: &Identity) -> Result<User, Error> {
        let mut state = self.state.lock().await;
        if let Some(id) = state.by_uid.get(identity.uid.as_str()).copied() {
            let record = state.record(id)?;
            let stale = identity.email.is_some()
                && (record.user.email != identity.email
                    || record.user.email_verified != identity.email_verified);
            if stale {
                record.user.email = identity.email.clone();
                record.user.email_verified = identity.email_verified;
                record.user.updated_at = Utc::now();
            }
            return Ok(record.user.clone());
        }

        state.next_id += 1;
        let id = state.next_id;
        let now = Utc::now();
        let user = User {
            id,
            uid: identity.uid.clone(),
            email: identity.email.clone(),
            email_verified: identity.email_verified,
            display_name: identity.name.clone(),
            created_at: now,
            updated_at: now,
        };
        state.by_uid.insert(identity.uid.clone(), id);
        state.records.insert(
            id,
            Record {
                user: user.clone(),
                settings: Settings::new(),
                sessions: BTreeMap::new(),
            },
        );
        Ok(user)
    }

    async fn update_user(
        &self,
        user_id: i32,
        display_name: Option<String>,
    ) -> Result<User, Error> {
        let mut state = self.state.lock().await;
        let record = state.record(user_id)?;
        record.user.display_name = display_name;
        record.user.updated_at = Utc::now();
        Ok(record.user.clone())
    }

    async fn delete_user(&self, user_id: i32) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if let Some(record) = state.records.remove(&user_id) {
            state.by_uid.remove(record.user.uid.as_str());
        }
        Ok(())
    }

    async fn read_settings(&self, user_id: i32) -> Result<Settings, Error> {
        let mut state = self.state.lock().await;
        Ok(state.record(user_id)?.settings.clone())
    }

    async fn replace_settings(&self, user_id: i32, settings: Settings) -> Result<Settings, Error> {
        let mut state = self.state.lock().await;
        let record = state.record(user_id)?;
        record.settings = settings;
        record.user.updated_at = Utc::now();
        Ok(record.settings.clone())
    }

    async fn merge_settings(&self, user_id: i32, patch: Settings) -> Result<Settings, Error> {
        let mut state = self.state.lock().await;
        let record = state.record(user_id)?;
        apply_patch(&mut record.settings, patch);
        record.user.updated_at = Utc::now();
        Ok(record.settings.clone())
    }

    async fn list_sessions(
        &self,
        user_id: i32,
        limit: i64,
    ) -> Result<Vec<SessionSummary>, Error> {
        let mut state = self.state.lock().await;
        let record = state.record(user_id)?;
        let mut sessions: Vec<SessionSummary> =
            record.sessions.values().map(SessionSummary::from).collect();
        sessions.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        sessions.truncate(limit.max(0) as usize);
        Ok(sessions)
    }

    async fn read_session(&self, user_id: i32, key: &str) -> Result<Session, Error> {
        let mut state = self.state.lock().await;
        state
            .record(user_id)?
            .sessions
            .get(key)
            .cloned()
            .ok_or(Error::NotFound)
    }

    async fn write_session(
        &self,
        user_id: i32,
        key: &str,
        state: Value,
    ) -> Result<(Session, bool), Error> {
        let mut guard = self.state.lock().await;
        let record = guard.record(user_id)?;
        let now = Utc::now();
        match record.sessions.get_mut(key) {
            Some(session) => {
                session.state = state;
                session.updated_at = now;
                Ok((session.clone(), false))
            }
            None => {
                let session = Session {
                    key: key.to_string(),
                    state,
                    created_at: now,
                    updated_at: now,
                };
                record.sessions.insert(key.to_string(), session.clone());
                Ok((session, true))
            }
        }
    }

    async fn delete_session(&self, user_id: i32, key: &str) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state
            .record(user_id)?
            .sessions
            .remove(key)
            .map(|_| ())
            .ok_or(Error::NotFound)
    }
}

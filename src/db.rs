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

use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use mobc::Connection;
use mobc_postgres::PgConnectionManager;
use serde_json::Value;
use tokio_postgres::{row::Row, Config, NoTls};
use tracing::debug;

use crate::{
    auth::Identity,
    store::{split_patch, Session, SessionSummary, Settings, Store, User},
    Error,
};

pub type Conn = Connection<PgConnectionManager<NoTls>>;
pub type Pool = mobc::Pool<PgConnectionManager<NoTls>>;

const DB_POOL_MAX_OPEN: u64 = 32;
const DB_POOL_MAX_IDLE: u64 = 8;
const DB_POOL_TIMEOUT_SECONDS: u64 = 15;

const USER_COLUMNS: &str =
    "id, firebase_uid, email, email_verified, display_name, created_at, updated_at";

pub fn create_pool(db_url: &str) -> Result<Pool, Error> {
    let config = Config::from_str(db_url)?;

    let manager = PgConnectionManager::new(config, NoTls);
    Ok(mobc::Pool::builder()
        .max_open(DB_POOL_MAX_OPEN)
        .max_idle(DB_POOL_MAX_IDLE)
        .get_timeout(Some(Duration::from_secs(DB_POOL_TIMEOUT_SECONDS)))
        .build(manager))
}

pub async fn get_db_conn(db_pool: &Pool) -> Result<Conn, Error> {
    Ok(db_pool.get().await?)
}

pub async fn init_db(db_pool: &Pool) -> Result<(), Error> {
    let init_sql = include_str!("init.sql");
    let conn = get_db_conn(db_pool).await?;
    conn.batch_execute(init_sql).await.map_err(Error::DBError)?;
    Ok(())
}

pub async fn uninit_db(db_pool: &Pool) -> Result<(), Error> {
    let uninit_sql = include_str!("uninit.sql");
    let conn = get_db_conn(db_pool).await?;
    conn.batch_execute(uninit_sql)
        .await
        .map_err(Error::DBError)?;
    Ok(())
}

impl<'a> From<&'a Row> for User {
    fn from(item: &'a Row) -> Self {
        User {
            id: item.get("id"),
            uid: item.get("firebase_uid"),
            email: item.get("email"),
            email_verified: item.get("email_verified"),
            display_name: item.get("display_name"),
            created_at: item.get("created_at"),
            updated_at: item.get("updated_at"),
        }
    }
}

impl<'a> From<&'a Row> for Session {
    fn from(item: &'a Row) -> Self {
        Session {
            key: item.get("session_key"),
            state: item.get("state"),
            created_at: item.get("created_at"),
            updated_at: item.get("updated_at"),
        }
    }
}

fn settings_of(row: &Row) -> Settings {
    match row.get::<_, Value>("settings") {
        Value::Object(m) => m,
        _ => Settings::new(),
    }
}

/// [`Store`] backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        PgStore { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), Error> {
        get_db_conn(&self.pool).await?.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn ensure_user(&self, identity: &Identity) -> Result<User, Error> {
        let conn = get_db_conn(&self.pool).await?;
        let select = format!("SELECT {} FROM users WHERE firebase_uid = $1", USER_COLUMNS);

        // Most requests come from known users whose token matches the row.
        if let Some(row) = conn.query_opt(select.as_str(), &[&identity.uid]).await? {
            let user = User::from(&row);
            let stale = identity.email.is_some()
                && (user.email != identity.email || user.email_verified != identity.email_verified);
            if !stale {
                return Ok(user);
            }
        }

        let row = conn
            .query_opt(
                format!(
                    r#"
                    INSERT INTO users (firebase_uid, email, email_verified, display_name)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (firebase_uid) DO UPDATE
                    SET email = EXCLUDED.email,
                        email_verified = EXCLUDED.email_verified,
                        updated_at = now()
                    WHERE EXCLUDED.email IS NOT NULL
                      AND (users.email IS DISTINCT FROM EXCLUDED.email
                           OR users.email_verified IS DISTINCT FROM EXCLUDED.email_verified)
                    RETURNING {}
                    "#,
                    USER_COLUMNS
                )
                .as_str(),
                &[
                    &identity.uid,
                    &identity.email,
                    &identity.email_verified,
                    &identity.name,
                ],
            )
            .await?;
        match row {
            Some(row) => Ok(User::from(&row)),
            // A concurrent request already brought the row up to date.
            None => Ok(User::from(&conn.query_one(select.as_str(), &[&identity.uid]).await?)),
        }
    }

    async fn update_user(
        &self,
        user_id: i32,
        display_name: Option<String>,
    ) -> Result<User, Error> {
        let conn = get_db_conn(&self.pool).await?;
        let row = conn
            .query_opt(
                format!(
                    "UPDATE users SET display_name = $2, updated_at = now() WHERE id = $1 RETURNING {}",
                    USER_COLUMNS
                )
                .as_str(),
                &[&user_id, &display_name],
            )
            .await?
            .ok_or(Error::NotFound)?;
        Ok(User::from(&row))
    }

    async fn delete_user(&self, user_id: i32) -> Result<(), Error> {
        let conn = get_db_conn(&self.pool).await?;
        let n = conn
            .execute("DELETE FROM users WHERE id = $1", &[&user_id])
            .await?;
        debug!(user_id, rows = n, "deleted user");
        Ok(())
    }

    async fn read_settings(&self, user_id: i32) -> Result<Settings, Error> {
        let conn = get_db_conn(&self.pool).await?;
        let row = conn
            .query_opt("SELECT settings FROM users WHERE id = $1", &[&user_id])
            .await?
            .ok_or(Error::NotFound)?;
        Ok(settings_of(&row))
    }

    async fn replace_settings(&self, user_id: i32, settings: Settings) -> Result<Settings, Error> {
        let conn = get_db_conn(&self.pool).await?;
        let row = conn
            .query_opt(
                r#"
                UPDATE users SET settings = $2::JSONB, updated_at = now()
                WHERE id = $1
                RETURNING settings
                "#,
                &[&user_id, &Value::Object(settings)],
            )
            .await?
            .ok_or(Error::NotFound)?;
        Ok(settings_of(&row))
    }

    async fn merge_settings(&self, user_id: i32, patch: Settings) -> Result<Settings, Error> {
        let (set, removed) = split_patch(patch);
        let conn = get_db_conn(&self.pool).await?;
        let row = conn
            .query_opt(
                r#"
                UPDATE users
                SET settings = (settings || $2::JSONB) - $3::TEXT[],
                    updated_at = now()
                WHERE id = $1
                RETURNING settings
                "#,
                &[&user_id, &Value::Object(set), &removed],
            )
            .await?
            .ok_or(Error::NotFound)?;
        Ok(settings_of(&row))
    }

    async fn list_sessions(
        &self,
        user_id: i32,
        limit: i64,
    ) -> Result<Vec<SessionSummary>, Error> {
        let conn = get_db_conn(&self.pool).await?;
        Ok(conn
            .query(
                r#"
                SELECT session_key, created_at, updated_at
                FROM session_data
                WHERE user_id = $1
                ORDER BY updated_at DESC, session_key
                LIMIT $2
                "#,
                &[&user_id, &limit],
            )
            .await?
            .iter()
            .map(|row| SessionSummary {
                key: row.get("session_key"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    async fn read_session(&self, user_id: i32, key: &str) -> Result<Session, Error> {
        let conn = get_db_conn(&self.pool).await?;
        let row = conn
            .query_opt(
                r#"
                SELECT session_key, state, created_at, updated_at
                FROM session_data
                WHERE user_id = $1 AND session_key = $2
                "#,
                &[&user_id, &key],
            )
            .await?
            .ok_or(Error::NotFound)?;
        Ok(Session::from(&row))
    }

    async fn write_session(
        &self,
        user_id: i32,
        key: &str,
        state: Value,
    ) -> Result<(Session, bool), Error> {
        let conn = get_db_conn(&self.pool).await?;
        let row = conn
            .query_one(
                r#"
                INSERT INTO session_data (user_id, session_key, state)
                VALUES ($1, $2, $3::JSONB)
                ON CONFLICT (user_id, session_key) DO UPDATE
                SET state = EXCLUDED.state, updated_at = now()
                RETURNING session_key, state, created_at, updated_at, (xmax = 0) AS created
                "#,
                &[&user_id, &key, &state],
            )
            .await?;
        Ok((Session::from(&row), row.get("created")))
    }

    async fn delete_session(&self, user_id: i32, key: &str) -> Result<(), Error> {
        let conn = get_db_conn(&self.pool).await?;
        let n = conn
            .execute(
                "DELETE FROM session_data WHERE user_id = $1 AND session_key = $2",
                &[&user_id, &key],
            )
            .await?;
        if n == 0 {
            Err(Error::NotFound)
        } else {
            Ok(())
        }
    }
}

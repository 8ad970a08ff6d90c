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

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cobey::{
    db::{self, PgStore},
    ClientConfig, Config, SharedStore, Verifier,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::from_env()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.log.as_str()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    info!(
        bind = %cfg.bind,
        keys = ?cfg.keys,
        cors_origins = ?cfg.cors_origins,
        "starting"
    );

    let db_pool = db::create_pool(cfg.database_url.as_str())?;
    db::init_db(&db_pool).await?;
    let store: SharedStore = Arc::new(PgStore::new(db_pool));

    let verifier = Arc::new(Verifier::from_config(&cfg)?);
    info!(project_id = verifier.project_id(), "verifying ID tokens");
    let client = ClientConfig {
        project_id: cfg.project_id.clone(),
        asset_url: cfg.asset_url.clone(),
    };
    let routes = cobey::app(store, verifier, client, &cfg.cors_origins);

    let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown(cfg.bind, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "unable to listen for shutdown signal");
        }
    });
    info!("HTTP server listening on {}", addr);
    server.await;
    info!("shut down");
    Ok(())
}

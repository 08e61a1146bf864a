//! Top-level daemon: wires a `LoginProvider`, a shared `Database`, and
//! the IMAP/POP3/AUTH listeners named by the configuration together,
//! and coordinates their shutdown. Grounded on the teacher's
//! `src/server.rs`/`src/instance.rs` composition root, generalized
//! from a single boitalettres IMAP server to the three independent
//! `oryx_proto` listeners.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use oryx_delivery::{DeliveryAgentConfig, MemoryDeliveryStore, SpoolManager};
use oryx_mail::{Database, MemoryDatabase};
use oryx_proto::{imap, pop, sasl};
use oryx_user::login::static_provider::StaticLoginProvider;

use crate::config::Config;

pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        let login_provider: oryx_user::ArcLoginProvider = Arc::new(
            StaticLoginProvider::new(self.config.users.user_list.clone()).await?,
        );
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());

        let (exit_tx, exit_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        if let Some(imap_config) = self.config.imap {
            let srv = imap::new(imap_config, login_provider.clone(), db.clone())?;
            tasks.push(tokio::spawn(srv.run(exit_rx.clone())));
        }
        if let Some(imap_unsecure_config) = self.config.imap_unsecure {
            let srv = imap::new_unsecure(imap_unsecure_config, login_provider.clone(), db.clone());
            tasks.push(tokio::spawn(srv.run(exit_rx.clone())));
        }
        if let Some(pop_config) = self.config.pop {
            let srv = pop::new(pop_config, login_provider.clone(), db.clone())?;
            tasks.push(tokio::spawn(srv.run(exit_rx.clone())));
        }
        if let Some(auth_config) = self.config.auth {
            let srv = sasl::AuthServer::new(auth_config, login_provider.clone());
            tasks.push(tokio::spawn(srv.run(exit_rx.clone())));
        }
        if let Some(delivery_config) = self.config.delivery {
            let store = Arc::new(MemoryDeliveryStore::new());
            let config = Arc::new(DeliveryAgentConfig {
                reporting_mta: delivery_config.reporting_mta,
                smarthost: delivery_config.smarthost,
                smarthost_port: delivery_config.smarthost_port,
            });
            let manager = SpoolManager::new(store, config);
            tasks.push(tokio::spawn(manager.run(exit_rx.clone())));
        }

        if tasks.is_empty() {
            anyhow::bail!("no listener configured: set at least one of imap, imap_unsecure, pop, auth");
        }

        tokio::signal::ctrl_c().await?;
        tracing::info!("received shutdown signal, stopping listeners");
        exit_tx.send(true).ok();

        for task in tasks {
            if let Err(e) = task.await? {
                tracing::error!(err=?e, "listener exited with an error");
            }
        }

        Ok(())
    }
}

//! `DeliveryAgent`/`SpoolManager`, grounded on spec.md §4.13's
//! numbered steps. One `DeliveryAgent` processes one `DeliveryRow` end
//! to end; `SpoolManager` wakes every 60s (spec.md §4.13 "Retry
//! cadence") and spawns one agent per due row.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{Duration, Utc};
use tokio::sync::watch;

use oryx_core::{gen_ident, UniqueIdent};

use crate::dsn::bounce_row;
use crate::smtp::{Envelope, SmtpClient, SmtpClientPool};
use crate::spool::{DeliveryStore, RecipientAction};

const RETRY_INTERVAL: StdDuration = StdDuration::from_secs(60);
const RETRY_AFTER: i64 = 3600;
const BOUNCE_EXPIRY_DAYS: i64 = 5;

/// Frozen configuration every spawned `DeliveryAgent` is built from. A
/// real deployment would do MX lookups per recipient domain; this spool
/// always relays through one configured smarthost, the only outbound
/// routing policy SPEC_FULL.md's Non-goals leave in scope.
pub struct DeliveryAgentConfig {
    pub reporting_mta: String,
    pub smarthost: String,
    pub smarthost_port: u16,
}

pub struct DeliveryAgent<S: DeliveryStore> {
    store: Arc<S>,
    clients: Arc<SmtpClientPool>,
    config: Arc<DeliveryAgentConfig>,
}

impl<S: DeliveryStore> DeliveryAgent<S> {
    pub fn new(store: Arc<S>, clients: Arc<SmtpClientPool>, config: Arc<DeliveryAgentConfig>) -> Self {
        Self {
            store,
            clients,
            config,
        }
    }

    /// Runs the full per-row transaction described in spec.md §4.13,
    /// steps 1-9. Returns `Ok(())` whether or not the delivery advanced
    /// a recipient to a terminal state — failure here means the
    /// transaction itself could not be committed.
    pub async fn process_row(&self, id: UniqueIdent) -> Result<()> {
        // Step 1: SELECT ... FOR UPDATE; absent or already-locked row finishes silently.
        let mut row = match self.store.lock(id).await {
            Ok(row) => row,
            Err(crate::spool::StoreError::NotFound) => return Ok(()),
            Err(crate::spool::StoreError::Locked) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        // Step 4: nothing left to do.
        if row.is_complete() {
            row.delivered = true;
            self.store.commit(row).await?;
            return Ok(());
        }

        // Steps 2/3 are folded into the row itself: message, sender and
        // recipients are already materialized by the caller that enqueued it.

        // Step 6: expire anything past its deadline before submission,
        // so an expired row never reopens a connection for nothing.
        let now = Utc::now();
        if now > row.expires_at {
            for r in row.recipients.iter_mut().filter(|r| !r.action.is_terminal()) {
                r.action = RecipientAction::Failed;
                r.status_text = "Expired".to_string();
                r.last_attempt = Some(now);
            }
        }

        // Step 5: submit whatever recipients remain pending.
        if row.recipients.iter().any(|r| !r.action.is_terminal()) {
            let mut client = self
                .clients
                .checkout(&self.config.smarthost, self.config.smarthost_port)
                .await;
            let envelope = Envelope {
                sender: row.sender.as_deref(),
                recipients: &row.recipients,
                message: &row.message,
            };
            let updated = client.submit(envelope).await?;
            for mut r in updated {
                r.last_attempt = Some(now);
                if let Some(slot) = row.recipients.iter_mut().find(|x| x.address == r.address) {
                    *slot = r;
                }
            }
            self.clients
                .checkin(&self.config.smarthost, self.config.smarthost_port, client)
                .await;
        }

        row.tried_at = Some(now);

        // Step 7: spawn a bounce if everything is terminal and anything failed.
        let mut bounce = None;
        if !row.is_bounce
            && row.recipients.iter().all(|r| r.action.is_terminal())
            && row.recipients.iter().any(|r| r.action == RecipientAction::Failed)
        {
            bounce = bounce_row(
                &row,
                &self.config.reporting_mta,
                gen_ident(),
                now + Duration::days(BOUNCE_EXPIRY_DAYS),
            );
        }

        if row.recipients.iter().all(|r| r.action.is_terminal()) {
            row.delivered = true;
        }

        // Step 8: commit.
        self.store.commit(row).await?;
        if let Some(bounce_row) = bounce {
            self.store.enqueue(bounce_row).await?;
        }

        Ok(())
    }
}

pub struct SpoolManager<S: DeliveryStore> {
    store: Arc<S>,
    config: Arc<DeliveryAgentConfig>,
    clients: Arc<SmtpClientPool>,
}

impl<S: DeliveryStore + 'static> SpoolManager<S> {
    pub fn new(store: Arc<S>, config: Arc<DeliveryAgentConfig>) -> Self {
        let clients = SmtpClientPool::new(config.smarthost.clone());
        Self {
            store,
            config,
            clients,
        }
    }

    pub async fn run(self, mut must_exit: watch::Receiver<bool>) -> Result<()> {
        let mut interval = tokio::time::interval(RETRY_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => self.scan_once().await?,
                _ = must_exit.changed() => {
                    tracing::info!("spool manager shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Step 9's failure mode: if a commit fails after an SMTP client
    /// already handed a message off, the row is left locked and the
    /// manager itself stops, so a stale view of the database never
    /// re-submits an already-sent message. An operator must restart it.
    async fn scan_once(&self) -> Result<()> {
        let due = self
            .store
            .due_for_retry(Utc::now(), Duration::seconds(RETRY_AFTER))
            .await?;
        tracing::debug!(count = due.len(), "spool scan");

        for id in due {
            let agent = DeliveryAgent::new(self.store.clone(), self.clients.clone(), self.config.clone());
            if let Err(e) = agent.process_row(id).await {
                tracing::error!(err=?e, id=?id, "delivery agent failed, stopping spool manager to avoid duplicate retransmission");
                return Err(e);
            }
        }
        Ok(())
    }
}

//! Periodic reconciliation: looks at every contact and pushes the protocol
//! one step forward where something is pending.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use murmur_shared::constants::SCHEDULER_TICK_SECS;
use murmur_shared::types::ContactId;

use crate::contact::Contact;
use crate::error::Result;
use crate::node::Node;

/// What a tick decided to do for one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Introduce,
    ConfirmKey,
    Deliver,
}

impl Job {
    /// The step due for `contact` at `now`, if any.
    pub fn due(contact: &Contact, now: chrono::DateTime<Utc>) -> Option<Self> {
        if contact.in_work() || !contact.cooldown_elapsed(now) {
            return None;
        }
        if contact.public_key.is_none() {
            return (contact.created_by_me && !contact.pub_key_sent).then_some(Job::Introduce);
        }
        if contact.has_pending() {
            return Some(Job::Deliver);
        }
        (!contact.pub_key_sent).then_some(Job::ConfirmKey)
    }
}

pub struct Scheduler {
    node: Arc<Node>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(node: Arc<Node>) -> Self {
        Self::with_tick(node, Duration::from_secs(SCHEDULER_TICK_SECS))
    }

    pub fn with_tick(node: Arc<Node>, tick: Duration) -> Self {
        Self { node, tick }
    }

    /// Clear crash leftovers, then tick until `shutdown` turns `true` (or its
    /// sender goes away). Jobs already started run to completion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.node.registry().clear_all_in_work()?;
        info!(tick_secs = self.tick.as_secs(), "scheduler started");

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick_once() {
                        self.node.absorb("scheduler tick", None, &e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("scheduler stopped");
        Ok(())
    }

    /// Inspect every contact once and spawn the jobs that are due.
    pub fn tick_once(&self) -> Result<Vec<JoinHandle<()>>> {
        let now = Utc::now();
        let mut spawned = Vec::new();

        for contact in self.node.registry().contacts()? {
            let Some(job) = Job::due(&contact, now) else {
                continue;
            };
            let Some(claim) = self.node.try_claim(contact.id) else {
                continue;
            };

            debug!(contact = %contact.id, ?job, "dispatching");
            let node = Arc::clone(&self.node);
            spawned.push(tokio::spawn(async move {
                let _claim = claim;
                run_job(&node, contact.id, job).await;
            }));
        }
        Ok(spawned)
    }
}

async fn run_job(node: &Node, id: ContactId, job: Job) {
    let result = match job {
        Job::Introduce => node.introduce(id).await,
        Job::ConfirmKey => node.confirm_public_key(id).await,
        Job::Deliver => node.deliver_pending(id).await.map(|_| ()),
    };
    if let Err(e) = result {
        node.absorb("scheduled job", Some(id), &e);
    }
}

//! CSMS-initiated commands
//!
//! Every command is answered before it is acted on. The work itself runs as a
//! deferred task tagged with the connection generation it was accepted under;
//! a task that wakes up after a reconnect is dropped.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{ChargePoint, ResetPhase};
use crate::adapter::{CommandReply, RemoteCommand, StopReason};
use crate::error::Result;
use crate::ocpp::ResetKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeferredTask {
    Start { connector_id: u32, id_tag: String },
    Stop { connector_id: u32, id_tag: String },
    Reset { kind: ResetKind },
}

impl ChargePoint {
    pub(crate) async fn handle_remote_command(&self, command: RemoteCommand) -> Result<CommandReply> {
        info!("[{}] Remote command: {}", self.id(), command.name());

        match command {
            RemoteCommand::RemoteStart { id_tag, connector_id } => {
                let connector_id = connector_id.unwrap_or(1);
                self.schedule(
                    DeferredTask::Start { connector_id, id_tag },
                    self.config.remote_action_delay,
                )
                .await;
                Ok(CommandReply::Accepted)
            }

            RemoteCommand::RemoteStop { transaction_id } => {
                let found = self.state.read().await.find_transaction(&transaction_id);
                match found {
                    Some((connector_id, id_tag)) => {
                        let id_tag = id_tag.unwrap_or_default();
                        self.schedule(
                            DeferredTask::Stop { connector_id, id_tag },
                            self.config.remote_action_delay,
                        )
                        .await;
                        Ok(CommandReply::Accepted)
                    }
                    None => {
                        warn!("[{}] RemoteStop for unknown transaction {}", self.id(), transaction_id);
                        Ok(CommandReply::Accepted)
                    }
                }
            }

            RemoteCommand::Reset { kind } => {
                {
                    let mut state = self.state.write().await;
                    if state.reset_phase != ResetPhase::Idle {
                        warn!("[{}] Reset already in progress ({:?})", self.id(), state.reset_phase);
                        return Ok(CommandReply::Accepted);
                    }
                    state.reset_phase = ResetPhase::Resetting;
                }
                self.schedule(DeferredTask::Reset { kind }, self.config.reset_delay).await;
                Ok(CommandReply::Accepted)
            }

            RemoteCommand::UnlockConnector { connector_id } => {
                debug!("[{}] Connector {} unlocked", self.id(), connector_id);
                Ok(CommandReply::Unlocked)
            }
        }
    }

    async fn schedule(&self, task: DeferredTask, delay: Duration) {
        let generation = self.state.read().await.generation;
        let weak = self.weak_self.clone();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(charge_point) = weak.upgrade() {
                charge_point.run_deferred(task, generation).await;
            }
        });
    }

    async fn run_deferred(&self, task: DeferredTask, generation: u64) {
        let _op = self.ops.lock().await;

        let current = self.state.read().await.generation;
        if current != generation {
            warn!(
                "[{}] Dropping {:?}: connection changed (generation {} -> {})",
                self.id(),
                task,
                generation,
                current
            );
            if matches!(task, DeferredTask::Reset { .. }) {
                self.state.write().await.reset_phase = ResetPhase::Idle;
            }
            return;
        }

        match task {
            DeferredTask::Start { connector_id, id_tag } => {
                if let Err(e) = self.start_charging_locked(connector_id, &id_tag).await {
                    warn!("[{}] Remote start on connector {} failed: {}", self.id(), connector_id, e);
                }
            }
            DeferredTask::Stop { connector_id, id_tag } => {
                if let Err(e) = self.stop_charging_locked(connector_id, &id_tag, StopReason::Remote).await {
                    warn!("[{}] Remote stop on connector {} failed: {}", self.id(), connector_id, e);
                }
            }
            DeferredTask::Reset { kind } => {
                if let Err(e) = self.run_reset(kind).await {
                    warn!("[{}] Reset failed: {}", self.id(), e);
                }
                self.state.write().await.reset_phase = ResetPhase::Idle;
            }
        }
    }

    /// Drop the socket, wait, reconnect and boot again
    async fn run_reset(&self, kind: ResetKind) -> Result<()> {
        info!("[{}] {:?} reset", self.id(), kind);
        self.disconnect_locked().await;

        {
            let mut state = self.state.write().await;
            state.booted = false;
            state.reset_phase = ResetPhase::Reconnecting;
            self.notify(&state);
        }

        tokio::time::sleep(self.config.reconnect_delay).await;
        self.connect_locked(None).await?;

        self.state.write().await.reset_phase = ResetPhase::Booting;
        let (vendor, model) = (self.config.vendor.clone(), self.config.model.clone());
        self.boot_locked(&vendor, &model).await?;

        info!("[{}] Reset complete", self.id());
        Ok(())
    }
}

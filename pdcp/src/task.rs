//! PDCP Bearer Task
//!
//! Runs a bearer entity on its own tokio task. Every stimulus arrives as a command on a
//! bounded queue and a periodic tick drives the entity timers, so the entity is only ever
//! touched from this task.

use crate::entity::PdcpEntity;
use crate::metrics::PdcpMetrics;
use crate::security::SecurityConfig;
use crate::PdcpError;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Timer resolution of the bearer task
pub const TICK_PERIOD: Duration = Duration::from_millis(1);

/// Stimulus for a bearer task
#[derive(Debug)]
pub enum PdcpCommand {
    /// SDU from upper layers
    Sdu(Bytes),
    /// PDU from the lower layer
    Pdu(Bytes),
    TransmitNotification(u32),
    DeliveryNotification(u32),
    RetransmitNotification(u32),
    DeliveryRetransmittedNotification(u32),
    /// Re-establish both entities with new keys
    Reestablish(SecurityConfig),
    DataRecovery,
    /// Send a status report for the current RX state
    SendStatusReport,
    ConfigureSecurity(SecurityConfig),
    EnableSecurity { integrity: bool, ciphering: bool },
    /// Request a metrics snapshot
    Metrics(oneshot::Sender<PdcpMetrics>),
    Shutdown,
}

/// Handle to a running bearer task
pub struct PdcpBearerHandle {
    cmd_tx: mpsc::Sender<PdcpCommand>,
    join: JoinHandle<PdcpMetrics>,
}

impl PdcpBearerHandle {
    /// Queue a command, waiting for space if the queue is full
    pub async fn send(&self, cmd: PdcpCommand) -> Result<(), PdcpError> {
        self.cmd_tx.send(cmd).await.map_err(|_| PdcpError::TaskStopped)
    }

    /// Sender side of the command queue, for other tasks feeding this bearer
    pub fn sender(&self) -> mpsc::Sender<PdcpCommand> {
        self.cmd_tx.clone()
    }

    /// Snapshot of the bearer metrics
    pub async fn metrics(&self) -> Result<PdcpMetrics, PdcpError> {
        let (tx, rx) = oneshot::channel();
        self.send(PdcpCommand::Metrics(tx)).await?;
        rx.await.map_err(|_| PdcpError::TaskStopped)
    }

    /// Stop the task and return its final metrics
    pub async fn shutdown(self) -> Result<PdcpMetrics, PdcpError> {
        // The task may already be gone if every sender was dropped
        let _ = self.cmd_tx.send(PdcpCommand::Shutdown).await;
        self.join.await.map_err(|_| PdcpError::TaskStopped)
    }
}

/// Spawn a task owning the entity
pub fn spawn_bearer_task(entity: PdcpEntity, queue_size: usize) -> PdcpBearerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(queue_size.max(1));
    let join = tokio::spawn(run_bearer(entity, cmd_rx));
    PdcpBearerHandle { cmd_tx, join }
}

async fn run_bearer(mut entity: PdcpEntity, mut cmd_rx: mpsc::Receiver<PdcpCommand>) -> PdcpMetrics {
    let rb_id = entity.rb_id();
    info!("PDCP bearer task started. rb={}", rb_id);

    let mut ticker = tokio::time::interval(TICK_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(PdcpCommand::Shutdown) | None => break,
                    Some(cmd) => handle_command(&mut entity, cmd),
                }
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                entity.tick(now.duration_since(last_tick));
                last_tick = now;
            }
        }
    }

    info!("PDCP bearer task stopped. rb={}", rb_id);
    entity.metrics()
}

fn handle_command(entity: &mut PdcpEntity, cmd: PdcpCommand) {
    match cmd {
        PdcpCommand::Sdu(sdu) => entity.handle_sdu(sdu),
        PdcpCommand::Pdu(pdu) => entity.handle_pdu(pdu),
        PdcpCommand::TransmitNotification(sn) => entity.handle_transmit_notification(sn),
        PdcpCommand::DeliveryNotification(sn) => entity.handle_delivery_notification(sn),
        PdcpCommand::RetransmitNotification(sn) => entity.handle_retransmit_notification(sn),
        PdcpCommand::DeliveryRetransmittedNotification(sn) => entity.handle_delivery_retransmitted_notification(sn),
        PdcpCommand::Reestablish(sec_cfg) => entity.reestablish(&sec_cfg),
        PdcpCommand::DataRecovery => entity.data_recovery(),
        PdcpCommand::SendStatusReport => entity.send_status_report(),
        PdcpCommand::ConfigureSecurity(sec_cfg) => {
            if let Err(e) = entity.configure_security(&sec_cfg) {
                error!("Failed to configure security. rb={} err={}", entity.rb_id(), e);
            }
        }
        PdcpCommand::EnableSecurity { integrity, ciphering } => {
            if let Err(e) = entity.enable_security(integrity, ciphering) {
                error!("Failed to enable security. rb={} err={}", entity.rb_id(), e);
            }
        }
        PdcpCommand::Metrics(reply) => {
            if reply.send(entity.metrics()).is_err() {
                debug!("Metrics requester went away. rb={}", entity.rb_id());
            }
        }
        PdcpCommand::Shutdown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PdcpTimer, RlcMode, SnSize};
    use crate::entity::{PdcpEntityConfig, PdcpNotifiers};
    use crate::test_helpers::{drain, rx_config, test_primitives, tx_config};
    use common::types::RbId;
    use interfaces::{ControlChannel, LowerLayerChannel, LowerLayerMessage, PdcpSide, UpperDataChannel};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Bearer {
        handle: PdcpBearerHandle,
        lower_rx: UnboundedReceiver<LowerLayerMessage>,
        sdu_rx: UnboundedReceiver<Bytes>,
    }

    fn spawn_bearer(discard_ms: u64, t_reordering_ms: u64) -> Bearer {
        let rb_id = RbId::Drb(1);
        let config = PdcpEntityConfig {
            tx: tx_config(RlcMode::Am, SnSize::Size12, Some(PdcpTimer::from_millis(discard_ms))),
            rx: rx_config(RlcMode::Am, SnSize::Size12, PdcpTimer::from_millis(t_reordering_ms)),
        };
        let (tx_lower, lower_rx) = LowerLayerChannel::new();
        let (rx_upper_dn, sdu_rx) = UpperDataChannel::new();
        let (tx_upper_cn, _control_rx) = ControlChannel::new(rb_id, PdcpSide::Tx);
        let rx_upper_cn = tx_upper_cn.for_side(PdcpSide::Rx);
        let notifiers = PdcpNotifiers {
            tx_lower: Box::new(tx_lower),
            tx_upper_cn: Box::new(tx_upper_cn),
            rx_upper_dn: Box::new(rx_upper_dn),
            rx_upper_cn: Box::new(rx_upper_cn),
        };
        let entity = PdcpEntity::new(0, rb_id, config, test_primitives(), notifiers).unwrap();
        Bearer {
            handle: spawn_bearer_task(entity, 16),
            lower_rx,
            sdu_rx,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sdu_reaches_lower_layer() {
        let mut bearer = spawn_bearer(100, 50);
        bearer.handle.send(PdcpCommand::Sdu(Bytes::from_static(b"hello"))).await.unwrap();

        match bearer.lower_rx.recv().await.unwrap() {
            LowerLayerMessage::NewPdu { pdu, is_retx } => {
                assert!(!is_retx);
                // 12-bit DRB header followed by the SDU
                assert_eq!(&pdu[..2], &[0x80, 0x00]);
                assert_eq!(&pdu[2..], b"hello");
            }
            other => panic!("unexpected message {:?}", other),
        }

        let metrics = bearer.handle.shutdown().await.unwrap();
        assert_eq!(metrics.tx.num_sdus, 1);
        assert_eq!(metrics.tx.num_pdus, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_timer_driven_by_task() {
        let mut bearer = spawn_bearer(100, 50);
        bearer.handle.send(PdcpCommand::Sdu(Bytes::from_static(b"stale"))).await.unwrap();
        assert!(matches!(bearer.lower_rx.recv().await, Some(LowerLayerMessage::NewPdu { .. })));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            bearer.lower_rx.recv().await,
            Some(LowerLayerMessage::DiscardPdu { pdcp_sn: 0 })
        );

        let metrics = bearer.handle.metrics().await.unwrap();
        assert_eq!(metrics.tx.num_discard_timeouts, 1);
        bearer.handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reordering_timer_driven_by_task() {
        let mut bearer = spawn_bearer(1000, 50);
        // COUNT 1 arrives, COUNT 0 never does
        bearer
            .handle
            .send(PdcpCommand::Pdu(Bytes::from_static(&[0x80, 0x01, 0xBB])))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(drain(&mut bearer.sdu_rx).is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(drain(&mut bearer.sdu_rx), vec![Bytes::from_static(&[0xBB])]);

        let metrics = bearer.handle.shutdown().await.unwrap();
        assert_eq!(metrics.rx.num_t_reordering_timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_after_shutdown_fails() {
        let bearer = spawn_bearer(100, 50);
        let sender = bearer.handle.sender();
        bearer.handle.shutdown().await.unwrap();
        assert!(sender.send(PdcpCommand::DataRecovery).await.is_err());
    }
}

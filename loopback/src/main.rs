//! Albor PDCP Loopback
//!
//! Runs a gNB and a UE PDCP entity of one bearer against each other over a simulated
//! lossy link. Downlink SDUs are generated at the gNB and checked at the UE, the UE
//! sends status reports in the uplink and the run ends with a JSON metrics summary.

mod config;
mod link;
mod sink;

use anyhow::Result;
use bytes::{BufMut, Bytes, BytesMut};
use clap::Parser;
use common::types::RbId;
use interfaces::{
    ControlChannel, ControlNotification, LowerLayerChannel, LowerLayerMessage, PdcpSide, UpperDataChannel,
};
use pdcp::{
    spawn_bearer_task, PdcpBearerHandle, PdcpCommand, PdcpEntity, PdcpMetrics, PdcpNotifiers, RlcMode,
    SecurityConfig, SecurityDirection, SecurityPrimitives,
};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoopbackConfig;
use crate::link::{LinkStats, RadioLink};
use crate::sink::{SduSink, SinkStats};

/// Albor PDCP loopback runner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Number of downlink SDUs
    #[arg(long)]
    num_sdus: Option<u64>,

    /// PDU loss probability of the link (0.0 to 1.0)
    #[arg(long)]
    loss_rate: Option<f64>,

    /// Seed of the link simulation
    #[arg(long)]
    seed: Option<u64>,
}

/// One side of the bearer
struct Peer {
    handle: PdcpBearerHandle,
    lower_rx: UnboundedReceiver<LowerLayerMessage>,
    sdu_rx: UnboundedReceiver<Bytes>,
    control_rx: UnboundedReceiver<ControlNotification>,
}

/// Printed at the end of a run
#[derive(Debug, Serialize)]
struct Summary {
    rb: String,
    num_sdus: u64,
    downlink: LinkStats,
    uplink: LinkStats,
    gnb: PdcpMetrics,
    ue: PdcpMetrics,
    ue_sink: SinkStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => LoopbackConfig::from_file(path)?,
        None => LoopbackConfig::default(),
    };
    if let Some(num_sdus) = args.num_sdus {
        config.traffic.num_sdus = num_sdus;
    }
    if let Some(loss_rate) = args.loss_rate {
        config.link.loss_rate = loss_rate;
    }
    if let Some(seed) = args.seed {
        config.link.seed = seed;
    }

    // Initialize logging
    let log_level = args
        .log_level
        .clone()
        .or_else(|| config.log.level.clone())
        .unwrap_or_else(|| "info".to_string());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor PDCP loopback");
    if let Some(path) = &args.config {
        info!("Configuration file: {}", path);
    }
    config.validate()?;

    let rb_id = config.rb_id()?;
    let rlc_mode = config.rlc_mode()?;
    let sn_size = config.sn_size()?;
    let sec_cfg = config.security_config()?;

    info!("Bearer configuration:");
    info!("  RB: {}", rb_id);
    info!("  RLC mode: {:?}", rlc_mode);
    info!("  SN size: {} bits", sn_size);
    info!("  Security: {:?}", sec_cfg);
    info!(
        "  Link: loss_rate={} delay={}ms jitter={}ms seed={}",
        config.link.loss_rate, config.link.delay_ms, config.link.jitter_ms, config.link.seed
    );

    let gnb = build_peer(&config, 0, rb_id, SecurityDirection::Downlink, &sec_cfg)?;
    let ue = build_peer(&config, 1, rb_id, SecurityDirection::Uplink, &sec_cfg)?;

    let downlink = RadioLink::new(
        "DL",
        config.link.clone(),
        config.link.seed,
        rb_id,
        rlc_mode,
        sn_size,
        gnb.handle.sender(),
        ue.handle.sender(),
    );
    let uplink = RadioLink::new(
        "UL",
        config.link.clone(),
        config.link.seed.wrapping_add(1),
        rb_id,
        rlc_mode,
        sn_size,
        ue.handle.sender(),
        gnb.handle.sender(),
    );
    let dl_handle = tokio::spawn(downlink.run(gnb.lower_rx));
    let ul_handle = tokio::spawn(uplink.run(ue.lower_rx));

    let sink_handle = {
        let mut sdu_rx = ue.sdu_rx;
        let num_sdus = config.traffic.num_sdus;
        tokio::spawn(async move {
            let mut sink = SduSink::new();
            while let Some(sdu) = sdu_rx.recv().await {
                sink.record(&sdu);
            }
            sink.finish(num_sdus)
        })
    };
    // The gNB does not receive user data in this run
    let gnb_sdu_handle = {
        let mut sdu_rx = gnb.sdu_rx;
        tokio::spawn(async move { while sdu_rx.recv().await.is_some() {} })
    };
    let gnb_control_handle = tokio::spawn(log_control_notifications("gNB", gnb.control_rx));
    let ue_control_handle = tokio::spawn(log_control_notifications("UE", ue.control_rx));

    info!("Loopback initialized successfully");

    // Wait for the traffic to finish or a shutdown signal
    let interrupted = tokio::select! {
        res = run_traffic(&config, rb_id, rlc_mode, &gnb.handle, &ue.handle) => {
            res?;
            false
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            true
        }
    };
    if !interrupted {
        info!("All SDUs sent, draining for {}ms", config.traffic.drain_ms);
        tokio::time::sleep(Duration::from_millis(config.traffic.drain_ms)).await;
    }

    // Shutdown
    info!("Shutting down loopback");
    let gnb_metrics = gnb.handle.shutdown().await?;
    let ue_metrics = ue.handle.shutdown().await?;

    let summary = Summary {
        rb: rb_id.to_string(),
        num_sdus: config.traffic.num_sdus,
        downlink: dl_handle.await?,
        uplink: ul_handle.await?,
        gnb: gnb_metrics,
        ue: ue_metrics,
        ue_sink: sink_handle.await?,
    };
    let _ = gnb_sdu_handle.await;
    let _ = gnb_control_handle.await;
    let _ = ue_control_handle.await;

    if summary.ue_sink.num_out_of_order > 0 {
        error!("Out of order delivery detected. count={}", summary.ue_sink.num_out_of_order);
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);

    info!("Loopback shutdown complete");
    Ok(())
}

/// Create a peer entity with its channels and spawn its bearer task
fn build_peer(
    config: &LoopbackConfig,
    ue_index: u32,
    rb_id: RbId,
    tx_direction: SecurityDirection,
    sec_cfg: &SecurityConfig,
) -> Result<Peer> {
    let entity_config = config.entity_config(tx_direction)?;

    let (tx_lower, lower_rx) = LowerLayerChannel::new();
    let (rx_upper_dn, sdu_rx) = UpperDataChannel::new();
    let (tx_upper_cn, control_rx) = ControlChannel::new(rb_id, PdcpSide::Tx);
    let rx_upper_cn = tx_upper_cn.for_side(PdcpSide::Rx);
    let notifiers = PdcpNotifiers {
        tx_lower: Box::new(tx_lower),
        tx_upper_cn: Box::new(tx_upper_cn),
        rx_upper_dn: Box::new(rx_upper_dn),
        rx_upper_cn: Box::new(rx_upper_cn),
    };

    // Only the null algorithms are available without registered primitives
    let mut entity = PdcpEntity::new(ue_index, rb_id, entity_config, SecurityPrimitives::default(), notifiers)?;
    entity.configure_security(sec_cfg)?;
    entity.enable_security(
        config.security.integrity_enabled && sec_cfg.integ_algo.is_some(),
        config.security.ciphering_enabled,
    )?;

    Ok(Peer {
        handle: spawn_bearer_task(entity, config.bearer.queue_size),
        lower_rx,
        sdu_rx,
        control_rx,
    })
}

/// Generate the downlink SDUs and trigger periodic status reports and data recovery
async fn run_traffic(
    config: &LoopbackConfig,
    rb_id: RbId,
    rlc_mode: RlcMode,
    gnb: &PdcpBearerHandle,
    ue: &PdcpBearerHandle,
) -> Result<()> {
    let traffic = &config.traffic;
    let recovery_enabled = traffic.recovery_interval_ms > 0 && rlc_mode == RlcMode::Am && !rb_id.is_srb();

    let mut sdu_ticker = tokio::time::interval(Duration::from_micros(traffic.sdu_interval_us.max(1)));
    sdu_ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    // Status report and data recovery alternate, half a period apart
    let mut recovery_ticker = tokio::time::interval(Duration::from_millis((traffic.recovery_interval_ms / 2).max(1)));
    recovery_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stats_ticker = tokio::time::interval(Duration::from_secs(1));

    let mut seq = 0;
    let mut report_next = true;
    while seq < traffic.num_sdus {
        tokio::select! {
            _ = sdu_ticker.tick() => {
                gnb.send(PdcpCommand::Sdu(make_sdu(seq, traffic.sdu_size))).await?;
                seq += 1;
            }
            _ = recovery_ticker.tick(), if recovery_enabled => {
                if report_next {
                    ue.send(PdcpCommand::SendStatusReport).await?;
                } else {
                    gnb.send(PdcpCommand::DataRecovery).await?;
                }
                report_next = !report_next;
            }
            _ = stats_ticker.tick() => {
                let gnb_metrics = gnb.metrics().await?;
                let ue_metrics = ue.metrics().await?;
                info!("Loopback statistics:");
                info!("  SDUs sent: {}", seq);
                info!("  gNB TX: pdus={} discard_timeouts={}", gnb_metrics.tx.num_pdus, gnb_metrics.tx.num_discard_timeouts);
                info!(
                    "  UE RX: sdus={} dropped_pdus={} t_reordering_timeouts={}",
                    ue_metrics.rx.num_sdus, ue_metrics.rx.num_dropped_pdus, ue_metrics.rx.num_t_reordering_timeouts
                );
            }
        }
    }

    if recovery_enabled {
        // Final round so the tail of the run is recovered too
        ue.send(PdcpCommand::SendStatusReport).await?;
        tokio::time::sleep(Duration::from_millis(2 * (config.link.delay_ms + config.link.jitter_ms) + 1)).await;
        gnb.send(PdcpCommand::DataRecovery).await?;
    }
    Ok(())
}

/// SDU carrying its sequence number followed by filler
fn make_sdu(seq: u64, size: usize) -> Bytes {
    let mut sdu = BytesMut::with_capacity(size);
    sdu.put_u64(seq);
    sdu.resize(size, seq as u8);
    sdu.freeze()
}

async fn log_control_notifications(peer: &'static str, mut control_rx: UnboundedReceiver<ControlNotification>) {
    while let Some(notif) = control_rx.recv().await {
        warn!("{} control notification. rb={} side={:?} event={:?}", peer, notif.rb_id, notif.side, notif.event);
    }
}


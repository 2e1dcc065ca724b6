//! evsim-node - CLI for simulated OCPP charge points
//!
//! # Usage
//!
//! ```bash
//! # Mock CSMS on the default port
//! evsim-node csms --bind 0.0.0.0:9220
//!
//! # One OCPP 1.6 charger against it, with a local charge session
//! evsim-node charger --id CP-001 --csms-url ws://localhost:9220 --id-tag TAG1
//!
//! # Same charger on 2.0.1
//! evsim-node charger --id CS-001 --ocpp-version 2.0.1
//!
//! # Both sides in one process
//! evsim-node demo --ocpp-version 1.6
//! ```
//!
//! # Demo Scenario
//!
//! 1. Mock CSMS starts on a loopback port
//! 2. Charger connects and boots
//! 3. CSMS sends a remote start, charger walks Preparing -> Charging
//! 4. Charger reports energy, CSMS sends a remote stop
//! 5. Charger returns to Available

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};
use evsim_core::{
    ChargePoint, ChargerConfig, ConnectorStatus, CsmsConfig, CsmsPeer, ProtocolVersion,
    SimEvent, SimulatorRegistry,
};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// OCPP-J charge point emulator and mock CSMS
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one simulated charger until Ctrl-C
    Charger(ChargerArgs),
    /// Run the mock CSMS until Ctrl-C
    Csms(CsmsArgs),
    /// Run a CSMS and a charger in-process and play a remote session
    Demo(DemoArgs),
}

#[derive(ClapArgs, Debug)]
struct ChargerArgs {
    /// Charger identity, appended to the CSMS URL
    #[arg(long, default_value = "CP-001")]
    id: String,

    /// CSMS WebSocket URL (without charger id)
    #[arg(long, default_value = "ws://localhost:9220")]
    csms_url: String,

    /// OCPP version (1.6 or 2.0.1)
    #[arg(long, default_value = "1.6")]
    ocpp_version: String,

    /// Number of connectors
    #[arg(long, default_value = "1")]
    connectors: u32,

    /// Vendor name
    #[arg(long, default_value = "SimVendor")]
    vendor: String,

    /// Model name
    #[arg(long, default_value = "SimModel")]
    model: String,

    /// Run a local charge session with this credential after boot
    #[arg(long)]
    id_tag: Option<String>,

    /// Energy reported during the local session, in Wh
    #[arg(long, default_value = "1000")]
    energy_wh: u64,

    /// Send Heartbeat at the interval the CSMS returns
    #[arg(long)]
    heartbeat: bool,

    /// Print every OCPP frame as a JSON event line
    #[arg(long)]
    print_frames: bool,
}

#[derive(ClapArgs, Debug)]
struct CsmsArgs {
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:9220")]
    bind: SocketAddr,

    /// Heartbeat interval returned in BootNotification replies, in seconds
    #[arg(long, default_value = "60")]
    interval: u32,

    /// Print every OCPP frame as a JSON event line
    #[arg(long)]
    print_frames: bool,
}

#[derive(ClapArgs, Debug)]
struct DemoArgs {
    /// OCPP version (1.6 or 2.0.1)
    #[arg(long, default_value = "1.6")]
    ocpp_version: String,

    /// Credential used for the remote start
    #[arg(long, default_value = "TAG1")]
    id_tag: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Charger(charger) => run_charger(charger).await,
        Command::Csms(csms) => run_csms(csms).await,
        Command::Demo(demo) => run_demo(demo).await,
    }
}

async fn run_charger(args: ChargerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let version: ProtocolVersion = args.ocpp_version.parse()?;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 evsim - Simulated Charge Point               ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Charger:  {:<50} ║", args.id);
    println!("║  CSMS URL: {:<50} ║", truncate(&args.csms_url, 50));
    println!("║  Version:  {:<50} ║", version);
    println!("║  Conns:    {:<50} ║", args.connectors);
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let registry = SimulatorRegistry::with_defaults(
        ChargerConfig::default()
            .with_vendor(&args.vendor, &args.model)
            .with_connector_count(args.connectors)
            .with_auto_heartbeat(args.heartbeat),
    );

    if args.print_frames {
        print_frames(registry.subscribe());
    }

    let charger = registry.create_charger(&args.id, Some(&args.csms_url), version)?;
    charger.connect(None).await?;
    let boot = charger.boot(&args.vendor, &args.model).await?;
    info!("Boot {:?}, heartbeat every {}s", boot.status, boot.interval);

    if let Some(id_tag) = &args.id_tag {
        local_session(&charger, id_tag, args.energy_wh).await?;
    }

    info!("Serving remote commands, Ctrl-C to exit");
    tokio::signal::ctrl_c().await?;
    charger.disconnect().await;
    Ok(())
}

async fn local_session(
    charger: &ChargePoint,
    id_tag: &str,
    energy_wh: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let transaction_id = charger.start_charging(1, id_tag).await?;
    info!("Transaction {} started", transaction_id);

    let reading = charger.send_meter_values(1, energy_wh).await?;
    info!("Meter at {} Wh", reading);

    charger.stop_charging(1, id_tag).await?;
    info!("Transaction {} stopped", transaction_id);
    Ok(())
}

async fn run_csms(args: CsmsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let csms = CsmsPeer::new(CsmsConfig::new(args.bind).with_heartbeat_interval(args.interval));
    if args.print_frames {
        print_frames(csms.subscribe());
    }
    let addr = csms.spawn().await?;
    info!("Mock CSMS ready on ws://{}", addr);

    tokio::signal::ctrl_c().await?;
    csms.shutdown();
    Ok(())
}

async fn run_demo(args: DemoArgs) -> Result<(), Box<dyn std::error::Error>> {
    let version: ProtocolVersion = args.ocpp_version.parse()?;

    let csms = CsmsPeer::new(CsmsConfig::new(SocketAddr::from(([127, 0, 0, 1], 0))));
    let addr = csms.spawn().await?;

    let registry = SimulatorRegistry::new();
    let charger = registry.create_charger("DEMO-001", Some(&format!("ws://{}", addr)), version)?;
    charger.connect(None).await?;
    charger.boot("SimVendor", "SimModel").await?;
    wait_for_csms(&csms, charger.id()).await?;

    let (start_action, start_payload) = match version {
        ProtocolVersion::V16 => (
            "RemoteStartTransaction",
            json!({"idTag": args.id_tag, "connectorId": 1}),
        ),
        ProtocolVersion::V201 => (
            "RequestStartTransaction",
            json!({"idToken": {"idToken": args.id_tag, "type": "Central"}, "remoteStartId": 1, "evseId": 1}),
        ),
    };
    let reply = csms.trigger_command(charger.id(), start_action, start_payload).await?;
    info!("{} -> {}", start_action, reply);

    wait_for_status(&charger, ConnectorStatus::Charging).await?;
    charger.send_meter_values(1, 2500).await?;

    let transaction_id = charger
        .snapshot()
        .await
        .connectors
        .get(&1)
        .and_then(|c| c.current_transaction_id.clone())
        .ok_or("no transaction after remote start")?;

    let stop_action = match version {
        ProtocolVersion::V16 => "RemoteStopTransaction",
        ProtocolVersion::V201 => "RequestStopTransaction",
    };
    let stop_payload = match transaction_id.as_i64() {
        Some(id) if version == ProtocolVersion::V16 => json!({ "transactionId": id }),
        _ => json!({ "transactionId": transaction_id.as_str() }),
    };
    let reply = csms.trigger_command(charger.id(), stop_action, stop_payload).await?;
    info!("{} -> {}", stop_action, reply);

    wait_for_status(&charger, ConnectorStatus::Available).await?;
    let state = charger.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&state)?);

    charger.disconnect().await;
    csms.shutdown();
    Ok(())
}

async fn wait_for_csms(csms: &Arc<CsmsPeer>, charger_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    for _ in 0..100 {
        if csms.is_connected(charger_id) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Err(format!("CSMS never registered {}", charger_id).into())
}

async fn wait_for_status(
    charger: &ChargePoint,
    status: ConnectorStatus,
) -> Result<(), Box<dyn std::error::Error>> {
    for _ in 0..100 {
        if charger.snapshot().await.connectors.get(&1).map(|c| c.status) == Some(status) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    warn!("Connector 1 never reached {}", status);
    Err(format!("connector 1 never reached {}", status).into())
}

fn print_frames(mut events: broadcast::Receiver<SimEvent>) {
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let SimEvent::Log { .. } = event {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{}", line);
                }
            }
        }
    });
}

/// Truncate string with ellipsis, counting characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let cut = s
        .char_indices()
        .nth(max_len.saturating_sub(3))
        .map(|(index, _)| index)
        .unwrap_or(s.len());
    format!("{}...", &s[..cut])
}

//! LUME daemon binary
//!
//! Hosts one mesh node on this machine: UDP broadcast bus, directory-
//! backed preset storage, and a render scheduler driving a headless
//! pixel driver. Real strip hardware replaces the driver behind the
//! same trait.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use lume::{
    frame_channel, BusHandle, DirStorage, MeshNode, NodeExit, NullPixelDriver, RenderScheduler,
    Settings, Storage, UdpBus, UdpBusConfig,
};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// LED mesh controller daemon
#[derive(Parser, Debug)]
#[command(name = "lumed", version, about)]
struct Args {
    /// Path to the settings file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the bus port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    info!("lume starting");

    let mut settings = match &args.config {
        Some(path) => match Settings::load_file(path) {
            Ok(settings) => {
                info!(path = %path.display(), "loaded settings");
                settings
            }
            Err(e) => {
                error!("failed to load settings: {}", e);
                std::process::exit(1);
            }
        },
        None => Settings::default(),
    };
    if let Some(port) = args.port {
        settings.bus.port = port;
    }

    // Bus first; the node expects a running medium.
    let (frame_tx, frame_rx) = frame_channel(256);
    let mut udp = UdpBus::new(
        UdpBusConfig {
            port: settings.bus.port,
            bind_addr: settings.bus.bind_addr.clone(),
            broadcast_addr: settings.bus.broadcast_addr.clone(),
        },
        frame_tx,
    );
    if let Err(e) = udp.start().await {
        error!("failed to start bus: {}", e);
        std::process::exit(1);
    }

    let storage: Arc<dyn Storage> = Arc::new(DirStorage::new(&settings.data_dir));

    let mut node = match MeshNode::new(&settings, Some(storage), BusHandle::Udp(udp), frame_rx) {
        Ok(node) => node,
        Err(e) => {
            error!("failed to create node: {}", e);
            std::process::exit(1);
        }
    };

    info!(id = %node.id(), "node created");

    let scheduler = RenderScheduler::new(
        node.clock(),
        node.animations(),
        Box::new(NullPixelDriver::new()),
        settings.num_leds,
        node.ota_halt_flag(),
    );
    let render_task = tokio::spawn(scheduler.run());

    let exit = tokio::select! {
        result = node.run() => match result {
            Ok(exit) => exit,
            Err(e) => {
                error!("node error: {}", e);
                NodeExit::Shutdown
            }
        },
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            NodeExit::Shutdown
        }
    };

    render_task.abort();

    match exit {
        NodeExit::Reboot => {
            info!("reboot requested, exiting for supervisor restart");
            std::process::exit(0);
        }
        NodeExit::Shutdown => info!("lume shut down"),
    }
}

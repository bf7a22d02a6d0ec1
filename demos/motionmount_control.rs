use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use motionmount::{
    ble::BtleplugTransport, store::JsonFileStore, MotionMount, MountCommand, MountEvent, Result,
    Settings,
};

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG=motionmount=debug shows wire bytes
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("📺 MotionMount Control Example");
    info!("Searching for MotionMounts...");

    let transport = Arc::new(BtleplugTransport::new().await?);
    let pairable = MotionMount::list_pairable(transport.as_ref()).await?;
    let Some(target) = pairable.into_iter().next() else {
        error!("❌ No MotionMount found");
        return Ok(());
    };
    info!("✅ Found {} ({})", target.name, target.id);

    let store = Arc::new(JsonFileStore::new(
        std::env::temp_dir().join("motionmount-demo.json"),
    ));
    let settings = Settings {
        polling: true,
        polling_interval: 1,
    };
    let (mount, mut events) = MotionMount::new(transport, target.id, settings, store);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                MountEvent::Capability(capability) => {
                    info!("  {} = {:?}", capability.name(), capability);
                }
                MountEvent::PresetOptions(options) => {
                    for option in options {
                        info!("  preset {}: {}", option.id, option.title);
                    }
                }
                MountEvent::Available => info!("🟢 Available"),
                MountEvent::Unavailable(reason) => info!("🔴 Unavailable: {}", reason),
            }
        }
    });

    mount.start().await;

    // Positions can be given as `extend turn` on the command line
    let args: Vec<i32> = std::env::args()
        .skip(1)
        .filter_map(|arg| arg.parse().ok())
        .collect();
    if let [extend, turn] = args[..] {
        info!("➡️ Moving to extend {} turn {}", extend, turn);
        mount
            .handle(MountCommand::GotoPosition { extend, turn })
            .await;
    } else if let Some(first) = mount.search_presets("").await.first() {
        info!("➡️ Going to preset {}", first.name);
        mount.handle(MountCommand::GotoPreset(0)).await;
    }

    // Give the motor time to finish before reading back
    sleep(Duration::from_secs(10)).await;
    mount.handle(MountCommand::Refresh).await;

    info!("🔌 Shutting down...");
    mount.shutdown().await;
    drop(mount);
    let _ = printer.await;

    info!("🎉 Control example completed!");
    Ok(())
}

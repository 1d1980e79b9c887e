//! Runs a cube cache until Ctrl-C.
use std::{path::Path, sync::LazyLock};

use cubic::{CubicWorld, logger};
use cubic_core::WorldConfig;
use tokio::{
    runtime::{Builder, Runtime},
    signal,
};

const CONFIG_PATH: &str = "config/cubic_config.json5";

static RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime")
});

fn main() -> anyhow::Result<()> {
    logger::init()?;

    RUNTIME.block_on(async {
        let config = WorldConfig::load_or_create(Path::new(CONFIG_PATH))?;
        let mut world = CubicWorld::new(config)?;
        world.start();

        signal::ctrl_c().await?;
        log::info!("Stopping");
        world.stop().await;
        Ok(())
    })
}

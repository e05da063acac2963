use clap::Parser;
use log::*;
use skyfleet::config::{GlobalConfig, SimParams, CONFIG};
use skyfleet::{controller, data, viz};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum DataSet {
    Original,
    Small,
}

impl DataSet {
    fn folder(self) -> &'static str {
        match self {
            DataSet::Original => "original",
            DataSet::Small => "small",
        }
    }
}

#[derive(Parser, Debug)]
#[command(about = "Cooperative drone parcel-delivery simulation")]
struct Args {
    /// which input subfolder to load
    #[arg(short = 'd', long = "data", value_enum, default_value = "original")]
    data: DataSet,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    pretty_env_logger::init_timed();
    let args = Args::parse();

    let data_dir = Path::new(&CONFIG.data_dir);
    let world = data::load_world(data_dir, args.data.folder())?;

    // credentials for the external XMPP provisioning step; the simulation
    // itself runs without it
    match GlobalConfig::load(&data_dir.join("global_variables.json")) {
        Ok(global) => {
            info!(
                "agent credentials loaded (container {})",
                global.docker_container_id
            );
        }
        Err(e) => {
            warn!("no usable global_variables.json ({}), skipping user provisioning", e);
        }
    }

    let viz = viz::start(&CONFIG.viz_addr);
    let report = controller::run(
        world,
        SimParams::from_config(),
        viz,
        Some(PathBuf::from("logs")),
    )
    .await?;

    for drone in &report.drones {
        info!(
            "{}: {} delivered over {:.2} m, finished {}",
            drone.id,
            drone.orders_delivered,
            drone.total_distance,
            if drone.died_successfully { "cleanly" } else { "with errors" }
        );
    }
    info!("{} orders delivered in total", report.delivered());
    Ok(())
}

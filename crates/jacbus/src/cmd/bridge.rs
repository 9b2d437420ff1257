use std::sync::atomic::Ordering;

use tracing::info;

use jacbus_transport::UdsHub;

use crate::cmd::BridgeArgs;
use crate::exit::{transport_error, CliResult, SUCCESS};

pub fn run(args: BridgeArgs) -> CliResult<i32> {
    let hub = UdsHub::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    info!(path = %hub.path().display(), "bus hub up; join with `jacbus listen` / `jacbus send`");

    let stop = hub.stop_flag();
    let _ = ctrlc::set_handler(move || {
        stop.store(true, Ordering::Relaxed);
    });

    hub.run().map_err(|err| transport_error("hub failed", err))?;
    Ok(SUCCESS)
}

//! Binary entry point: logging, config, run loop
//!
//! Screen capture is an external collaborator; without one wired in the
//! controller runs on the empty frame source and the sampler degrades to
//! its last color. Cancellation is whole-process (SIGINT).

use covelight::arbiter::Mode;
use covelight::config::Config;
use covelight::dispatcher;
use covelight::screen::NullFrameSource;
use covelight::state::SharedState;
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();

    let cfg = match std::env::args().nth(1) {
        Some(path) => match Config::load(Path::new(&path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::error!("Failed to load config {path}: {e}");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    let cfg = Arc::new(cfg);

    log::info!(
        "Starting covelight -> {}:{} at {} Hz",
        cfg.network.udp_ip,
        cfg.network.udp_port,
        cfg.network.rate_hz
    );

    let shared = SharedState::new(Mode::Movie, cfg.audio.device.clone());

    // Front-ends attach through state::ControllerHandle; the default build
    // has no screen capture integration, so the frame source stays empty.
    if let Err(e) = dispatcher::run(cfg, shared, Box::new(NullFrameSource)).await {
        log::error!("Controller failed to start: {e}");
        std::process::exit(1);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Paramslot demo - a simulated real-time control loop.
//!
//! A periodic DSP thread picks up filter coefficients and gain ramps that UI
//! threads publish through notifying parameters.
//!
//! Usage: `paramslot-demo [CONFIG_PATH]`

mod config;
mod control_loop;
mod dsp;

use std::path::PathBuf;

use tracing::{debug, info};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("paramslot=debug".parse().unwrap())
                .add_directive("paramslot_demo=debug".parse().unwrap()),
        )
        .init();

    info!("Paramslot demo starting...");

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => config::ConfigManager::load_config_from(&path)?,
        None => {
            let manager = config::ConfigManager::new()?;
            let config = manager.load_config()?;
            if !manager.config_path().exists() {
                // Leave an editable copy of the defaults behind.
                manager.save_config(&config)?;
                info!("Wrote default config to {:?}", manager.config_path());
            }
            config
        }
    };

    let report = control_loop::run(&config)?;

    info!(
        "Coefficients: lock-free = {}, gain ramps: lock-free = {}",
        report.coeffs_lock_free, report.gain_lock_free
    );
    info!(
        "{} ticks, {} coefficient pickups and {} gain pickups out of {} publishes",
        report.dsp.ticks,
        report.dsp.coeff_pickups,
        report.dsp.gain_pickups,
        report.total_published()
    );
    for (index, producer) in report.producers.iter().enumerate() {
        debug!(
            "Producer {}: {} publishes, last {:?}",
            index, producer.published, producer.last_coeffs
        );
    }
    info!(
        "Final coefficients: {:?} (DC gain {:.3}), gain {:.3}, peak {:.3}",
        report.dsp.final_coeffs,
        report.dsp.final_coeffs.dc_gain(),
        report.dsp.final_gain,
        report.dsp.peak
    );

    Ok(())
}

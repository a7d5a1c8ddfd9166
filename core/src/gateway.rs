//! The dispatch loop: one thread, one tick, both directions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::StopWatch;
use crate::config::{Config, Protocol};
use crate::error::Result;
use crate::fm::{FmEvent, FmNetwork};
use crate::iax::IaxNetwork;
use crate::network::RemoteNetwork;
use crate::raw::RawNetwork;
use crate::usrp::UsrpNetwork;
use crate::{BUFFER_LENGTH, TICK_MS};

pub struct Gateway {
    config: Config,
}

impl Gateway {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Build the configured remote engine.
    fn create_remote(&self) -> Result<Box<dyn RemoteNetwork>> {
        let config = &self.config;

        match config.protocol {
            Protocol::Usrp => Ok(Box::new(UsrpNetwork::new(
                &config.usrp_local_address,
                config.usrp_local_port,
                &config.usrp_remote_address,
                config.usrp_remote_port,
                config.usrp_debug,
            ))),
            Protocol::Raw => Ok(Box::new(RawNetwork::new(
                &config.raw_local_address,
                config.raw_local_port,
                &config.raw_remote_address,
                config.raw_remote_port,
                config.raw_sample_rate,
                &config.raw_squelch_file,
                config.raw_debug,
            )?)),
            Protocol::Iax => Ok(Box::new(IaxNetwork::new(
                &config.callsign,
                &config.iax_username,
                &config.iax_password,
                &config.iax_node,
                &config.iax_local_address,
                config.iax_local_port,
                &config.iax_remote_address,
                config.iax_remote_port,
                config.iax_debug,
            ))),
        }
    }

    /// Run until `shutdown` is raised. The whole pipeline lives inside
    /// this call; a reload rebuilds it from scratch.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        let mut local = FmNetwork::new(
            &self.config.network_local_address,
            self.config.network_local_port,
            &self.config.network_rpt_address,
            self.config.network_rpt_port,
            self.config.network_debug,
        );
        local.open()?;

        let mut remote = match self.create_remote() {
            Ok(remote) => remote,
            Err(e) => {
                local.close();
                return Err(e);
            }
        };
        if let Err(e) = remote.open() {
            local.close();
            return Err(e);
        }

        info!("FMGateway-{} is starting", env!("CARGO_PKG_VERSION"));

        let mut stopwatch = StopWatch::new();
        stopwatch.start();

        let mut buffer = [0.0f32; BUFFER_LENGTH];

        while !shutdown.load(Ordering::Relaxed) {
            match local.read_type() {
                FmEvent::Start => {
                    let callsign = local.read_start();
                    if let Err(e) = remote.write_start(&callsign) {
                        warn!("remote network start error: {}", e);
                    }
                }
                FmEvent::Data => {
                    let n = local.read_data(&mut buffer);
                    if let Err(e) = remote.write_data(&buffer[..n]) {
                        warn!("remote network data error: {}", e);
                    }
                }
                FmEvent::End => {
                    local.read_end();
                    if let Err(e) = remote.write_end() {
                        warn!("remote network end error: {}", e);
                    }
                }
                FmEvent::None => {}
            }

            let n = remote.read_data(&mut buffer);
            if n > 0 {
                if let Err(e) = local.write_data(&buffer[..n]) {
                    warn!("FM network data error: {}", e);
                }
            }

            let ms = stopwatch.elapsed();
            stopwatch.start();

            local.clock(ms);
            remote.clock(ms);

            if ms < TICK_MS {
                thread::sleep(Duration::from_millis(TICK_MS - ms));
            }
        }

        info!("FMGateway is stopping");

        // Reverse order of open.
        remote.close();
        local.close();

        Ok(())
    }
}

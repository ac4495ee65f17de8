use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::ActuatorConfig;
use crate::state::{GroupId, Phase, SignalColor, Topology};

/// Build the ASCII wire command for one group lamp, e.g. "L1_G\n".
pub fn encode_command(group_code: &str, color: SignalColor) -> String {
    format!("{}_{}\n", group_code, color.code())
}

/// Connection to the physical signal controller, reached over a
/// line-oriented TCP transport (a serial bridge on the controller side).
/// Every failure path is non-fatal: commands are dropped rather than
/// ever blocking the phase scheduler.
pub struct ActuatorPort {
    enabled: bool,
    addr: String,
    settle: Duration,
    conn: Option<TcpStream>,
    warned: bool,
}

impl ActuatorPort {
    /// A port that drops every command; used when hardware control is
    /// turned off in the configuration and in controller tests.
    pub fn disabled() -> ActuatorPort {
        ActuatorPort {
            enabled: false,
            addr: String::new(),
            settle: Duration::ZERO,
            conn: None,
            warned: false,
        }
    }

    /// Open the port. Connection failure leaves the port in its
    /// reconnect-on-next-send state, not an error.
    pub async fn connect(config: &ActuatorConfig) -> ActuatorPort {
        let mut port = ActuatorPort {
            enabled: config.enabled,
            addr: config.addr.clone(),
            settle: Duration::from_millis(config.reconnect_settle_ms),
            conn: None,
            warned: false,
        };
        if port.enabled {
            port.reconnect().await;
        }
        port
    }

    async fn reconnect(&mut self) {
        match TcpStream::connect(&self.addr).await {
            Ok(stream) => {
                // Give the controller a moment to settle before the
                // first command lands on the fresh connection.
                tokio::time::sleep(self.settle).await;
                info!(addr = %self.addr, "Connected to signal controller");
                self.conn = Some(stream);
                self.warned = false;
            }
            Err(e) => {
                if !self.warned {
                    warn!(addr = %self.addr, error = %e, "Signal controller unreachable, running without hardware");
                    self.warned = true;
                }
                self.conn = None;
            }
        }
    }

    /// Send one lamp command, best effort. A dead connection gets one
    /// reconnect attempt; if that fails the command is dropped quietly.
    pub async fn send(&mut self, topology: &Topology, group: GroupId, color: SignalColor) {
        if !self.enabled {
            return;
        }

        if self.conn.is_none() {
            self.reconnect().await;
        }

        let line = encode_command(topology.code(group), color);
        if let Some(conn) = self.conn.as_mut() {
            match conn.write_all(line.as_bytes()).await {
                Ok(()) => {
                    debug!(command = line.trim(), "Sent actuator command");
                }
                Err(e) => {
                    if !self.warned {
                        warn!(error = %e, "Lost signal controller connection");
                        self.warned = true;
                    }
                    self.conn = None;
                }
            }
        }
    }

    /// Command the lamps for a whole phase, one command per group.
    pub async fn apply_phase(&mut self, topology: &Topology, phase: Phase) {
        for (group, color) in phase.lights() {
            self.send(topology, group, color).await;
        }
    }

    /// Best-effort all-red before the connection is released. Called on
    /// process shutdown.
    pub async fn shutdown(&mut self, topology: &Topology) {
        self.send(topology, GroupId::A, SignalColor::Red).await;
        self.send(topology, GroupId::B, SignalColor::Red).await;
        self.conn = None;
    }
}

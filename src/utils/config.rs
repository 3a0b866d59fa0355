use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;

use crate::utils::cli::Cli;
use crate::utils::constants::*;
use crate::{Error, Result};

/// Runtime configuration for one node.
///
/// Defaults come from [`constants`](crate::utils::constants), an INI file
/// may override them section by section, and CLI flags win over both.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local address the datagram endpoint binds on.
    pub bind_address: IpAddr,
    /// Local port; 0 asks the OS for an ephemeral one.
    pub port: u16,
    /// Width of the identifier circle in bits (m).
    pub ring_bits: u32,
    /// Number of successor-list entries (r).
    pub successor_count: usize,
    /// Upper bound on a single datagram.
    pub max_datagram: usize,

    pub stabilize_interval: Duration,
    pub fix_fingers_interval: Duration,
    pub check_predecessor_interval: Duration,
    /// Deadline for transient request/reply exchanges.
    pub rpc_timeout: Duration,
    /// How long stabilize waits for the PREDECESSOR reply.
    pub reply_wait: Duration,
    /// Deadline for a liveness PING.
    pub ping_timeout: Duration,
    /// Silence after which the predecessor is declared dead.
    pub liveness_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_address: IpAddr::from([127, 0, 0, 1]),
            port: 0,
            ring_bits: DEFAULT_RING_BITS,
            successor_count: DEFAULT_SUCCESSOR_COUNT,
            max_datagram: MAX_DATAGRAM_BYTES,
            stabilize_interval: Duration::from_millis(STABILIZE_SLEEP_MILLIS),
            fix_fingers_interval: Duration::from_millis(FIX_FINGERS_SLEEP_MILLIS),
            check_predecessor_interval: Duration::from_millis(CHECK_PREDECESSOR_SLEEP_MILLIS),
            rpc_timeout: Duration::from_millis(RPC_TIMEOUT_MILLIS),
            reply_wait: Duration::from_millis(REPLY_WAIT_MILLIS),
            ping_timeout: Duration::from_millis(PING_TIMEOUT_MILLIS),
            liveness_timeout: Duration::from_millis(LIVENESS_TIMEOUT_MILLIS),
        }
    }
}

impl Config {
    /// Assembles the effective configuration from defaults, the optional
    /// INI file and the CLI flags, then validates it.
    pub fn assemble(cli: &Cli) -> Result<Config> {
        let mut config = Config::default();
        if let Some(ref path) = cli.config {
            config.merge_ini(path)?;
        }
        if let Some(address) = cli.address {
            config.bind_address = address;
        }
        if let Some(port) = cli.port {
            config.port = port;
        }
        if let Some(bits) = cli.ring_bits {
            config.ring_bits = bits;
        }
        if let Some(r) = cli.successors {
            config.successor_count = r;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from the `[ring]`, `[network]` and `[timing]`
    /// sections of an INI file. Missing keys keep their previous value.
    pub fn merge_ini(&mut self, path: &Path) -> Result<()> {
        let file = Ini::load_from_file(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;

        if let Some(ring) = file.section(Some("ring")) {
            read_key(ring, "bits", &mut self.ring_bits)?;
            read_key(ring, "successors", &mut self.successor_count)?;
        }
        if let Some(network) = file.section(Some("network")) {
            read_key(network, "address", &mut self.bind_address)?;
            read_key(network, "port", &mut self.port)?;
            read_key(network, "max_datagram", &mut self.max_datagram)?;
        }
        if let Some(timing) = file.section(Some("timing")) {
            read_millis(timing, "stabilize_ms", &mut self.stabilize_interval)?;
            read_millis(timing, "fix_fingers_ms", &mut self.fix_fingers_interval)?;
            read_millis(timing, "check_predecessor_ms", &mut self.check_predecessor_interval)?;
            read_millis(timing, "rpc_timeout_ms", &mut self.rpc_timeout)?;
            read_millis(timing, "reply_wait_ms", &mut self.reply_wait)?;
            read_millis(timing, "ping_timeout_ms", &mut self.ping_timeout)?;
            read_millis(timing, "liveness_timeout_ms", &mut self.liveness_timeout)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.ring_bits == 0 || self.ring_bits > 64 {
            return Err(Error::Config(format!(
                "ring_bits must be between 1 and 64, got {}",
                self.ring_bits
            )));
        }
        if self.successor_count == 0 {
            return Err(Error::Config("successor_count must be at least 1".into()));
        }
        if self.max_datagram < 64 {
            return Err(Error::Config(format!(
                "max_datagram of {} bytes cannot hold protocol messages",
                self.max_datagram
            )));
        }
        Ok(())
    }
}

fn read_key<T: FromStr>(
    section: &ini::Properties,
    key: &'static str,
    slot: &mut T,
) -> Result<()> {
    if let Some(raw) = section.get(key) {
        *slot = raw
            .parse()
            .map_err(|_| Error::Config(format!("bad value {raw:?} for {key}")))?;
    }
    Ok(())
}

fn read_millis(section: &ini::Properties, key: &'static str, slot: &mut Duration) -> Result<()> {
    let mut millis = slot.as_millis() as u64;
    read_key(section, key, &mut millis)?;
    *slot = Duration::from_millis(millis);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ring_bits, 8);
        assert_eq!(config.successor_count, 3);
        assert_eq!(config.rpc_timeout, Duration::from_secs(2));
        assert_eq!(config.liveness_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_rejects_zero_width_ring() {
        let config = Config {
            ring_bits: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_successor_list() {
        let config = Config {
            successor_count: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}

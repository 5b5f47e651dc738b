// SPDX-License-Identifier: BSD-3-Clause

//! Loads a node's configuration from its plain-text config file: one value per non-empty,
//! non-`#`-prefixed line, four lines required in order (downstream address, node name, hold
//! duration, generator flag). A malformed file is a fatal configuration error.

use std::path::Path;
use std::time::Duration;

use log::debug;
use ring_protocol::Error;

/// A node's immutable startup configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub name: String,
    pub downstream_addr: String,
    pub hold_duration: Duration,
    pub generator: bool,
    pub listen_port: u16,
}

/// Derives the listen port for a node name. The three reserved names from the original config
/// files (`Alice`, `Bob`, `Carol`) get fixed ports; any other name listens one port below its
/// downstream neighbour. This convention has no protocol basis — it is retained only for
/// compatibility with existing config files (see DESIGN.md).
fn derive_listen_port(name: &str, downstream_port: u16) -> Result<u16, Error> {
    let port = match name {
        "Alice" => 6000,
        "Bob" => 6001,
        "Carol" => 6002,
        _ => downstream_port
            .checked_sub(1)
            .ok_or_else(|| Error::Config(format!("downstream port {downstream_port} has no valid predecessor for derived listen port")))?,
    };
    Ok(port)
}

fn parse_downstream_port(downstream_addr: &str) -> Result<u16, Error> {
    downstream_addr
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("downstream address '{downstream_addr}' is not host:port")))?
        .1
        .parse::<u16>()
        .map_err(|e| Error::Config(format!("downstream port is not a valid u16: {e}")))
}

/// Reads and validates a config file from `contents` (already read into memory, to keep this
/// testable without touching the filesystem).
pub fn parse(contents: &str) -> Result<NodeConfig, Error> {
    let mut lines = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));

    let downstream_addr = lines
        .next()
        .ok_or_else(|| Error::Config("missing downstream address line".to_string()))?
        .to_string();
    let name = lines
        .next()
        .ok_or_else(|| Error::Config("missing node name line".to_string()))?
        .to_string();
    let hold_secs_raw = lines
        .next()
        .ok_or_else(|| Error::Config("missing hold-duration line".to_string()))?;
    let generator_raw = lines
        .next()
        .ok_or_else(|| Error::Config("missing generator-flag line".to_string()))?;

    if name.is_empty() {
        return Err(Error::Config("node name must not be empty".to_string()));
    }
    if name.contains(':') || name.contains(';') {
        return Err(Error::Config("node name must not contain ':' or ';'".to_string()));
    }
    if downstream_addr.is_empty() {
        return Err(Error::Config("downstream address must not be empty".to_string()));
    }

    let hold_secs: u64 = hold_secs_raw
        .parse()
        .map_err(|e| Error::Config(format!("hold duration is not a whole number of seconds: {e}")))?;
    if hold_secs == 0 {
        return Err(Error::Config("hold duration must be positive".to_string()));
    }

    let generator = match generator_raw {
        "true" => true,
        "false" => false,
        other => return Err(Error::Config(format!("generator flag must be 'true' or 'false', got '{other}'"))),
    };

    let downstream_port = parse_downstream_port(&downstream_addr)?;
    if downstream_port == 0 {
        return Err(Error::Config("downstream port must be in 1..=65535".to_string()));
    }

    let listen_port = derive_listen_port(&name, downstream_port)?;

    let config = NodeConfig {
        name,
        downstream_addr,
        hold_duration: Duration::from_secs(hold_secs),
        generator,
        listen_port,
    };
    debug!("loaded config: {config:?}");
    Ok(config)
}

/// Reads and parses the config file at `path`.
pub fn load(path: impl AsRef<Path>) -> Result<NodeConfig, Error> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        Error::Config(format!("could not read '{}': {e}", path.as_ref().display()))
    })?;
    parse(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, downstream: &str) -> String {
        format!("{downstream}\n{name}\n1\ntrue\n")
    }

    #[test]
    fn parses_well_formed_config() {
        let cfg = parse(&sample("Alice", "127.0.0.1:6001")).unwrap();
        assert_eq!(cfg.name, "Alice");
        assert_eq!(cfg.listen_port, 6000);
        assert!(cfg.generator);
        assert_eq!(cfg.hold_duration, Duration::from_secs(1));
    }

    #[test]
    fn reserved_names_get_fixed_listen_ports() {
        assert_eq!(parse(&sample("Bob", "127.0.0.1:6002")).unwrap().listen_port, 6001);
        assert_eq!(parse(&sample("Carol", "127.0.0.1:6000")).unwrap().listen_port, 6002);
    }

    #[test]
    fn non_reserved_name_derives_port_as_downstream_minus_one() {
        let cfg = parse(&sample("Dave", "127.0.0.1:7001")).unwrap();
        assert_eq!(cfg.listen_port, 7000);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let text = "# ring config\n\n127.0.0.1:6001\n\n# name\nAlice\n1\ntrue\n";
        let cfg = parse(text).unwrap();
        assert_eq!(cfg.name, "Alice");
    }

    #[test]
    fn rejects_empty_name() {
        let text = sample("", "127.0.0.1:6001");
        assert!(parse(&text).is_err());
    }

    #[test]
    fn rejects_non_positive_hold_duration() {
        let text = "127.0.0.1:6001\nAlice\n0\ntrue\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn rejects_missing_lines() {
        assert!(parse("127.0.0.1:6001\nAlice\n").is_err());
    }

    #[test]
    fn rejects_bad_generator_flag() {
        let text = "127.0.0.1:6001\nAlice\n1\nmaybe\n";
        assert!(parse(text).is_err());
    }
}

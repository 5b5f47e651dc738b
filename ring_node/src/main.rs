// SPDX-License-Identifier: BSD-3-Clause

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::error;

use ring_transport::UdpRingPort;

use ring_node::{log_sink, LogSink, Node};

#[derive(Parser)]
struct Cli {
    /// Path to the node's config file (downstream address, name, hold duration, generator flag).
    config: String,

    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let sink = LogSink::new();
    log_sink::install(sink.clone(), args.log_level);

    let config = match ring_config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load config '{}': {e}", args.config);
            return ExitCode::FAILURE;
        }
    };

    let port: Arc<dyn ring_transport::RingPort> =
        match UdpRingPort::bind(config.listen_port, &config.downstream_addr) {
            Ok(port) => Arc::new(port),
            Err(e) => {
                error!("{}: failed to bind listen port {}: {e}", config.name, config.listen_port);
                return ExitCode::FAILURE;
            }
        };

    let engine = Arc::new(
        ring_protocol::RingEngine::new(config.name.clone(), config.generator, config.hold_duration),
    );

    let node = Node::spawn(engine, port);
    node.run_console(&sink);
    node.join();

    ExitCode::SUCCESS
}

// Copyright 2024 Mcbridge Contributors
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Mcbridge is a protocol-translating cache proxy: memcache binary
//! protocol on the client side, memcache ASCII protocol on the upstream
//! side.
//!
//! Running this binary is the primary way of using Mcbridge.

use backtrace::Backtrace;
use clap::{Arg, ArgAction, Command};
use mcbridge::{Config, Mcbridge};
use tracing::info;

/// The entry point into the running Mcbridge instance. This function
/// parses the command line options, loads the configuration, and launches
/// the proxy.
fn main() {
    // custom panic hook to log a stack snapshot; a panic inside a
    // connection task is contained by the task boundary and only that
    // connection is torn down
    std::panic::set_hook(Box::new(|s| {
        eprintln!("{s}");
        eprintln!("{:?}", Backtrace::new());
    }));

    // parse command line options
    let matches = Command::new(env!("CARGO_BIN_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_about(
            "A protocol-translating cache proxy. Clients speak the \
            memcache binary protocol to the proxy; every request is \
            forwarded to an upstream server over the memcache ASCII \
            protocol and the reply is translated back into a binary \
            response, so binary-only clients can use text-only servers.",
        )
        .arg(
            Arg::new("listen")
                .short('l')
                .long("listen")
                .help("Listen address, host:port or a path containing '/' for a unix socket")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("remote")
                .short('r')
                .long("remote")
                .help("Upstream server address; may be repeated")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Set verbosity level; 0 is the most verbose and attaches byte tracing")
                .value_parser(clap::value_parser!(u8))
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("CONFIG")
                .help("Proxy configuration file")
                .action(ArgAction::Set)
                .index(1),
        )
        .get_matches();

    // load config from file
    let mut config = if let Some(file) = matches.get_one::<String>("CONFIG") {
        match Config::load(file) {
            Ok(c) => c,
            Err(error) => {
                eprintln!("error loading config file: {file}\n{error}");
                std::process::exit(1);
            }
        }
    } else {
        Default::default()
    };

    // command line flags override the file
    if let Some(listen) = matches.get_one::<String>("listen") {
        config.set_listen(listen.clone());
    }
    if let Some(remotes) = matches.get_many::<String>("remote") {
        config.set_endpoints(remotes.cloned().collect());
    }
    if let Some(verbose) = matches.get_one::<u8>("verbose") {
        config.set_verbose(*verbose);
    }

    // level 0 is the most verbose and is the threshold at which the
    // byte-tracing decorators are attached
    let level = match config.verbose() {
        0 => tracing::Level::TRACE,
        1 => tracing::Level::DEBUG,
        2 => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("listen: {:?}", config.listen());
    info!("remotes: {:?}", config.endpoints());

    // launch
    match Mcbridge::new(config) {
        Ok(proxy) => proxy.wait(),
        Err(e) => {
            eprintln!("error launching mcbridge: {e}");
            std::process::exit(1);
        }
    }
}

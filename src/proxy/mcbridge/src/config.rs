// Copyright 2024 Mcbridge Contributors
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

use std::io::Read;
use std::time::Duration;

// constants to define default values
const LISTEN_ADDRESS: &str = "0.0.0.0:12322";
const TIMEOUT_MS: u64 = 100;

// helper functions
fn address() -> String {
    LISTEN_ADDRESS.to_string()
}

fn timeout() -> u64 {
    TIMEOUT_MS
}

// definitions
#[derive(Serialize, Deserialize, Debug)]
pub struct Listener {
    #[serde(default = "address")]
    address: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Backend {
    #[serde(default)]
    endpoints: Vec<String>,
    #[serde(default = "timeout")]
    timeout: u64,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct Debug {
    #[serde(default)]
    verbose: u8,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    listener: Listener,
    #[serde(default)]
    backend: Backend,
    #[serde(default)]
    debug: Debug,
}

// implementation
impl Config {
    pub fn load(file: &str) -> Result<Self, std::io::Error> {
        let mut file = std::fs::File::open(file)?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;

        let config: Config = match toml::from_str(&content) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("{e}");
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "Error parsing config",
                ));
            }
        };

        Ok(config)
    }

    /// The local listen address, `host:port` or a unix socket path
    /// containing a `/`.
    pub fn listen(&self) -> &str {
        &self.listener.address
    }

    pub fn set_listen(&mut self, address: String) {
        self.listener.address = address;
    }

    /// The upstream server addresses, same address rules as
    /// [`listen`](Self::listen).
    pub fn endpoints(&self) -> &[String] {
        &self.backend.endpoints
    }

    pub fn set_endpoints(&mut self, endpoints: Vec<String>) {
        self.backend.endpoints = endpoints;
    }

    /// The sliding per-operation deadline for upstream sockets, also the
    /// connect budget.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.backend.timeout)
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.backend.timeout = timeout.as_millis() as u64;
    }

    /// The log verbosity level. Lower is more verbose; at level 0,
    /// byte-level tracing is attached to both directions.
    pub fn verbose(&self) -> u8 {
        self.debug.verbose
    }

    pub fn set_verbose(&mut self, verbose: u8) {
        self.debug.verbose = verbose;
    }
}

// trait implementations
impl Default for Listener {
    fn default() -> Self {
        Self { address: address() }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            timeout: timeout(),
        }
    }
}

// Copyright 2024 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements command-line argument parsing.

use clap::{Parser, Subcommand};

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// The Signpost demonstration DNS server
#[derive(Debug, Parser)]
#[command(author, version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the server
    Run(RunArgs),
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Set the host (IP or name) to bind
    #[arg(long, default_value = "localhost", value_name = "HOST")]
    pub host: String,

    /// Set the port to bind
    #[arg(long, default_value_t = 9953, value_name = "PORT")]
    pub port: u16,

    /// Serve over TCP instead of UDP
    #[arg(long)]
    pub tcp: bool,

    /// Set the number of concurrent request workers
    #[arg(long, default_value_t = 1, value_name = "COUNT")]
    pub workers: usize,
}

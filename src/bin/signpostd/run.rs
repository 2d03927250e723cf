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

//! Implements the `run` command (i.e., running the server).

use std::fmt::Write;
use std::process;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};

use signpost::{records, Answer, Name, Query, RequestError, Response, Server, Transport};

use crate::args::RunArgs;

/// Runs the server.
pub fn run(args: RunArgs) {
    env_logger::init_from_env(Env::new().default_filter_or("info"));

    if let Err(e) = try_running(args) {
        let mut message = String::from("Failed to run:");
        for (i, cause) in e.chain().enumerate() {
            write!(message, "\n[{}] {}", i + 1, cause).unwrap();
        }
        message.push_str("\nExiting with failure.");
        error!("{}", message);
        process::exit(1);
    }
    info!("Exiting with success.");
}

fn try_running(args: RunArgs) -> Result<()> {
    info!(
        "Signpost demonstration server v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );

    let mut server = Server::new("signpostd");
    {
        let settings = server.settings_mut();
        settings.address = args.host;
        settings.port = args.port;
        settings.transport = if args.tcp {
            Transport::Tcp
        } else {
            Transport::Udp
        };
        settings.worker_count = args.workers;
    }
    register_demo_rules(&server).context("failed to register the demonstration rules")?;

    server.run().context("failed to serve")?;
    Ok(())
}

/// Parses a name that is known to be valid.
fn name(text: &str) -> Name {
    text.parse().expect("demo names are valid")
}

/// The built-in demonstration ruleset.
fn register_demo_rules(server: &Server) -> Result<()> {
    // Responses can carry answer, authority, and additional records.
    server.rule("example.com", &["NS"], |query: &Query| {
        let mut response = Response::new();
        for i in 1..=4 {
            let ns = name(&format!("ns{i}.example.com"));
            response.answers.push(records::ns(&query.name, &ns, 300));
            response
                .additional
                .push(records::a(&ns, [1, 1, 1, 1].into(), 300));
        }
        Ok::<_, RequestError>(response)
    })?;

    // Wildcards match one (`*`) or more (`**`) labels, never zero.
    server.rule("**.example.com", &["A"], |query: &Query| {
        Ok::<_, RequestError>(records::a(&query.name, [1, 2, 3, 4].into(), 300))
    })?;

    // Rules are tried in registration order, so this wins over the
    // catch-all below for www names.
    server.rule("www.*.com.au", &["A"], |query: &Query| {
        Ok::<_, RequestError>(records::a(&query.name, [5, 6, 7, 8].into(), 300))
    })?;

    // `{base_domain}` expands to the registrable domain of the query.
    server.rule("hello.{base_domain}", &["TXT"], |query: &Query| {
        let text = if query.name.to_string().ends_with(".com.au") {
            "G'day mate"
        } else {
            "Hello friend"
        };
        Ok::<_, RequestError>(records::txt(&query.name, text, 300))
    })?;

    // An explicit empty response, distinct from the NXDOMAIN that
    // anything unmatched receives.
    server.rule("**.com.au", &["A", "AAAA", "ANY"], |_query: &Query| {
        Ok::<_, RequestError>(Answer::None)
    })?;

    Ok(())
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 psemu contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! psemu entry point
//!
//! Parses the command line, brings up logging and the window, and runs
//! the emulator. Exit code 0 on a clean quit, 1 on any setup failure.

use clap::Parser;
use winit::event_loop::EventLoop;

use psemu::frontend::Application;

/// A PlayStation 1 emulator
#[derive(Parser, Debug)]
#[command(name = "psemu", version, about)]
struct Args {
    /// Path to a 512 KiB BIOS image (required)
    #[arg(long)]
    bios: String,

    /// Path to a cue sheet for the disc to mount
    #[arg(long)]
    cd: Option<String>,
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();

    // The cue requirement is checked up front so a typo'd path fails
    // before a window flashes open
    if let Some(cd) = &args.cd {
        if !cd.ends_with(".cue") && !cd.ends_with(".CUE") {
            eprintln!("error: --cd expects a .cue file, got '{}'", cd);
            std::process::exit(1);
        }
    }

    log::info!("psemu starting: bios={} cd={:?}", args.bios, args.cd);

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(err) => {
            eprintln!("error: could not create the event loop: {}", err);
            std::process::exit(1);
        }
    };

    let mut app = Application::new(&args.bios, args.cd.as_deref());

    if let Err(err) = event_loop.run_app(&mut app) {
        eprintln!("error: event loop failed: {}", err);
        std::process::exit(1);
    }

    if let Some(err) = app.take_error() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

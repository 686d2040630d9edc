//
// Copyright (c) The Lattice Project Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;
mod northbound;

use std::path::Path;

use clap::{App, Arg};
use config::Config;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use northbound::Northbound;
use pickledb::{PickleDb, PickleDbDumpPolicy, SerializationMethod};
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

fn init_tracing(config: &config::Logging, debug_level: u64) {
    let level = match debug_level {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let log_level_filter = LevelFilter::from_level(level);

    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender =
            rolling::never(&config.file.dir, &config.file.name);
        tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_ansi(false)
            .boxed()
            .with_filter(log_level_filter)
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .boxed()
            .with_filter(log_level_filter)
    });

    // Enable logging to stderr.
    let stderr = config.stderr.enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
            .with_filter(log_level_filter)
    });

    tracing_subscriber::registry()
        .with(file)
        .with(stdout)
        .with(stderr)
        .init();
}

fn init_db<P: AsRef<Path>>(
    path: P,
) -> Result<PickleDb, pickledb::error::Error> {
    if let Some(parent) = path.as_ref().parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let dump_policy = PickleDbDumpPolicy::AutoDump;
    let serialization_method = SerializationMethod::Bin;
    match path.as_ref().exists() {
        true => PickleDb::load(path, dump_policy, serialization_method),
        false => Ok(PickleDb::new(path, dump_policy, serialization_method)),
    }
}

// Reads the pid recorded in the pidfile, if any.
fn read_pidfile(path: &str) -> Option<i32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse().ok())
}

fn pid_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

// Removes a stale pidfile, or fails when another daemon is running.
fn check_pidfile(path: &str) -> Result<(), ()> {
    if let Some(pid) = read_pidfile(path) {
        if pid_alive(pid) {
            eprintln!("latticed is already running (pid {pid})");
            return Err(());
        }
        let _ = std::fs::remove_file(path);
    }
    Ok(())
}

fn write_pidfile(path: &str) {
    if let Some(parent) = Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(error) = std::fs::write(path, format!("{}\n", std::process::id()))
    {
        eprintln!("failed to write pidfile {path}: {error}");
        std::process::exit(1);
    }
}

// Kills a running daemon identified by the pidfile (-z).
fn kill_daemon(path: &str) -> i32 {
    match read_pidfile(path) {
        Some(pid) if pid_alive(pid) => {
            if let Err(error) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                eprintln!("failed to kill pid {pid}: {error}");
                return 1;
            }
            let _ = std::fs::remove_file(path);
            0
        }
        Some(_) => {
            let _ = std::fs::remove_file(path);
            0
        }
        None => 0,
    }
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("Lattice configuration backend")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("debug")
                .short("D")
                .multiple(true)
                .help("Increase the debug level."),
        )
        .arg(
            Arg::with_name("config")
                .short("f")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .arg(
            Arg::with_name("log")
                .short("l")
                .value_name("s|e|o|f<file>")
                .help("Log destination: stderr, stdout or a file."),
        )
        .arg(
            Arg::with_name("plugin-dir")
                .short("d")
                .value_name("dir")
                .help("Plugin directory (providers are compiled in)."),
        )
        .arg(
            Arg::with_name("yang-path")
                .short("p")
                .value_name("dir")
                .multiple(true)
                .number_of_values(1)
                .help("Add a YANG module search path."),
        )
        .arg(
            Arg::with_name("datastore-dir")
                .short("b")
                .value_name("dir")
                .help("Datastore directory."),
        )
        .arg(
            Arg::with_name("foreground")
                .short("F")
                .help("Run in the foreground (the default)."),
        )
        .arg(
            Arg::with_name("kill")
                .short("z")
                .help("Kill a running daemon and exit."),
        )
        .arg(
            Arg::with_name("family")
                .short("a")
                .value_name("UNIX|IPv4|IPv6")
                .help("NETCONF socket family."),
        )
        .arg(
            Arg::with_name("address")
                .short("u")
                .value_name("path|addr")
                .help("NETCONF socket path or address."),
        )
        .arg(
            Arg::with_name("pidfile")
                .short("P")
                .value_name("file")
                .help("Pidfile location."),
        )
        .arg(
            Arg::with_name("one-shot")
                .short("1")
                .help("Run the startup processing, then exit."),
        )
        .arg(
            Arg::with_name("startup-mode")
                .short("s")
                .value_name("none|startup|running|init")
                .help("Startup mode."),
        )
        .arg(
            Arg::with_name("extra-config")
                .short("c")
                .value_name("file")
                .help("Extra XML configuration merged at startup."),
        )
        .arg(
            Arg::with_name("group")
                .short("g")
                .value_name("group")
                .help("Group required to connect to the NETCONF socket."),
        )
        .arg(
            Arg::with_name("main-module")
                .short("y")
                .value_name("module")
                .help("Override the main YANG module."),
        )
        .arg(
            Arg::with_name("datastore-format")
                .short("x")
                .value_name("xml|json")
                .help("Datastore file format."),
        )
        .arg(
            Arg::with_name("override")
                .short("o")
                .value_name("key=val")
                .multiple(true)
                .number_of_values(1)
                .help("Override a configuration value."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config");
    let mut config = Config::load(config_file);

    // Apply command-line overrides.
    if let Some(values) = matches.values_of("override") {
        for value in values {
            match value.split_once('=') {
                Some((key, value)) => config.apply_override(key, value),
                None => eprintln!("ignoring malformed override: {value}"),
            }
        }
    }
    if let Some(paths) = matches.values_of("yang-path") {
        for path in paths {
            config.yang.search_paths.push(path.to_owned());
        }
    }
    if matches.is_present("plugin-dir") {
        eprintln!(
            "note: dynamic plugin loading is not supported; data providers \
             are compiled in"
        );
    }
    if let Some(dir) = matches.value_of("datastore-dir") {
        config.datastore.dir = dir.to_owned();
    }
    if let Some(format) = matches.value_of("datastore-format") {
        config.datastore.format = format.to_owned();
    }
    if let Some(family) = matches.value_of("family") {
        match family.parse() {
            Ok(family) => config.listen.family = family,
            Err(()) => {
                eprintln!("invalid socket family: {family}");
                std::process::exit(1);
            }
        }
    }
    if let Some(address) = matches.value_of("address") {
        config.listen.address = address.to_owned();
    }
    if let Some(group) = matches.value_of("group") {
        config.listen.group = Some(group.to_owned());
    }
    if let Some(pidfile) = matches.value_of("pidfile") {
        config.pidfile = pidfile.to_owned();
    }
    if let Some(mode) = matches.value_of("startup-mode") {
        match mode.parse() {
            Ok(mode) => config.startup_mode = mode,
            Err(()) => {
                eprintln!("invalid startup mode: {mode}");
                std::process::exit(1);
            }
        }
    }
    if let Some(path) = matches.value_of("extra-config") {
        config.extra_config = Some(path.to_owned());
    }
    if let Some(module) = matches.value_of("main-module") {
        config.yang.main_module = Some(module.to_owned());
    }
    match matches.value_of("log") {
        Some("s") | Some("e") => {
            config.logging.stderr.enabled = true;
            config.logging.stdout.enabled = false;
        }
        Some("o") => {
            config.logging.stdout.enabled = true;
            config.logging.stderr.enabled = false;
        }
        Some(dest) if dest.starts_with('f') => {
            let path = Path::new(&dest[1..]);
            config.logging.file.enabled = true;
            if let Some(dir) = path.parent() {
                config.logging.file.dir = dir.display().to_string();
            }
            if let Some(name) = path.file_name() {
                config.logging.file.name =
                    name.to_string_lossy().into_owned();
            }
        }
        Some(dest) => {
            eprintln!("invalid log destination: {dest}");
            std::process::exit(1);
        }
        None => (),
    }

    // Kill a running daemon and exit (-z).
    if matches.is_present("kill") {
        std::process::exit(kill_daemon(&config.pidfile));
    }

    let one_shot = matches.is_present("one-shot");
    if one_shot {
        config.listen.enabled = false;
    }

    // Initialize tracing.
    init_tracing(&config.logging, matches.occurrences_of("debug"));

    // Refuse to start when another daemon holds the pidfile.
    if check_pidfile(&config.pidfile).is_err() {
        std::process::exit(1);
    }
    write_pidfile(&config.pidfile);

    // Initialize non-volatile storage.
    let db = match init_db(&config.database_path) {
        Ok(db) => db,
        Err(error) => {
            error!(%error, "failed to initialize non-volatile storage");
            cleanup(&config);
            std::process::exit(1);
        }
    };

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    info!("starting up");

    // Main loop. The backend runs on a single-threaded executor: requests
    // from every session are serialized through the northbound channel.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime");
    let exit_code = runtime.block_on(async {
        let nb = match Northbound::init(&config, db).await {
            Ok(nb) => nb,
            Err(error) => {
                error!(%error, "initialization failed");
                return 1;
            }
        };
        info!(status = ?nb.startup_status(), "startup complete");

        if one_shot {
            return 0;
        }

        // Graceful shutdown on SIGTERM/SIGINT.
        let (signal_tx, signal_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let mut sigterm = tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            )
            .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = sigterm.recv() => (),
                _ = tokio::signal::ctrl_c() => (),
            }
            let _ = signal_tx.send(()).await;
        });

        nb.run(signal_rx).await;
        0
    });

    cleanup(&config);
    std::process::exit(exit_code);
}

// Removes the pidfile and the listening socket.
fn cleanup(config: &Config) {
    let _ = std::fs::remove_file(&config.pidfile);
    if config.listen.enabled
        && config.listen.family == config::ListenFamily::Unix
    {
        let _ = std::fs::remove_file(&config.listen.address);
    }
}

//! The `x10d` binary: loads configuration, opens the configured
//! interfaces, and runs the event dispatcher, scheduler, and FIFO command
//! server until interrupted.

mod cli;
mod commands;
mod config;
mod dispatcher;
mod fifo;
mod registry;
mod scheduler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

use cli::Cli;
use config::AppConfig;
use dispatcher::EventDispatcher;
use scheduler::EventScheduler;

fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config.log_level);
    info!("x10d starting with {} interface(s) configured", config.interfaces.len());

    let interfaces = match registry::open_all(&config.interfaces) {
        Ok(interfaces) => interfaces,
        Err(e) => {
            error!("failed to open interfaces: {e}");
            std::process::exit(1);
        }
    };

    if cli.check {
        info!("configuration and interfaces check out; exiting (--check)");
        for interface in interfaces.values() {
            interface.join();
        }
        return;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || {
            info!("received interrupt, shutting down");
            shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("failed to install signal handler: {e}");
        }
    }

    let dispatcher = Arc::new(EventDispatcher::new());
    let interfaces = Arc::new(interfaces);

    // One reader thread per interface, feeding decoded batches to the
    // shared dispatcher.
    let mut reader_handles = Vec::new();
    for name in interfaces.keys().cloned().collect::<Vec<_>>() {
        let dispatcher = Arc::clone(&dispatcher);
        let shutdown = Arc::clone(&shutdown);
        let interfaces = Arc::clone(&interfaces);
        reader_handles.push(std::thread::spawn(move || {
            let interface = &interfaces[&name];
            while !shutdown.load(Ordering::SeqCst) {
                if let Some(event) = interface.get(Duration::from_millis(500)) {
                    info!("interface '{name}': {event}");
                    dispatcher.dispatch_batch(&[event]);
                }
            }
        }));
    }

    // The scheduler and FIFO server both just need *somewhere* to submit
    // parsed commands; fan them out to every configured interface since a
    // command doesn't name which one it goes out on.
    let submit = {
        let interfaces = Arc::clone(&interfaces);
        move |line: &str| match commands::parse_command(line) {
            Ok(events) => {
                for interface in interfaces.values() {
                    if let Err(e) = interface.put_batch(events.clone()) {
                        warn!("failed submitting command '{line}': {e}");
                    }
                }
            }
            Err(e) => warn!("ignoring bad command '{line}': {e}"),
        }
    };

    let scheduler_handle = {
        let shutdown = Arc::clone(&shutdown);
        let submit = submit.clone();
        let scheduler = EventScheduler::new(config.schedule.clone(), config.location.clone());
        std::thread::spawn(move || scheduler.run(shutdown, move |command| submit(command)))
    };

    let fifo_handle = config.fifo_path.clone().map(|path| {
        let shutdown = Arc::clone(&shutdown);
        let submit = submit.clone();
        std::thread::spawn(move || fifo::run(&path, shutdown, move |line| submit(line)))
    });

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    for interface in interfaces.values() {
        interface.join();
    }
    for handle in reader_handles {
        let _ = handle.join();
    }
    let _ = scheduler_handle.join();
    if let Some(handle) = fifo_handle {
        let _ = handle.join();
    }
    info!("x10d stopped");
}

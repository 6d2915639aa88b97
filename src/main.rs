extern crate chrono;
extern crate clap;
extern crate ctrlc;
extern crate log;
extern crate log4rs;
extern crate serde_json;

use std::path::Path;
use std::process::exit;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::App;

mod archive;
mod config;
mod directory;
mod error;
mod http;
mod lifecycle;
mod reading;
mod store;
mod weather;

use crate::archive::{Archiver, SharedStatus};
use crate::config::Configuration;
use crate::directory::ArchiveDirectory;
use crate::lifecycle::{Lifecycle, TerminationReason};
use crate::store::StateStore;
use crate::weather::WeatherLookup;

fn exit_process(code: i32) {
    exit(code)
}

fn main() {
    let cli_yaml = clap::load_yaml!("cli.yml");
    let matches = App::from(cli_yaml).get_matches();

    let log_config = matches.value_of("log-config").unwrap_or("resources/log.yml");
    match log4rs::init_file(log_config, Default::default()) {
        Ok(_) => {}
        Err(err) => {
            eprintln!("Could not create logger from yaml configuration: {}", err);
            exit(lifecycle::EXIT_LOGGER);
        }
    };

    let config_path = matches.value_of("config").unwrap_or("resources/irrigd.yml");
    let configuration = match Configuration::load(Path::new(config_path)) {
        Ok(configuration) => configuration,
        Err(err) => {
            log::error!(target: "irrigd", "{}", err);
            exit(lifecycle::EXIT_CONFIGURATION);
        }
    };

    let lifecycle = Lifecycle::new();

    let archive_parameters = configuration.archive_parameters.clone();
    let directory = Arc::new(ArchiveDirectory::new(
        &archive_parameters.records_dir,
        &archive_parameters.extension,
    ));
    if let Err(err) = directory.ensure_exists() {
        log::error!(target: "irrigd", "Cannot create the archive directory: \'{}\'", err);
        exit(lifecycle::EXIT_ARCHIVE_DIRECTORY);
    }
    // Must finish before the archiver thread writes its first record.
    if archive_parameters.purge_on_startup {
        directory.purge_all();
    }

    let store = Arc::new(StateStore::new(&configuration.store_parameters.data_file));
    log::info!(target: "irrigd", "Reading document: \'{}\'", store.path().display());
    let mut archiver = Archiver::new(Arc::clone(&store), Arc::clone(&directory));
    if let Some(weather_parameters) = &configuration.store_parameters.weather {
        match WeatherLookup::new(weather_parameters) {
            Ok(lookup) => archiver = archiver.with_source(Box::new(lookup)),
            Err(err) => {
                log::warn!(target: "irrigd", "Weather lookup disabled: \'{}\'", err);
            }
        }
    }

    let ctrlc_lifecycle = lifecycle.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        log::info!(target: "irrigd", "Termination signal received!");
        ctrlc_lifecycle.terminate(TerminationReason::Interrupted);
    }) {
        log::error!(target: "irrigd", "Cannot install the termination handler: \'{}\'", err);
        exit(lifecycle::EXIT_THREAD_SPAWN);
    }

    let status = SharedStatus::default();
    let archive_status = status.clone();
    let archive_finish = lifecycle.finish_flag();
    let interval = Duration::from_secs(archive_parameters.interval_secs);
    let policy = archive_parameters.on_failure;
    let archive_thread = match thread::Builder::new()
        .name("archiver".to_string())
        .spawn(move || {
            archive::archive_thread(
                archiver,
                interval,
                policy,
                archive_finish,
                archive_status,
                None,
            );
        }) {
        Ok(handle) => handle,
        Err(err) => {
            log::error!(target: "irrigd", "Cannot start the archiver thread: \'{}\'", err);
            exit(lifecycle::EXIT_THREAD_SPAWN);
        }
    };

    let lifecycle_parameters = configuration.lifecycle_parameters.clone();
    if let Some(budget_secs) = lifecycle_parameters.uptime_budget_secs {
        let uptime_lifecycle = lifecycle.clone();
        if let Err(err) = thread::Builder::new()
            .name("uptime".to_string())
            .spawn(move || {
                lifecycle::uptime_thread(
                    Duration::from_secs(budget_secs),
                    lifecycle_parameters.termination,
                    Duration::from_secs(lifecycle_parameters.grace_secs),
                    uptime_lifecycle,
                    exit_process,
                );
            })
        {
            log::error!(target: "irrigd", "Cannot start the uptime thread: \'{}\'", err);
            exit(lifecycle::EXIT_THREAD_SPAWN);
        }
    }

    let http_parameters = configuration.http_parameters.clone();
    let state = http::AppState {
        store,
        directory,
        status,
    };
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .thread_name("http")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            log::error!(target: "irrigd", "Cannot start the async runtime: \'{}\'", err);
            exit(lifecycle::EXIT_THREAD_SPAWN);
        }
    };

    let server_lifecycle = lifecycle.clone();
    let server_result = runtime.block_on(async move {
        let address = format!("{}:{}", http_parameters.address, http_parameters.port);
        let listener = tokio::net::TcpListener::bind(&address).await?;
        let app = http::router(state, http_parameters.static_dir);
        http::serve(listener, app, server_lifecycle).await
    });

    if let Err(err) = server_result {
        log::error!(target: "irrigd", "HTTP server failed: \'{}\'", err);
        lifecycle.terminate(TerminationReason::Failed);
    }
    // Stops the archiver. The first recorded reason decides the exit code.
    lifecycle.terminate(TerminationReason::Interrupted);

    match archive_thread.join() {
        Ok(_) => log::debug!(target: "irrigd", "Joined archiver thread!"),
        Err(_) => {
            log::error!(target: "irrigd", "Could not join the archiver thread!");
            exit(lifecycle::EXIT_THREAD_JOIN);
        }
    };

    let code = lifecycle.exit_code();
    log::info!(target: "irrigd", "Exiting ({:?})", lifecycle.reason());
    exit(code);
}

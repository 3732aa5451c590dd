//! Run a Sidetree observer against in-memory collaborators.
//!
//! The node anchors a stream of demo batches on an in-memory ledger and CAS while an observer
//! ingests them into an in-memory store. On Ctrl-C (or once the observer halts) it stops the
//! observer and prints its metrics.

use clap::{value_parser, Arg, ArgAction, Command};
use prometheus_client::{encoding::text::encode, registry::Registry};
use sidetree_observer::{
    compression::{self, Algorithm},
    mocks, Observer,
};
use std::time::Duration;
use tokio::{signal, time};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod config;
use config::{parse_duration, Config, Demo};

/// How often to check whether the observer has exited on its own.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

fn exit(message: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("{message}: {err}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    // Parse arguments
    let matches = Command::new("sidetree-node")
        .about("observe anchored Sidetree batches")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("YAML configuration file"),
        )
        .arg(
            Arg::new("namespace")
                .long("namespace")
                .value_name("NAMESPACE")
                .help("Namespace to observe (overrides config)"),
        )
        .arg(
            Arg::new("poll-interval")
                .long("poll-interval")
                .value_name("DURATION")
                .help("Interval between ledger polls ('ms', 's', 'm', 'h')"),
        )
        .arg(
            Arg::new("since")
                .long("since")
                .value_name("NUMBER")
                .value_parser(value_parser!(u64))
                .help("Transaction number to resume after"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (overrides config)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .get_matches();

    // Load config
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::load(path).unwrap_or_else(|err| exit("invalid config", err)),
        None => Config::default(),
    };
    if let Some(namespace) = matches.get_one::<String>("namespace") {
        config.namespace = namespace.clone();
    }
    if let Some(interval) = matches.get_one::<String>("poll-interval") {
        config.poll_interval = interval.clone();
    }
    if let Some(since) = matches.get_one::<u64>("since") {
        config.since = Some(*since);
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.log_level = level.clone();
    }
    if matches.get_flag("json-logs") {
        config.json_logs = true;
    }
    let observer_cfg = config
        .observer()
        .unwrap_or_else(|err| exit("invalid observer config", err));
    let versions = config
        .versions()
        .unwrap_or_else(|err| exit("invalid protocols", err));
    let level = config
        .level()
        .unwrap_or_else(|err| exit("invalid log level", err));
    let demo_interval = parse_duration(&config.demo.interval)
        .unwrap_or_else(|err| exit("invalid demo config", err));

    // Create logger
    let logger = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_line_number(true)
        .with_file(true);
    if config.json_logs {
        logger.json().init();
    } else {
        logger.init();
    }
    info!(
        namespace = %observer_cfg.namespace,
        since = ?observer_cfg.since,
        poll_interval = ?observer_cfg.poll_interval,
        failure_policy = ?observer_cfg.failure_policy,
        "loaded config"
    );

    // Create collaborators
    let ledger = mocks::Ledger::default();
    let cas = mocks::Cas::default();
    let store = mocks::Store::default();
    let writer = mocks::BatchWriter::new(cas.clone(), ledger.clone(), &config.namespace);
    let demo_ledger = ledger.clone();

    // Start observer
    let mut registry = Registry::with_prefix("sidetree_observer");
    let handle = Observer::new(
        observer_cfg,
        ledger,
        cas.clone(),
        store.clone(),
        versions,
        &mut registry,
    )
    .start();

    // Start demo writer
    let token = CancellationToken::new();
    let demo = tokio::spawn(write_batches(
        writer,
        demo_ledger,
        cas,
        config.namespace.clone(),
        config.demo.clone(),
        demo_interval,
        token.clone(),
    ));

    // Run until interrupted or halted
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(err) = result {
                    error!(?err, "failed to listen for ctrl-c");
                }
                info!("shutting down");
                break;
            },
            _ = time::sleep(LIVENESS_INTERVAL) => {
                if handle.is_finished() {
                    break;
                }
            },
        }
    }
    token.cancel();
    if let Err(err) = demo.await {
        warn!(?err, "demo writer failed");
    }
    match handle.stop().await {
        Ok(()) => info!("observer stopped"),
        Err(err) => error!(?err, "observer exited with error"),
    }

    // Report
    let operations = store.operations();
    info!(
        puts = store.puts().len(),
        operations = operations.len(),
        "ingested operations"
    );
    let mut buffer = String::new();
    match encode(&mut buffer, &registry) {
        Ok(()) => println!("{buffer}"),
        Err(err) => error!(?err, "failed to encode metrics"),
    }
}

/// Anchor `demo.batches` batches, one every `interval`.
///
/// Each batch creates a DID and updates the DID created by the previous batch.
async fn write_batches(
    writer: mocks::BatchWriter,
    ledger: mocks::Ledger,
    cas: mocks::Cas,
    namespace: String,
    demo: Demo,
    interval: Duration,
    token: CancellationToken,
) {
    let mut previous: Option<String> = None;
    for seed in 0..demo.batches {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = time::sleep(interval) => {},
        }

        // Anchor a corrupt batch
        if demo.malformed_every > 0 && (seed + 1) % demo.malformed_every == 0 {
            match compression::compress(Algorithm::Gzip, b"{\"operations\":") {
                Ok(corrupt) => {
                    let address = cas.write(&corrupt);
                    let anchor = format!("1.{address}");
                    warn!(seed, anchor = %anchor, "anchoring malformed batch");
                    ledger.anchor(&namespace, &anchor, seed);
                }
                Err(err) => error!(?err, "failed to compress malformed batch"),
            }
            continue;
        }

        // Anchor a valid batch
        let create = mocks::create(seed);
        let mut operations = vec![create.clone()];
        if let Some(suffix) = &previous {
            operations.push(mocks::update(suffix, seed));
        }
        match writer.anchor(&operations, seed) {
            Ok(txn) => info!(
                transaction_number = txn.transaction_number,
                anchor = %txn.anchor_string,
                operations = operations.len(),
                "anchored batch"
            ),
            Err(err) => {
                error!(?err, "failed to anchor batch");
                continue;
            }
        }
        previous = create.unique_suffix().ok();
    }
    info!(batches = demo.batches, "demo writer finished");
}

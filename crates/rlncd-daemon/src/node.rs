//! Daemon orchestration: netlink bridge tasks, housekeeping, signals.
//!
//! Three long-lived tasks surround the coding engine: the reader drains
//! the netlink socket and routes events, the writer serializes outbound
//! messages onto the socket, and the housekeeper sweeps the coder maps at
//! a fixed cadence. All of them exit on the shutdown watch channel, which
//! is tripped by the first INT/TERM or by a fatal engine condition.

use std::sync::Arc;
use std::time::Duration;

use rlncd_core::constants::HOUSEKEEPING_INTERVAL_MS;
use rlncd_core::types::Outbound;
use rlncd_engine::{
    CoderCtx, CounterStore, Counters, Dispatcher, EncoderGate, LinkDb, OutboundSink,
};
use rlncd_netlink::{Event, NetlinkClient};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::cli::Cli;
use crate::error::DaemonError;

/// Run the daemon until shutdown.
pub async fn run(cli: Cli) -> Result<(), DaemonError> {
    let params = Arc::new(cli.params());
    params.validate()?;

    let counters = CounterStore::new();
    let links = Arc::new(LinkDb::new());
    let (outbound, outbound_rx) = OutboundSink::channel();
    let (fatal_tx, mut fatal_rx) = watch::channel(false);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ctx = Arc::new(CoderCtx {
        params: params.clone(),
        counters: counters.clone(),
        links: links.clone(),
        outbound: outbound.clone(),
        fatal: fatal_tx,
    });
    let gate = Arc::new(EncoderGate::new(params.encoders));
    let dispatcher = Arc::new(Dispatcher::new(ctx, gate));

    let client = Arc::new(NetlinkClient::connect().await?);
    client
        .register(
            &cli.device,
            params.encoders as u32,
            u32::from(params.e1),
            u32::from(params.e2),
            u32::from(params.e3),
        )
        .await?;

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    tasks.push(tokio::spawn(run_writer(
        client.clone(),
        outbound_rx,
        counters.group("io"),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(run_reader(
        client.clone(),
        dispatcher.clone(),
        links,
        outbound,
        counters.group("io"),
        cli.benchmark,
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(run_housekeeping(
        dispatcher.clone(),
        shutdown_rx.clone(),
    )));

    spawn_signal_handlers(shutdown_tx.clone(), counters.clone(), cli.counters_path.clone());

    tracing::info!(device = %cli.device, "daemon running");

    // Block until a signal or a fatal engine condition.
    let mut shutdown_watch = shutdown_rx;
    tokio::select! {
        _ = shutdown_watch.changed() => {}
        _ = fatal_rx.changed() => {
            tracing::error!("fatal engine condition, shutting down");
            let _ = shutdown_tx.send(true);
        }
    }

    dispatcher.shutdown();
    for task in tasks {
        if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
            tracing::warn!("task did not stop in time");
        }
    }

    print_counters(&counters);
    export_counters(&counters, cli.counters_path.as_deref());
    tracing::info!("daemon stopped");
    Ok(())
}

/// Drain the outbound channel onto the socket, serializing sends.
async fn run_writer(
    client: Arc<NetlinkClient>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    counters: Counters,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            msg = rx.recv() => match msg {
                Some(out) => {
                    if let Err(err) = client.send_outbound(&out).await {
                        counters.inc("send errors");
                        tracing::warn!(%err, "dropping outbound message");
                    }
                }
                None => break,
            },
        }
    }
}

/// Drain the socket and route events; receive errors are retried.
async fn run_reader(
    client: Arc<NetlinkClient>,
    dispatcher: Arc<Dispatcher>,
    links: Arc<LinkDb>,
    outbound: OutboundSink,
    counters: Counters,
    benchmark: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = client.next_events() => match result {
                Ok(events) => {
                    for event in events {
                        route_event(event, &client, &dispatcher, &links, &outbound, benchmark);
                    }
                }
                Err(err) => {
                    counters.inc("recv errors");
                    tracing::warn!(%err, "netlink receive failed, retrying");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }
}

fn route_event(
    event: Event,
    client: &NetlinkClient,
    dispatcher: &Dispatcher,
    links: &LinkDb,
    outbound: &OutboundSink,
    benchmark: bool,
) {
    match event {
        Event::RegisterReply { ifindex } => {
            client.set_ifindex(ifindex);
            tracing::info!(ifindex, "registered with kernel module");
        }
        Event::LinkUpdate { addr, tq } => links.set_link(addr, tq),
        Event::OneHopUpdate { dst, hops } => links.replace_one_hops(dst, hops),
        Event::RelayUpdate { src, dst, relays } => links.replace_helpers(src, dst, relays),
        Event::Frame(frame) => {
            if benchmark {
                outbound.send(Outbound::Passthrough {
                    payload: frame.data,
                });
            } else {
                dispatcher.handle_frame(frame);
            }
        }
        Event::Ignored => {}
    }
}

/// Sweep every coder map at a fixed cadence.
async fn run_housekeeping(dispatcher: Arc<Dispatcher>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(Duration::from_millis(HOUSEKEEPING_INTERVAL_MS));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => dispatcher.process_coders(),
        }
    }
}

fn spawn_signal_handlers(
    shutdown: watch::Sender<bool>,
    counters: CounterStore,
    counters_path: Option<std::path::PathBuf>,
) {
    // First INT stops gracefully; a second forces exit.
    let stop = shutdown.clone();
    tokio::spawn(async move {
        let mut stopping = false;
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if stopping {
                std::process::exit(1);
            }
            tracing::info!("received SIGINT, shutting down");
            let _ = stop.send(true);
            stopping = true;
        }
    });

    #[cfg(unix)]
    {
        let stop = shutdown;
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            let mut stopping = false;
            while sigterm.recv().await.is_some() {
                if stopping {
                    std::process::exit(1);
                }
                tracing::info!("received SIGTERM, shutting down");
                let _ = stop.send(true);
                stopping = true;
            }
        });

        tokio::spawn(async move {
            let mut sigquit = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::quit())
                .expect("failed to register SIGQUIT handler");
            while sigquit.recv().await.is_some() {
                print_counters(&counters);
                export_counters(&counters, counters_path.as_deref());
            }
        });
    }
}

fn print_counters(counters: &CounterStore) {
    for (name, value) in counters.snapshot() {
        println!("{name}: {value}");
    }
}

fn export_counters(counters: &CounterStore, path: Option<&std::path::Path>) {
    let Some(path) = path else {
        return;
    };
    match serde_json::to_string_pretty(&counters.snapshot()) {
        Ok(json) => {
            if let Err(err) = std::fs::write(path, json) {
                tracing::warn!(%err, path = %path.display(), "failed to export counters");
            }
        }
        Err(err) => tracing::warn!(%err, "failed to serialize counters"),
    }
}

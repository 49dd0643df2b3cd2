//! Session server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Result};
use axum::{
    routing::{get, post},
    Extension, Router,
};
use clap::Parser;
use env_logger::TimestampPrecision;
use session_server::{
    data_socket::spawn_data_socket,
    endpoints::{
        add_sample, begin_collecting, collect_window, end_collecting, healthcheck, load_dataset,
        load_model, predict, prediction_stream, reset, save_dataset, save_model, status, train,
        ServerState,
    },
    meter::{spawn_meter_logger, LOG_PERIOD},
    persist::default_data_dir,
    pubsub::NamedPubSub,
    worker::shared,
    Session, Task,
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the HTTP endpoints on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Address to receive feature streams on
    #[clap(long, default_value = "127.0.0.1:3001")]
    socket_address: String,

    /// Task of the session, `regression` or `classification`
    #[clap(long, default_value = "classification")]
    task: Task,

    /// Number of input features, taken from the first sample if not given
    #[clap(long, requires = "targets")]
    inputs: Option<usize>,

    /// Number of target values, taken from the first sample if not given
    #[clap(long, requires = "inputs")]
    targets: Option<usize>,

    /// Directory for saved datasets and models
    #[clap(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let data_dir = args
        .data_dir
        .or_else(default_data_dir)
        .ok_or_else(|| anyhow!("no data directory available, pass --data-dir"))?;
    log::info!("Storing datasets and models in {}", data_dir.display());

    let session = match (args.inputs, args.targets) {
        (Some(inputs), Some(targets)) => Session::with_arity(args.task, inputs, targets),
        _ => Session::new(args.task),
    };
    let session = shared(session);

    // Pub/Sub-Engine to fan out predictions to HTTP listeners
    let pubsub = Arc::new(NamedPubSub::new());

    // Create socket to receive feature streams via network
    spawn_data_socket(Arc::clone(&session), Arc::clone(&pubsub), &args.socket_address).await?;

    spawn_meter_logger(LOG_PERIOD);

    let state = Arc::new(ServerState {
        session,
        pubsub,
        data_dir,
    });

    // Build HTTP server with endpoints
    let app = Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/status", get(status))
        .route("/collect/begin", post(begin_collecting))
        .route("/collect/end", post(end_collecting))
        .route("/collect/window", post(collect_window))
        .route("/samples", post(add_sample))
        .route("/train", post(train))
        .route("/predict", post(predict))
        .route("/predictions", get(prediction_stream))
        .route("/reset", post(reset))
        .route("/dataset/save", post(save_dataset))
        .route("/dataset/load", post(load_dataset))
        .route("/model/save", post(save_model))
        .route("/model/load", post(load_model))
        .layer(Extension(state));

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

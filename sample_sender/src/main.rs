//! Replays a saved dataset into the data socket of a session server.
//!
//! By default every sample is sent with its target and recorded by an idle
//! session. With `--frames` only the features are sent, which the server
//! collects or predicts depending on its phase; prediction replies are logged.
use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use common::protocol::{FrameMsg, LabeledMsg, ProtoMsg};
use env_logger::TimestampPrecision;
use futures::{SinkExt, StreamExt};
use session_server::{data_socket::target_to_msg, persist::load_dataset};
use tokio::{net::TcpStream, time::interval};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the data socket to connect to
    #[clap(long, default_value = "127.0.0.1:3001")]
    address: String,

    /// Channel name that this sender publishes to
    #[clap(long, default_value = "sketch")]
    channel: String,

    /// Dataset JSON file to replay
    dataset: PathBuf,

    /// Send features only, as a live stream would
    #[clap(long)]
    frames: bool,

    /// Pause between two messages
    #[clap(long, default_value_t = 50)]
    interval_ms: u64,

    /// Replay the dataset this many times
    #[clap(long, default_value_t = 1)]
    repeat: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let store = load_dataset(&args.dataset)?;
    log::info!(
        "Loaded {} samples from {}",
        store.size(),
        args.dataset.display()
    );

    let stream = TcpStream::connect(&args.address).await?;
    log::info!("Client connected to {}", &args.address);

    // Wrap stream in transport handler with length-delimited codec
    let transport = Framed::new(stream, LengthDelimitedCodec::new());
    let (mut sink, mut replies) = transport.split();

    // Send init message
    let init_msg = ProtoMsg::ConnectReq(args.channel.clone());
    sink.send(Bytes::from(init_msg.serialize()?)).await?;

    let reader = tokio::spawn(async move {
        while let Some(Ok(data)) = replies.next().await {
            match ProtoMsg::deserialize(&data) {
                Ok(ProtoMsg::PredictionMsg(msg)) => match msg.result {
                    Ok(body) => log::info!("Prediction #{}: {:?}", msg.seq, body),
                    Err(e) => log::warn!("Prediction #{} failed: {}", msg.seq, e),
                },
                Ok(ProtoMsg::ErrorMsg(e)) => log::warn!("Server error: {e}"),
                Ok(other) => log::debug!("Unexpected reply {:?}", other),
                Err(e) => log::warn!("Undecodable reply: {e}"),
            }
        }
    });

    let mut ticker = interval(Duration::from_millis(args.interval_ms.max(1)));
    for _ in 0..args.repeat {
        for sample in store.samples() {
            ticker.tick().await;
            let msg = if args.frames {
                ProtoMsg::FrameMsg(FrameMsg::new(
                    args.channel.clone(),
                    sample.inputs.clone(),
                ))
            } else {
                ProtoMsg::LabeledMsg(LabeledMsg::new(
                    args.channel.clone(),
                    sample.inputs.clone(),
                    target_to_msg(&sample.target),
                ))
            };
            sink.send(Bytes::from(msg.serialize()?)).await?;
        }
    }
    log::info!("Sent {} messages", store.size() * args.repeat);

    // Give the last replies a moment before hanging up
    ticker.tick().await;
    sink.close().await?;
    reader.await?;

    Ok(())
}

//! Data socket module to receive feature streams via network.
//!
//! Every client first sends a `ConnectReq` with its name. Frames are then
//! collected or predicted depending on the session phase, and the newest
//! prediction is written back on the same connection and published under
//! the client name for HTTP listeners.
use std::{net::SocketAddr, sync::Arc};

use anyhow::{bail, Result};
use bytes::Bytes;
use common::protocol::{FrameMsg, LabeledMsg, PredictionBody, PredictionMsg, ProtoMsg, TargetMsg};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::{
    predictor::{PredictOutput, Prediction},
    pubsub::NamedPubSub,
    session::Phase,
    store::Target,
    worker::{PredictResult, PredictWorker, SharedSession},
};

type Transport = Framed<TcpStream, LengthDelimitedCodec>;

/// Spawn a data socket feeding the shared session.
pub async fn spawn_data_socket(
    session: SharedSession,
    pubsub: Arc<NamedPubSub>,
    addr: &str,
) -> Result<JoinHandle<Result<()>>> {
    let socket: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(socket).await?;
    log::info!("Data socket listening on {}", socket);

    Ok(tokio::spawn(async move {
        loop {
            let (socket, _peer_addr) = listener.accept().await?;
            let session = Arc::clone(&session);
            let pubsub = Arc::clone(&pubsub);
            tokio::spawn(async move {
                if let Err(e) = handle_incoming(session, pubsub, socket).await {
                    log::warn!("Data socket connection failed: {e}");
                }
            });
        }
    }))
}

async fn handle_incoming(
    session: SharedSession,
    pubsub: Arc<NamedPubSub>,
    stream: TcpStream,
) -> Result<()> {
    let addr = stream.peer_addr()?;
    log::info!("{}: New TCP connection", &addr);

    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

    let client_name = {
        if let Some(Ok(data)) = transport.next().await {
            if let Ok(ProtoMsg::ConnectReq(name)) = ProtoMsg::deserialize(&data) {
                name
            } else {
                bail!("no client name");
            }
        } else {
            bail!("no client name");
        }
    };
    log::info!("{}: Client {} connected", &addr, &client_name);

    let listeners = pubsub.get_broadcast_sender(&client_name).await;
    let worker = PredictWorker::spawn(Arc::clone(&session));
    let mut results = worker.subscribe();

    loop {
        tokio::select! {
            res = transport.next() => match res {
                None => {
                    log::info!("{}: TCP stream ended", &addr);
                    break;
                }
                Some(Ok(data)) => match ProtoMsg::deserialize(&data) {
                    Ok(ProtoMsg::FrameMsg(msg)) => {
                        if let Err(e) = route_frame(&session, &worker, msg).await {
                            send(&mut transport, ProtoMsg::ErrorMsg(e)).await?;
                        }
                    }
                    Ok(ProtoMsg::LabeledMsg(msg)) => {
                        if let Err(e) = record_labeled(&session, msg).await {
                            send(&mut transport, ProtoMsg::ErrorMsg(e)).await?;
                        }
                    }
                    Ok(other) => log::warn!("{}: Unexpected message {:?}", &addr, other),
                    Err(e) => log::warn!("{}: Undecodable message: {e}", &addr),
                },
                Some(Err(e)) => {
                    log::warn!("Error in TCP codec: {e}");
                }
            },
            res = results.changed() => {
                if res.is_err() {
                    break;
                }
                let latest = results.borrow_and_update().clone();
                if let Some(result) = latest {
                    let msg = as_prediction_msg(&client_name, result);
                    // Listeners are optional, a send error only means nobody watches.
                    if let Ok(json) = serde_json::to_vec(&msg) {
                        listeners.send(as_json_line(json)).ok();
                    }
                    send(&mut transport, ProtoMsg::PredictionMsg(msg)).await?;
                }
            }
        }
    }

    Ok(())
}

/// Collect or predict a frame depending on the session phase. Frames
/// arriving in other phases are dropped.
async fn route_frame(
    session: &SharedSession,
    worker: &PredictWorker,
    msg: FrameMsg,
) -> std::result::Result<(), String> {
    let mut session = session.lock().await;
    match session.phase() {
        Phase::Collecting => session.sample(msg.features).map_err(|e| e.to_string()),
        Phase::Predicting => {
            drop(session);
            worker.request(msg.features);
            Ok(())
        }
        phase => {
            log::debug!("Dropping frame from {} while {}", msg.id, phase);
            Ok(())
        }
    }
}

async fn record_labeled(
    session: &SharedSession,
    msg: LabeledMsg,
) -> std::result::Result<(), String> {
    session
        .lock()
        .await
        .record(msg.features, target_from_msg(msg.target))
        .map_err(|e| e.to_string())
}

async fn send(transport: &mut Transport, msg: ProtoMsg) -> Result<()> {
    transport.send(Bytes::from(msg.serialize()?)).await?;
    Ok(())
}

pub fn target_from_msg(target: TargetMsg) -> Target {
    match target {
        TargetMsg::Values(values) => Target::Values(values),
        TargetMsg::Label(label) => Target::Label(label),
    }
}

pub fn target_to_msg(target: &Target) -> TargetMsg {
    match target {
        Target::Values(values) => TargetMsg::Values(values.clone()),
        Target::Label(label) => TargetMsg::Label(label.clone()),
    }
}

fn as_prediction_body(prediction: Prediction) -> PredictionBody {
    match prediction {
        Prediction::Values(values) => PredictionBody::Values(values),
        Prediction::Classes(classes) => PredictionBody::Classes(
            classes
                .into_iter()
                .map(|class| (class.label, class.confidence))
                .collect(),
        ),
    }
}

fn as_prediction_msg(client_name: &str, result: PredictResult) -> PredictionMsg {
    PredictionMsg {
        id: client_name.to_owned(),
        seq: result.seq,
        result: match result.output {
            Ok(PredictOutput::Single(prediction)) => Ok(as_prediction_body(prediction)),
            Ok(PredictOutput::Batch(_)) => Err("batch predictions are not streamed".to_owned()),
            Err(e) => Err(e.to_string()),
        },
    }
}

fn as_json_line(mut json: Vec<u8>) -> Bytes {
    json.push(b'\n');
    Bytes::from(json)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::{error::SessionError, predictor::LabelConfidence};

    #[test]
    fn classes_become_label_confidence_pairs() {
        let result = PredictResult {
            seq: 4,
            output: Ok(PredictOutput::Single(Prediction::Classes(vec![
                LabelConfidence {
                    label: "y".into(),
                    confidence: 0.9,
                },
                LabelConfidence {
                    label: "m".into(),
                    confidence: 0.1,
                },
            ]))),
        };
        let msg = as_prediction_msg("pose", result);
        assert_eq!(msg.seq, 4);
        assert_eq!(
            msg.result,
            Ok(PredictionBody::Classes(vec![
                ("y".into(), 0.9),
                ("m".into(), 0.1)
            ]))
        );
    }

    #[test]
    fn errors_are_sent_as_text() {
        let result = PredictResult {
            seq: 1,
            output: Err(Arc::new(SessionError::NotReady)),
        };
        let msg = as_prediction_msg("pose", result);
        assert_eq!(msg.result, Err("no trained model available".to_owned()));
    }

    #[test]
    fn targets_convert_both_ways() {
        let target = Target::Values(vec![255.0, 0.0, 0.0]);
        assert_eq!(target_from_msg(target_to_msg(&target)), target);
        let label = Target::Label("y".into());
        assert_eq!(target_from_msg(target_to_msg(&label)), label);
    }
}

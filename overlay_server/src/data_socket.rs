//! Socket accepting capture clients.
//!
use std::sync::Arc;

use futures::StreamExt;
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use common::protocol::ProtoMsg;

use crate::{
    as_jpeg_stream_item,
    panel::{PanelState, SharedPanel},
    pubsub::{annotated_name, NamedPubSub},
    StaticImageSender,
};

pub async fn spawn_data_socket(
    pubsub: Arc<NamedPubSub>,
    panel: SharedPanel,
    infer_tx: StaticImageSender,
    addr: &str,
) -> JoinHandle<Result<(), std::io::Error>> {
    let addr = addr.to_owned();
    tokio::spawn(async move {
        let listener = TcpListener::bind(&addr).await?;
        log::info!("Frame socket listening on {addr}");

        loop {
            let (socket, _) = listener.accept().await?;
            let pubsub_ = Arc::clone(&pubsub);
            let panel_ = panel.clone();
            let infer_tx_ = infer_tx.clone();
            tokio::spawn(async move {
                handle_incoming(socket, pubsub_, panel_, infer_tx_).await?;
                Ok::<_, std::io::Error>(())
            });
        }
    })
}

async fn handle_incoming(
    stream: TcpStream,
    pubsub: Arc<NamedPubSub>,
    panel: SharedPanel,
    infer_tx: StaticImageSender,
) -> std::io::Result<()> {
    log::info!("{}: new capture connection", stream.peer_addr()?);

    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

    let mut raw_tx = None;
    let mut annotated_tx = None;

    while let Some(Ok(data)) = transport.next().await {
        let msg = match ProtoMsg::deserialize(&data[..]) {
            Ok(msg) => msg,
            Err(err) => {
                // Must not kill the socket task
                log::warn!("Skipping undecodable message: {err}");
                continue;
            }
        };

        match msg {
            ProtoMsg::Frame(frame_msg) => {
                if raw_tx.is_none() {
                    raw_tx = Some(pubsub.sender(&frame_msg.id).await);
                }
                if annotated_tx.is_none() {
                    annotated_tx = Some(pubsub.sender(&annotated_name(&frame_msg.id)).await);
                }

                if let Some(tx) = &raw_tx {
                    // No listener is fine
                    tx.send(as_jpeg_stream_item(&frame_msg.data)).ok();
                }

                // Newest-frame semantics: while the analyzer is busy no slot
                // is free and the frame is simply dropped
                if let Ok(mut slot) = infer_tx.try_send_ref() {
                    slot.0 = frame_msg.width;
                    slot.1 = frame_msg.height;
                    slot.2.clear();
                    slot.2.extend_from_slice(&frame_msg.data);
                    slot.3 = annotated_tx.clone();
                }
            }
            ProtoMsg::Status(status) => {
                log::warn!("Status from {}: {}", &status.id, &status.message);
                panel.set(PanelState::error(status.message));
            }
        }
    }

    Ok(())
}

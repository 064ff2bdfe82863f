//! Data socket module to receive image streams via network.
//!
use std::{net::SocketAddr, sync::Arc};

use anyhow::{bail, Result};
use bytes::Bytes;
use common::protocol::ProtoMsg;
use futures::StreamExt;
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::pubsub::NamedPubSub;

/// Spawn a data socket and publish incoming frames on the Pub/Sub-Engine.
pub async fn spawn_data_socket(
    pubsub: Arc<NamedPubSub>,
    addr: &str,
) -> Result<JoinHandle<Result<()>>> {
    let socket: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(socket).await?;
    log::info!("Data socket listening on {}", listener.local_addr()?);

    Ok(tokio::spawn(accept_connections(listener, pubsub)))
}

async fn accept_connections(listener: TcpListener, pubsub: Arc<NamedPubSub>) -> Result<()> {
    loop {
        let (socket, _peer_addr) = listener.accept().await?;
        let pubsub = Arc::clone(&pubsub);
        tokio::spawn(async move {
            if let Err(e) = handle_incoming(pubsub, socket).await {
                log::warn!("Data socket connection failed: {e}");
            }
        });
    }
}

async fn handle_incoming(pubsub: Arc<NamedPubSub>, stream: TcpStream) -> Result<()> {
    let addr = stream.peer_addr()?;
    log::info!("{}: New TCP connection", &addr);

    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

    let channel_name = match transport.next().await {
        Some(Ok(data)) => match ProtoMsg::deserialize(&data) {
            Ok(ProtoMsg::ConnectReq(channel)) => channel,
            _ => bail!("{addr}: expected a connect request"),
        },
        _ => bail!("{addr}: no channel name"),
    };
    log::info!("{}: Publishing frames on channel {}", &addr, &channel_name);

    let sender = pubsub.register_producer(&channel_name).await;

    while let Some(res) = transport.next().await {
        match res {
            Ok(data) => match ProtoMsg::deserialize(&data) {
                Ok(ProtoMsg::FrameMsg(msg)) => {
                    if msg.id != channel_name {
                        log::debug!("Ignoring frame for {} on channel {}", msg.id, channel_name);
                        continue;
                    }
                    if sender.send(Bytes::from(msg.data)).is_err() {
                        log::trace!("No listener for channel {}", &channel_name);
                    }
                }
                Ok(ProtoMsg::ConnectReq(_)) => log::warn!("{}: Repeated connect request", &addr),
                Err(e) => log::warn!("{}: Malformed message: {e}", &addr),
            },
            Err(e) => {
                log::warn!("Error in TCP codec: {e}");
                break;
            }
        }
    }

    log::info!("{}: TCP stream ended", &addr);
    pubsub.release_producer(&channel_name, sender).await;
    Ok(())
}

#[cfg(test)]
mod test {
    use common::protocol::FrameMsg;
    use futures::SinkExt;

    use super::*;

    #[tokio::test]
    async fn test_frames_are_published() -> Result<()> {
        let pubsub = Arc::new(NamedPubSub::new());
        let mut rx = pubsub.get_broadcast_receiver("simon").await;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let pubsub_ = Arc::clone(&pubsub);
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await?;
            handle_incoming(pubsub_, socket).await
        });

        let stream = TcpStream::connect(addr).await?;
        let mut transport = Framed::new(stream, LengthDelimitedCodec::new());
        transport
            .send(Bytes::from(ProtoMsg::ConnectReq("simon".into()).serialize()?))
            .await?;
        transport
            .send(Bytes::from(
                ProtoMsg::FrameMsg(FrameMsg::new("simon".into(), vec![1, 2, 3])).serialize()?,
            ))
            .await?;

        let frame = rx.recv().await?;
        assert_eq!(&frame[..], &[1, 2, 3]);

        Ok(())
    }

    #[tokio::test]
    async fn test_channel_closes_on_disconnect() -> Result<()> {
        let pubsub = Arc::new(NamedPubSub::new());
        let mut rx = pubsub.get_broadcast_receiver("hallway").await;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let pubsub_ = Arc::clone(&pubsub);
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await?;
            handle_incoming(pubsub_, socket).await
        });

        let stream = TcpStream::connect(addr).await?;
        let mut transport = Framed::new(stream, LengthDelimitedCodec::new());
        transport
            .send(Bytes::from(ProtoMsg::ConnectReq("hallway".into()).serialize()?))
            .await?;
        transport
            .send(Bytes::from(
                ProtoMsg::FrameMsg(FrameMsg::new("hallway".into(), vec![7])).serialize()?,
            ))
            .await?;
        drop(transport);

        handle.await??;
        assert_eq!(&rx.recv().await?[..], &[7]);
        assert_eq!(
            rx.recv().await,
            Err(tokio::sync::broadcast::error::RecvError::Closed)
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_missing_connect_request() -> Result<()> {
        let pubsub = Arc::new(NamedPubSub::new());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await?;
            handle_incoming(pubsub, socket).await
        });

        let stream = TcpStream::connect(addr).await?;
        let mut transport = Framed::new(stream, LengthDelimitedCodec::new());
        transport
            .send(Bytes::from(
                ProtoMsg::FrameMsg(FrameMsg::new("simon".into(), vec![1])).serialize()?,
            ))
            .await?;

        assert!(handle.await?.is_err());

        Ok(())
    }
}

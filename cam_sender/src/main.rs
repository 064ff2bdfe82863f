//! Send webcam frames to the data socket of the classify server.
//!
use std::{path::PathBuf, time::Duration};

use bytes::Bytes;
use cam_sender::{
    sensors::{get_max_res_mjpg_capture_fn, get_replay_capture_fn},
    Error,
};
use clap::Parser;
use common::protocol::{FrameMsg, ProtoMsg};
use env_logger::TimestampPrecision;
use futures::sink::SinkExt;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the data socket of the classify server
    #[clap(long, default_value = "127.0.0.1:3001")]
    address: String,

    /// Channel name that this sender publishes to
    #[clap(long, default_value = "webcam")]
    channel: String,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Replay the JPEG files of this directory instead of using a webcam
    #[clap(long)]
    replay_dir: Option<PathBuf>,

    /// Milliseconds to wait between frames
    #[clap(long)]
    interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    log::info!("Launching socket sender for channel {}", &args.channel);

    // Initialize webcam (or replay) to send image stream
    let capture_fn = match &args.replay_dir {
        Some(dir) => get_replay_capture_fn(dir)?,
        None => get_max_res_mjpg_capture_fn(&args.device)?,
    };
    // Replayed frames would otherwise be sent as fast as the socket allows
    let interval = args
        .interval_ms
        .or(args.replay_dir.as_ref().map(|_| 100))
        .map(Duration::from_millis);

    let stream = TcpStream::connect(&args.address).await?;
    log::info!("Client connected to {}", &args.address);

    // Wrap stream in transport handler with length-delimited codec
    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

    // Send init message
    let init_msg = Bytes::from(ProtoMsg::ConnectReq(args.channel.clone()).serialize()?);
    transport.send(init_msg).await?;

    // Send captured frames in a loop
    loop {
        match capture_fn() {
            Some(frame) => {
                let data = ProtoMsg::FrameMsg(FrameMsg::new(args.channel.clone(), frame.to_vec()));
                transport.send(Bytes::from(data.serialize()?)).await?;
            }
            None => log::error!("Unable to capture frame, trying again..."),
        }

        if let Some(interval) = interval {
            tokio::time::sleep(interval).await;
        }
    }
}

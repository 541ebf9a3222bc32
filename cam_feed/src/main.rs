//! Capture client binary.
//!
use bytes::Bytes;
use cam_feed::{sensors::open_capture, Error};
use clap::Parser;
use common::protocol::{FrameMsg, ProtoMsg, StatusMsg};
use env_logger::TimestampPrecision;
use futures::sink::SinkExt;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the overlay server frame socket
    #[clap(long, default_value = "127.0.0.1:3001")]
    socket_address: String,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Stream name announced to the server
    #[clap(long, default_value = "webcam0")]
    name: String,

    /// Preferred capture width
    #[clap(long, default_value_t = 1280)]
    width: u32,

    /// Preferred capture height
    #[clap(long, default_value_t = 720)]
    height: u32,

    /// Preferred frames per second
    #[clap(long, default_value_t = 30)]
    fps: u32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let stream = TcpStream::connect(&args.socket_address).await?;
    log::info!("Connected to {}", &args.socket_address);
    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

    let capture = open_capture(
        &args.device,
        "MJPG",
        Some((args.width, args.height)),
        Some((1, args.fps)),
    );

    let (capture_fn, (width, height)) = match capture {
        Ok(capture) => capture,
        Err(err) => {
            // No retry: report the failure to the panel and give up.
            log::error!("{err}");
            let status = ProtoMsg::Status(StatusMsg::new(args.name.clone(), err.user_message()));
            transport.send(Bytes::from(status.serialize()?)).await?;
            return Err(err.into());
        }
    };

    log::info!("Capturing {width}x{height} from {}", &args.device);

    loop {
        match capture_fn() {
            Some(frame) => {
                let msg = ProtoMsg::Frame(FrameMsg::new(
                    args.name.clone(),
                    width,
                    height,
                    frame[..].to_vec(),
                ));
                transport.send(Bytes::from(msg.serialize()?)).await?;
            }
            None => {
                let message = "Camera stopped delivering frames.".to_owned();
                log::error!("{message}");
                let status = ProtoMsg::Status(StatusMsg::new(args.name.clone(), message));
                transport.send(Bytes::from(status.serialize()?)).await?;
                break;
            }
        }
    }

    Ok(())
}

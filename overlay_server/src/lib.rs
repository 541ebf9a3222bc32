//! Server that runs pretrained face models on incoming webcam frames and
//! serves the annotated stream plus a display panel to the browser.
pub mod analyzer;
pub mod data_socket;
pub mod endpoints;
pub mod meter;
pub mod nn;
pub mod overlay;
pub mod panel;
pub mod pubsub;
pub mod utils;

use bytes::Bytes;
use thingbuf::mpsc;

/// Error type.
pub type Error = Box<dyn std::error::Error>;

/// Frame slot handed from the data socket to the analyzer: source width,
/// source height, JPEG bytes and the broadcast sender for the annotated
/// result.
pub type ImageItem = (u32, u32, Vec<u8>, Option<pubsub::ChunkSender>);

pub type StaticImageSender = mpsc::StaticSender<ImageItem>;
pub type StaticImageReceiver = mpsc::StaticReceiver<ImageItem>;

/// Holds only a handful of frames so the analyzer always works on recent
/// input instead of a backlog.
pub static IMAGE_CHANNEL: mpsc::StaticChannel<ImageItem, 4> = mpsc::StaticChannel::new();

/// Wrap a JPEG buffer as one part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::from(
        [
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn jpeg_stream_item_is_framed_for_multipart() {
        let item = as_jpeg_stream_item(&[0xff, 0xd8, 0xff, 0xd9]);

        assert!(item.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(item.ends_with(b"\xff\xd9\r\n\r\n"));
    }
}

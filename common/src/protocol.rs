//! Protocol definition for the frame socket.
//!
use serde::{Deserialize, Serialize};

/// Messages sent from a capture client to the server.
#[derive(Debug, Deserialize, Serialize)]
pub enum ProtoMsg {
    Frame(FrameMsg),
    Status(StatusMsg),
}

/// One captured JPEG frame with its source dimensions.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FrameMsg {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl FrameMsg {
    pub fn new(id: String, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            id,
            width,
            height,
            data,
        }
    }
}

/// Human-readable status from the capture side, e.g. why the camera
/// could not be opened. Shown verbatim on the display panel.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StatusMsg {
    pub id: String,
    pub message: String,
}

impl StatusMsg {
    pub fn new(id: String, message: String) -> Self {
        Self { id, message }
    }
}

impl ProtoMsg {
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Box<bincode::ErrorKind>> {
        bincode::deserialize(bytes)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, Box<bincode::ErrorKind>> {
        bincode::serialize(self)
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::Error;

    #[test]
    fn test_frame_msg_roundtrip() -> Result<(), Error> {
        let frame_msg = FrameMsg::new("webcam0".into(), 1280, 720, vec![0xff, 0xd8, 0xff]);

        let serialized: Vec<u8> = bincode::serialize(&frame_msg)?;
        let deserialized: FrameMsg = bincode::deserialize(&serialized[..])?;

        assert_eq!(frame_msg, deserialized);

        Ok(())
    }

    #[test]
    fn test_status_msg_via_proto() -> Result<(), Error> {
        let msg = ProtoMsg::Status(StatusMsg::new(
            "webcam0".into(),
            "No camera found on this device.".into(),
        ));

        let bytes = msg.serialize()?;
        match ProtoMsg::deserialize(&bytes)? {
            ProtoMsg::Status(status) => {
                assert_eq!(status.id, "webcam0");
                assert!(status.message.contains("No camera"));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        Ok(())
    }
}

//! Protocol definition for the data socket.
//!
//! Every message travels in its own length-delimited frame and is encoded with `bincode`. A
//! connection starts with a `ConnectReq` naming the channel, followed by any number of
//! `FrameMsg`s carrying JPEG data.
use serde::{Deserialize, Serialize};

/// Definition of protocol messages.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ProtoMsg {
    ConnectReq(String),
    FrameMsg(FrameMsg),
}

/// Frame message.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FrameMsg {
    pub id: String,
    pub data: Vec<u8>,
}

impl FrameMsg {
    pub fn new(id: String, data: Vec<u8>) -> Self {
        Self { id, data }
    }
}

impl ProtoMsg {
    pub fn serialize(&self) -> Result<Vec<u8>, Box<bincode::ErrorKind>> {
        bincode::serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, Box<bincode::ErrorKind>> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::Error;

    #[test]
    fn test_connect_then_frame() -> Result<(), Error> {
        let connect = ProtoMsg::ConnectReq("kitchen".into()).serialize()?;
        let frame = ProtoMsg::FrameMsg(FrameMsg::new("kitchen".into(), vec![0xff, 0xd8, 0xff]))
            .serialize()?;

        assert_eq!(
            ProtoMsg::deserialize(&connect)?,
            ProtoMsg::ConnectReq("kitchen".into())
        );
        match ProtoMsg::deserialize(&frame)? {
            ProtoMsg::FrameMsg(msg) => {
                assert_eq!(msg.id, "kitchen");
                assert_eq!(msg.data, vec![0xff, 0xd8, 0xff]);
            }
            other => panic!("unexpected message {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(ProtoMsg::deserialize(&[0xde, 0xad, 0xbe, 0xef, 0x01]).is_err());
    }
}

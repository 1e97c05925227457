use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use crate::{
    block::{BlockData, BlockInfo},
    Bitfield,
};
use super::PeerError;

// Generous ceiling on a single frame: a block message is ~16 KiB and even
// huge torrents have bitfields well under this.
const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

#[cfg_attr(test, derive(Debug, Clone, PartialEq, Eq))]
pub enum Message {

    // Zero-length frame; resets the peer's idle timer, nothing else.
    KeepAlive,

    // The peer will not answer our requests until further notice.
    Choke,

    Unchoke,

    Interested,

    NotInterested,

    // The peer acquired the piece at this index.
    Have { idx: u32 },

    // Packed piece set, MSB first; only valid as the opening message.
    Bitfield(Bitfield),

    Request(BlockInfo),

    // A block of piece payload.
    Block(BlockData),

    Cancel(BlockInfo),

}

pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {

    type Error = PeerError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match msg {

            // <len=0000>
            Message::KeepAlive => dst.put_u32(0),

            // <len=0001><id=0>
            Message::Choke => {
                dst.put_u32(1);
                dst.put_u8(0);
            }

            // <len=0001><id=1>
            Message::Unchoke => {
                dst.put_u32(1);
                dst.put_u8(1);
            }

            // <len=0001><id=2>
            Message::Interested => {
                dst.put_u32(1);
                dst.put_u8(2);
            }

            // <len=0001><id=3>
            Message::NotInterested => {
                dst.put_u32(1);
                dst.put_u8(3);
            }

            // <len=0005><id=4><piece index>
            Message::Have { idx } => {
                dst.put_u32(5);
                dst.put_u8(4);
                dst.put_u32(idx);
            }

            // <len=0001+X><id=5><bitfield>
            Message::Bitfield(bitfield) => {
                let raw = bitfield.as_raw_slice();
                dst.put_u32(1 + raw.len() as u32);
                dst.put_u8(5);
                dst.extend_from_slice(raw);
            }

            // <len=0013><id=6><index><begin><length>
            Message::Request(block) => {
                dst.put_u32(13);
                dst.put_u8(6);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.put_u32(block.len as u32);
            }

            // <len=0009+X><id=7><index><begin><block>
            Message::Block(block) => {
                dst.put_u32(9 + block.data.len() as u32);
                dst.put_u8(7);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.extend_from_slice(&block.data);
            }

            // <len=0013><id=8><index><begin><length>
            Message::Cancel(block) => {
                dst.put_u32(13);
                dst.put_u8(8);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.put_u32(block.len as u32);
            }
        }

        Ok(())
    }
}

impl Decoder for MessageCodec {

    type Item = Message;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        if src.len() < 4 {
            return Ok(None);
        }
        let msg_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if msg_len > MAX_FRAME_LEN {
            return Err(PeerError::OversizedMessage);
        }
        if src.len() < 4 + msg_len {
            // Wait for the rest of the frame.
            src.reserve(4 + msg_len - src.len());
            return Ok(None);
        }

        src.advance(4);
        if msg_len == 0 {
            return Ok(Some(Message::KeepAlive));
        }

        let id = src.get_u8();
        let msg = match id {
            0..=3 if msg_len != 1 => return Err(PeerError::InvalidMessage),
            0 => Message::Choke,
            1 => Message::Unchoke,
            2 => Message::Interested,
            3 => Message::NotInterested,
            4 => {
                if msg_len != 5 {
                    return Err(PeerError::InvalidMessage);
                }
                Message::Have { idx: src.get_u32() }
            }
            5 => {
                let mut raw = vec![0; msg_len - 1];
                src.copy_to_slice(&mut raw);
                Message::Bitfield(Bitfield::from_vec(raw))
            }
            6 | 8 => {
                if msg_len != 13 {
                    return Err(PeerError::InvalidMessage);
                }
                let block = BlockInfo {
                    piece_idx: src.get_u32() as usize,
                    offset: src.get_u32() as usize,
                    len: src.get_u32() as usize,
                };
                if id == 6 { Message::Request(block) } else { Message::Cancel(block) }
            }
            7 => {
                if msg_len < 9 {
                    return Err(PeerError::InvalidMessage);
                }
                let piece_idx = src.get_u32() as usize;
                let offset = src.get_u32() as usize;
                let mut data = vec![0; msg_len - 9];
                src.copy_to_slice(&mut data);
                Message::Block(BlockData { piece_idx, offset, data })
            }
            id => return Err(PeerError::InvalidMessageId(id)),
        };

        Ok(Some(msg))
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::KeepAlive => write!(f, "keep-alive"),
            Message::Choke => write!(f, "choke"),
            Message::Unchoke => write!(f, "unchoke"),
            Message::Interested => write!(f, "interested"),
            Message::NotInterested => write!(f, "not interested"),
            Message::Have { idx } => write!(f, "have {}", idx),
            Message::Bitfield(bf) => write!(f, "bitfield with {} pieces", bf.count_ones()),
            Message::Request(block) => write!(
                f,
                "request {{ piece: {}, offset: {}, len: {} }}",
                block.piece_idx, block.offset, block.len,
            ),
            Message::Block(block) => write!(
                f,
                "block {{ piece: {}, offset: {}, len: {} }}",
                block.piece_idx, block.offset, block.data.len(),
            ),
            Message::Cancel(block) => write!(
                f,
                "cancel {{ piece: {}, offset: {}, len: {} }}",
                block.piece_idx, block.offset, block.len,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use bitvec::prelude::*;
    use super::*;

    #[test]
    fn encode_decode_stream() {

        let mut wire = BytesMut::new();
        // Keep-alive
        wire.extend_from_slice(&[0, 0, 0, 0]);
        // Choke / unchoke / interested / not interested
        wire.extend_from_slice(&[0, 0, 0, 1, 0]);
        wire.extend_from_slice(&[0, 0, 0, 1, 1]);
        wire.extend_from_slice(&[0, 0, 0, 1, 2]);
        wire.extend_from_slice(&[0, 0, 0, 1, 3]);
        // Have 11
        wire.extend_from_slice(&[0, 0, 0, 5, 4, 0, 0, 0, 0xb]);
        // Bitfield
        wire.extend_from_slice(&[0, 0, 0, 4, 5, 0x01, 0x02, 0x03]);
        // Request piece 11, offset 0x134000, len 0x4000
        wire.extend_from_slice(&[0, 0, 0, 0xd, 6, 0, 0, 0, 0xb, 0, 0x13, 0x40, 0, 0, 0, 0x40, 0]);
        // Block piece 11, offset 0x134000, 3 payload bytes
        wire.extend_from_slice(&[0, 0, 0, 12, 7, 0, 0, 0, 0xb, 0, 0x13, 0x40, 0, 1, 2, 3]);
        // Cancel, same shape as request
        wire.extend_from_slice(&[0, 0, 0, 0xd, 8, 0, 0, 0, 0xb, 0, 0x13, 0x40, 0, 0, 0, 0x40, 0]);

        let expected = [
            Message::KeepAlive,
            Message::Choke,
            Message::Unchoke,
            Message::Interested,
            Message::NotInterested,
            Message::Have { idx: 0xb },
            Message::Bitfield(BitVec::<u8, Msb0>::from_slice(&[0x01, 0x02, 0x03])),
            Message::Request(BlockInfo { piece_idx: 0xb, offset: 0x134000, len: 0x4000 }),
            Message::Block(BlockData { piece_idx: 0xb, offset: 0x134000, data: vec![1, 2, 3] }),
            Message::Cancel(BlockInfo { piece_idx: 0xb, offset: 0x134000, len: 0x4000 }),
        ];

        let mut out = BytesMut::new();
        let expected_wire = wire.clone();
        for msg in expected.into_iter() {
            MessageCodec.encode(msg.clone(), &mut out).unwrap();
            let decoded = MessageCodec.decode(&mut wire).unwrap().unwrap();
            assert_eq!(decoded, msg);
        }
        assert_eq!(out, expected_wire);
    }

    #[test]
    fn decode_across_chunks() {
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&[0, 0, 0]);
        assert_eq!(MessageCodec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&[1, 2]);
        assert_eq!(MessageCodec.decode(&mut buf).unwrap(), Some(Message::Interested));

        buf.extend_from_slice(&[0, 0, 0, 12, 7, 0, 0, 0, 0xb, 0, 0x13, 0x40, 0, 1]);
        assert_eq!(MessageCodec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(&[2, 3]);
        assert_eq!(
            MessageCodec.decode(&mut buf).unwrap(),
            Some(Message::Block(BlockData { piece_idx: 0xb, offset: 0x134000, data: vec![1, 2, 3] })),
        );
    }

    #[test]
    fn decode_empty_and_partial_prefix() {
        let mut empty = BytesMut::new();
        assert_eq!(MessageCodec.decode(&mut empty).unwrap(), None);

        let mut partial = BytesMut::from(&[0u8, 1, 2][..]);
        assert_eq!(MessageCodec.decode(&mut partial).unwrap(), None);
    }

    #[test]
    fn invalid_message_id() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 1, 255][..]);
        assert!(matches!(
            MessageCodec.decode(&mut buf),
            Err(PeerError::InvalidMessageId(255)),
        ));
    }

    #[test]
    fn mismatched_payload_length() {
        // A have frame must be exactly 5 bytes of payload.
        let mut buf = BytesMut::from(&[0u8, 0, 0, 3, 4, 0, 0][..]);
        assert!(matches!(
            MessageCodec.decode(&mut buf),
            Err(PeerError::InvalidMessage),
        ));
    }

    #[test]
    fn oversized_frame() {
        let mut buf = BytesMut::from(&[0xffu8, 0xff, 0xff, 0xff][..]);
        assert!(matches!(
            MessageCodec.decode(&mut buf),
            Err(PeerError::OversizedMessage),
        ));
    }
}

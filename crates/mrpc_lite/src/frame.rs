use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use tonic::Status;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};

/// The reserved payload that marks the end of a stream on a topic.
///
/// A lone zero byte is never a valid protobuf message (field number 0 is
/// reserved), so it cannot collide with an application frame.
pub const END_OF_STREAM: &[u8] = &[0];

/// One message boundary of a streaming call, carried as raw bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Frame {
    data: Bytes,
}

impl Frame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// The end-of-stream sentinel frame.
    pub fn end_of_stream() -> Self {
        Self::new(Bytes::from_static(END_OF_STREAM))
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.data.as_ref() == END_OF_STREAM
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append `other` to this frame in place.
    pub fn append(&mut self, other: &Frame) {
        let mut buf = BytesMut::with_capacity(self.data.len() + other.data.len());
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&other.data);
        self.data = buf.freeze();
    }

    /// Build a new frame from this one followed by `others`. Inputs are untouched.
    pub fn concat<'a>(&self, others: impl IntoIterator<Item = &'a Frame>) -> Frame {
        let mut buf = BytesMut::from(self.data.as_ref());
        for other in others {
            buf.extend_from_slice(&other.data);
        }
        Frame::new(buf.freeze())
    }

    /// Lowercase hex rendering, used in diagnostics.
    pub fn to_hex(&self) -> String {
        hex(&self.data)
    }
}

pub(crate) fn hex(data: &[u8]) -> String {
    use fmt::Write;

    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Frame").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&'static [u8]> for Frame {
    fn from(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }
}

impl From<&'static str> for Frame {
    fn from(data: &'static str) -> Self {
        Self::new(Bytes::from_static(data.as_bytes()))
    }
}

impl From<Frame> for Bytes {
    fn from(frame: Frame) -> Self {
        frame.data
    }
}

/// A gRPC codec that passes message bodies through as [`Frame`]s without decoding them.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Encode = Frame;
    type Decode = Frame;
    type Encoder = RawEncoder;
    type Decoder = RawDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        RawEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawDecoder
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawEncoder;

impl Encoder for RawEncoder {
    type Item = Frame;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put(item.data);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawDecoder;

impl Decoder for RawDecoder {
    type Item = Frame;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let len = src.remaining();
        Ok(Some(Frame::new(src.copy_to_bytes(len))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_leaves_inputs_untouched() {
        let a = Frame::from("ab");
        let b = Frame::from("cd");
        let c = Frame::from("e");

        let joined = a.concat([&b, &c]);
        assert_eq!(joined.as_bytes().as_ref(), b"abcde");
        assert_eq!(a.as_bytes().as_ref(), b"ab");
        assert_eq!(b.as_bytes().as_ref(), b"cd");
    }

    #[test]
    fn test_append_mutates_receiver() {
        let mut a = Frame::from("ab");
        a.append(&Frame::from("cd"));
        assert_eq!(a.as_bytes().as_ref(), b"abcd");
    }

    #[test]
    fn test_end_of_stream() {
        assert!(Frame::end_of_stream().is_end_of_stream());
        assert!(!Frame::from("abc").is_end_of_stream());
        assert!(!Frame::default().is_end_of_stream());
        assert!(!Frame::from(vec![0, 0]).is_end_of_stream());
    }

    #[test]
    fn test_hex_rendering() {
        assert_eq!(Frame::from(vec![0x00, 0xab, 0x10]).to_hex(), "00ab10");
        assert_eq!(Frame::default().to_hex(), "");
        assert_eq!(format!("{:?}", Frame::from("A")), "Frame(\"41\")");
    }
}

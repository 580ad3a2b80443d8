use crate::error::ProtocolError;
use crate::handshake;
use crate::parser::{self, Action, State};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

/// Longest control line tracked before it is forwarded as an opaque line.
pub const MAX_CONTROL_LINE: usize = 64 * 1024;

/// Payload bytes accumulated before a partial flush.
pub const PAYLOAD_FLUSH_THRESHOLD: usize = 64 * 1024;

/// Bytes that are ready to be forwarded, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub bytes: Bytes,
    /// Identity named by the `CONNECT` frame that closed this segment.
    pub identity: Option<String>,
}

/// Splits a client byte stream into forwardable segments.
///
/// The decoder never rewrites or drops bytes: concatenating every segment it
/// yields reproduces the input exactly. It only decides where a segment ends,
/// which is at frame boundaries, or inside a long payload or line once a
/// threshold is reached.
#[derive(Debug, Default)]
pub struct FrameCodec {
    state: State,
    /// Bytes of `src` already fed to the state machine.
    scanned: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn split(&mut self, src: &mut BytesMut, identity: Option<String>) -> Segment {
        let bytes = src.split_to(self.scanned).freeze();
        self.scanned = 0;
        Segment { bytes, identity }
    }

    /// Passes over as much of a payload as is buffered, stopping at the
    /// flush threshold.
    fn skip_payload(&mut self, src: &mut BytesMut, remaining: usize) -> Option<Segment> {
        let room = PAYLOAD_FLUSH_THRESHOLD.saturating_sub(self.scanned).max(1);
        let skip = remaining.min(src.len() - self.scanned).min(room);
        self.scanned += skip;

        if skip == remaining {
            self.state = State::Start;
            return Some(self.split(src, None));
        }

        self.state = State::Payload {
            remaining: remaining - skip,
        };
        (self.scanned >= PAYLOAD_FLUSH_THRESHOLD).then(|| self.split(src, None))
    }

    fn handshake(&mut self, src: &mut BytesMut, start: usize) -> Segment {
        let argument = parser::argument(&src[..self.scanned], start);
        let identity = match handshake::resolve_identity(argument) {
            Ok(Some(identity)) => {
                debug!("CONNECT names identity: {}", identity);
                Some(identity)
            }
            Ok(None) => {
                debug!("CONNECT carries no identity");
                None
            }
            Err(e) => {
                debug!("Ignoring CONNECT identity: {}", e);
                None
            }
        };
        self.split(src, identity)
    }
}

impl Decoder for FrameCodec {
    type Item = Segment;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while self.scanned < src.len() {
            if let State::Payload { remaining } = self.state {
                match self.skip_payload(src, remaining) {
                    Some(segment) => return Ok(Some(segment)),
                    None => continue,
                }
            }

            let byte = src[self.scanned];
            self.scanned += 1;
            let (next, action) = parser::transition(self.state, byte, &src[..self.scanned]);
            self.state = next;

            match action {
                Action::Continue => {}
                Action::Flush => return Ok(Some(self.split(src, None))),
                Action::Handshake { start } => return Ok(Some(self.handshake(src, start))),
            }

            if self.scanned >= MAX_CONTROL_LINE && !matches!(self.state, State::Payload { .. }) {
                if let State::Argument { op, .. } = self.state {
                    warn!(
                        "{} control line exceeds {} bytes, forwarding it untracked",
                        String::from_utf8_lossy(op.keyword()),
                        MAX_CONTROL_LINE
                    );
                }
                self.state = State::Ignore;
                return Ok(Some(self.split(src, None)));
            }
        }

        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(segment) = self.decode(src)? {
            return Ok(Some(segment));
        }
        if src.is_empty() {
            return Ok(None);
        }

        debug!(
            "Stream ended inside a frame ({:?}), flushing {} bytes",
            self.state,
            src.len()
        );
        self.scanned = src.len();
        self.state = State::Start;
        Ok(Some(self.split(src, None)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    /// Feeds `input` in `chunk`-sized pieces and collects every segment,
    /// including the ones produced at end of stream.
    fn decode_chunked(input: &[u8], chunk: usize) -> Vec<Segment> {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let mut segments = Vec::new();
        for piece in input.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(segment) = codec.decode(&mut buf).unwrap() {
                segments.push(segment);
            }
        }
        while let Some(segment) = codec.decode_eof(&mut buf).unwrap() {
            segments.push(segment);
        }
        segments
    }

    fn concat(segments: &[Segment]) -> Vec<u8> {
        segments
            .iter()
            .flat_map(|segment| segment.bytes.iter().copied())
            .collect()
    }

    fn identities(segments: &[Segment]) -> Vec<String> {
        segments
            .iter()
            .filter_map(|segment| segment.identity.clone())
            .collect()
    }

    #[test]
    fn forwards_mixed_traffic_verbatim() {
        let input = b"CONNECT {\"user\":\"alice\"}\r\nPING\r\nPUB test 5\r\nhello\r\nPING\r\nPUB test2 5\r\nworld\r\n";
        let segments = decode_chunked(input, input.len());

        assert_eq!(concat(&segments), input);
        assert_eq!(identities(&segments), vec!["alice".to_string()]);
        let frames: Vec<&[u8]> = segments.iter().map(|s| s.bytes.as_ref()).collect();
        let expected: Vec<&[u8]> = vec![
            b"CONNECT {\"user\":\"alice\"}\r\n",
            b"PING\r\n",
            b"PUB test 5\r\nhello\r\n",
            b"PING\r\n",
            b"PUB test2 5\r\nworld\r\n",
        ];
        assert_eq!(frames, expected);
    }

    #[test]
    fn frames_are_never_duplicated() {
        let input = b"PING\r\nPONG\r\nSUB test 1\r\nUNSUB 1\r\n";
        let segments = decode_chunked(input, input.len());
        assert_eq!(segments.len(), 4);
        assert_eq!(concat(&segments), input);
    }

    #[test]
    fn binary_payload_is_not_mistaken_for_frames() {
        let mut payload = b"\r\nPUB fake 999\r\nCONNECT {\"user\":\"mallory\"}\r\n".to_vec();
        payload.extend(0u8..=255);
        let mut input = format!("PUB bin {}\r\n", payload.len()).into_bytes();
        input.extend_from_slice(&payload);
        input.extend_from_slice(b"\r\nPING\r\n");

        let segments = decode_chunked(&input, input.len());

        assert_eq!(concat(&segments), input);
        assert_eq!(segments.len(), 2);
        assert!(identities(&segments).is_empty());
        assert_eq!(segments[1].bytes.as_ref(), b"PING\r\n");
    }

    #[test]
    fn one_byte_reads_produce_the_same_frames() {
        let input = b"CONNECT {\"user\":\"bob\"}\r\nHPUB a 3 8\r\nH\r\nhello\r\nPUB b 3\r\n\r\n\n\r\nPING\r\n";
        let whole = decode_chunked(input, input.len());
        let bytewise = decode_chunked(input, 1);

        assert_eq!(whole, bytewise);
        assert_eq!(concat(&bytewise), input);
        assert_eq!(identities(&bytewise), vec!["bob".to_string()]);
        assert_eq!(bytewise.len(), 4);
    }

    #[test]
    fn large_payload_is_flushed_in_bounded_pieces() {
        let payload = vec![b'\n'; 1024 * 1024];
        let mut input = format!("PUB big {}\r\n", payload.len()).into_bytes();
        input.extend_from_slice(&payload);
        input.extend_from_slice(b"\r\n");

        for chunk in [input.len(), 8192, 1000] {
            let segments = decode_chunked(&input, chunk);
            assert_eq!(concat(&segments).len(), input.len());
            assert_eq!(concat(&segments), input);
            assert!(segments.len() > 1);
            assert!(segments.iter().all(|s| s.bytes.len() <= PAYLOAD_FLUSH_THRESHOLD));
        }
    }

    #[test]
    fn malformed_size_forwards_line_by_line() {
        let input = b"PUB foo bar\r\nhello\r\n";
        let segments = decode_chunked(input, input.len());
        assert_eq!(concat(&segments), input);
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn invalid_token_yields_no_identity() {
        let input = b"CONNECT {\"jwt\":\"invalid.jwt.token\"}\r\nPING\r\n";
        let segments = decode_chunked(input, 3);
        assert_eq!(concat(&segments), input);
        assert!(identities(&segments).is_empty());
    }

    #[test]
    fn truncated_frame_is_flushed_at_eof() {
        let input = b"PING\r\nPUB foo 10\r\nhel";
        let segments = decode_chunked(input, 4);
        assert_eq!(concat(&segments), input);
        assert_eq!(segments.last().unwrap().bytes.as_ref(), b"PUB foo 10\r\nhel");
    }

    #[test]
    fn overlong_control_line_is_forwarded_untracked() {
        let mut input = b"CONNECT ".to_vec();
        input.extend(std::iter::repeat_n(b'x', MAX_CONTROL_LINE));
        input.extend_from_slice(b"\r\nPING\r\n");

        let segments = decode_chunked(&input, 4096);
        assert_eq!(concat(&segments), input);
        assert!(identities(&segments).is_empty());
        assert_eq!(segments.last().unwrap().bytes.as_ref(), b"PING\r\n");
    }

    #[tokio::test]
    async fn framed_read_over_async_reader() {
        let input: &[u8] = b"CONNECT {\"user\":\"alice\"}\r\nPUB s 3\r\nabc\r\n";
        let mut frames = FramedRead::new(input, FrameCodec::new());

        let first = frames.next().await.unwrap().unwrap();
        assert_eq!(first.identity.as_deref(), Some("alice"));
        let second = frames.next().await.unwrap().unwrap();
        assert_eq!(second.bytes.as_ref(), b"PUB s 3\r\nabc\r\n");
        assert!(frames.next().await.is_none());
    }
}

//! Multiplexed log framing — tolerant demux of the engine's raw byte stream.
//!
//! Attached streams from the engine interleave stdout and stderr using an
//! 8-byte frame header: `[stream_type(1) | 3 pad | size(4 big-endian)]`
//! followed by `size` payload bytes. TTY sessions skip the framing entirely,
//! so the demuxer sniffs each frame and falls back to verbatim passthrough
//! on anything that does not look like a header.

use bytes::Bytes;

/// Frames larger than this cannot be real engine frames; treat the stream
/// as un-multiplexed.
const MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stderr: bool,
    pub payload: Bytes,
}

/// Split a raw buffer into demultiplexed frames.
///
/// Returns the parsed frames plus the number of bytes consumed; a trailing
/// partial frame is left unconsumed so the caller can buffer it. If the
/// buffer does not start with a plausible frame header the whole buffer is
/// passed through as a single stdout frame.
pub fn demux(buf: &[u8]) -> (Vec<Frame>, usize) {
    if !looks_multiplexed(buf) {
        if buf.is_empty() {
            return (Vec::new(), 0);
        }
        return (
            vec![Frame {
                stderr: false,
                payload: Bytes::copy_from_slice(buf),
            }],
            buf.len(),
        );
    }

    let mut frames = Vec::new();
    let mut offset = 0;

    while buf.len() - offset >= 8 {
        let header = &buf[offset..offset + 8];
        let size = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

        if size == 0 || size > MAX_FRAME_SIZE || !matches!(header[0], 0 | 1 | 2) {
            // Mid-stream garbage: pass the remainder through verbatim.
            frames.push(Frame {
                stderr: false,
                payload: Bytes::copy_from_slice(&buf[offset..]),
            });
            offset = buf.len();
            break;
        }

        if buf.len() - offset - 8 < size {
            // Partial frame; wait for more bytes.
            break;
        }

        frames.push(Frame {
            stderr: header[0] == 2,
            payload: Bytes::copy_from_slice(&buf[offset + 8..offset + 8 + size]),
        });
        offset += 8 + size;
    }

    (frames, offset)
}

/// Normalize one engine log chunk: if the bytes carry the multiplexed frame
/// format, unwrap them into per-stream chunks; otherwise pass the chunk
/// through untouched.
pub fn normalize(chunk: crate::engine::LogChunk) -> Vec<crate::engine::LogChunk> {
    if !looks_multiplexed(&chunk.data) {
        return vec![chunk];
    }
    let (frames, consumed) = demux(&chunk.data);
    if consumed < chunk.data.len() || frames.is_empty() {
        // Truncated tail; keep the raw bytes rather than dropping them.
        return vec![chunk];
    }
    frames
        .into_iter()
        .map(|frame| crate::engine::LogChunk {
            stderr: frame.stderr,
            data: frame.payload,
        })
        .collect()
}

/// A buffer looks multiplexed when it starts with a valid frame header:
/// stream type 0–2, three zero pad bytes, and a sane size.
fn looks_multiplexed(buf: &[u8]) -> bool {
    if buf.len() < 8 {
        return false;
    }
    if !matches!(buf[0], 0 | 1 | 2) || buf[1] != 0 || buf[2] != 0 || buf[3] != 0 {
        return false;
    }
    let size = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    size > 0 && size <= MAX_FRAME_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(stream_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![stream_type, 0, 0, 0];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_demux_single_stdout_frame() {
        let buf = frame_bytes(1, b"hello\n");
        let (frames, consumed) = demux(&buf);
        assert_eq!(consumed, buf.len());
        assert_eq!(frames.len(), 1);
        assert!(!frames[0].stderr);
        assert_eq!(frames[0].payload, Bytes::from_static(b"hello\n"));
    }

    #[test]
    fn test_demux_interleaved_streams() {
        let mut buf = frame_bytes(1, b"out");
        buf.extend(frame_bytes(2, b"err"));
        buf.extend(frame_bytes(1, b"more"));

        let (frames, consumed) = demux(&buf);
        assert_eq!(consumed, buf.len());
        assert_eq!(frames.len(), 3);
        assert!(!frames[0].stderr);
        assert!(frames[1].stderr);
        assert_eq!(frames[1].payload, Bytes::from_static(b"err"));
        assert!(!frames[2].stderr);
    }

    #[test]
    fn test_demux_partial_frame_left_unconsumed() {
        let mut buf = frame_bytes(1, b"done");
        let partial = frame_bytes(2, b"incomplete payload");
        buf.extend_from_slice(&partial[..10]); // header + 2 payload bytes

        let (frames, consumed) = demux(&buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(consumed, frame_bytes(1, b"done").len());
    }

    #[test]
    fn test_demux_tty_passthrough() {
        // TTY output has no frame headers; first byte is printable ASCII.
        let buf = b"$ echo hello\r\nhello\r\n";
        let (frames, consumed) = demux(buf);
        assert_eq!(consumed, buf.len());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, Bytes::copy_from_slice(&buf[..]));
    }

    #[test]
    fn test_demux_oversized_frame_passthrough() {
        let mut buf = vec![1u8, 0, 0, 0];
        buf.extend_from_slice(&(2 * 1024 * 1024u32).to_be_bytes()); // 2 MiB "frame"
        buf.extend_from_slice(b"payload");

        let (frames, consumed) = demux(&buf);
        assert_eq!(consumed, buf.len());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.len(), buf.len());
    }

    #[test]
    fn test_demux_zero_size_frame_passthrough() {
        let mut buf = vec![1u8, 0, 0, 0, 0, 0, 0, 0];
        buf.extend_from_slice(b"tail");
        let (frames, consumed) = demux(&buf);
        assert_eq!(consumed, buf.len());
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_demux_empty_buffer() {
        let (frames, consumed) = demux(&[]);
        assert!(frames.is_empty());
        assert_eq!(consumed, 0);
    }

    #[test]
    fn test_normalize_unwraps_framed_chunk() {
        let mut raw = frame_bytes(1, b"out line\n");
        raw.extend(frame_bytes(2, b"err line\n"));
        let chunks = normalize(crate::engine::LogChunk {
            stderr: false,
            data: Bytes::from(raw),
        });
        assert_eq!(chunks.len(), 2);
        assert!(!chunks[0].stderr);
        assert!(chunks[1].stderr);
        assert_eq!(chunks[1].data, Bytes::from_static(b"err line\n"));
    }

    #[test]
    fn test_normalize_passes_plain_chunk_through() {
        let chunk = crate::engine::LogChunk {
            stderr: true,
            data: Bytes::from_static(b"plain stderr text"),
        };
        let out = normalize(chunk);
        assert_eq!(out.len(), 1);
        assert!(out[0].stderr);
        assert_eq!(out[0].data, Bytes::from_static(b"plain stderr text"));
    }

    #[test]
    fn test_demux_garbage_after_valid_frame() {
        let mut buf = frame_bytes(1, b"ok");
        buf.extend_from_slice(&[9, 9, 9, 9, 9, 9, 9, 9, 9]); // not a header

        let (frames, consumed) = demux(&buf);
        assert_eq!(consumed, buf.len());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload, Bytes::from_static(b"ok"));
        assert_eq!(frames[1].payload.len(), 9);
    }
}

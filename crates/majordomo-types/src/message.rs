//! Multi-frame messages.
//!
//! A [`Message`] is an ordered list of opaque [`Frame`]s. Envelopes are built
//! by pushing routing/protocol/header frames onto the front and taken apart by
//! popping them off again; application payload frames behind the envelope are
//! never inspected.

use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;

/// A single opaque frame.
pub type Frame = Bytes;

/// An ordered sequence of frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    frames: VecDeque<Frame>,
}

impl Message {
    /// Create an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a message from any iterator of frame-like values.
    pub fn from_frames<I, F>(frames: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Frame>,
    {
        Self {
            frames: frames.into_iter().map(Into::into).collect(),
        }
    }

    /// Stack a frame onto the front of the envelope.
    pub fn push_front(&mut self, frame: impl Into<Frame>) {
        self.frames.push_front(frame.into());
    }

    /// Append a payload frame.
    pub fn push_back(&mut self, frame: impl Into<Frame>) {
        self.frames.push_back(frame.into());
    }

    /// Remove the outermost frame.
    pub fn pop_front(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Positional access.
    pub fn get(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    /// Positional access, decoded as UTF-8 (lossy).
    pub fn get_str(&self, index: usize) -> Option<String> {
        self.get(index)
            .map(|f| String::from_utf8_lossy(f).into_owned())
    }

    /// Number of frames.
    pub fn parts(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Iterate over the frames, outermost first.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    /// Total payload size in bytes, excluding framing overhead.
    pub fn byte_len(&self) -> usize {
        self.frames.iter().map(|f| f.len()).sum()
    }
}

impl<F: Into<Frame>> FromIterator<F> for Message {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        Self::from_frames(iter)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::from_frames([Bytes::copy_from_slice(s.as_bytes())])
    }
}

impl fmt::Display for Message {
    /// One line per frame: `[len] text` for printable frames, hex otherwise.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "[{:03}] ", frame.len())?;
            if frame.iter().all(|b| (0x20..0x7f).contains(b)) {
                write!(f, "{}", String::from_utf8_lossy(frame))?;
            } else {
                for b in frame.iter() {
                    write!(f, "{b:02X}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_stacking() {
        let mut msg = Message::from("payload");
        msg.push_front("header");
        msg.push_front("MDPW0X");
        assert_eq!(msg.parts(), 3);
        assert_eq!(msg.pop_front().unwrap(), Bytes::from_static(b"MDPW0X"));
        assert_eq!(msg.get_str(0).unwrap(), "header");
        assert_eq!(msg.get_str(1).unwrap(), "payload");
    }

    #[test]
    fn test_equality_is_byte_exact() {
        let a = Message::from_frames([vec![0u8, 1, 2], vec![255]]);
        let b = Message::from_frames([vec![0u8, 1, 2], vec![255]]);
        let c = Message::from_frames([vec![0u8, 1], vec![2, 255]]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.byte_len(), c.byte_len());
    }

    #[test]
    fn test_display_text_and_binary() {
        let msg = Message::from_frames([b"ping".to_vec(), vec![0x01, 0xAB]]);
        let printed = msg.to_string();
        assert_eq!(printed, "[004] ping\n[002] 01AB");
    }

    #[test]
    fn test_empty_message() {
        let mut msg = Message::new();
        assert!(msg.is_empty());
        assert!(msg.pop_front().is_none());
        assert!(msg.get(0).is_none());
    }
}

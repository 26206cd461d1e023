//! The two shapes a caller-supplied key can take, matched against the
//! trie's [`crate::key::Mode`] at every public entry point.

use crate::key::Mode;
use crate::JudyError;

#[derive(Debug, Clone, Copy)]
pub enum KeyInput<'a> {
    Bytes(&'a [u8]),
    Digits(&'a [u64]),
}

impl<'a> KeyInput<'a> {
    /// Validate `self` against `mode`, rejecting zero bytes in
    /// byte-string mode (spec §9's Open Question, resolved: reject
    /// rather than silently truncate) and wrong-length digit buffers.
    pub fn check(self, mode: Mode) -> Result<(), JudyError> {
        match (self, mode) {
            (KeyInput::Bytes(b), Mode::ByteString { max }) => {
                if b.len() > max.saturating_sub(1) {
                    return Err(JudyError::InvalidKey("key longer than max_key_bytes"));
                }
                if b.contains(&0) {
                    return Err(JudyError::InvalidKey(
                        "byte-string mode keys may not contain a zero byte",
                    ));
                }
                Ok(())
            }
            (KeyInput::Digits(d), Mode::Fixed { depth }) => {
                if d.len() != depth {
                    return Err(JudyError::InvalidKey("digit count does not match trie depth"));
                }
                Ok(())
            }
            (KeyInput::Bytes(_), Mode::Fixed { .. }) => {
                Err(JudyError::InvalidKey("this trie is in fixed-integer mode"))
            }
            (KeyInput::Digits(_), Mode::ByteString { .. }) => {
                Err(JudyError::InvalidKey("this trie is in byte-string mode"))
            }
        }
    }

    #[inline]
    pub fn byte_len(self) -> usize {
        match self {
            KeyInput::Bytes(b) => b.len(),
            KeyInput::Digits(d) => d.len() * crate::node::SLOT_WIDTH,
        }
    }
}

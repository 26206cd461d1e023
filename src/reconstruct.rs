//! Key reconstruction: rebuilds the key associated with the cursor's
//! current position by replaying the descent path recorded in its
//! frames, grounded on `judy_key` in the reference source (spec
//! §4.10).
//!
//! The original writes either a byte string or a digit array from the
//! same function, switching on `judy->depth`; this crate keeps that as
//! one function parameterized by [`Mode`], always writing into a plain
//! byte buffer -- a fixed-mode digit is simply its `SLOT_WIDTH`
//! big-endian bytes written in sequence, so byte-oriented output is
//! equivalent and the caller can reinterpret it as digits if needed.

use crate::cursor::Cursor;
use crate::key::{keysize_at, Mode};
use crate::node::{tag_to_class, LinearNode, SpanNode, Tag, CLASS_LOGICAL_SIZE, SPAN_BYTES};

/// Write the current cursor's key into `buffer`, stopping at `mode`'s
/// `max_len()` or (in byte-string mode) at the implicit terminator,
/// and return the number of bytes written. An unpositioned cursor
/// (`level == 0`) yields length zero (spec §7).
pub fn reconstruct_key(mode: Mode, cursor: &Cursor, buffer: &mut [u8]) -> usize {
    let max = mode.max_len();
    let mut len = 0usize;
    let mut idx = 1usize;

    'frames: while len < max && idx <= cursor.level {
        let frame = cursor.frame(idx);
        match frame.next.tag() {
            Tag::Span => {
                let span = SpanNode::at(frame.next.as_ptr());
                let mut i = 0;
                while i < SPAN_BYTES {
                    let b = span.byte(i);
                    if b == 0 {
                        break;
                    }
                    if len >= max {
                        break 'frames;
                    }
                    if len < buffer.len() {
                        buffer[len] = b;
                    }
                    len += 1;
                    i += 1;
                }
            }
            Tag::Radix => {
                let byte = frame.slot as u8;
                if !mode.is_fixed() && byte == 0 {
                    // Terminator: nothing more follows (it shouldn't,
                    // since byte 0 is always a leaf), stop here.
                    break 'frames;
                }
                if len < buffer.len() {
                    buffer[len] = byte;
                }
                len += 1;
            }
            tag if tag.is_linear() => {
                let keysize = keysize_at(frame.off);
                let class = tag_to_class(tag);
                let node = LinearNode::at(frame.next.as_ptr(), CLASS_LOGICAL_SIZE[class], keysize);
                let value = node.key(frame.slot);
                for off in 0..keysize {
                    let shift = 8 * (keysize - 1 - off);
                    let b = ((value >> shift) & 0xFF) as u8;
                    if !mode.is_fixed() && b == 0 {
                        break 'frames;
                    }
                    if len >= max {
                        break 'frames;
                    }
                    if len < buffer.len() {
                        buffer[len] = b;
                    }
                    len += 1;
                }
            }
            _ => unreachable!(),
        }
        idx += 1;
    }
    len
}

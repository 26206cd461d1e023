//! Read-only descent: `slot()`/`strt()`'s search, grounded on
//! `judy_slot` in the reference source. Populates the cursor with the
//! path taken whether the search succeeds or fails, exactly as spec
//! §4.2 requires ("Side effect: populates the cursor to the point of
//! success or failure").

use crate::cursor::Cursor;
use crate::key::{digit_value, is_byte_string_leaf, keysize_at, Mode};
use crate::keyinput::KeyInput;
use crate::node::{tag_to_class, LinearNode, RadixNode, Slot, SpanNode, Tag, CLASS_LOGICAL_SIZE};

/// Find the cell addressed by `key`, or `None` if it is absent.
/// `root_addr` is the address of the `Slot`-sized cell holding the
/// trie's root (see [`crate::cursor::Frame::parent_addr`]). Returns
/// the raw address of the leaf slot on success.
pub fn lookup(root: Slot, root_addr: usize, mode: Mode, cursor: &mut Cursor, key: KeyInput) -> Option<usize> {
    cursor.reset();
    let mut next = root;
    let mut parent_addr = root_addr;
    let mut off = 0usize;
    let key_len = key.byte_len();

    while !next.is_empty() {
        cursor.push(next, off, 0, parent_addr);
        match next.tag() {
            Tag::Span => {
                let span = SpanNode::at(next.as_ptr());
                let remaining = key_len.saturating_sub(off);
                let tst = remaining.min(crate::node::SPAN_BYTES);
                let matches = (0..tst).all(|i| span.byte(i) == read_key_byte(key, off + i));
                if !matches {
                    return None;
                }
                // `tst < SPAN_BYTES` means the probe key ran out inside this
                // span; it's a match only if the span's own real content ends
                // at exactly that point too (its next stored byte is the
                // zero pad/terminator, not a real continuing byte).
                if tst < crate::node::SPAN_BYTES && span.byte(tst) == 0 {
                    return Some(addr_of_span_child(span));
                }
                if tst == crate::node::SPAN_BYTES {
                    parent_addr = addr_of_span_child(span);
                    next = span.child();
                    off += crate::node::SPAN_BYTES;
                    continue;
                }
                return None;
            }
            Tag::Radix => {
                let outer = RadixNode::at(next.as_ptr());
                let byte = if off < key_len { read_key_byte(key, off) } else { 0 };
                off += 1;
                cursor.set_top_slot(byte as usize);

                let inner_slot = outer.get((byte >> 4) as usize);
                if inner_slot.is_empty() {
                    return None;
                }
                let inner = RadixNode::at(inner_slot.as_ptr());
                let leaf = if mode.is_fixed() { off == mode.max_len() } else { byte == 0 };
                let child = inner.get((byte & 0x0F) as usize);
                if leaf {
                    return if child.is_empty() {
                        None
                    } else {
                        Some(addr_of_radix_slot(inner, (byte & 0x0F) as usize))
                    };
                }
                parent_addr = addr_of_radix_slot(inner, (byte & 0x0F) as usize);
                next = child;
                continue;
            }
            tag if tag.is_linear() => {
                let keysize = keysize_at(off);
                let node = LinearNode::at(next.as_ptr(), CLASS_LOGICAL_SIZE[tag_to_class(tag)], keysize);
                let value = digit_value(key, off, keysize);
                let cnt = node.capacity();

                let mut found: isize = -1;
                let mut test = 0u64;
                for i in (0..cnt).rev() {
                    test = node.key(i);
                    if test <= value {
                        found = i as isize;
                        break;
                    }
                }
                cursor.set_top_slot(if found >= 0 { found as usize } else { 0 });
                if found >= 0 && test == value {
                    let slot_idx = found as usize;
                    let leaf = if mode.is_fixed() {
                        off + keysize == mode.max_len()
                    } else {
                        is_byte_string_leaf(value)
                    };
                    if leaf {
                        return Some(addr_of_linear_child(node, slot_idx));
                    }
                    parent_addr = addr_of_linear_child(node, slot_idx);
                    next = node.child(slot_idx);
                    off += keysize;
                    continue;
                }
                return None;
            }
            _ => unreachable!(),
        }
    }
    None
}

#[inline]
fn read_key_byte(key: KeyInput, off: usize) -> u8 {
    match key {
        KeyInput::Bytes(b) => b.get(off).copied().unwrap_or(0),
        KeyInput::Digits(_) => {
            // Radix/span nodes descend byte-by-byte regardless of mode;
            // pull the containing word and slice out the requested byte
            // (big-endian, matching read_partial_key/write_partial_key).
            use crate::node::SLOT_WIDTH;
            let word_off = off - (off % SLOT_WIDTH);
            let v = digit_value(key, word_off, SLOT_WIDTH);
            (v >> (8 * (SLOT_WIDTH - 1 - (off % SLOT_WIDTH)))) as u8
        }
    }
}

#[inline]
pub(crate) fn addr_of_linear_child(node: LinearNode, i: usize) -> usize {
    node.base as usize + node.byte_size - (i + 1) * crate::node::SLOT_WIDTH
}

#[inline]
pub(crate) fn addr_of_radix_slot(table: RadixNode, i: usize) -> usize {
    table.base as usize + i * crate::node::SLOT_WIDTH
}

#[inline]
pub(crate) fn addr_of_span_child(span: SpanNode) -> usize {
    span.base as usize + CLASS_LOGICAL_SIZE[crate::node::CLASS_SPAN] - crate::node::SLOT_WIDTH
}

#[inline]
pub(crate) fn read_slot_at(addr: usize) -> Slot {
    unsafe { Slot(*(addr as *const usize)) }
}

#[inline]
pub(crate) fn write_slot_at(addr: usize, slot: Slot) {
    unsafe { *(addr as *mut usize) = slot.0 }
}

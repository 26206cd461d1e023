//! `del()`: removes the cell at the cursor's current position and
//! collapses any node emptied by the removal, grounded on `judy_del`
//! in the reference source (spec §4.9).
//!
//! Unlike [`crate::insert`] and [`crate::lookup`], deletion never
//! descends from the root -- it walks the existing [`Cursor`] stack
//! top to bottom, so it only runs after a `slot`/`strt`/`nxt`/`prv`
//! call has positioned the cursor on a real cell.

use crate::arena::Arena;
use crate::cursor::Cursor;
use crate::key::{keysize_at, Mode};
use crate::node::{tag_to_class, LinearNode, RadixNode, Slot, Tag, CLASS_LOGICAL_SIZE, CLASS_RADIX, CLASS_SPAN};
use crate::traverse::advance;

/// Delete the cell the cursor currently points at and return the
/// predecessor cell, or `None` if the cursor was unpositioned (a
/// no-op, spec §7) or the trie is now empty.
pub fn del(arena: &mut Arena, root_addr: usize, mode: Mode, cursor: &mut Cursor) -> Option<usize> {
    if !cursor.is_positioned() {
        return None;
    }

    while cursor.level > 0 {
        let frame = cursor.top();
        match frame.next.tag() {
            Tag::Span => {
                arena.free_class(frame.next.addr(), CLASS_SPAN);
                cursor.pop();
                continue;
            }
            Tag::Radix => {
                let outer = RadixNode::at(frame.next.as_ptr());
                let byte = frame.slot;
                let hi = byte >> 4;
                let lo = byte & 0x0F;
                let inner_slot = outer.get(hi);
                let inner = RadixNode::at(inner_slot.as_ptr());
                inner.set(lo, Slot::EMPTY);

                if inner.any_occupied() {
                    return advance(mode, cursor, false);
                }
                arena.free_class(inner_slot.addr(), CLASS_RADIX);
                outer.set(hi, Slot::EMPTY);

                if outer.any_occupied() {
                    return advance(mode, cursor, false);
                }
                arena.free_class(frame.next.addr(), CLASS_RADIX);
                cursor.pop();
                continue;
            }
            tag if tag.is_linear() => {
                let keysize = keysize_at(frame.off);
                let class = tag_to_class(tag);
                let node = LinearNode::at(frame.next.as_ptr(), CLASS_LOGICAL_SIZE[class], keysize);
                let cnt = node.capacity();
                let idx = frame.slot;

                // Close the gap: entries below `idx` shift up by one,
                // the now-vacated lowest slot is zeroed (spec §4.9).
                for i in (0..idx).rev() {
                    node.move_slot(i, i + 1);
                }
                node.clear_slot(0);

                if !node.child(cnt - 1).is_empty() {
                    // The predecessor is now sitting at `idx` (the
                    // shift moved it there); point the cursor one past
                    // it and let `advance`'s backward case step onto
                    // it, exactly like `judy_prv` re-entering with
                    // `stack.slot` incremented by the caller.
                    cursor.set_top_slot(idx + 1);
                    return advance(mode, cursor, false);
                }
                arena.free_class(frame.next.addr(), class);
                cursor.pop();
                continue;
            }
            _ => unreachable!(),
        }
    }

    crate::lookup::write_slot_at(root_addr, Slot::EMPTY);
    None
}

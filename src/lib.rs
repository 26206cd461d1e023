#[macro_use] extern crate error_type;
#[macro_use] extern crate lazy_static;

mod arena;
mod cursor;
mod delete;
mod insert;
mod key;
mod keyinput;
mod lookup;
mod node;
mod reconstruct;
mod traverse;

use arena::Arena;
use cursor::Cursor;
use key::Mode;
use keyinput::KeyInput;
use node::Slot;

/// Errors this crate's operations can fail with (spec §7).
#[derive(Debug)]
pub enum JudyError {
    /// Segment allocation failed. Operations that needed to allocate
    /// return this; the trie remains consistent (spec §7).
    OutOfMemory(&'static str),
    /// A key violates the trie's operating mode: a zero byte in
    /// byte-string mode, a key longer than `max_key_bytes`, a digit
    /// count that doesn't match the fixed-mode depth, or a key of the
    /// wrong kind for the trie's mode. Reimplementation-only: the
    /// original silently truncates on an embedded zero (spec §9 Open
    /// Questions); this crate rejects it instead.
    InvalidKey(&'static str),
    /// Reserved for an operation attempted on a handle with no arena of
    /// its own. In this crate that rule is enforced at the type level
    /// instead (a read-only clone is a [`ClonedTrie`], which has no
    /// mutating/allocating methods to call in the first place), so this
    /// variant is never constructed; it is kept so `JudyError` still
    /// has the three kinds spec §7 describes.
    NotOpen(&'static str),
}

/// A thin handle to a value cell: a raw pointer into the arena that
/// the caller reads and writes directly (spec §1, §6). The engine
/// never interprets or writes cell contents itself -- a zero cell
/// means "absent" (spec §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef(usize);

impl CellRef {
    #[inline]
    pub fn get(self) -> usize {
        unsafe { *(self.0 as *const usize) }
    }

    #[inline]
    pub fn set(self, value: usize) {
        unsafe { *(self.0 as *mut usize) = value }
    }
}

/// An ordered associative container mapping keys to value cells: a
/// Judy-style digital trie in either byte-string or fixed-integer mode
/// (spec §1, §3 "Trie handle"). Owns the arena backing every node in
/// its graph; dropping a `Trie` releases all of it (spec §5 `close`).
pub struct Trie {
    arena: Arena,
    root: Slot,
    mode: Mode,
    cursor: Cursor,
}

impl Trie {
    /// Open a trie. `depth == 0` selects byte-string mode, with keys
    /// up to `max_key_bytes` long; `depth > 0` selects fixed-integer
    /// mode with `depth` machine-word digits per key (spec §6 `open`).
    pub fn open(max_key_bytes: usize, depth: usize) -> Result<Trie, JudyError> {
        let mode = if depth == 0 {
            Mode::ByteString { max: max_key_bytes + 1 }
        } else {
            Mode::Fixed { depth }
        };
        let arena = Arena::new()?;
        let cursor = Cursor::new(mode.max_len());
        Ok(Trie { arena, root: Slot::EMPTY, mode, cursor })
    }

    #[inline]
    fn root_addr(&mut self) -> usize {
        &mut self.root as *mut Slot as usize
    }

    /// Allocate a scratch region from the arena, untyped and never
    /// recycled (spec §4.13, §6 `data`); used internally by
    /// [`Trie::clone_readonly`] and available to callers needing
    /// out-of-band storage tied to this trie's lifetime.
    pub fn data(&mut self, bytes: usize) -> Result<*mut u8, JudyError> {
        self.arena.alloc_data(bytes).map(|addr| addr as *mut u8)
    }

    /// Find or create the cell addressed by `key`, inserting whatever
    /// nodes are missing (spec §4.3, §6 `cell`). Rejects a zero byte
    /// or over-length key; requires byte-string mode.
    pub fn cell(&mut self, key: &[u8]) -> Result<CellRef, JudyError> {
        self.cell_input(KeyInput::Bytes(key))
    }

    /// Fixed-mode counterpart of [`Trie::cell`]: `digits` must have
    /// exactly this trie's configured depth.
    pub fn cell_digits(&mut self, digits: &[u64]) -> Result<CellRef, JudyError> {
        self.cell_input(KeyInput::Digits(digits))
    }

    fn cell_input(&mut self, key: KeyInput) -> Result<CellRef, JudyError> {
        key.check(self.mode)?;
        let root_addr = self.root_addr();
        let addr = insert::cell(&mut self.arena, root_addr, self.mode, &mut self.cursor, key)?;
        Ok(CellRef(addr))
    }

    /// Look up `key`, returning its cell or `None` if absent (spec §4.2,
    /// §6 `slot`). Populates the cursor with the descent path either way.
    pub fn slot(&mut self, key: &[u8]) -> Option<CellRef> {
        self.slot_input(KeyInput::Bytes(key))
    }

    /// Fixed-mode counterpart of [`Trie::slot`].
    pub fn slot_digits(&mut self, digits: &[u64]) -> Option<CellRef> {
        self.slot_input(KeyInput::Digits(digits))
    }

    fn slot_input(&mut self, key: KeyInput) -> Option<CellRef> {
        key.check(self.mode).ok()?;
        let root = self.root;
        let root_addr = self.root_addr();
        lookup::lookup(root, root_addr, self.mode, &mut self.cursor, key).map(CellRef)
    }

    /// Position the cursor at the smallest key `>= key`, returning its
    /// cell (spec §4.8, §6 `strt`).
    pub fn strt(&mut self, key: &[u8]) -> Option<CellRef> {
        self.strt_input(KeyInput::Bytes(key))
    }

    /// Fixed-mode counterpart of [`Trie::strt`].
    pub fn strt_digits(&mut self, digits: &[u64]) -> Option<CellRef> {
        self.strt_input(KeyInput::Digits(digits))
    }

    fn strt_input(&mut self, key: KeyInput) -> Option<CellRef> {
        key.check(self.mode).ok()?;
        let root = self.root;
        let root_addr = self.root_addr();
        traverse::strt(root, root_addr, self.mode, &mut self.cursor, key).map(CellRef)
    }

    /// Position the cursor at the trie's smallest key (spec §4.7 `first`).
    pub fn first(&mut self) -> Option<CellRef> {
        let root = self.root;
        let root_addr = self.root_addr();
        traverse::first(root, root_addr, self.mode, &mut self.cursor).map(CellRef)
    }

    /// Position the cursor at the trie's largest key (spec §6 `end`).
    pub fn end(&mut self) -> Option<CellRef> {
        let root = self.root;
        let root_addr = self.root_addr();
        traverse::last(root, root_addr, self.mode, &mut self.cursor).map(CellRef)
    }

    /// Move to the next key in order (spec §6 `nxt`). Equivalent to
    /// [`Trie::first`] if the cursor is unpositioned.
    pub fn nxt(&mut self) -> Option<CellRef> {
        let root = self.root;
        let root_addr = self.root_addr();
        traverse::next(root, root_addr, self.mode, &mut self.cursor).map(CellRef)
    }

    /// Move to the previous key in order (spec §6 `prv`). Equivalent
    /// to [`Trie::end`] if the cursor is unpositioned.
    pub fn prv(&mut self) -> Option<CellRef> {
        let root = self.root;
        let root_addr = self.root_addr();
        traverse::prev(root, root_addr, self.mode, &mut self.cursor).map(CellRef)
    }

    /// Write the current cursor's key into `buffer`, returning its
    /// length (spec §4.10, §6 `key`). An unpositioned cursor yields 0.
    pub fn key(&self, buffer: &mut [u8]) -> usize {
        reconstruct::reconstruct_key(self.mode, &self.cursor, buffer)
    }

    /// Delete the cell at the cursor's current position, returning its
    /// predecessor (spec §4.9, §6 `del`). A no-op on an unpositioned
    /// cursor.
    pub fn del(&mut self) -> Option<CellRef> {
        let root_addr = self.root_addr();
        delete::del(&mut self.arena, root_addr, self.mode, &mut self.cursor).map(CellRef)
    }

    /// Produce a read-only handle sharing this trie's node graph, with
    /// its own independent cursor (spec §4.11, §5). The clone holds a
    /// reference-counted handle onto the same arena segments, so the
    /// node graph it addresses stays valid even after `self` is
    /// dropped (spec §4.13, §9 "Clone semantics").
    pub fn clone_readonly(&self) -> ClonedTrie {
        ClonedTrie {
            _segments: self.arena.segments_handle(),
            root: self.root,
            mode: self.mode,
            cursor: Cursor::new(self.mode.max_len()),
        }
    }
}

/// A read-only view over a [`Trie`]'s node graph, produced by
/// [`Trie::clone_readonly`]. Carries a keep-alive handle onto the
/// source trie's arena segments but no allocator state of its own, so
/// it cannot allocate -- every mutating/allocating operation is simply
/// absent from its API, enforcing the "clone is read-only" rule by
/// type (spec §4.11, §9 Design Notes).
pub struct ClonedTrie {
    _segments: arena::SegmentsHandle,
    root: Slot,
    mode: Mode,
    cursor: Cursor,
}

impl ClonedTrie {
    pub fn slot(&mut self, key: &[u8]) -> Option<CellRef> {
        self.slot_input(KeyInput::Bytes(key))
    }

    pub fn slot_digits(&mut self, digits: &[u64]) -> Option<CellRef> {
        self.slot_input(KeyInput::Digits(digits))
    }

    fn slot_input(&mut self, key: KeyInput) -> Option<CellRef> {
        key.check(self.mode).ok()?;
        let root = self.root;
        let root_addr = &self.root as *const Slot as usize;
        lookup::lookup(root, root_addr, self.mode, &mut self.cursor, key).map(CellRef)
    }

    pub fn strt(&mut self, key: &[u8]) -> Option<CellRef> {
        let input = KeyInput::Bytes(key);
        input.check(self.mode).ok()?;
        let root = self.root;
        let root_addr = &self.root as *const Slot as usize;
        traverse::strt(root, root_addr, self.mode, &mut self.cursor, input).map(CellRef)
    }

    pub fn first(&mut self) -> Option<CellRef> {
        let root = self.root;
        let root_addr = &self.root as *const Slot as usize;
        traverse::first(root, root_addr, self.mode, &mut self.cursor).map(CellRef)
    }

    pub fn end(&mut self) -> Option<CellRef> {
        let root = self.root;
        let root_addr = &self.root as *const Slot as usize;
        traverse::last(root, root_addr, self.mode, &mut self.cursor).map(CellRef)
    }

    pub fn nxt(&mut self) -> Option<CellRef> {
        let root = self.root;
        let root_addr = &self.root as *const Slot as usize;
        traverse::next(root, root_addr, self.mode, &mut self.cursor).map(CellRef)
    }

    pub fn prv(&mut self) -> Option<CellRef> {
        let root = self.root;
        let root_addr = &self.root as *const Slot as usize;
        traverse::prev(root, root_addr, self.mode, &mut self.cursor).map(CellRef)
    }

    pub fn key(&self, buffer: &mut [u8]) -> usize {
        reconstruct::reconstruct_key(self.mode, &self.cursor, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryInto;

    #[test]
    fn open_empty_trie_has_no_entries() {
        let mut t = Trie::open(64, 0).unwrap();
        assert!(t.slot(b"anything").is_none());
        assert!(t.first().is_none());
        assert!(t.end().is_none());
        assert!(t.nxt().is_none());
        assert!(t.prv().is_none());
    }

    #[test]
    fn insert_lookup_roundtrip_small_set() {
        let mut t = Trie::open(64, 0).unwrap();
        for k in ["a", "b", "c"] {
            t.cell(k.as_bytes()).unwrap().set(1);
        }
        let mut order = Vec::new();
        let mut buf = [0u8; 64];
        let mut cur = t.first();
        while let Some(cell) = cur {
            assert_eq!(cell.get(), 1);
            let len = t.key(&mut buf);
            order.push(String::from_utf8(buf[..len].to_vec()).unwrap());
            cur = t.nxt();
        }
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn key_reconstruction_matches_inserted_key() {
        let mut t = Trie::open(64, 0).unwrap();
        t.cell(b"hello").unwrap().set(42);
        let cell = t.slot(b"hello").unwrap();
        assert_eq!(cell.get(), 42);
        let mut buf = [0u8; 64];
        let len = t.key(&mut buf);
        assert_eq!(&buf[..len], b"hello");
    }

    #[test]
    fn delete_then_traversal_skips_removed_key() {
        let mut t = Trie::open(64, 0).unwrap();
        for k in ["a", "b", "c"] {
            t.cell(k.as_bytes()).unwrap().set(1);
        }
        t.slot(b"b");
        t.del();

        let mut order = Vec::new();
        let mut buf = [0u8; 64];
        let mut cur = t.first();
        while cur.is_some() {
            let len = t.key(&mut buf);
            order.push(String::from_utf8(buf[..len].to_vec()).unwrap());
            cur = t.nxt();
        }
        assert_eq!(order, vec!["a", "c"]);
    }

    #[test]
    fn idempotent_insert_returns_same_cell() {
        let mut t = Trie::open(64, 0).unwrap();
        let a = t.cell(b"x").unwrap();
        a.set(7);
        let b = t.cell(b"x").unwrap();
        assert_eq!(a, b);
        assert_eq!(b.get(), 7);
    }

    #[test]
    fn rejects_zero_byte_keys() {
        let mut t = Trie::open(64, 0).unwrap();
        assert!(matches!(t.cell(b"a\0b"), Err(JudyError::InvalidKey(_))));
    }

    #[test]
    fn fixed_mode_roundtrip() {
        let mut t = Trie::open(0, 2).unwrap();
        t.cell_digits(&[7, 3]).unwrap().set(1);
        t.cell_digits(&[7, 5]).unwrap().set(1);
        t.cell_digits(&[9, 0]).unwrap().set(1);
        let again = t.cell_digits(&[7, 3]).unwrap();
        assert_eq!(again.get(), 1);

        let mut seen = Vec::new();
        let mut cur = t.first();
        while cur.is_some() {
            let mut buf = [0u8; 16];
            let len = t.key(&mut buf);
            assert_eq!(len, 16);
            let hi = u64::from_be_bytes(buf[0..8].try_into().unwrap());
            let lo = u64::from_be_bytes(buf[8..16].try_into().unwrap());
            seen.push((hi, lo));
            cur = t.nxt();
        }
        assert_eq!(seen, vec![(7, 3), (7, 5), (9, 0)]);
    }

    #[test]
    fn fixed_mode_depth_three_roundtrip() {
        let mut t = Trie::open(0, 3).unwrap();
        let triples = [(1u64, 2u64, 3u64), (1, 2, 4), (5, 0, 0)];
        for (i, &(a, b, c)) in triples.iter().enumerate() {
            t.cell_digits(&[a, b, c]).unwrap().set(i + 1);
        }
        for (i, &(a, b, c)) in triples.iter().enumerate() {
            let cell = t.slot_digits(&[a, b, c]).unwrap();
            assert_eq!(cell.get(), i + 1);
        }
    }

    #[test]
    fn exact_prefix_key_survives_linear32_to_radix_split() {
        // "k" is an exact prefix of 32 other keys sharing its first
        // byte; once that shared byte forces their Linear32 node to
        // split into a radix pair, "k"'s own entry -- a zero/terminator
        // residual -- must land directly in the radix's reserved byte-0
        // slot rather than get buried under a spurious linear node and
        // silently overwritten by a later lookup reading the wrong cell.
        let mut t = Trie::open(64, 0).unwrap();
        let mut keys: Vec<String> = vec!["k".to_string()];
        for i in 0..32 {
            keys.push(format!("k{:02}", i));
        }

        for (i, k) in keys.iter().enumerate() {
            t.cell(k.as_bytes()).unwrap().set(i + 1);
        }
        for (i, k) in keys.iter().enumerate() {
            let cell = t.slot(k.as_bytes()).unwrap();
            assert_eq!(cell.get(), i + 1, "wrong value for key {:?}", k);
        }
    }

    #[test]
    fn clone_shares_graph_and_traverses_independently() {
        let mut t = Trie::open(64, 0).unwrap();
        for k in ["a", "b", "c"] {
            t.cell(k.as_bytes()).unwrap().set(1);
        }
        let mut clone = t.clone_readonly();
        assert_eq!(clone.slot(b"b").unwrap().get(), 1);
        assert!(clone.first().is_some());
        assert!(clone.nxt().is_some());
    }

    #[test]
    fn clone_outlives_source_trie() {
        let mut clone = {
            let mut t = Trie::open(64, 0).unwrap();
            for k in ["a", "b", "c"] {
                t.cell(k.as_bytes()).unwrap().set(1);
            }
            t.clone_readonly()
        };
        assert_eq!(clone.slot(b"a").unwrap().get(), 1);
        assert_eq!(clone.slot(b"c").unwrap().get(), 1);
    }

    fn ordered_keys(t: &mut Trie) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 512];
        let mut cur = t.first();
        while cur.is_some() {
            let len = t.key(&mut buf);
            out.push(buf[..len].to_vec());
            cur = t.nxt();
        }
        out
    }

    #[test]
    fn shared_prefix_keys_force_linear_promotion() {
        // "abc".."abg" share a two-byte prefix and diverge on the
        // third byte, forcing promotion from Linear1 all the way up
        // through Linear8 (spec §8 scenario 2).
        let mut t = Trie::open(64, 0).unwrap();
        let keys = ["abc", "abd", "abe", "abf", "abg"];
        for k in keys {
            t.cell(k.as_bytes()).unwrap().set(1);
        }
        for k in keys {
            assert_eq!(t.slot(k.as_bytes()).unwrap().get(), 1);
        }
        let order: Vec<String> = ordered_keys(&mut t)
            .into_iter()
            .map(|b| String::from_utf8(b).unwrap())
            .collect();
        assert_eq!(order, keys.to_vec());
    }

    #[test]
    fn many_keys_force_split_into_radix_and_strt_and_delete() {
        // 300 keys "k_000".."k_299" force linear-N promotion and the
        // Linear32-to-radix split (spec §8 scenario 3).
        let mut t = Trie::open(64, 0).unwrap();
        let mut expected = Vec::new();
        for i in 0..300 {
            let k = format!("k_{:03}", i);
            t.cell(k.as_bytes()).unwrap().set(1);
            expected.push(k);
        }
        expected.sort();

        let order: Vec<String> = ordered_keys(&mut t)
            .into_iter()
            .map(|b| String::from_utf8(b).unwrap())
            .collect();
        assert_eq!(order, expected);

        let found = t.strt(b"k_150").unwrap();
        assert_eq!(found.get(), 1);
        let mut buf = [0u8; 64];
        let len = t.key(&mut buf);
        assert_eq!(&buf[..len], b"k_150");

        for i in (0..300).step_by(2) {
            let k = format!("k_{:03}", i);
            assert!(t.slot(k.as_bytes()).is_some());
            t.del();
        }
        let remaining: Vec<String> = ordered_keys(&mut t)
            .into_iter()
            .map(|b| String::from_utf8(b).unwrap())
            .collect();
        let expected_remaining: Vec<String> = (0..300)
            .filter(|i| i % 2 == 1)
            .map(|i| format!("k_{:03}", i))
            .collect();
        assert_eq!(remaining.len(), 150);
        assert_eq!(remaining, expected_remaining);
        // still sorted
        let mut sorted = remaining.clone();
        sorted.sort();
        assert_eq!(remaining, sorted);
    }

    #[test]
    fn long_key_lives_in_chained_spans_and_splits_on_shared_prefix() {
        // A key longer than SPAN_BYTES forces a chain of span nodes
        // (spec §8 scenario 4); a second key sharing a long prefix
        // then forces that chain to split into linear nodes partway
        // through.
        let mut t = Trie::open(128, 0).unwrap();
        let long_key = b"hello_world_this_is_a_long_string";
        let sibling_key = b"hello_worse";
        t.cell(long_key).unwrap().set(1);
        t.cell(sibling_key).unwrap().set(2);

        assert_eq!(t.slot(long_key).unwrap().get(), 1);
        assert_eq!(t.slot(sibling_key).unwrap().get(), 2);

        let mut buf = [0u8; 128];
        t.slot(long_key);
        let len = t.key(&mut buf);
        assert_eq!(&buf[..len], long_key);

        t.slot(sibling_key);
        let len = t.key(&mut buf);
        assert_eq!(&buf[..len], sibling_key);

        // "hello_worl..." < "hello_worse" (the 10th byte, 'l' vs 's',
        // decides the order).
        let order: Vec<Vec<u8>> = ordered_keys(&mut t);
        assert_eq!(order, vec![long_key.to_vec(), sibling_key.to_vec()]);
    }

    #[test]
    fn next_then_prev_returns_to_same_key() {
        // Predecessor-successor inverse (spec §8 invariant 5).
        let mut t = Trie::open(64, 0).unwrap();
        for k in ["aa", "bb", "cc", "dd"] {
            t.cell(k.as_bytes()).unwrap().set(1);
        }
        t.first();
        t.nxt();
        t.nxt();
        let mut buf = [0u8; 64];
        let len = t.key(&mut buf);
        let here = buf[..len].to_vec();

        t.nxt();
        t.prv();
        let len = t.key(&mut buf);
        assert_eq!(&buf[..len], here.as_slice());
    }

    #[test]
    fn count_conservation_across_insert_and_delete() {
        // spec §8 invariant 3: traversal count == inserted - deleted.
        let mut t = Trie::open(64, 0).unwrap();
        let total = 200;
        for i in 0..total {
            t.cell(format!("item{:04}", i).as_bytes()).unwrap().set(1);
        }
        let mut deleted = 0;
        for i in (0..total).step_by(3) {
            assert!(t.slot(format!("item{:04}", i).as_bytes()).is_some());
            t.del();
            deleted += 1;
        }
        let remaining = ordered_keys(&mut t).len();
        assert_eq!(remaining, total - deleted);
    }

    #[test]
    fn large_random_key_set_round_trips_and_stays_sorted() {
        // spec §8 scenario 6, scaled down from 10,000 to keep test
        // runtime reasonable while still exercising every structural
        // transformation along the way.
        use std::collections::BTreeSet;

        let mut t = Trie::open(64, 0).unwrap();
        let mut oracle: BTreeSet<Vec<u8>> = BTreeSet::new();

        let mut state: u64 = 0x2545F4914F6CDD1D;
        let mut next_rand = || {
            // xorshift64*, deterministic so the test is reproducible.
            state ^= state >> 12;
            state ^= state << 25;
            state ^= state >> 27;
            state.wrapping_mul(0x2545F4914F6CDD1D)
        };

        let count = 2000;
        let mut keys = Vec::with_capacity(count);
        while keys.len() < count {
            let v = next_rand();
            let k = format!("key-{:x}", v).into_bytes();
            if oracle.insert(k.clone()) {
                keys.push(k);
            }
        }
        for k in &keys {
            t.cell(k).unwrap().set(1);
        }

        let mut to_delete = Vec::new();
        for (i, k) in keys.iter().enumerate() {
            if i % 2 == 0 {
                to_delete.push(k.clone());
            }
        }
        for k in &to_delete {
            assert!(t.slot(k).is_some());
            t.del();
            oracle.remove(k);
        }

        let order = ordered_keys(&mut t);
        let expected: Vec<Vec<u8>> = oracle.iter().cloned().collect();
        assert_eq!(order, expected);
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);

        for k in &to_delete {
            t.cell(k).unwrap().set(1);
            oracle.insert(k.clone());
        }
        let order = ordered_keys(&mut t);
        let expected: Vec<Vec<u8>> = oracle.iter().cloned().collect();
        assert_eq!(order, expected);
    }
}

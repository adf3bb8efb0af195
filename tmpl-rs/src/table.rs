//! Open-addressing hash table keyed by byte strings.
//!
//! Capacities are always prime and taken from a fixed ascending table.  Each
//! key probes with two values derived from its hash: a primary slot
//! `hash % capacity` and a step `hash % (capacity - 2) + 1`.  Because the
//! capacity is prime, every step visits the whole table.
//!
//! Insertion uses Brent's variation of double hashing: when the new key's
//! chain is long, one entry already sitting on that chain may be moved further
//! along *its own* chain if that makes the combined search cost smaller
//! (R. P. Brent, "Reducing the retrieval time of scatter storage techniques",
//! CACM 16(2), 1973).
//!
//! | Flag        | Effect                                                    |
//! |-------------|-----------------------------------------------------------|
//! | `dup`       | keys are copied into owned storage on insert              |
//! | `free`      | displaced values are dropped by the table                 |
//! | `ci`        | keys hash and compare ASCII case-insensitively            |
//!
//! Flags can only be changed while the table is empty.

use std::borrow::Cow;
use std::mem;

use thiserror::Error;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Error returned by fallible [`Table`] operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    /// The slot array could not be allocated.
    #[error("out of memory")]
    Allocation,
    /// No prime in the size table is large enough.
    #[error("table capacity exhausted")]
    Capacity,
    /// A configuration flag was changed on a non-empty table.
    #[error("table is not empty")]
    NotEmpty,
}

// ── Sizes ─────────────────────────────────────────────────────────────────────

/// Ascending primes, roughly ×4/3 apart.
static SIZES: &[u64] = &[
    3, 5, 7, 11, 13, 17, 23, 29, 41, 53, 67, 89, 127, 157, 211, 277, 373, 499, 659, 877, 1171,
    1553, 2081, 2767, 3691, 4909, 6547, 8731, 11633, 15511, 20681, 27581, 36749, 49003, 65353,
    87107, 116141, 154871, 206477, 275299, 367069, 489427, 652559, 870083, 1160111, 1546799,
    2062391, 2749847, 3666461, 4888619, 6518173, 8690917, 11587841, 15450437, 20600597,
    27467443, 36623261, 48831017, 65107997, 86810681, 115747549, 154330079, 205773427,
    274364561, 365819417, 487759219, 650345651, 867127501, 1156170011, 1541560037, 2055413317,
    2740551103, 3654068141, 4872090871, 6496121063, 8661494753, 11548659701, 15398212901,
    20530950533, 27374600677, 36499467569, 48665956771, 64887942367, 86517256433,
    115356341911, 153808455923, 205077941191, 273437254897, 364583006561, 486110675443,
    648147567293, 864196756231, 1152262341641, 1536349788871, 2048466385123, 2731288513529,
    3641718017983, 4855624023953, 6474165365293, 8632220487029, 11509627316059,
    15346169754719, 20461559672951, 27282079563967, 36376106085223, 48501474780299,
    64668633040457, 86224844053847, 114966458738489, 153288611651291, 204384815535079,
    272513087380099,
];

const FNV_OFFSET: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;

/// Smallest tabled prime `>= size`.
fn table_size(size: usize) -> Result<usize, TableError> {
    let i = SIZES.partition_point(|&s| s < size as u64);
    SIZES
        .get(i)
        .and_then(|&s| usize::try_from(s).ok())
        .ok_or(TableError::Capacity)
}

/// Load limit for a capacity: ~87.5 percent.
fn table_load(alloc: usize) -> usize {
    (alloc >> 1) + (alloc >> 2) + (alloc >> 3)
}

fn probe_step(hash: u64, alloc: usize) -> usize {
    (hash % (alloc as u64 - 2) + 1) as usize
}

fn probe_start(hash: u64, alloc: usize) -> (usize, usize) {
    ((hash % alloc as u64) as usize, probe_step(hash, alloc))
}

fn alloc_slots<'k, V>(n: usize) -> Result<Vec<Slot<'k, V>>, TableError> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(n)
        .map_err(|_| TableError::Allocation)?;
    slots.resize_with(n, || Slot::Unused);
    Ok(slots)
}

// ── Slots ─────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Entry<'k, V> {
    key: Cow<'k, [u8]>,
    value: V,
    hash: u64,
}

#[derive(Debug)]
enum Slot<'k, V> {
    Unused,
    Set(Entry<'k, V>),
    /// Tombstone: keeps chains running through it intact.
    Deleted,
}

impl<V> Slot<'_, V> {
    fn is_set(&self) -> bool {
        matches!(self, Slot::Set(_))
    }

    fn hash(&self) -> Option<u64> {
        match self {
            Slot::Set(e) => Some(e.hash),
            _ => None,
        }
    }
}

// ── Table ─────────────────────────────────────────────────────────────────────

/// Hash table keyed by byte strings.
///
/// `'k` is the lifetime of borrowed keys; with `dup` set every key is copied
/// on insert and the table can be `Table<'static, V>`.
#[derive(Debug)]
pub struct Table<'k, V> {
    slots: Vec<Slot<'k, V>>,
    load: usize,
    count: usize,
    dup: bool,
    free: bool,
    ci: bool,
}

impl<'k, V> Table<'k, V> {
    /// Create a table able to hold `load` entries without rehashing.
    pub fn new(load: usize) -> Result<Self, TableError> {
        let largest = SIZES[SIZES.len() - 1];
        let alloc = if (load as u64) < largest {
            load.saturating_add(load / 7 + 3)
        } else {
            load
        };
        let alloc = table_size(alloc)?;
        Ok(Self {
            slots: alloc_slots(alloc)?,
            load: table_load(alloc),
            count: 0,
            dup: false,
            free: false,
            ci: false,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of slots (always prime).
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Copy keys into owned storage on insert.
    pub fn set_dup(&mut self, dup: bool) -> Result<(), TableError> {
        self.check_empty()?;
        self.dup = dup;
        Ok(())
    }

    /// Drop displaced values instead of handing them back from [`Table::set`].
    pub fn set_free(&mut self, free: bool) -> Result<(), TableError> {
        self.check_empty()?;
        self.free = free;
        Ok(())
    }

    /// Hash and compare keys ASCII case-insensitively.
    pub fn set_ci(&mut self, ci: bool) -> Result<(), TableError> {
        self.check_empty()?;
        self.ci = ci;
        Ok(())
    }

    fn check_empty(&self) -> Result<(), TableError> {
        if self.count > 0 {
            Err(TableError::NotEmpty)
        } else {
            Ok(())
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let hash = self.hash(key);
        match &self.slots[self.find(key, hash)?.0] {
            Slot::Set(e) => Some(&e.value),
            _ => None,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Insert, update (`Some`) or remove (`None`) the entry for `key`.
    ///
    /// Returns the displaced value unless the table was configured with
    /// [`Table::set_free`], in which case displaced values are dropped and
    /// `Ok(None)` is returned.  Fails only when growing the table fails; the
    /// table is left unchanged in that case.
    pub fn set(
        &mut self,
        key: impl Into<Cow<'k, [u8]>>,
        value: Option<V>,
    ) -> Result<Option<V>, TableError> {
        let key = key.into();
        let hash = self.hash(&key);
        let found = self.find(&key, hash).map(|(i, _)| i);
        let free = self.free;
        let displaced = match (found, value) {
            (Some(i), Some(value)) => match &mut self.slots[i] {
                Slot::Set(entry) => Some(mem::replace(&mut entry.value, value)),
                _ => None,
            },
            (None, Some(value)) => {
                if self.count == self.load {
                    self.rehash(self.slots.len() + 1)?;
                }
                let key = if self.dup {
                    Cow::Owned(key.into_owned())
                } else {
                    key
                };
                let i = self.insert_slot(hash);
                self.slots[i] = Slot::Set(Entry { key, value, hash });
                self.count += 1;
                None
            }
            (Some(i), None) => self.remove_at(i),
            (None, None) => None,
        };
        Ok(displaced.filter(|_| !free))
    }

    /// Remove every entry.  Owned keys and all values are dropped.
    pub fn clear(&mut self) {
        self.slots.fill_with(|| Slot::Unused);
        self.count = 0;
    }

    /// Live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &V)> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Set(e) => Some((&*e.key, &e.value)),
            _ => None,
        })
    }

    /// 1-based position of `key` on its probe chain, if present.
    pub fn probe_len(&self, key: &[u8]) -> Option<usize> {
        let hash = self.hash(key);
        self.find(key, hash).map(|(_, len)| len)
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// FNV-1a over the key bytes, first byte first.  Only slot placement
    /// depends on the order, never lookup results.
    fn hash(&self, key: &[u8]) -> u64 {
        let mut hash = FNV_OFFSET;
        for &b in key {
            let b = if self.ci { b.to_ascii_lowercase() } else { b };
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }

    fn key_eq(&self, a: &[u8], b: &[u8]) -> bool {
        if self.ci {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    /// Slot index and chain position of `key`.
    fn find(&self, key: &[u8], hash: u64) -> Option<(usize, usize)> {
        let alloc = self.slots.len();
        let (start, step) = probe_start(hash, alloc);
        let mut h = start;
        let mut len = 1;
        loop {
            match &self.slots[h] {
                Slot::Unused => return None,
                Slot::Set(e) if e.hash == hash && self.key_eq(&e.key, key) => {
                    return Some((h, len));
                }
                _ => {}
            }
            h = (h + step) % alloc;
            if h == start {
                return None;
            }
            len += 1;
        }
    }

    /// First non-set slot on the chain for `hash`, and its chain position.
    fn chain_end(&self, hash: u64) -> (usize, usize) {
        let alloc = self.slots.len();
        let (mut h, step) = probe_start(hash, alloc);
        let mut len = 1;
        while self.slots[h].is_set() {
            h = (h + step) % alloc;
            len += 1;
        }
        (h, len)
    }

    /// Pick the slot for a new entry with `hash`, relocating at most one
    /// existing entry.  The returned slot is not set.
    fn insert_slot(&mut self, hash: u64) -> usize {
        let alloc = self.slots.len();
        let (worst, len_worst) = self.chain_end(hash);
        if len_worst <= 2 {
            return worst;
        }

        let (start, step) = probe_start(hash, alloc);
        let mut best: Option<(usize, usize)> = None;
        let mut best_len_move = usize::MAX;
        let mut h = start;
        let mut len = 1;
        loop {
            if let Some(occupant) = self.slots[h].hash() {
                let step_move = probe_step(occupant, alloc);
                let mut h_move = (h + step_move) % alloc;
                let mut len_move = 1;
                loop {
                    if !self.slots[h_move].is_set() {
                        if len_move < best_len_move {
                            best = Some((h, h_move));
                            best_len_move = len_move;
                        }
                        break;
                    }
                    // zero-sum at best past this point
                    if len + len_move >= len_worst - 1 {
                        break;
                    }
                    h_move = (h_move + step_move) % alloc;
                    len_move += 1;
                }
            }
            h = (h + step) % alloc;
            len += 1;
            if len >= len_worst - 1 || len >= best_len_move {
                break;
            }
        }

        match best {
            Some((from, to)) => {
                self.slots[to] = mem::replace(&mut self.slots[from], Slot::Unused);
                from
            }
            None => worst,
        }
    }

    fn remove_at(&mut self, i: usize) -> Option<V> {
        match mem::replace(&mut self.slots[i], Slot::Deleted) {
            Slot::Set(entry) => {
                self.count -= 1;
                Some(entry.value)
            }
            other => {
                self.slots[i] = other;
                None
            }
        }
    }

    /// Grow to the smallest tabled prime `>= alloc`.  Entries keep their
    /// recorded hashes.
    fn rehash(&mut self, alloc: usize) -> Result<(), TableError> {
        let alloc = table_size(alloc)?;
        let fresh = alloc_slots(alloc)?;
        log::trace!(
            "table rehash: {} -> {} slots, {} entries",
            self.slots.len(),
            alloc,
            self.count
        );
        let old = mem::replace(&mut self.slots, fresh);
        self.load = table_load(alloc);
        for slot in old {
            if let Slot::Set(entry) = slot {
                let i = self.insert_slot(entry.hash);
                self.slots[i] = Slot::Set(entry);
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

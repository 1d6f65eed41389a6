//! Compact Field Record
//!
//! A [`Record`] holds the loaded fields of one cached object in a single flat
//! slot array. There is no per-field node and no separate "loaded" bitmap: a
//! field that was never loaded holds [`Slot::Absent`], a field loaded as null
//! holds [`Slot::Null`].
//!
//! The last five slots of the array form a trailer with the object's class,
//! its version and the bookkeeping the cache ranks entries by:
//!
//! ```text
//!  0        1        ...  len-1    ...    cap   cap+1    cap+2    cap+3    cap+4
//! ┌────────┬────────┬─────┬────────┬─────┬──────┬────────┬────────┬────────┬───────┐
//! │ field0 │ field1 │ ... │ fieldN │ ... │ hits │accessed│created │version │ class │
//! └────────┴────────┴─────┴────────┴─────┴──────┴────────┴────────┴────────┴───────┘
//!                                           end-5  end-4    end-3    end-2    end-1
//! ```
//!
//! Array lengths are always a size class of the [`Allocator`], so arrays of
//! discarded records can be recycled for new ones.
//!
//! # Example
//!
//! ```
//! use closed_table::{Allocator, ClassId, Record, Slot};
//!
//! let allocator = Allocator::new(16);
//! let mut record: Record<String> = Record::new(&allocator, ClassId(7), 1, 2, 0);
//! record.set(&allocator, 0, Some("name".to_string()));
//! record.set(&allocator, 3, None);
//!
//! assert_eq!(record.get(0), Some(&"name".to_string()));
//! assert!(matches!(record.slot(1), Some(Slot::Absent)));
//! assert!(matches!(record.slot(3), Some(Slot::Null)));
//! assert_eq!(record.loaded_field_numbers(), vec![0, 3]);
//! ```

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::allocator::{size_class, Allocator};

const CLASS: usize = 1;
const VERSION: usize = 2;
const CREATED: usize = 3;
const ACCESSED: usize = 4;
const HITS: usize = 5;

/// Number of trailer slots at the end of every record array.
pub const RESERVED: usize = HITS;

/// Spare field slots added when a record grows past its capacity.
const GROWTH: usize = 4;

/// Identifies the kind of object a record holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// One cell of a record array.
#[derive(Debug)]
pub enum Slot<T> {
    /// The field was never loaded.
    Absent,
    /// The field was loaded and its value is null.
    Null,
    /// A loaded field value.
    Value(T),
    /// Trailer: class of the cached object.
    Class(ClassId),
    /// Trailer: version of the cached object.
    Version(u64),
    /// Trailer: a clock stamp or counter updated through shared references.
    Stamp(AtomicU32),
}

impl<T> Slot<T> {
    /// Returns `true` for [`Slot::Absent`].
    #[inline]
    pub fn is_absent(&self) -> bool {
        matches!(self, Slot::Absent)
    }

    /// Returns the field value, if this slot holds one.
    #[inline]
    pub fn value(&self) -> Option<&T> {
        match self {
            Slot::Value(value) => Some(value),
            _ => None,
        }
    }

    fn stamp(value: u32) -> Self {
        Slot::Stamp(AtomicU32::new(value))
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot::Absent
    }
}

impl<T: Clone> Clone for Slot<T> {
    fn clone(&self) -> Self {
        match self {
            Slot::Absent => Slot::Absent,
            Slot::Null => Slot::Null,
            Slot::Value(value) => Slot::Value(value.clone()),
            Slot::Class(class) => Slot::Class(*class),
            Slot::Version(version) => Slot::Version(*version),
            Slot::Stamp(stamp) => Slot::stamp(stamp.load(Ordering::Relaxed)),
        }
    }
}

/// The loaded fields of one cached object plus its trailer.
pub struct Record<T> {
    slots: Box<[Slot<T>]>,
    length: usize,
}

impl<T> Record<T> {
    /// Creates an empty record with room for `capacity` fields, stamped as
    /// created and accessed at `now`.
    pub fn new(
        allocator: &Allocator<T>,
        class: ClassId,
        version: u64,
        capacity: usize,
        now: u32,
    ) -> Self {
        let mut slots = allocator.get(capacity + RESERVED);
        let end = slots.len();
        slots[end - CLASS] = Slot::Class(class);
        slots[end - VERSION] = Slot::Version(version);
        slots[end - CREATED] = Slot::stamp(now);
        slots[end - ACCESSED] = Slot::stamp(now);
        slots[end - HITS] = Slot::stamp(0);
        Self { slots, length: 0 }
    }

    /// Number of field positions in use (one past the highest field set).
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if no field position is in use.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of fields the current array holds before it must grow.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len() - RESERVED
    }

    /// Returns the slot of `field`, or `None` past [`len`](Self::len).
    pub fn slot(&self, field: usize) -> Option<&Slot<T>> {
        if field < self.length {
            self.slots.get(field)
        } else {
            None
        }
    }

    /// Returns the value of `field`; absent and null fields yield `None`.
    pub fn get(&self, field: usize) -> Option<&T> {
        self.slot(field).and_then(Slot::value)
    }

    /// Loads `field`: `Some` stores a value, `None` stores [`Slot::Null`].
    ///
    /// Grows the array through `allocator` when `field` is past capacity;
    /// the old array is offered back to it.
    pub fn set(&mut self, allocator: &Allocator<T>, field: usize, value: Option<T>) {
        if field >= self.length {
            if field >= self.capacity() {
                self.grow(allocator, field);
            }
            self.length = field + 1;
        }
        self.slots[field] = match value {
            Some(value) => Slot::Value(value),
            None => Slot::Null,
        };
    }

    /// Marks `field` as never loaded. Fields past `len` are ignored.
    pub fn unload(&mut self, field: usize) {
        if field < self.length {
            self.slots[field] = Slot::Absent;
        }
    }

    fn grow(&mut self, allocator: &Allocator<T>, field: usize) {
        let mut grown = allocator.get(size_class(field + 1 + GROWTH + RESERVED));
        for (to, from) in grown.iter_mut().zip(&mut self.slots[..self.length]) {
            *to = mem::take(from);
        }
        let (old_end, new_end) = (self.slots.len(), grown.len());
        for offset in 1..=RESERVED {
            grown[new_end - offset] = mem::take(&mut self.slots[old_end - offset]);
        }
        let old = mem::replace(&mut self.slots, grown);
        allocator.offer(old);
    }

    /// One flag per field position: `true` unless the field is absent.
    pub fn loaded_fields(&self) -> Vec<bool> {
        self.slots[..self.length]
            .iter()
            .map(|slot| !slot.is_absent())
            .collect()
    }

    /// Positions of the loaded fields, ascending.
    pub fn loaded_field_numbers(&self) -> Vec<usize> {
        self.slots[..self.length]
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.is_absent())
            .map(|(field, _)| field)
            .collect()
    }

    fn trailer(&self, offset: usize) -> &Slot<T> {
        &self.slots[self.slots.len() - offset]
    }

    fn stamp(&self, offset: usize) -> &AtomicU32 {
        match self.trailer(offset) {
            Slot::Stamp(stamp) => stamp,
            other => unreachable!("trailer slot -{offset} holds {:?}", SlotKind::of(other)),
        }
    }

    /// Class of the cached object.
    pub fn class(&self) -> ClassId {
        match self.trailer(CLASS) {
            Slot::Class(class) => *class,
            other => unreachable!("class slot holds {:?}", SlotKind::of(other)),
        }
    }

    /// Version of the cached object.
    pub fn version(&self) -> u64 {
        match self.trailer(VERSION) {
            Slot::Version(version) => *version,
            other => unreachable!("version slot holds {:?}", SlotKind::of(other)),
        }
    }

    /// Clock tick at which the record was (re)stored.
    pub fn created(&self) -> u32 {
        self.stamp(CREATED).load(Ordering::Relaxed)
    }

    /// Clock tick of the last access.
    pub fn accessed(&self) -> u32 {
        self.stamp(ACCESSED).load(Ordering::Relaxed)
    }

    /// Number of hits since the record was stored.
    pub fn hits(&self) -> u32 {
        self.stamp(HITS).load(Ordering::Relaxed)
    }

    /// Counts a hit and stamps the access time.
    ///
    /// The increment is a plain load and store: concurrent hits may be lost.
    pub fn touch(&self, now: u32) {
        let hits = self.stamp(HITS);
        hits.store(hits.load(Ordering::Relaxed).wrapping_add(1), Ordering::Relaxed);
        self.stamp(ACCESSED).store(now, Ordering::Relaxed);
    }

    /// Resets both stamps to `now` and the hit count to zero.
    pub fn refresh(&self, now: u32) {
        self.stamp(CREATED).store(now, Ordering::Relaxed);
        self.stamp(ACCESSED).store(now, Ordering::Relaxed);
        self.stamp(HITS).store(0, Ordering::Relaxed);
    }

    /// Eviction rank, higher is more valuable: each hit is worth about 1.25
    /// ticks of age and recent access counts double.
    pub fn eviction_value(&self) -> u64 {
        u64::from(self.created())
            + ((u64::from(self.hits()) * 5) >> 2)
            + u64::from(self.accessed()) * 2
    }

    /// Returns `true` if the record was idle for more than `expiration`
    /// ticks, or was stored more than `4 * expiration` ticks ago.
    ///
    /// Stamps later than `now` (another thread read the clock after this
    /// caller did) count as fresh.
    pub fn is_expired(&self, now: u32, expiration: u32) -> bool {
        let now = i64::from(now);
        let expiration = i64::from(expiration);
        now - i64::from(self.accessed()) > expiration
            || now - i64::from(self.created()) > expiration * 4
    }

    /// Consumes the record, returning its array for recycling.
    pub fn into_slots(self) -> Box<[Slot<T>]> {
        self.slots
    }

    /// Moves the array out, leaving the record empty and trailer-less.
    ///
    /// Only for records about to be dropped.
    pub(crate) fn take_slots(&mut self) -> Box<[Slot<T>]> {
        self.length = 0;
        mem::take(&mut self.slots)
    }
}

/// Deep copy; the copy gets its own array.
impl<T: Clone> Clone for Record<T> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
            length: self.length,
        }
    }
}

/// Variant name of a slot, for panic messages that must not require `T: Debug`.
#[derive(Debug)]
enum SlotKind {
    Absent,
    Null,
    Value,
    Class,
    Version,
    Stamp,
}

impl SlotKind {
    fn of<T>(slot: &Slot<T>) -> Self {
        match slot {
            Slot::Absent => SlotKind::Absent,
            Slot::Null => SlotKind::Null,
            Slot::Value(_) => SlotKind::Value,
            Slot::Class(_) => SlotKind::Class,
            Slot::Version(_) => SlotKind::Version,
            Slot::Stamp(_) => SlotKind::Stamp,
        }
    }
}

impl<T> fmt::Debug for Record<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("class", &self.class())
            .field("version", &self.version())
            .field("len", &self.length)
            .field("capacity", &self.capacity())
            .field("loaded", &self.loaded_field_numbers())
            .field("created", &self.created())
            .field("accessed", &self.accessed())
            .field("hits", &self.hits())
            .finish()
    }
}

//! Ownership envelopes for crossing execution-context boundaries.
//!
//! Every value that enters or leaves a worker or a dedicated channel travels
//! inside an [`Envelope`]. The payload type fixes the transfer mode at
//! compile time, so one envelope carries exactly one mode for its whole life:
//!
//! - [`Copied`]: structural clone taken when the envelope is built
//! - [`Transferred`]: value moved out of a [`MoveHandle`]
//! - [`AtomicShared`]: a [`SharedAtomics`] buffer reachable from both sides
//! - [`SharedRef`]: a reference-counted [`Shared`] object
//!
//! The shared modes add no locking. Whatever synchronization the value needs
//! is the caller's job.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crate::runtime::error::EnvelopeError;

static NEXT_ENVELOPE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique envelope identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvelopeId(u64);

impl EnvelopeId {
    fn next() -> Self {
        Self(NEXT_ENVELOPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Envelope({})", self.0)
    }
}

/// How an envelope's value crosses the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// Independent structural copy.
    Copy,
    /// Ownership moved; sender handle invalidated.
    Move,
    /// One buffer, accessed only through atomic operations.
    SharedAtomics,
    /// One reference-counted object, same identity on both sides.
    SharedRef,
}

mod sealed {
    pub trait Sealed {}
}

/// Payload carried by an [`Envelope`]. Sealed: the four modes are closed.
pub trait Payload: sealed::Sealed + Send + 'static {
    /// Mode of every envelope carrying this payload.
    const MODE: TransferMode;

    /// What the receiver gets when opening the envelope.
    type Output: Send + 'static;

    fn open(self) -> Self::Output;
}

/// Copy-mode payload.
#[derive(Debug)]
pub struct Copied<T>(T);

/// Move-mode payload.
#[derive(Debug)]
pub struct Transferred<T>(T);

/// Shared-with-atomics payload.
#[derive(Debug)]
pub struct AtomicShared(SharedAtomics);

/// Shared-by-reference payload.
#[derive(Debug)]
pub struct SharedRef<T: ?Sized>(Shared<T>);

impl<T> sealed::Sealed for Copied<T> {}
impl<T> sealed::Sealed for Transferred<T> {}
impl sealed::Sealed for AtomicShared {}
impl<T: ?Sized> sealed::Sealed for SharedRef<T> {}

impl<T: Send + 'static> Payload for Copied<T> {
    const MODE: TransferMode = TransferMode::Copy;
    type Output = T;

    fn open(self) -> T {
        self.0
    }
}

impl<T: Send + 'static> Payload for Transferred<T> {
    const MODE: TransferMode = TransferMode::Move;
    type Output = T;

    fn open(self) -> T {
        self.0
    }
}

impl Payload for AtomicShared {
    const MODE: TransferMode = TransferMode::SharedAtomics;
    type Output = SharedAtomics;

    fn open(self) -> SharedAtomics {
        self.0
    }
}

impl<T: ?Sized + Send + Sync + 'static> Payload for SharedRef<T> {
    const MODE: TransferMode = TransferMode::SharedRef;
    type Output = Shared<T>;

    fn open(self) -> Shared<T> {
        self.0
    }
}

/// A value wrapped for transfer across an execution-context boundary.
pub struct Envelope<P: Payload> {
    id: EnvelopeId,
    payload: P,
}

impl<P: Payload> Envelope<P> {
    fn wrap(payload: P) -> Self {
        Self {
            id: EnvelopeId::next(),
            payload,
        }
    }

    #[inline]
    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    /// Transfer mode, fixed by the payload type.
    #[inline]
    pub fn mode(&self) -> TransferMode {
        P::MODE
    }

    /// Unwrap on the receiving side.
    #[inline]
    pub fn open(self) -> P::Output {
        self.payload.open()
    }
}

impl<P: Payload> fmt::Debug for Envelope<P> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("mode", &P::MODE)
            .finish()
    }
}

impl<T: Clone + Send + 'static> Envelope<Copied<T>> {
    /// Take an independent copy of `value`. The sender keeps its original.
    pub fn copy(value: &T) -> Self {
        Self::wrap(Copied(value.clone()))
    }
}

impl<T: Send + 'static> Envelope<Transferred<T>> {
    /// Wrap a value the caller already owns outright.
    pub(crate) fn moved(value: T) -> Self {
        Self::wrap(Transferred(value))
    }
}

impl Envelope<AtomicShared> {
    /// Share `buffer` with the receiver. Both sides see the same cells.
    pub fn atomics(buffer: &SharedAtomics) -> Self {
        Self::wrap(AtomicShared(buffer.clone()))
    }
}

impl<T: ?Sized + Send + Sync + 'static> Envelope<SharedRef<T>> {
    /// Share `value` by reference. Both sides see the same object.
    pub fn shared(value: &Shared<T>) -> Self {
        Self::wrap(SharedRef(value.clone()))
    }
}

/// Sender-side owner of a value that will be moved across a boundary.
///
/// After [`MoveHandle::transfer`] the handle is empty and every accessor
/// returns [`EnvelopeError::TransferAfterMove`].
pub struct MoveHandle<T> {
    id: EnvelopeId,
    slot: Option<T>,
}

impl<T: Send + 'static> MoveHandle<T> {
    pub fn new(value: T) -> Self {
        Self {
            id: EnvelopeId::next(),
            slot: Some(value),
        }
    }

    /// Relinquish the value into a move-mode envelope.
    pub fn transfer(&mut self) -> Result<Envelope<Transferred<T>>, EnvelopeError> {
        let value = self.slot.take().ok_or(EnvelopeError::TransferAfterMove { envelope: self.id })?;
        Ok(Envelope {
            id: self.id,
            payload: Transferred(value),
        })
    }

    pub fn get(&self) -> Result<&T, EnvelopeError> {
        self.slot
            .as_ref()
            .ok_or(EnvelopeError::TransferAfterMove { envelope: self.id })
    }

    pub fn get_mut(&mut self) -> Result<&mut T, EnvelopeError> {
        let id = self.id;
        self.slot
            .as_mut()
            .ok_or(EnvelopeError::TransferAfterMove { envelope: id })
    }

    #[inline]
    pub fn is_transferred(&self) -> bool {
        self.slot.is_none()
    }

    #[inline]
    pub fn id(&self) -> EnvelopeId {
        self.id
    }
}

impl<T> fmt::Debug for MoveHandle<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("MoveHandle")
            .field("id", &self.id)
            .field("transferred", &self.slot.is_none())
            .finish()
    }
}

/// Fixed-length buffer of 64-bit cells reachable from several contexts.
///
/// Only atomic accessors exist; each takes the caller's memory ordering.
/// Indexing past `len()` panics, as slice indexing does.
#[derive(Clone)]
pub struct SharedAtomics {
    cells: Arc<[AtomicI64]>,
}

impl SharedAtomics {
    /// Create a zero-filled buffer of `len` cells.
    pub fn new(len: usize) -> Self {
        Self {
            cells: (0..len).map(|_| AtomicI64::new(0)).collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn load(
        &self,
        index: usize,
        order: Ordering,
    ) -> i64 {
        self.cells[index].load(order)
    }

    #[inline]
    pub fn store(
        &self,
        index: usize,
        value: i64,
        order: Ordering,
    ) {
        self.cells[index].store(value, order)
    }

    #[inline]
    pub fn swap(
        &self,
        index: usize,
        value: i64,
        order: Ordering,
    ) -> i64 {
        self.cells[index].swap(value, order)
    }

    #[inline]
    pub fn fetch_add(
        &self,
        index: usize,
        delta: i64,
        order: Ordering,
    ) -> i64 {
        self.cells[index].fetch_add(delta, order)
    }

    #[inline]
    pub fn compare_exchange(
        &self,
        index: usize,
        current: i64,
        new: i64,
        success: Ordering,
        failure: Ordering,
    ) -> Result<i64, i64> {
        self.cells[index].compare_exchange(current, new, success, failure)
    }

    /// Whether both handles refer to the same buffer.
    pub fn ptr_eq(
        &self,
        other: &SharedAtomics,
    ) -> bool {
        Arc::ptr_eq(&self.cells, &other.cells)
    }

    /// Number of live handles to the buffer.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.cells)
    }
}

impl fmt::Debug for SharedAtomics {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SharedAtomics")
            .field("len", &self.cells.len())
            .field("holders", &self.holders())
            .finish()
    }
}

/// Reference-counted object shared by identity across contexts.
///
/// Lives as long as its longest holder. Mutation goes through whatever
/// interior mutability `T` provides.
#[derive(Debug)]
pub struct Shared<T: ?Sized> {
    inner: Arc<T>,
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }
}

impl<T: ?Sized> Shared<T> {
    /// Whether both handles refer to the same object.
    pub fn ptr_eq(
        &self,
        other: &Shared<T>,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live handles to the object.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: ?Sized> From<Arc<T>> for Shared<T> {
    fn from(inner: Arc<T>) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests;

//! A writer-preferring reader/writer lock.
//!
//! Readers share a resource gate: the first reader in closes it and the
//! last reader out opens it again. A separate admission gate is held by a
//! writer for as long as it waits for the resource gate, and taken briefly
//! by each reader while it updates the reader count. A pending writer
//! therefore stops new readers at once while the readers already inside
//! drain normally.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

use parking_lot::{Condvar, Mutex};

/// A binary semaphore. Unlike a mutex guard, it may be released by a
/// different thread than the one that acquired it, which the reader group
/// needs: the last reader out is rarely the first one in.
struct Gate {
    closed: Mutex<bool>,
    changed: Condvar,
}

impl Gate {
    fn new() -> Self {
        Gate {
            closed: Mutex::new(false),
            changed: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut closed = self.closed.lock();
        while *closed {
            self.changed.wait(&mut closed);
        }
        *closed = true;
    }

    fn release(&self) {
        *self.closed.lock() = false;
        self.changed.notify_one();
    }
}

pub struct ReadWriteLock<T> {
    admission: Gate,
    resource: Gate,
    readers: Mutex<usize>,
    data: UnsafeCell<T>,
}

// The gates provide the exclusion that `RwLock` would otherwise give us.
unsafe impl<T: Send> Send for ReadWriteLock<T> {}
unsafe impl<T: Send + Sync> Sync for ReadWriteLock<T> {}

impl<T> ReadWriteLock<T> {
    pub fn new(data: T) -> Self {
        ReadWriteLock {
            admission: Gate::new(),
            resource: Gate::new(),
            readers: Mutex::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire shared access. Blocks while a writer holds or waits for the lock.
    pub fn read(&self) -> ReadGuard<'_, T> {
        self.acquire_read();
        ReadGuard { lock: self }
    }

    /// Acquire exclusive access.
    pub fn write(&self) -> WriteGuard<'_, T> {
        self.acquire_write();
        WriteGuard { lock: self }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    fn acquire_read(&self) {
        self.admission.acquire();
        {
            let mut readers = self.readers.lock();
            *readers += 1;
            if *readers == 1 {
                self.resource.acquire();
            }
        }
        self.admission.release();
    }

    fn release_read(&self) {
        let mut readers = self.readers.lock();
        *readers -= 1;
        if *readers == 0 {
            self.resource.release();
        }
    }

    fn acquire_write(&self) {
        self.admission.acquire();
        self.resource.acquire();
        self.admission.release();
    }

    fn release_write(&self) {
        self.resource.release();
    }
}

impl<T: Default> Default for ReadWriteLock<T> {
    fn default() -> Self {
        ReadWriteLock::new(T::default())
    }
}

pub struct ReadGuard<'a, T> {
    lock: &'a ReadWriteLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the resource gate is held by the reader group.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

pub struct WriteGuard<'a, T> {
    lock: &'a ReadWriteLock<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the resource gate is held exclusively by this guard.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

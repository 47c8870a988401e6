//! Reference-counted ownership of a counter backend.
//!
//! Counter subsystems keep process-wide state behind their init/shutdown
//! calls, and initializing twice without a shutdown in between is undefined.
//! [`CounterLibrary`] owns the backend and counts its users: the first
//! [`LibraryGuard`] initializes the backend, dropping the last one shuts it
//! down. Everything is `Rc`-based, so a library and its guards stay on the
//! thread that created them.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::Rc;

use log::{debug, info};

use crate::{Backend, CounterError};

/// Shared owner of a counter backend
pub struct CounterLibrary<B: Backend> {
    backend: RefCell<B>,
    users: Cell<usize>,
}

impl<B: Backend> CounterLibrary<B> {
    /// Wraps a backend. The backend is not initialized until the first
    /// call to [`CounterLibrary::acquire`].
    pub fn new(backend: B) -> Rc<Self> {
        Rc::new(Self {
            backend: RefCell::new(backend),
            users: Cell::new(0),
        })
    }

    /// Registers a new user, initializing the backend if this is the first.
    ///
    /// # Errors
    ///
    /// Returns the backend's init error. The user count is left unchanged in
    /// that case, so a later `acquire` retries the initialization.
    pub fn acquire(self: &Rc<Self>) -> Result<LibraryGuard<B>, CounterError> {
        if self.users.get() == 0 {
            self.backend.borrow_mut().init()?;
            info!("Counter library initialized");
        }
        self.users.set(self.users.get() + 1);
        debug!("Counter library users: {}", self.users.get());

        Ok(LibraryGuard {
            library: Rc::clone(self),
        })
    }

    /// Number of live guards
    pub fn users(&self) -> usize {
        self.users.get()
    }

    /// Whether the backend is currently initialized
    pub fn is_initialized(&self) -> bool {
        self.users.get() > 0
    }

    /// Shared access to the backend, e.g. to inspect a mock's call counters
    pub fn backend(&self) -> Ref<'_, B> {
        self.backend.borrow()
    }

    fn release(&self) {
        let remaining = self.users.get().saturating_sub(1);
        self.users.set(remaining);
        if remaining == 0 {
            self.backend.borrow_mut().shutdown();
            info!("Counter library shut down");
        } else {
            debug!("Counter library users: {}", remaining);
        }
    }
}

/// A live use of a [`CounterLibrary`]. Dropping it releases the use.
pub struct LibraryGuard<B: Backend> {
    library: Rc<CounterLibrary<B>>,
}

impl<B: Backend> LibraryGuard<B> {
    /// Exclusive access to the backend for a single call sequence
    pub fn backend_mut(&self) -> RefMut<'_, B> {
        self.library.backend.borrow_mut()
    }

    /// The library this guard belongs to
    pub fn library(&self) -> &Rc<CounterLibrary<B>> {
        &self.library
    }
}

impl<B: Backend> Drop for LibraryGuard<B> {
    fn drop(&mut self) {
        self.library.release();
    }
}

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A non-reentrant, error-checking mutex built on raw pthread primitives.
///
/// This is the per-descriptor critical section. Re-acquiring it from the
/// owning thread is a design defect: the mutex reports `EDEADLK` and the
/// process aborts instead of deadlocking silently. The owner is tracked so
/// that a hook running nested inside a real call (the BSD buffer refill) can
/// tell that its caller already holds the section.
pub struct DescriptorMutex<T> {
    inner: UnsafeCell<libc::pthread_mutex_t>,
    data: UnsafeCell<T>,
    owner: AtomicUsize,
    initialized: AtomicBool,
    init_lock: AtomicBool,
}

unsafe impl<T: Send> Send for DescriptorMutex<T> {}
unsafe impl<T: Send> Sync for DescriptorMutex<T> {}

const NO_OWNER: usize = 0;

#[inline(always)]
fn current_thread() -> usize {
    unsafe { libc::pthread_self() as usize }
}

impl<T> DescriptorMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
            data: UnsafeCell::new(data),
            owner: AtomicUsize::new(NO_OWNER),
            initialized: AtomicBool::new(false),
            init_lock: AtomicBool::new(false),
        }
    }

    fn ensure_init(&self) {
        if self.initialized.load(Ordering::Acquire) {
            return;
        }

        // Spinlock to serialize initialization
        while self
            .init_lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }

        if !self.initialized.load(Ordering::Relaxed) {
            unsafe {
                let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
                libc::pthread_mutexattr_init(&mut attr);
                libc::pthread_mutexattr_settype(&mut attr, libc::PTHREAD_MUTEX_ERRORCHECK);
                libc::pthread_mutex_init(self.inner.get(), &attr);
                libc::pthread_mutexattr_destroy(&mut attr);
                self.initialized.store(true, Ordering::Release);
            }
        }

        self.init_lock.store(false, Ordering::Release);
    }

    pub fn lock(&self) -> DescriptorGuard<'_, T> {
        self.ensure_init();
        let rc = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        if rc == libc::EDEADLK {
            if cfg!(test) {
                panic!("descriptor critical section re-entered by its owner");
            }
            crate::reals::fatal("zzuf: descriptor critical section re-entered by its owner\n");
        }
        self.owner.store(current_thread(), Ordering::Relaxed);
        DescriptorGuard { mutex: self }
    }

    /// True if some thread currently holds the section.
    pub fn is_locked(&self) -> bool {
        self.owner.load(Ordering::Relaxed) != NO_OWNER
    }

    /// True if the calling thread currently holds the section.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == current_thread()
    }

    /// Access the protected data without locking.
    ///
    /// # Safety
    /// The calling thread must hold the section (see
    /// [`is_held_by_current_thread`](Self::is_held_by_current_thread)) and no
    /// reference obtained through that guard may be live.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn data_unchecked(&self) -> &mut T {
        &mut *self.data.get()
    }
}

impl<T> Drop for DescriptorMutex<T> {
    fn drop(&mut self) {
        if self.initialized.load(Ordering::Acquire) {
            unsafe {
                libc::pthread_mutex_destroy(self.inner.get());
            }
        }
    }
}

pub struct DescriptorGuard<'a, T> {
    mutex: &'a DescriptorMutex<T>,
}

impl<'a, T> Deref for DescriptorGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T> DerefMut for DescriptorGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T> Drop for DescriptorGuard<'a, T> {
    fn drop(&mut self) {
        self.mutex.owner.store(NO_OWNER, Ordering::Relaxed);
        unsafe {
            libc::pthread_mutex_unlock(self.mutex.inner.get());
        }
    }
}

use error::Result;
use hazard_pointer::HazardDomain;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use util;

type LIFONodePtr<T> = *mut LIFONode<T>;

struct LIFONode<T> {
    value: ManuallyDrop<T>,
    // Written once before the node is published, never after.
    next: LIFONodePtr<T>,
}

impl<T> LIFONode<T> {
    fn new(value: T) -> Self {
        LIFONode {
            value: ManuallyDrop::new(value),
            next: ptr::null_mut(),
        }
    }
}

/// Destructor handed to the domain for a popped node, whose value has already been moved out.
unsafe fn free_node<T>(p: *mut u8) {
    drop(Box::from_raw(p as LIFONodePtr<T>));
}

/// Treiber stack: a single atomic `top`, swung by CAS. Popped nodes are retired into a
/// `HazardDomain` instead of being freed, and every dereference of `top` is covered by the
/// calling thread's hazard slot, which closes the ABA window of address reuse.
///
/// # Examples
///
/// ```
/// use hazard_stack::lockfree_stack::LockFreeStack;
///
/// let stack = LockFreeStack::new();
/// stack.push(1);
/// stack.push(2);
/// assert_eq!(stack.pop(), Some(2));
/// assert_eq!(stack.pop(), Some(1));
/// assert_eq!(stack.pop(), None);
/// ```
pub struct LockFreeStack<T> {
    domain: HazardDomain,
    top: util::Align64<AtomicPtr<LIFONode<T>>>,
    _owns: PhantomData<T>,
}

unsafe impl<T: Send> Send for LockFreeStack<T> {}

unsafe impl<T: Send> Sync for LockFreeStack<T> {}

impl<T> Default for LockFreeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LockFreeStack<T> {
    /// Stack reclaiming through the process-wide `HazardDomain::global()`.
    pub fn new() -> LockFreeStack<T> {
        Self::with_domain(HazardDomain::global().clone())
    }

    /// Stack reclaiming through `domain`, sharing its slot table with every other user of it.
    pub fn with_domain(domain: HazardDomain) -> LockFreeStack<T> {
        LockFreeStack {
            domain,
            top: util::Align64::new(AtomicPtr::new(ptr::null_mut())),
            _owns: PhantomData,
        }
    }

    #[inline]
    pub fn domain(&self) -> &HazardDomain {
        &self.domain
    }

    /// Claim the calling thread's hazard slot now rather than on its first non-empty pop.
    pub fn register(&self) -> Result<()> {
        self.domain.acquire_slot().map(|_| ())
    }

    /// Snapshot only: other threads may change the answer right away.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.top.load(Ordering::Acquire).is_null()
    }

    pub fn push(&self, v: T) {
        let node = Box::into_raw(Box::new(LIFONode::new(v)));
        let mut old = self.top.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).next = old };
            match self
                .top
                .compare_exchange_weak(old, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(cur) => old = cur,
            }
        }
    }

    /// Pop the most recently pushed value, `None` if the stack is empty.
    ///
    /// # Panics
    ///
    /// When the calling thread has no hazard slot and the domain has none left. A thread that
    /// must survive that case should use `try_pop`.
    pub fn pop(&self) -> Option<T> {
        match self.try_pop() {
            Ok(ret) => ret,
            Err(e) => {
                error!("pop fail, ret={}", e);
                panic!("{}", e);
            }
        }
    }

    /// Like `pop`, but reports slot exhaustion as an error.
    pub fn try_pop(&self) -> Result<Option<T>> {
        if self.is_empty() {
            return Ok(None);
        }
        let hazard = self.domain.acquire_slot()?;
        loop {
            let cur = hazard.protect_load(&self.top);
            if cur.is_null() {
                return Ok(None);
            }
            // `cur` is published and was still on top afterwards, so it is not reclaimed yet.
            let next = unsafe { (*cur).next };
            if self
                .top
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // Unlinked by this thread alone; nobody else reads `value`.
                let ret = unsafe { ptr::read(&*(*cur).value) };
                hazard.clear();
                unsafe {
                    self.domain.retire(cur as *mut u8, free_node::<T>);
                }
                return Ok(Some(ret));
            }
            util::pause();
        }
    }
}

impl<T> Drop for LockFreeStack<T> {
    fn drop(&mut self) {
        let mut head = self.top.swap(ptr::null_mut(), Ordering::Acquire);
        while !head.is_null() {
            let mut node = unsafe { Box::from_raw(head) };
            unsafe { ManuallyDrop::drop(&mut node.value) };
            head = node.next;
        }
    }
}

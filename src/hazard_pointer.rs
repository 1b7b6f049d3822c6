//! Definition and implementation of `HazardDomain`, the hazard pointer manager.
//!
//! Every thread that dereferences shared nodes owns exactly one hazard slot of the domain,
//! claimed lazily on first use and released when the thread exits. Before dereferencing an
//! address, the thread publishes it into its slot and then re-validates that the address is
//! still reachable. Unlinked objects are never freed directly: they are retired into the
//! retired list of the thread's slot, and once that list reaches `reclaim_threshold` a
//! reclamation pass takes a snapshot of every slot and destroys only the retired objects absent
//! from the snapshot.
//!
//! Retired objects carry a type-erased destructor, so one domain can serve containers of any
//! element type.
//!
//! Threads only remember which slot they own through a weak reference: once the last
//! `HazardDomain` handle is gone the domain is destroyed together with everything still
//! retired in it, even while the threads that used it keep running.
use std::cell::{RefCell, UnsafeCell};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::sync::atomic::{self, AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use config::Config;
use error::{Error, Result};
use spin_lock::SpinLock;
use util::{self, Align64};

/// Type-erased destructor of a retired object, called with the retired address exactly once.
pub type Destructor = unsafe fn(*mut u8);

struct Retired {
    addr: *mut u8,
    destructor: Destructor,
}

// A retired object is owned by the retire mechanism alone; it only crosses threads when an
// exiting thread hands it over to the orphan list.
unsafe impl Send for Retired {}

impl Retired {
    #[inline]
    unsafe fn reclaim(self) {
        (self.destructor)(self.addr)
    }
}

struct Slot {
    hazard: AtomicPtr<u8>,
    used: AtomicBool,
    // Only touched by the thread that claimed the slot, or by the domain's `Drop`.
    retired: UnsafeCell<Vec<Retired>>,
}

unsafe impl Sync for Slot {}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            hazard: AtomicPtr::new(ptr::null_mut()),
            used: AtomicBool::new(false),
            retired: UnsafeCell::new(Vec::new()),
        }
    }
}

impl Slot {
    /// Must only be called by the owner of the slot, and the borrow must not outlive a call
    /// that may run destructors.
    #[inline]
    unsafe fn retired_mut(&self) -> &mut Vec<Retired> {
        &mut *self.retired.get()
    }
}

struct DomainInner {
    config: Config,
    slots: Box<[Align64<Slot>]>,
    claimed: AtomicUsize,
    orphans: SpinLock<Vec<Retired>>,
    retired_total: AtomicUsize,
    reclaimed_total: AtomicUsize,
}

impl DomainInner {
    fn claim_slot(&self) -> Result<usize> {
        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.used.load(Ordering::Relaxed)
                && slot
                    .used
                    .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            {
                let claimed = self.claimed.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("claim hazard slot, index={}, claimed={}", index, claimed);
                return Ok(index);
            }
        }
        warn!("hazard slot exhausted, max_slots={}", self.config.max_slots);
        Err(Error::ResourceExhausted {
            max_slots: self.config.max_slots,
        })
    }

    /// Give slot `index` back; its pending objects are destroyed or orphaned first.
    fn release_slot(&self, index: usize) {
        let slot = &self.slots[index];
        slot.hazard.store(ptr::null_mut(), Ordering::Release);
        let retired = unsafe { mem::replace(slot.retired_mut(), Vec::new()) };
        if !retired.is_empty() {
            let (kept, _) = self.scan(retired);
            if !kept.is_empty() {
                trace!("release slot {}, orphan {} retired objects", index, kept.len());
                self.orphans.lock().extend(kept);
            }
        }
        slot.used.store(false, Ordering::Release);
        let claimed = self.claimed.fetch_sub(1, Ordering::Relaxed) - 1;
        debug!("release hazard slot, index={}, claimed={}", index, claimed);
    }

    fn snapshot(&self) -> HashSet<usize> {
        // Pairs with the fence in `HazardSlot::protect`: either the scan sees the published
        // address, or the protecting thread sees the unlink on re-validation.
        atomic::fence(Ordering::SeqCst);
        let mut hazards = HashSet::with_capacity(self.slots.len());
        for slot in self.slots.iter() {
            let hp = slot.hazard.load(Ordering::Acquire);
            if !hp.is_null() {
                hazards.insert(hp as usize);
            }
        }
        hazards
    }

    /// Destroy every entry of `retired` that is not hazarded, return the survivors and the
    /// number of destroyed entries.
    fn scan(&self, retired: Vec<Retired>) -> (Vec<Retired>, usize) {
        let start = util::get_cur_microseconds_time();
        let total = retired.len();
        let hazards = self.snapshot();
        let mut kept = Vec::new();
        for r in retired {
            if hazards.contains(&(r.addr as usize)) {
                kept.push(r);
            } else {
                unsafe { r.reclaim() };
                self.reclaimed_total.fetch_add(1, Ordering::Relaxed);
            }
        }
        let reclaimed = total - kept.len();
        debug!(
            "reclaim pass, reclaimed={}, kept={}, hazards={}, cost={}us",
            reclaimed,
            kept.len(),
            hazards.len(),
            util::get_cur_microseconds_time() - start
        );
        (kept, reclaimed)
    }
}

impl Drop for DomainInner {
    fn drop(&mut self) {
        // No handle is left, so no stack and no `HazardSlot` can publish or read any more.
        let mut count = 0;
        for slot in self.slots.iter_mut() {
            for r in slot.retired.get_mut().drain(..) {
                unsafe { r.reclaim() };
                count += 1;
            }
        }
        for r in self.orphans.get_mut().drain(..) {
            unsafe { r.reclaim() };
            count += 1;
        }
        debug!("destroy hazard domain, reclaimed={}", count);
    }
}

/// Which slot of one domain the current thread owns.
struct LocalRecord {
    domain: Weak<DomainInner>,
    slot: usize,
}

impl LocalRecord {
    #[inline]
    fn is_for(&self, inner: &Arc<DomainInner>) -> bool {
        // The weak count keeps the allocation, so the address cannot be reused by another domain.
        self.domain.as_ptr() == Arc::as_ptr(inner)
    }
}

impl Drop for LocalRecord {
    fn drop(&mut self) {
        if let Some(domain) = self.domain.upgrade() {
            domain.release_slot(self.slot);
        }
    }
}

thread_local! {
    static LOCAL_RECORDS: RefCell<Vec<LocalRecord>> = RefCell::new(Vec::new());
}

/// Hazard pointer manager: a fixed table of `max_slots` hazard slots shared by all threads,
/// plus the retire/reclaim machinery. Cloning returns another handle to the same domain; the
/// domain lives as long as its handles (stacks built on it hold one each).
///
/// # Examples
///
/// ```
/// use hazard_stack::config::Config;
/// use hazard_stack::hazard_pointer::HazardDomain;
///
/// unsafe fn free_u64(p: *mut u8) {
///     drop(Box::from_raw(p as *mut u64));
/// }
///
/// let domain = HazardDomain::new(Config::default().with_reclaim_threshold(2)).unwrap();
/// let a = Box::into_raw(Box::new(1u64));
/// let b = Box::into_raw(Box::new(2u64));
///
/// let slot = domain.acquire_slot().unwrap();
/// slot.protect(a);
/// unsafe {
///     assert_eq!(domain.retire(a as *mut u8, free_u64), 0);
///     // threshold reached, `b` is freed while the hazarded `a` is kept
///     assert_eq!(domain.retire(b as *mut u8, free_u64), 1);
/// }
/// slot.clear();
/// assert_eq!(domain.reclaim(), 1);
/// ```
#[derive(Clone)]
pub struct HazardDomain {
    inner: Arc<DomainInner>,
}

static GLOBAL_DOMAIN: OnceLock<HazardDomain> = OnceLock::new();

impl HazardDomain {
    pub fn new(config: Config) -> Result<HazardDomain> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: Config) -> HazardDomain {
        let slots = (0..config.max_slots)
            .map(|_| Align64::default())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        HazardDomain {
            inner: Arc::new(DomainInner {
                config,
                slots,
                claimed: AtomicUsize::new(0),
                orphans: SpinLock::new(Vec::new()),
                retired_total: AtomicUsize::new(0),
                reclaimed_total: AtomicUsize::new(0),
            }),
        }
    }

    /// Process-wide domain built from `Config::default()`, initialized on first use. Every
    /// `LockFreeStack::new()` shares it, so its `max_slots` bounds all of them together.
    pub fn global() -> &'static HazardDomain {
        GLOBAL_DOMAIN.get_or_init(|| Self::build(Config::default()))
    }

    #[inline]
    pub fn max_slots(&self) -> usize {
        self.inner.config.max_slots
    }

    #[inline]
    pub fn reclaim_threshold(&self) -> usize {
        self.inner.config.reclaim_threshold
    }

    /// Number of slots currently claimed by live threads.
    #[inline]
    pub fn claimed_slots(&self) -> usize {
        self.inner.claimed.load(Ordering::Relaxed)
    }

    /// Objects ever handed to `retire`.
    #[inline]
    pub fn retired_total(&self) -> usize {
        self.inner.retired_total.load(Ordering::Relaxed)
    }

    /// Destructor calls made by reclamation passes so far.
    #[inline]
    pub fn reclaimed_total(&self) -> usize {
        self.inner.reclaimed_total.load(Ordering::Relaxed)
    }

    /// Whether two handles refer to the same domain.
    #[inline]
    pub fn same_domain(&self, other: &HazardDomain) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Slot owned by the calling thread, if it claimed one already.
    fn local_slot(&self) -> Option<usize> {
        LOCAL_RECORDS.with(|records| {
            records
                .borrow()
                .iter()
                .find(|r| r.is_for(&self.inner))
                .map(|r| r.slot)
        })
    }

    fn claim_local_slot(&self) -> Result<usize> {
        if let Some(index) = self.local_slot() {
            return Ok(index);
        }
        let index = self.inner.claim_slot()?;
        LOCAL_RECORDS.with(|records| {
            let mut records = records.borrow_mut();
            // records of destroyed domains have nothing left to release
            records.retain(|r| r.domain.strong_count() > 0);
            records.push(LocalRecord {
                domain: Arc::downgrade(&self.inner),
                slot: index,
            });
        });
        Ok(index)
    }

    /// Return the calling thread's slot, claiming a free one on first use. The slot stays bound
    /// to the thread until it exits or the domain is destroyed. Fails with `ResourceExhausted`
    /// when all `max_slots` slots are held by live threads.
    ///
    /// A thread has one slot per domain, and `LockFreeStack::pop` on a stack of this domain
    /// publishes into and clears that same slot. Protection set through the returned handle does
    /// not survive such a pop on the same thread.
    pub fn acquire_slot(&self) -> Result<HazardSlot> {
        let index = self.claim_local_slot()?;
        Ok(HazardSlot {
            slot: &self.inner.slots[index].0,
            index,
            _not_send: PhantomData,
        })
    }

    /// Hand `addr` over to the domain; `destructor(addr)` runs once no thread hazards it.
    /// Returns the number of objects destroyed by the reclamation pass this call triggered.
    /// A thread that cannot get a slot leaves the object to the orphan list.
    ///
    /// # Safety
    ///
    /// `addr` must already be unreachable for threads that have not protected it yet, must not
    /// be retired twice, and `destructor` must be sound to call on it from any thread.
    pub unsafe fn retire(&self, addr: *mut u8, destructor: Destructor) -> usize {
        self.inner.retired_total.fetch_add(1, Ordering::Relaxed);
        let r = Retired { addr, destructor };
        let index = match self.claim_local_slot() {
            Ok(index) => index,
            Err(e) => {
                warn!("retire without hazard slot, orphan it, ret={}", e);
                self.inner.orphans.lock().push(r);
                return 0;
            }
        };
        let len = {
            let retired = self.inner.slots[index].retired_mut();
            retired.push(r);
            retired.len()
        };
        if len >= self.inner.config.reclaim_threshold {
            self.reclaim()
        } else {
            0
        }
    }

    /// Run a reclamation pass over the calling thread's retired list and any orphans left by
    /// exited threads, regardless of the threshold. Returns the number of destroyed objects.
    pub fn reclaim(&self) -> usize {
        let index = self.local_slot();
        // Destructors run with the list taken out, they may retire again.
        let mut retired = match index {
            Some(index) => unsafe {
                mem::replace(self.inner.slots[index].retired_mut(), Vec::new())
            },
            None => Vec::new(),
        };
        if let Some(mut orphans) = self.inner.orphans.try_lock() {
            if !orphans.is_empty() {
                trace!("adopt {} orphaned objects", orphans.len());
                retired.append(&mut orphans);
            }
        }
        let (kept, reclaimed) = self.inner.scan(retired);
        if !kept.is_empty() {
            match index {
                Some(index) => unsafe { self.inner.slots[index].retired_mut().extend(kept) },
                None => self.inner.orphans.lock().extend(kept),
            }
        }
        reclaimed
    }

    /// Length of the calling thread's retired list.
    pub fn retired_count(&self) -> usize {
        match self.local_slot() {
            Some(index) => unsafe { self.inner.slots[index].retired_mut().len() },
            None => 0,
        }
    }

    /// Objects left behind by exited threads, waiting for a later pass.
    pub fn orphan_count(&self) -> usize {
        self.inner.orphans.lock().len()
    }

    /// Addresses currently published in any slot, read the same way a reclamation pass does.
    pub fn hazard_snapshot(&self) -> HashSet<usize> {
        self.inner.snapshot()
    }
}

impl fmt::Debug for HazardDomain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("HazardDomain")
            .field("config", &self.inner.config)
            .field("claimed_slots", &self.claimed_slots())
            .finish()
    }
}

/// Handle of the calling thread's hazard slot. Only the owning thread writes through it.
///
/// There is a single slot per thread and domain: every handle the thread acquires, and every
/// `LockFreeStack::pop` it runs on a stack of the same domain, share it. Publishing or clearing
/// through one of them replaces what the others published.
pub struct HazardSlot<'a> {
    slot: &'a Slot,
    index: usize,
    _not_send: PhantomData<*mut ()>,
}

impl<'a> HazardSlot<'a> {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Publish `addr`. Visible to every later reclamation pass before this thread's next load.
    #[inline]
    pub fn protect<T>(&self, addr: *const T) {
        self.slot.hazard.store(addr as *mut u8, Ordering::Release);
        atomic::fence(Ordering::SeqCst);
    }

    #[inline]
    pub fn clear(&self) {
        self.slot.hazard.store(ptr::null_mut(), Ordering::Release);
    }

    #[inline]
    pub fn protected(&self) -> *mut u8 {
        self.slot.hazard.load(Ordering::Relaxed)
    }

    /// Load `src` and publish the loaded pointer, repeating until the published value is still
    /// the current one. A non-null result is safe to dereference until the slot is cleared or
    /// reused. A null result leaves the slot cleared.
    pub fn protect_load<T>(&self, src: &AtomicPtr<T>) -> *mut T {
        let mut curr = src.load(Ordering::Acquire);
        loop {
            if curr.is_null() {
                self.clear();
                return curr;
            }
            self.protect(curr);
            let validated = src.load(Ordering::Acquire);
            if validated == curr {
                return curr;
            }
            curr = validated;
        }
    }
}

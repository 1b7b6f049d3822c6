extern crate time;

use std::hint;
use std::ops::{Deref, DerefMut};

/// Keeps `T` on its own cache line, so that hot atomics written by different threads (the stack
/// head, each hazard slot) do not suffer from false sharing.
#[repr(align(64))]
#[derive(Debug)]
pub struct Align64<T>(pub T);

impl<T> Align64<T> {
    #[inline]
    pub const fn new(t: T) -> Self {
        Align64(t)
    }
}

impl<T> Default for Align64<T>
where
    T: Default,
{
    fn default() -> Self {
        Align64(T::default())
    }
}

impl<T> Deref for Align64<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for Align64<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

pub fn get_cur_microseconds_time() -> i64 {
    let timespec = time::get_time();
    timespec.sec * 1_000_000 + timespec.nsec as i64 / 1_000
}

#[inline]
pub fn pause() {
    hint::spin_loop();
}

#[cfg(test)]
mod test {
    use std::mem;
    use std::sync::atomic::AtomicUsize;
    use util::{self, Align64};

    #[test]
    fn test_align() {
        let v = vec![Align64::new(AtomicUsize::new(0)), Align64::default()];
        assert_eq!(mem::align_of::<Align64<AtomicUsize>>(), 64);
        assert_eq!(&v[0] as *const _ as usize % 64, 0);
        assert_eq!(&v[1] as *const _ as usize - &v[0] as *const _ as usize, 64);
    }

    #[test]
    fn test_clock() {
        let a = util::get_cur_microseconds_time();
        let b = util::get_cur_microseconds_time();
        assert!(a > 0 && b >= a);
    }
}

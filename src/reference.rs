//! Reference LIFO models: a single-threaded stack and a spin-lock protected stack. They carry
//! no reclamation logic and serve as correctness and throughput baselines for
//! `LockFreeStack`.
use spin_lock::SpinLock;

/// Single-threaded stack.
#[derive(Debug, Clone)]
pub struct SeqStack<T> {
    items: Vec<T>,
}

impl<T> Default for SeqStack<T> {
    fn default() -> Self {
        SeqStack::new()
    }
}

impl<T> SeqStack<T> {
    pub fn new() -> Self {
        SeqStack { items: Vec::new() }
    }

    #[inline]
    pub fn push(&mut self, v: T) {
        self.items.push(v);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Coarse-grained stack, every operation holds one `SpinLock`.
pub struct LockedStack<T> {
    inner: SpinLock<SeqStack<T>>,
}

impl<T> Default for LockedStack<T> {
    fn default() -> Self {
        LockedStack::new()
    }
}

impl<T> LockedStack<T> {
    pub fn new() -> Self {
        LockedStack {
            inner: SpinLock::new(SeqStack::new()),
        }
    }

    pub fn push(&self, v: T) {
        self.inner.lock().push(v);
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.lock().pop()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod test {
    use reference::{LockedStack, SeqStack};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_seq() {
        let mut s = SeqStack::new();
        assert_eq!(s.pop(), None);
        s.push(1);
        s.push(2);
        s.push(3);
        assert_eq!(s.len(), 3);
        assert_eq!(s.pop(), Some(3));
        assert_eq!(s.pop(), Some(2));
        assert_eq!(s.pop(), Some(1));
        assert!(s.is_empty());
    }

    #[test]
    fn test_locked_multi_thread() {
        let s = Arc::new(LockedStack::new());
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let s = s.clone();
                thread::spawn(move || {
                    for i in 0..1000 {
                        s.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(s.len(), 4000);
        let mut popped = Vec::new();
        while let Some(v) = s.pop() {
            popped.push(v);
        }
        popped.sort();
        assert_eq!(popped, (0..4000).collect::<Vec<_>>());
        assert!(s.is_empty());
    }
}

//! Lock-Free stack with `Hazard Pointers` based memory reclamation for Rust
//!
//! `LockFreeStack` is a Treiber stack: one atomic `top` pointer, swung by compare-and-swap in
//! both `push` and `pop`. The hard part is freeing popped nodes: another thread may have loaded
//! the same `top` and still be about to read its `next`, and a freed address may be handed out
//! again by the allocator, which makes a stale CAS succeed (the
//! [`ABA problem`](https://en.wikipedia.org/wiki/ABA_problem)).
//!
//! [`Hazard Pointers`](http://www.cs.otago.ac.nz/cosc440/readings/hazard-pointers.pdf) solve
//! both: a thread publishes the address it is going to dereference into its own slot and
//! re-validates it, while popped nodes are retired and only destroyed once a scan of all slots
//! shows that nobody publishes them. `HazardDomain` is that manager; it is type-erased and can
//! be shared by any number of stacks.
//!
//! `SeqStack` and `LockedStack` in `reference` are plain baselines used by the tests.
//!
pub mod config;
pub mod error;
pub mod hazard_pointer;
pub mod lockfree_stack;
pub mod reference;
pub mod spin_lock;
pub mod util;

#[macro_use]
extern crate log;

#[macro_use]
extern crate cfg_if;

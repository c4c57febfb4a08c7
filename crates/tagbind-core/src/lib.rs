#![forbid(unsafe_code)]

//! Core addressing and store types for tagbind.
//!
//! This crate defines the leaf layer the rest of the engine is built on:
//!
//! - [`Reference`] / [`Context`]: canonical, context-aware addresses.
//! - [`FetchResult`] / [`Metadata`] / [`FetchError`]: the value-or-error
//!   envelope a store emits per reference.
//! - [`Store`]: the pull/push/write seam to the backend, with
//!   [`MemoryStore`] as the in-process reference implementation.
//!
//! Everything here follows the single-logical-owner model: shared state is
//! `Rc<RefCell<..>>`, observers register as `Weak` callbacks, and
//! unsubscription is RAII via [`StoreSubscription`].

pub mod fetch;
pub mod store;
pub mod tag;

pub use fetch::{FetchError, FetchResult, Metadata};
pub use store::{MemoryStore, Store, StoreSubscription};
pub use tag::{Context, Reference, ReferenceParseError};

#![forbid(unsafe_code)]

//! Reactive bindings from tag-addressed values to typed destinations.
//!
//! The crate sits on top of two layers:
//!
//! - `tagbind-core` — [`Reference`]s, the [`Store`] seam, and the
//!   in-memory reference store.
//! - `tagbind-compute` — the expression language and the reactive
//!   [`Handler`](tagbind_compute::Handler) that re-evaluates it.
//!
//! Here those become a declarative surface: declare bindings from
//! references (or expressions) into [`Property`] cells or closures,
//! call [`Bindings::request`], and the collection fetches everything,
//! waits for the whole set to settle, applies the batch, and announces
//! [`Update::DidSynchronize`]. After that barrier individual changes
//! stream through one at a time.
//!
//! ```
//! use std::rc::Rc;
//! use serde_json::json;
//! use tagbind::{Bindings, MemoryStore, Property, Reference, Store};
//!
//! let store = MemoryStore::new();
//! store.set(Reference::new("user.name"), json!("ada"));
//!
//! let name: Property<String> = Property::new();
//! let bindings = Bindings::new(Rc::new(store.clone()));
//! bindings.subscribe(&name, "user.name");
//! bindings.request();
//!
//! assert!(bindings.is_synchronized());
//! assert_eq!(name.get().as_deref(), Some("ada"));
//!
//! store.set(Reference::new("user.name"), json!("grace"));
//! assert_eq!(name.get().as_deref(), Some("grace"));
//! ```

pub mod binding;
pub mod bindings;
pub mod property;

pub use binding::{BindingError, BindingResult, BindingSnapshot};
pub use bindings::{Bindings, Tempo, Transaction, Update};
pub use property::{Property, PropertySubscription};

pub use tagbind_compute::{ComputeError, Handler};
pub use tagbind_core::{
    Context, FetchError, FetchResult, MemoryStore, Metadata, Reference, Store,
};

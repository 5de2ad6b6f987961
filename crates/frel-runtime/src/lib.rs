#![forbid(unsafe_code)]

//! Reactive kernel: datum and closure stores, filtered subscriptions, and a
//! generation-batched notification drain.
//!
//! A [`Runtime`] owns every table. Writes go through [`Runtime::set`] (and
//! the collection/availability mutators), which enqueue matching
//! subscriptions; [`Runtime::drain`] runs them in waves until nothing is
//! pending. Templates are instantiated from a [`MetadataRegistry`] and torn
//! down with cascading [`Runtime::destroy_closure`].
//!
//! ```
//! use frel_runtime::{MetadataRegistry, Runtime, Selector, Value};
//!
//! let mut rt = Runtime::new(MetadataRegistry::new());
//! let user = rt.create_datum("User", [("count", Value::Int(0))], None)?;
//! let view = rt.create_closure("app.View", None)?;
//! rt.subscribe(user, view, Selector::key("count"), |rt, n| {
//!     let count = rt.get(n.source, "count")?.as_int().unwrap_or(0);
//!     rt.set(n.target, "doubled", count * 2).map(|_| ())
//! })?;
//! rt.drain()?;
//!
//! rt.set(user, "count", 5)?;
//! rt.drain()?;
//! assert_eq!(rt.get(view, "doubled")?, Value::Int(10));
//! # Ok::<(), frel_runtime::RuntimeError>(())
//! ```

pub mod closure;
pub mod config;
pub mod datum;
pub mod error;
pub mod event;
pub mod identity;
mod lifecycle;
pub mod metadata;
pub mod runtime;
pub mod scheduler;
pub mod selector;
pub mod snapshot;
mod store;
pub mod subscription;
pub mod trace;
pub mod value;

pub use closure::Closure;
pub use config::{CallbackErrorPolicy, RuntimeConfig};
pub use datum::{Availability, Datum, Revisions, Shape};
pub use error::{Result, RuntimeError};
pub use event::{Event, EventSender, Invocation};
pub use identity::{ClosureId, DatumId, FunctionId, NodeId, SubscriptionId};
pub use metadata::{CallSite, CallSiteBinding, InternalBinding, MetadataRegistry, TemplateMeta};
pub use runtime::Runtime;
pub use scheduler::{DrainReport, GEN_LIMIT};
pub use selector::{Change, Selector};
pub use snapshot::{ClosureSnapshot, DatumContent, DatumSnapshot, Snapshot};
pub use subscription::{Callback, Notification, Subscription};
pub use trace::{LogSink, RecordingSink, TraceEvent, TraceSink};
pub use value::Value;

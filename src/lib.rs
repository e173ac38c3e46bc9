// Copyright (C) 2025-2026 The Tsunagi Authors. All Rights Reserved.
// This program is free software under MIT License.
// See the file LICENSE in this distribution for more details.

//! A small framework that separates application logic from data access, and
//! coordinates transactions across an arbitrary set of named external data
//! services (databases, file systems, message brokers, caches, ...).
//!
//! Application logic never learns which services are wired in. A logic
//! function takes a single data-access argument, expressed as a trait that
//! unions the accessor traits the logic needs; the accessor traits obtain
//! per-session connections by name through [`DataAcc::get_conn`]. The
//! framework owns everything else: data source registration and setup
//! ordering, lazy per-session connection creation, the multi-phase commit
//! protocol (pre-commit / commit / post-commit), rollback and force-back on
//! partial failure, and teardown in the reverse of the creation order.
//!
//! # Data sources and connections
//!
//! A [`DataSrc`] manages access to one external data service and creates a
//! [`DataConn`] — a connection for a single session — on demand. Data sources
//! are registered either globally, with the [`uses()`] function (or the
//! [`uses!`] macro for link-time registration), or per session with
//! [`DataHub::uses`]. Global data sources are set up once via [`setup()`] and
//! closed via [`shutdown()`]; session-local data sources are set up when a
//! session starts and closed when its [`DataHub`] is dropped.
//!
//! # Transactions
//!
//! A [`DataHub`] runs a logic function either without transaction control
//! ([`DataHub::run`]) or inside a transaction ([`DataHub::txn`]). In a
//! transaction, every connection created during the session takes part in an
//! ordered protocol: all `pre_commit`s, then all `commit`s, then all
//! `post_commit`s, with a barrier between phases. If the logic or any phase
//! fails, each connection is rolled back — or *forced back* when it reports
//! that its changes were already committed.
//!
//! Any phase method may offload time-consuming work onto the [`AsyncGroup`]
//! it receives; the framework joins that work at the end of the phase and
//! folds failures into the per-participant error list.
//!
//! # Example
//!
//! ```
//! use tsunagi::{AsyncGroup, DataAcc, DataConn, DataHub, DataSrc};
//!
//! struct FooDataSrc;
//! impl DataSrc<FooDataConn> for FooDataSrc {
//!     fn setup(&mut self, _ag: &mut AsyncGroup) -> errs::Result<()> {
//!         Ok(())
//!     }
//!     fn close(&mut self) {}
//!     fn create_conn(&mut self) -> errs::Result<Box<FooDataConn>> {
//!         Ok(Box::new(FooDataConn))
//!     }
//! }
//!
//! struct FooDataConn;
//! impl DataConn for FooDataConn {
//!     fn commit(&mut self, _ag: &mut AsyncGroup) -> errs::Result<()> {
//!         Ok(())
//!     }
//!     fn rollback(&mut self, _ag: &mut AsyncGroup) {}
//!     fn close(&mut self) {}
//! }
//!
//! trait FooAcc: DataAcc {
//!     fn fetch_greeting(&mut self) -> errs::Result<String> {
//!         let _conn = self.get_conn::<FooDataConn>("foo")?;
//!         Ok("hello".to_string())
//!     }
//! }
//! impl FooAcc for DataHub {}
//!
//! fn greeting_logic(data: &mut impl FooAcc) -> errs::Result<()> {
//!     let _greeting = data.fetch_greeting()?;
//!     Ok(())
//! }
//!
//! fn main() -> errs::Result<()> {
//!     tsunagi::uses("foo", FooDataSrc);
//!     tsunagi::setup()?;
//!
//!     let mut hub = DataHub::new();
//!     hub.txn(greeting_logic)?;
//!     drop(hub);
//!
//!     tsunagi::shutdown();
//!     Ok(())
//! }
//! ```

mod async_group;
mod data_acc;
mod data_conn;
mod data_hub;
mod data_src;

pub use async_group::AsyncGroupError;
pub use data_conn::DataConnError;
pub use data_hub::DataHubError;
pub use data_src::{
    create_static_data_src_entry, setup, setup_with_order, shutdown, uses, DataSrcError,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::{any, ptr};

/// Runs functions added by transaction participants on worker threads and
/// joins them at the end of a phase, collecting their errors keyed by the
/// participant name.
///
/// An instance of this struct is passed to [`DataSrc::setup`] and to every
/// phase method of [`DataConn`]. A participant whose work is quick simply
/// ignores it and returns its result directly; a participant with
/// time-consuming work hands it to [`AsyncGroup::add`] instead.
///
/// There is no cancellation or timeout: a function that never returns stalls
/// the session driving it.
pub struct AsyncGroup {
    names: Vec<Arc<str>>,
    join_handles: Vec<thread::JoinHandle<errs::Result<()>>>,
    pub(crate) name: Arc<str>,
}

/// A connection per session to one external data service.
///
/// Implementations provide the concrete input/output operations for their
/// data service and take part in the transaction protocol driven by
/// [`DataHub::txn`]. All methods other than `commit`, `rollback`, and `close`
/// have default implementations, so a connection without special pre/post
/// commit behavior only implements those three.
#[allow(unused_variables)] // for rustdoc
pub trait DataConn {
    /// Commits the updates made through this connection.
    fn commit(&mut self, ag: &mut AsyncGroup) -> errs::Result<()>;

    /// Runs before the commit process of all connections in the transaction.
    ///
    /// This is the place for update operations that cannot be made part of
    /// the service's own transaction mechanism; failing here prevents every
    /// connection from being committed.
    fn pre_commit(&mut self, ag: &mut AsyncGroup) -> errs::Result<()> {
        Ok(())
    }

    /// Runs after the commit process of all connections has succeeded.
    ///
    /// Errors of asynchronous functions added to `ag` here are discarded.
    fn post_commit(&mut self, ag: &mut AsyncGroup) {}

    /// Tells whether [`DataConn::force_back`] has to be called instead of
    /// [`DataConn::rollback`], which is the case when the updates of this
    /// connection were already committed.
    fn should_force_back(&self) -> bool {
        false
    }

    /// Discards the updates made through this connection.
    fn rollback(&mut self, ag: &mut AsyncGroup);

    /// Reverts updates that were already committed, because another
    /// connection in the same transaction failed afterwards.
    fn force_back(&mut self, ag: &mut AsyncGroup) {}

    /// Closes this connection.
    fn close(&mut self);
}

pub(crate) struct NoopDataConn {}

impl DataConn for NoopDataConn {
    fn commit(&mut self, _ag: &mut AsyncGroup) -> errs::Result<()> {
        Ok(())
    }
    fn rollback(&mut self, _ag: &mut AsyncGroup) {}
    fn close(&mut self) {}
}

/// A data source which creates the per-session connections to one external
/// data service.
///
/// A data source receives the configuration for its service, establishes
/// whatever global state the service needs in [`DataSrc::setup`] (connection
/// pools, global handles, ...), and then creates a [`DataConn`] instance per
/// session on request.
pub trait DataSrc<C>
where
    C: DataConn + 'static,
{
    /// Prepares this data source for creating connections.
    ///
    /// If the setup procedure is time-consuming it can be handed to `ag`
    /// instead of being run inline; the framework joins it before the setup
    /// result is determined.
    fn setup(&mut self, ag: &mut AsyncGroup) -> errs::Result<()>;

    /// Closes this data source and releases the state established by
    /// [`DataSrc::setup`].
    fn close(&mut self);

    /// Creates a new connection for a single session.
    fn create_conn(&mut self) -> errs::Result<Box<C>>;
}

pub(crate) struct NoopDataSrc {}

impl DataSrc<NoopDataConn> for NoopDataSrc {
    fn setup(&mut self, _ag: &mut AsyncGroup) -> errs::Result<()> {
        Ok(())
    }
    fn close(&mut self) {}
    fn create_conn(&mut self) -> errs::Result<Box<NoopDataConn>> {
        Ok(Box::new(NoopDataConn {}))
    }
}

// A NonNull that can be held in Sync statics. The pointees are heap entries
// whose access is serialized by the phased registry lifecycle.
pub(crate) struct SendSyncNonNull<T> {
    pub(crate) non_null_ptr: ptr::NonNull<T>,
}

impl<T> SendSyncNonNull<T> {
    pub(crate) fn new(non_null_ptr: ptr::NonNull<T>) -> Self {
        Self { non_null_ptr }
    }
}

unsafe impl<T> Send for SendSyncNonNull<T> {}
unsafe impl<T> Sync for SendSyncNonNull<T> {}

impl<T> Clone for SendSyncNonNull<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for SendSyncNonNull<T> {}

// A registered data source with its name, type-erased so that entries of
// heterogeneous source types can share one registry. The function-pointer
// slots are filled per concrete type on construction and are invoked through
// the defaulted `DataSrcEntry` view; #[repr(C)] keeps their offsets
// independent of the type parameters.
#[repr(C)]
pub(crate) struct DataSrcEntry<S = NoopDataSrc, C = NoopDataConn>
where
    S: DataSrc<C>,
    C: DataConn + 'static,
{
    drop_fn: fn(*const DataSrcEntry),
    setup_fn: fn(*const DataSrcEntry, &mut AsyncGroup) -> errs::Result<()>,
    close_fn: fn(*const DataSrcEntry),
    create_conn_fn: fn(*const DataSrcEntry) -> errs::Result<Box<DataConnEntry<C>>>,

    name: Arc<str>,
    data_src: S,
}

// The two-bucket registry of data sources: `not_setup` holds entries in
// registration order, `did_setup` holds entries in the order their setup
// succeeded. Closing walks `did_setup` in reverse.
pub(crate) struct DataSrcRegistry {
    not_setup: Vec<SendSyncNonNull<DataSrcEntry>>,
    did_setup: Vec<SendSyncNonNull<DataSrcEntry>>,
    local: bool,
}

// A created connection with its name, type-erased the same way as
// `DataSrcEntry`. `is_fn` is the runtime type witness behind
// `DataAcc::get_conn`.
#[repr(C)]
pub(crate) struct DataConnEntry<C = NoopDataConn>
where
    C: DataConn + 'static,
{
    drop_fn: fn(*const DataConnEntry),
    is_fn: fn(any::TypeId) -> bool,
    pre_commit_fn: fn(*const DataConnEntry, &mut AsyncGroup) -> errs::Result<()>,
    commit_fn: fn(*const DataConnEntry, &mut AsyncGroup) -> errs::Result<()>,
    post_commit_fn: fn(*const DataConnEntry, &mut AsyncGroup),
    should_force_back_fn: fn(*const DataConnEntry) -> bool,
    rollback_fn: fn(*const DataConnEntry, &mut AsyncGroup),
    force_back_fn: fn(*const DataConnEntry, &mut AsyncGroup),
    close_fn: fn(*const DataConnEntry),

    name: Arc<str>,
    data_conn: Box<C>,
}

// The per-session pool of live connections, in the order the commit phases
// walk them. Slots are `Option` only because a pre-declared commit order
// reserves them up front; a pool without a declared order is all-`Some` in
// acquisition order.
pub(crate) struct DataConnPool {
    vec: Vec<Option<ptr::NonNull<DataConnEntry>>>,
    index_map: HashMap<Arc<str>, usize>,
}

/// The hub of a single session's data access: it integrates global and
/// session-local data sources, creates connections lazily by name, and drives
/// the transaction protocol over every connection it created.
///
/// A `DataHub` is owned by one session and is not shared across threads.
/// Dropping it closes any remaining connections and then the session-local
/// data sources.
pub struct DataHub {
    // conn_pool precedes local_registry so connections close before their
    // session-local sources on drop.
    conn_pool: DataConnPool,
    local_registry: DataSrcRegistry,
    src_map: HashMap<Arc<str>, (bool, usize)>,
    fixed: bool,
}

/// The ability to obtain a data connection by name.
///
/// Accessor traits extend this trait with default methods that fetch their
/// connections via [`DataAcc::get_conn`], and application logic takes an
/// argument bounded by the union of the accessor traits it needs. [`DataHub`]
/// implements this trait, so a hub satisfies any such union.
pub trait DataAcc {
    /// Retrieves the connection with the given name, creating it from the
    /// identically named data source on first access.
    fn get_conn<C: DataConn + 'static>(&mut self, name: impl AsRef<str>) -> errs::Result<&mut C>;
}

#[doc(hidden)]
pub struct StaticDataSrcEntry {
    pub(crate) ssnnptr: SendSyncNonNull<DataSrcEntry>,
}

#[doc(hidden)]
pub struct StaticDataSrcRegistration {
    pub(crate) factory: fn() -> StaticDataSrcEntry,
}

// Copyright (C) 2025-2026 The Tsunagi Authors. All Rights Reserved.
// This program is free software under MIT License.
// See the file LICENSE in this distribution for more details.

use crate::data_src::{copy_global_data_srcs_to_map, create_conn_from_global_data_src};
use crate::{DataConn, DataConnPool, DataHub, DataSrc, DataSrcError, DataSrcRegistry};

#[allow(unused)] // for rustdoc
use crate::DataAcc;

use std::collections::HashMap;
use std::sync::Arc;
use std::{any, ptr};

/// An enum type representing the reasons for errors that can occur within
/// [`DataHub`] operations.
#[derive(Debug)]
pub enum DataHubError {
    /// Indicates a failure during the setup process of one or more
    /// session-local data sources.
    /// Contains a vector of data source names and their corresponding errors.
    FailToSetupLocalDataSrcs {
        /// The vector contains errors that occurred in each [`DataSrc`] object.
        errors: Vec<(Arc<str>, errs::Err)>,
    },

    /// Indicates a failure to cast a [`DataHub`] to the data-access type
    /// expected by a logic function.
    ///
    /// This reason exists for error-tag parity across renditions of this
    /// framework; with trait-bound composition the cast cannot fail and this
    /// crate never produces it.
    FailToCastDataHub {
        /// The type name of the [`DataHub`] that failed to cast.
        cast_from_type: &'static str,
        /// The type name to which the [`DataHub`] attempted to cast.
        cast_to_type: &'static str,
    },
}

impl DataHub {
    /// Creates a new `DataHub`.
    ///
    /// Upon creation, the global data source registry is fixed (when no
    /// [`crate::setup`] call has already done so) and the set-up global data
    /// sources are indexed for access by this hub.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let mut src_map = HashMap::new();
        copy_global_data_srcs_to_map(&mut src_map);

        Self {
            conn_pool: DataConnPool::new(),
            local_registry: DataSrcRegistry::new(true),
            src_map,
            fixed: false,
        }
    }

    /// Creates a new `DataHub` with a pre-declared commit order for its data
    /// connections.
    ///
    /// The connections named in `names` take part in the commit phases in
    /// that order; connections not named follow in the order of their first
    /// access. Connections are closed in the reverse of the same order.
    ///
    /// # Parameters
    ///
    /// * `names`: The names of the data connections to commit first, in order.
    pub fn with_commit_order(names: &[&str]) -> Self {
        let mut src_map = HashMap::new();
        copy_global_data_srcs_to_map(&mut src_map);

        Self {
            conn_pool: DataConnPool::with_commit_order(names),
            local_registry: DataSrcRegistry::new(true),
            src_map,
            fixed: false,
        }
    }

    /// Registers a session-local data source with this hub.
    ///
    /// This method is the session-scoped counterpart of the global
    /// [`crate::uses()`] function. While [`DataHub::run`] or [`DataHub::txn`]
    /// is executing the hub is "fixed" and calls to this method are ignored;
    /// afterwards the hub accepts registrations again for its next session.
    ///
    /// # Parameters
    ///
    /// * `name`: The unique name for the local data source.
    /// * `ds`: The [`DataSrc`] instance to register.
    pub fn uses<S, C>(&mut self, name: impl Into<Arc<str>>, ds: S)
    where
        S: DataSrc<C> + 'static,
        C: DataConn + 'static,
    {
        if self.fixed {
            return;
        }
        self.local_registry.add(name, ds);
    }

    /// Unregisters and drops a session-local data source by its name.
    ///
    /// A registered data source that was already set up is closed. Global
    /// data sources are not affected, even when `name` matches one of them.
    /// This method is ignored while the hub is fixed.
    ///
    /// # Parameters
    ///
    /// * `name`: The name of the local data source to unregister.
    pub fn disuses(&mut self, name: impl AsRef<str>) {
        if self.fixed {
            return;
        }
        if let Some((true, _)) = self.src_map.get(name.as_ref()) {
            self.src_map.remove(name.as_ref());
        }
        self.local_registry.remove(name);
    }

    fn begin(&mut self) -> errs::Result<()> {
        self.fixed = true;

        let mut errors = Vec::new();
        self.local_registry.setup(&mut errors);

        // The sources that did set up become reachable even when others
        // failed; dropping the hub closes them.
        self.local_registry.copy_did_setup_into(&mut self.src_map);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errs::Err::new(DataHubError::FailToSetupLocalDataSrcs {
                errors,
            }))
        }
    }

    #[inline]
    fn commit(&mut self) -> errs::Result<()> {
        self.conn_pool.commit()
    }

    #[inline]
    fn rollback(&mut self) {
        self.conn_pool.rollback();
    }

    fn end(&mut self) {
        self.conn_pool.close();
        self.fixed = false;
    }

    /// Executes a logic function without transaction control.
    ///
    /// The session-local data sources are set up, the logic runs, and the
    /// connections created during the session are closed, in the reverse of
    /// their creation order. No commit or rollback is performed.
    ///
    /// # Parameters
    ///
    /// * `logic_fn`: A closure encapsulating the logic to execute; it
    ///   receives this hub as its data-access argument.
    ///
    /// # Returns
    ///
    /// * `errs::Result<()>`: The result of the logic function, or the setup
    ///   error that prevented it from running.
    pub fn run<F>(&mut self, mut logic_fn: F) -> errs::Result<()>
    where
        F: FnMut(&mut DataHub) -> errs::Result<()>,
    {
        let mut r = self.begin();
        if r.is_ok() {
            r = logic_fn(self);
        }
        self.end();
        r
    }

    /// Executes a logic function within a transaction.
    ///
    /// The session-local data sources are set up, then the logic runs. When
    /// it succeeds, all connections created during the session are committed:
    /// first every `pre_commit`, then every `commit`, then every
    /// `post_commit`, with a barrier between the phases. When the logic or
    /// the commit process fails, every connection is rolled back instead —
    /// or forced back, when it reports its updates as already committed.
    /// Finally the connections are closed, in the reverse of their creation
    /// order.
    ///
    /// # Parameters
    ///
    /// * `logic_fn`: A closure encapsulating the logic to execute; it
    ///   receives this hub as its data-access argument.
    ///
    /// # Returns
    ///
    /// * `errs::Result<()>`: The result of the logic function and the commit
    ///   process.
    pub fn txn<F>(&mut self, mut logic_fn: F) -> errs::Result<()>
    where
        F: FnMut(&mut DataHub) -> errs::Result<()>,
    {
        let mut r = self.begin();
        if r.is_ok() {
            r = logic_fn(self);
        }
        if r.is_ok() {
            r = self.commit();
        }
        if r.is_err() {
            self.rollback();
        }
        self.end();
        r
    }

    /// Retrieves the connection with the given name, creating it from the
    /// identically named data source on first access.
    ///
    /// Session-local data sources take precedence over global ones with the
    /// same name. A connection created once is returned for every later
    /// access in the same session, and is closed when the session ends.
    ///
    /// # Type Parameters
    ///
    /// * `C`: The concrete [`DataConn`] type expected by the caller.
    ///
    /// # Parameters
    ///
    /// * `name`: The name of the data source/connection.
    ///
    /// # Returns
    ///
    /// * `errs::Result<&mut C>`: The connection, or an error when no data
    ///   source with the name exists, the connection cannot be created, or
    ///   the connection is not of type `C`.
    pub fn get_conn<C>(&mut self, name: impl AsRef<str>) -> errs::Result<&mut C>
    where
        C: DataConn + 'static,
    {
        if let Some(nnptr) = self.conn_pool.find_by_name(name.as_ref()) {
            let typed_ptr = DataConnPool::to_typed_ptr::<C>(&nnptr)?;
            return Ok(unsafe { &mut (*typed_ptr).data_conn });
        }

        if let Some((local, index)) = self.src_map.get(name.as_ref()) {
            let entry = if *local {
                self.local_registry.create_conn::<C>(*index, name.as_ref())?
            } else {
                create_conn_from_global_data_src::<C>(*index, name.as_ref())?
            };

            let ptr = Box::into_raw(entry);
            return match ptr::NonNull::new(ptr) {
                Some(nnptr) => {
                    // Pooled before the type check, so that a connection
                    // requested with a wrong type witness is still closed at
                    // the end of the session.
                    self.conn_pool.add(nnptr);
                    let typed_ptr = DataConnPool::to_typed_ptr::<C>(&nnptr)?;
                    Ok(unsafe { &mut (*typed_ptr).data_conn })
                }
                None => Err(errs::Err::new(DataSrcError::CreatedDataConnIsNil {
                    name: name.as_ref().into(),
                    data_conn_type: any::type_name::<C>(),
                })),
            };
        }

        Err(errs::Err::new(DataSrcError::NoDataSrcToCreateDataConn {
            name: name.as_ref().into(),
            data_conn_type: any::type_name::<C>(),
        }))
    }
}

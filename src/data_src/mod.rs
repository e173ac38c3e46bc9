// Copyright (C) 2025-2026 The Tsunagi Authors. All Rights Reserved.
// This program is free software under MIT License.
// See the file LICENSE in this distribution for more details.

mod global_setup;

pub(crate) use global_setup::{copy_global_data_srcs_to_map, create_conn_from_global_data_src};
pub use global_setup::{create_static_data_src_entry, setup, setup_with_order, shutdown, uses};

use crate::{
    AsyncGroup, DataConn, DataConnEntry, DataSrc, DataSrcEntry, DataSrcRegistry, SendSyncNonNull,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::{any, mem, ptr};

/// An enum type representing the reasons for errors that can occur within
/// [`DataSrc`] operations.
#[derive(Debug)]
pub enum DataSrcError {
    /// Indicates a failure during the setup process of one or more global
    /// data sources.
    /// Contains a vector of data source names and their corresponding errors.
    FailToSetupGlobalDataSrcs {
        /// The vector contains errors that occurred in each [`DataSrc`] object.
        errors: Vec<(Arc<str>, errs::Err)>,
    },

    /// Indicates that a setup process for the global data sources is
    /// currently ongoing on another thread.
    DuringSetupGlobalDataSrcs,

    /// Indicates that no [`DataSrc`] was found to create a [`DataConn`] for
    /// the specified name and type.
    NoDataSrcToCreateDataConn {
        /// The name of the data source that could not be found.
        name: Arc<str>,
        /// The type name of the [`DataConn`] that was requested.
        data_conn_type: &'static str,
    },

    /// Indicates a failure to create a [`DataConn`] object from its
    /// [`DataSrc`]. The underlying error is attached as the cause.
    FailToCreateDataConn {
        /// The name of the data source that failed to create a connection.
        name: Arc<str>,
        /// The type name of the [`DataConn`] that was requested.
        data_conn_type: &'static str,
    },

    /// Indicates that the [`DataConn`] instance produced by a [`DataSrc`] was
    /// nil.
    CreatedDataConnIsNil {
        /// The name of the data source that produced the nil connection.
        name: Arc<str>,
        /// The type name of the [`DataConn`] that was requested.
        data_conn_type: &'static str,
    },
}

impl<S, C> DataSrcEntry<S, C>
where
    S: DataSrc<C> + 'static,
    C: DataConn + 'static,
{
    pub(crate) fn new(name: impl Into<Arc<str>>, data_src: S) -> Self {
        Self {
            drop_fn: drop_data_src::<S, C>,
            setup_fn: setup_data_src::<S, C>,
            close_fn: close_data_src::<S, C>,
            create_conn_fn: create_conn_of_data_src::<S, C>,

            name: name.into(),
            data_src,
        }
    }
}

fn drop_data_src<S, C>(ptr: *const DataSrcEntry)
where
    S: DataSrc<C> + 'static,
    C: DataConn + 'static,
{
    let typed_ptr = ptr as *mut DataSrcEntry<S, C>;
    drop(unsafe { Box::from_raw(typed_ptr) });
}

fn setup_data_src<S, C>(ptr: *const DataSrcEntry, ag: &mut AsyncGroup) -> errs::Result<()>
where
    S: DataSrc<C> + 'static,
    C: DataConn + 'static,
{
    let typed_ptr = ptr as *mut DataSrcEntry<S, C>;
    unsafe { (*typed_ptr).data_src.setup(ag) }
}

fn close_data_src<S, C>(ptr: *const DataSrcEntry)
where
    S: DataSrc<C> + 'static,
    C: DataConn + 'static,
{
    let typed_ptr = ptr as *mut DataSrcEntry<S, C>;
    unsafe { (*typed_ptr).data_src.close() };
}

fn create_conn_of_data_src<S, C>(ptr: *const DataSrcEntry) -> errs::Result<Box<DataConnEntry<C>>>
where
    S: DataSrc<C> + 'static,
    C: DataConn + 'static,
{
    let typed_ptr = ptr as *mut DataSrcEntry<S, C>;
    let conn: Box<C> = unsafe { (*typed_ptr).data_src.create_conn() }?;
    let name = unsafe { &(*typed_ptr).name };
    Ok(Box::new(DataConnEntry::<C>::new(name.clone(), conn)))
}

impl DataSrcRegistry {
    pub(crate) const fn new(local: bool) -> Self {
        Self {
            not_setup: Vec::new(),
            did_setup: Vec::new(),
            local,
        }
    }

    pub(crate) fn prepend(&mut self, vec: Vec<SendSyncNonNull<DataSrcEntry>>) {
        self.not_setup.splice(0..0, vec);
    }

    pub(crate) fn add<S, C>(&mut self, name: impl Into<Arc<str>>, ds: S)
    where
        S: DataSrc<C> + 'static,
        C: DataConn + 'static,
    {
        let boxed = Box::new(DataSrcEntry::<S, C>::new(name, ds));
        let ptr = ptr::NonNull::from(Box::leak(boxed)).cast::<DataSrcEntry>();
        self.not_setup.push(SendSyncNonNull::new(ptr));
    }

    // Removes every entry with the given name from both buckets. Entries that
    // were set up get closed; the rest are only dropped.
    pub(crate) fn remove(&mut self, name: impl AsRef<str>) {
        let extracted: Vec<_> = self
            .did_setup
            .extract_if(.., |ssnnptr| {
                unsafe { &(*ssnnptr.non_null_ptr.as_ptr()).name }.as_ref() == name.as_ref()
            })
            .collect();

        for ssnnptr in extracted.iter().rev() {
            let ptr = ssnnptr.non_null_ptr.as_ptr();
            let close_fn = unsafe { (*ptr).close_fn };
            let drop_fn = unsafe { (*ptr).drop_fn };
            close_fn(ptr);
            drop_fn(ptr);
        }

        let extracted: Vec<_> = self
            .not_setup
            .extract_if(.., |ssnnptr| {
                unsafe { &(*ssnnptr.non_null_ptr.as_ptr()).name }.as_ref() == name.as_ref()
            })
            .collect();

        for ssnnptr in extracted.iter().rev() {
            let ptr = ssnnptr.non_null_ptr.as_ptr();
            let drop_fn = unsafe { (*ptr).drop_fn };
            drop_fn(ptr);
        }
    }

    // Attempts the setup of every entry in `not_setup`, in registration
    // order. The first synchronous failure stops further setups from being
    // initiated; asynchronous setups that were already started are joined
    // regardless. Attempted entries whose name is absent from `errors` move
    // to `did_setup` in order; failed and unattempted entries stay in
    // `not_setup`, failed ones first.
    pub(crate) fn setup(&mut self, errors: &mut Vec<(Arc<str>, errs::Err)>) {
        if self.not_setup.is_empty() {
            return;
        }

        let mut n_done = 0;
        let mut ag = AsyncGroup::new();
        for ssnnptr in self.not_setup.iter() {
            n_done += 1;
            let ptr = ssnnptr.non_null_ptr.as_ptr();
            let setup_fn = unsafe { (*ptr).setup_fn };
            ag.name = unsafe { (*ptr).name.clone() };
            if let Err(err) = setup_fn(ptr, &mut ag) {
                errors.push((ag.name.clone(), err));
                break;
            }
        }
        ag.join_and_collect_errors(errors);

        let mut failed = Vec::new();
        for ssnnptr in self.not_setup.drain(..n_done) {
            let name = unsafe { &(*ssnnptr.non_null_ptr.as_ptr()).name };
            if errors.iter().any(|(nm, _)| nm == name) {
                failed.push(ssnnptr);
            } else {
                self.did_setup.push(ssnnptr);
            }
        }
        self.not_setup.splice(0..0, failed);
    }

    // Like `setup`, but the entries named in `names` are set up first, in
    // that order; the remaining entries follow in registration order. When
    // names overlap, the earliest position wins.
    pub(crate) fn setup_with_order(
        &mut self,
        names: &[&str],
        errors: &mut Vec<(Arc<str>, errs::Err)>,
    ) {
        if self.not_setup.is_empty() {
            return;
        }

        let mut index_map: HashMap<&str, usize> = HashMap::with_capacity(names.len());
        for (i, nm) in names.iter().rev().enumerate() {
            index_map.insert(*nm, names.len() - 1 - i);
        }

        let not_setup = mem::take(&mut self.not_setup);
        let mut ordered: Vec<Option<SendSyncNonNull<DataSrcEntry>>> = vec![None; names.len()];
        for ssnnptr in not_setup.into_iter() {
            let name = unsafe { (*ssnnptr.non_null_ptr.as_ptr()).name.clone() };
            if let Some(index) = index_map.remove(name.as_ref()) {
                ordered[index] = Some(ssnnptr);
            } else {
                ordered.push(Some(ssnnptr));
            }
        }

        let mut n_done = 0;
        let mut ag = AsyncGroup::new();
        for slot in ordered.iter() {
            n_done += 1;
            if let Some(ssnnptr) = slot {
                let ptr = ssnnptr.non_null_ptr.as_ptr();
                let setup_fn = unsafe { (*ptr).setup_fn };
                ag.name = unsafe { (*ptr).name.clone() };
                if let Err(err) = setup_fn(ptr, &mut ag) {
                    errors.push((ag.name.clone(), err));
                    break;
                }
            }
        }
        ag.join_and_collect_errors(errors);

        let mut failed = Vec::new();
        for (i, slot) in ordered.into_iter().enumerate() {
            if let Some(ssnnptr) = slot {
                let name = unsafe { &(*ssnnptr.non_null_ptr.as_ptr()).name };
                if i < n_done && !errors.iter().any(|(nm, _)| nm == name) {
                    self.did_setup.push(ssnnptr);
                } else {
                    failed.push(ssnnptr);
                }
            }
        }
        self.not_setup = failed;
    }

    // Closes the set-up entries in the reverse of their setup order, then
    // drops everything and empties both buckets.
    pub(crate) fn close(&mut self) {
        let vec = mem::take(&mut self.did_setup);
        for ssnnptr in vec.into_iter().rev() {
            let ptr = ssnnptr.non_null_ptr.as_ptr();
            let close_fn = unsafe { (*ptr).close_fn };
            let drop_fn = unsafe { (*ptr).drop_fn };
            close_fn(ptr);
            drop_fn(ptr);
        }
        let vec = mem::take(&mut self.not_setup);
        for ssnnptr in vec.into_iter().rev() {
            let ptr = ssnnptr.non_null_ptr.as_ptr();
            let drop_fn = unsafe { (*ptr).drop_fn };
            drop_fn(ptr);
        }
    }

    pub(crate) fn copy_did_setup_into(&self, src_map: &mut HashMap<Arc<str>, (bool, usize)>) {
        for (i, ssnnptr) in self.did_setup.iter().enumerate() {
            let name = unsafe { (*ssnnptr.non_null_ptr.as_ptr()).name.clone() };
            src_map.insert(name, (self.local, i));
        }
    }

    // Creates a connection from the set-up entry at `index`. The entry name
    // is re-checked so that a stale index cannot silently address another
    // data source.
    pub(crate) fn create_conn<C>(
        &self,
        index: usize,
        name: impl AsRef<str>,
    ) -> errs::Result<Box<DataConnEntry>>
    where
        C: DataConn + 'static,
    {
        if let Some(ssnnptr) = self.did_setup.get(index) {
            let ptr = ssnnptr.non_null_ptr.as_ptr();
            if unsafe { &(*ptr).name }.as_ref() == name.as_ref() {
                let create_conn_fn = unsafe { (*ptr).create_conn_fn };
                return match create_conn_fn(ptr) {
                    Ok(entry) => Ok(entry),
                    Err(err) => Err(errs::Err::with_source(
                        DataSrcError::FailToCreateDataConn {
                            name: name.as_ref().into(),
                            data_conn_type: any::type_name::<C>(),
                        },
                        err,
                    )),
                };
            }
        }

        Err(errs::Err::new(DataSrcError::NoDataSrcToCreateDataConn {
            name: name.as_ref().into(),
            data_conn_type: any::type_name::<C>(),
        }))
    }
}

impl Drop for DataSrcRegistry {
    fn drop(&mut self) {
        self.close();
    }
}

// Copyright (C) 2025-2026 The Tsunagi Authors. All Rights Reserved.
// This program is free software under MIT License.
// See the file LICENSE in this distribution for more details.

use crate::{AsyncGroup, DataConn, DataConnEntry, DataConnPool};

use std::collections::HashMap;
use std::sync::Arc;
use std::{any, mem, ptr};

/// An enum type representing the reasons for errors that can occur within
/// [`DataConn`] operations.
#[allow(clippy::enum_variant_names)]
#[derive(Debug)]
pub enum DataConnError {
    /// Indicates a failure during the pre-commit process of one or more
    /// [`DataConn`] instances involved in a transaction.
    /// Contains a vector of data connection names and their corresponding
    /// errors.
    FailToPreCommitDataConn {
        /// The vector contains errors that occurred in each [`DataConn`] object.
        errors: Vec<(Arc<str>, errs::Err)>,
    },

    /// Indicates a failure during the commit process of one or more
    /// [`DataConn`] instances involved in a transaction.
    /// Contains a vector of data connection names and their corresponding
    /// errors.
    FailToCommitDataConn {
        /// The vector contains errors that occurred in each [`DataConn`] object.
        errors: Vec<(Arc<str>, errs::Err)>,
    },

    /// Indicates a failure to cast a retrieved [`DataConn`] to the expected
    /// type.
    FailToCastDataConn {
        /// The name of the data connection that failed to cast.
        name: Arc<str>,
        /// The type name to which the [`DataConn`] attempted to cast.
        cast_to_type: &'static str,
    },
}

impl<C> DataConnEntry<C>
where
    C: DataConn + 'static,
{
    pub(crate) fn new(name: impl Into<Arc<str>>, data_conn: Box<C>) -> Self {
        Self {
            drop_fn: drop_data_conn::<C>,
            is_fn: is_data_conn::<C>,
            pre_commit_fn: pre_commit_data_conn::<C>,
            commit_fn: commit_data_conn::<C>,
            post_commit_fn: post_commit_data_conn::<C>,
            should_force_back_fn: should_force_back_data_conn::<C>,
            rollback_fn: rollback_data_conn::<C>,
            force_back_fn: force_back_data_conn::<C>,
            close_fn: close_data_conn::<C>,

            name: name.into(),
            data_conn,
        }
    }
}

fn drop_data_conn<C>(ptr: *const DataConnEntry)
where
    C: DataConn + 'static,
{
    let typed_ptr = ptr as *mut DataConnEntry<C>;
    drop(unsafe { Box::from_raw(typed_ptr) });
}

fn is_data_conn<C>(type_id: any::TypeId) -> bool
where
    C: DataConn + 'static,
{
    any::TypeId::of::<C>() == type_id
}

fn pre_commit_data_conn<C>(ptr: *const DataConnEntry, ag: &mut AsyncGroup) -> errs::Result<()>
where
    C: DataConn + 'static,
{
    let typed_ptr = ptr as *mut DataConnEntry<C>;
    unsafe { (*typed_ptr).data_conn.pre_commit(ag) }
}

fn commit_data_conn<C>(ptr: *const DataConnEntry, ag: &mut AsyncGroup) -> errs::Result<()>
where
    C: DataConn + 'static,
{
    let typed_ptr = ptr as *mut DataConnEntry<C>;
    unsafe { (*typed_ptr).data_conn.commit(ag) }
}

fn post_commit_data_conn<C>(ptr: *const DataConnEntry, ag: &mut AsyncGroup)
where
    C: DataConn + 'static,
{
    let typed_ptr = ptr as *mut DataConnEntry<C>;
    unsafe {
        (*typed_ptr).data_conn.post_commit(ag);
    }
}

fn should_force_back_data_conn<C>(ptr: *const DataConnEntry) -> bool
where
    C: DataConn + 'static,
{
    let typed_ptr = ptr as *mut DataConnEntry<C>;
    unsafe { (*typed_ptr).data_conn.should_force_back() }
}

fn rollback_data_conn<C>(ptr: *const DataConnEntry, ag: &mut AsyncGroup)
where
    C: DataConn + 'static,
{
    let typed_ptr = ptr as *mut DataConnEntry<C>;
    unsafe {
        (*typed_ptr).data_conn.rollback(ag);
    }
}

fn force_back_data_conn<C>(ptr: *const DataConnEntry, ag: &mut AsyncGroup)
where
    C: DataConn + 'static,
{
    let typed_ptr = ptr as *mut DataConnEntry<C>;
    unsafe {
        (*typed_ptr).data_conn.force_back(ag);
    }
}

fn close_data_conn<C>(ptr: *const DataConnEntry)
where
    C: DataConn + 'static,
{
    let typed_ptr = ptr as *mut DataConnEntry<C>;
    unsafe {
        (*typed_ptr).data_conn.close();
    }
}

impl DataConnPool {
    pub(crate) fn new() -> Self {
        Self {
            vec: Vec::new(),
            index_map: HashMap::new(),
        }
    }

    pub(crate) fn with_commit_order(names: &[&str]) -> Self {
        let mut index_map = HashMap::with_capacity(names.len());
        // When names overlap, the earliest position wins.
        for (i, nm) in names.iter().rev().enumerate() {
            index_map.insert((*nm).into(), names.len() - 1 - i);
        }

        Self {
            vec: vec![None; names.len()],
            index_map,
        }
    }

    pub(crate) fn add(&mut self, nnptr: ptr::NonNull<DataConnEntry>) {
        let name = unsafe { (*nnptr.as_ptr()).name.clone() };
        if let Some(index) = self.index_map.get(&name) {
            self.vec[*index] = Some(nnptr);
        } else {
            let index = self.vec.len();
            self.vec.push(Some(nnptr));
            self.index_map.insert(name, index);
        }
    }

    pub(crate) fn find_by_name(
        &self,
        name: impl AsRef<str>,
    ) -> Option<ptr::NonNull<DataConnEntry>> {
        if let Some(index) = self.index_map.get(name.as_ref()) {
            if let Some(Some(nnptr)) = self.vec.get(*index) {
                let entry_name = unsafe { &(*nnptr.as_ptr()).name };
                if entry_name.as_ref() == name.as_ref() {
                    return Some(*nnptr);
                }
            }
        }

        None
    }

    // The type witness: fails with `FailToCastDataConn` when the entry does
    // not hold a connection of type `C`.
    pub(crate) fn to_typed_ptr<C>(
        nnptr: &ptr::NonNull<DataConnEntry>,
    ) -> errs::Result<*mut DataConnEntry<C>>
    where
        C: DataConn + 'static,
    {
        let ptr = nnptr.as_ptr();
        let is_fn = unsafe { (*ptr).is_fn };

        if !is_fn(any::TypeId::of::<C>()) {
            let name = unsafe { &(*ptr).name };
            return Err(errs::Err::new(DataConnError::FailToCastDataConn {
                name: name.clone(),
                cast_to_type: any::type_name::<C>(),
            }));
        }

        Ok(ptr as *mut DataConnEntry<C>)
    }

    // Drives the three commit phases over the pool in order. Each phase stops
    // initiating calls at its first synchronous failure, joins the
    // asynchronous work it already started, and only then lets the next phase
    // begin. Post-commit failures are discarded.
    pub(crate) fn commit(&self) -> errs::Result<()> {
        let mut errors = Vec::new();

        let mut ag = AsyncGroup::new();
        for nnptr in self.vec.iter().flatten() {
            let ptr = nnptr.as_ptr();
            let pre_commit_fn = unsafe { (*ptr).pre_commit_fn };
            ag.name = unsafe { (*ptr).name.clone() };
            if let Err(err) = pre_commit_fn(ptr, &mut ag) {
                errors.push((ag.name.clone(), err));
                break;
            }
        }
        ag.join_and_collect_errors(&mut errors);

        if !errors.is_empty() {
            return Err(errs::Err::new(DataConnError::FailToPreCommitDataConn {
                errors,
            }));
        }

        let mut ag = AsyncGroup::new();
        for nnptr in self.vec.iter().flatten() {
            let ptr = nnptr.as_ptr();
            let commit_fn = unsafe { (*ptr).commit_fn };
            ag.name = unsafe { (*ptr).name.clone() };
            if let Err(err) = commit_fn(ptr, &mut ag) {
                errors.push((ag.name.clone(), err));
                break;
            }
        }
        ag.join_and_collect_errors(&mut errors);

        if !errors.is_empty() {
            return Err(errs::Err::new(DataConnError::FailToCommitDataConn {
                errors,
            }));
        }

        let mut ag = AsyncGroup::new();
        for nnptr in self.vec.iter().flatten() {
            let ptr = nnptr.as_ptr();
            let post_commit_fn = unsafe { (*ptr).post_commit_fn };
            ag.name = unsafe { (*ptr).name.clone() };
            post_commit_fn(ptr, &mut ag);
        }
        ag.join_and_ignore_errors();

        Ok(())
    }

    // Undoes every connection in pool order: `force_back` for connections
    // that report their updates as already committed, `rollback` otherwise.
    // Errors are discarded.
    pub(crate) fn rollback(&mut self) {
        let mut ag = AsyncGroup::new();
        for nnptr in self.vec.iter().flatten() {
            let ptr = nnptr.as_ptr();
            let should_force_back_fn = unsafe { (*ptr).should_force_back_fn };
            let force_back_fn = unsafe { (*ptr).force_back_fn };
            let rollback_fn = unsafe { (*ptr).rollback_fn };
            ag.name = unsafe { (*ptr).name.clone() };

            if should_force_back_fn(ptr) {
                force_back_fn(ptr, &mut ag);
            } else {
                rollback_fn(ptr, &mut ag);
            }
        }
        ag.join_and_ignore_errors();
    }

    // Closes the connections in the reverse of the order they entered the
    // pool, then empties it.
    pub(crate) fn close(&mut self) {
        self.index_map.clear();

        let vec = mem::take(&mut self.vec);
        for nnptr in vec.iter().rev().flatten() {
            let ptr = nnptr.as_ptr();
            let close_fn = unsafe { (*ptr).close_fn };
            let drop_fn = unsafe { (*ptr).drop_fn };
            close_fn(ptr);
            drop_fn(ptr);
        }
    }
}

impl Drop for DataConnPool {
    fn drop(&mut self) {
        self.close();
    }
}

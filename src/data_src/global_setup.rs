// Copyright (C) 2025-2026 The Tsunagi Authors. All Rights Reserved.
// This program is free software under MIT License.
// See the file LICENSE in this distribution for more details.

use super::DataSrcError;

use crate::{
    DataConn, DataConnEntry, DataSrc, DataSrcEntry, DataSrcRegistry, SendSyncNonNull,
    StaticDataSrcEntry, StaticDataSrcRegistration,
};

#[allow(unused)] // for rustdoc
use crate::DataHub;

use setup_read_cleanup::{PhasedCell, PhasedError, PhasedErrorKind};

use std::collections::HashMap;
use std::sync::Arc;
use std::{any, ptr};

// The process-global data source registry. Mutable until the first `setup()`
// or the first `DataHub`, read-only from then on, drained by `shutdown()`.
pub(crate) static GLOBAL_REGISTRY: PhasedCell<DataSrcRegistry> =
    PhasedCell::new(DataSrcRegistry::new(false));

const NOOP: fn(&mut DataSrcRegistry) -> Result<(), PhasedError> = |_| Ok(());

/// Registers a global data source at runtime.
///
/// This function associates a [`DataSrc`] implementation with a unique name.
/// That name is later used to retrieve session-specific [`DataConn`]
/// instances created from this data source.
///
/// Registrations are accepted until the global registry becomes fixed, which
/// happens at the first [`setup`] call or at the first [`DataHub`] creation;
/// later registrations are ignored. Registration is meant to happen during
/// application startup, from a single thread.
///
/// # Parameters
///
/// * `name`: The unique name for the data source.
/// * `ds`: The [`DataSrc`] instance to register.
pub fn uses<S, C>(name: impl Into<Arc<str>>, ds: S)
where
    S: DataSrc<C> + 'static,
    C: DataConn + 'static,
{
    if let Ok(registry) = GLOBAL_REGISTRY.get_mut_unlocked() {
        registry.add(name, ds);
    }
}

fn collect_static_data_src_entries(registry: &mut DataSrcRegistry) {
    let regs: Vec<_> = inventory::iter::<StaticDataSrcRegistration>
        .into_iter()
        .collect();

    let mut static_vec: Vec<SendSyncNonNull<DataSrcEntry>> = Vec::with_capacity(regs.len());
    for reg in regs {
        let entry = (reg.factory)();
        static_vec.push(entry.ssnnptr);
    }

    registry.prepend(static_vec);
}

/// Executes the setup process of all globally registered data sources and
/// fixes the global registry.
///
/// Data sources registered with the [`uses!`] macro are collected first and
/// precede those registered with the [`uses()`] function; setups then run in
/// that order. A setup that is time-consuming may have been handed to the
/// [`crate::AsyncGroup`] passed to it, in which case it is joined before this
/// function determines its result.
///
/// If any data source fails to set up, all global data sources that were set
/// up successfully are closed again, and this function returns an
/// [`errs::Err`] whose reason is [`DataSrcError::FailToSetupGlobalDataSrcs`],
/// holding the name and error of each failed data source.
///
/// Calling this function again after it once succeeded is a no-op returning
/// `Ok`; registrations made after the registry became fixed are never set up.
pub fn setup() -> errs::Result<()> {
    let mut errors = Vec::new();
    let em = &mut errors;

    if let Err(e) = GLOBAL_REGISTRY.transition_to_read(move |registry| {
        collect_static_data_src_entries(registry);
        registry.setup(em);
        if !em.is_empty() {
            registry.close();
        }
        Ok::<(), PhasedError>(())
    }) {
        if e.kind() == PhasedErrorKind::DuringTransitionToRead {
            return Err(errs::Err::new(DataSrcError::DuringSetupGlobalDataSrcs));
        }
        // The registry is already fixed; there is nothing left to set up.
        return Ok(());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errs::Err::new(DataSrcError::FailToSetupGlobalDataSrcs {
            errors,
        }))
    }
}

/// Executes the setup process of all globally registered data sources,
/// setting up the named ones first.
///
/// This function behaves like [`setup`] except that the data sources named in
/// `names` are set up first, in the given order; the remaining data sources
/// follow in registration order.
///
/// # Parameters
///
/// * `names`: The names of the data sources to set up first, in order.
pub fn setup_with_order(names: &[&str]) -> errs::Result<()> {
    let mut errors = Vec::new();
    let em = &mut errors;

    if let Err(e) = GLOBAL_REGISTRY.transition_to_read(move |registry| {
        collect_static_data_src_entries(registry);
        registry.setup_with_order(names, em);
        if !em.is_empty() {
            registry.close();
        }
        Ok::<(), PhasedError>(())
    }) {
        if e.kind() == PhasedErrorKind::DuringTransitionToRead {
            return Err(errs::Err::new(DataSrcError::DuringSetupGlobalDataSrcs));
        }
        return Ok(());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errs::Err::new(DataSrcError::FailToSetupGlobalDataSrcs {
            errors,
        }))
    }
}

/// Closes and removes all global data sources.
///
/// The data sources are closed in the reverse of the order their setups
/// succeeded. This function should be called once, before the application
/// ends; calling it again is a no-op.
pub fn shutdown() {
    let _ = GLOBAL_REGISTRY.transition_to_cleanup(NOOP);
    match GLOBAL_REGISTRY.get_mut_unlocked() {
        Ok(registry) => registry.close(),
        Err(e) => {
            eprintln!("ERROR(tsunagi): failed to close the global data sources: {e:?}");
        }
    }
}

#[doc(hidden)]
/// Creates a [`StaticDataSrcEntry`] for static registration.
/// This function is used by the [`uses!`] macro.
pub fn create_static_data_src_entry<S, C>(name: &'static str, data_src: S) -> StaticDataSrcEntry
where
    S: DataSrc<C> + 'static,
    C: DataConn + 'static,
{
    let boxed = Box::new(DataSrcEntry::<S, C>::new(name, data_src));
    let ptr = ptr::NonNull::from(Box::leak(boxed)).cast::<DataSrcEntry>();
    StaticDataSrcEntry {
        ssnnptr: SendSyncNonNull::new(ptr),
    }
}

impl StaticDataSrcRegistration {
    pub const fn new(factory: fn() -> StaticDataSrcEntry) -> Self {
        Self { factory }
    }
}
inventory::collect!(StaticDataSrcRegistration);

/// Registers a global data source at link time.
///
/// This macro associates a [`DataSrc`] implementation with a unique name from
/// any module of the application, without requiring a call during startup.
/// Statically registered data sources are collected when [`setup()`] runs and
/// are set up before those registered with the [`uses()`] function.
///
/// # Parameters
///
/// * `name`: The unique name for the data source.
/// * `ds`: The [`DataSrc`] instance to register.
///
/// # Examples
///
/// ```ignore
/// use tsunagi::{uses, AsyncGroup, DataConn, DataSrc};
///
/// struct MyDataSrc;
/// impl DataSrc<MyDataConn> for MyDataSrc {
///     fn setup(&mut self, _ag: &mut AsyncGroup) -> errs::Result<()> { Ok(()) }
///     fn close(&mut self) {}
///     fn create_conn(&mut self) -> errs::Result<Box<MyDataConn>> {
///         Ok(Box::new(MyDataConn))
///     }
/// }
///
/// struct MyDataConn;
/// impl DataConn for MyDataConn {
///     fn commit(&mut self, _ag: &mut AsyncGroup) -> errs::Result<()> { Ok(()) }
///     fn rollback(&mut self, _ag: &mut AsyncGroup) {}
///     fn close(&mut self) {}
/// }
///
/// uses!("my_data_src", MyDataSrc);
/// ```
#[macro_export]
macro_rules! uses {
    ($name:tt, $data_src:expr) => {
        const _: () = {
            inventory::submit! {
                $crate::StaticDataSrcRegistration::new(|| {
                    $crate::create_static_data_src_entry($name, $data_src)
                })
            }
        };
    };
}

// Seeds a hub's source map with the set-up global data sources, fixing the
// global registry first when no `setup()` call has done so yet.
pub(crate) fn copy_global_data_srcs_to_map(src_map: &mut HashMap<Arc<str>, (bool, usize)>) {
    if let Ok(registry) = GLOBAL_REGISTRY.read_relaxed() {
        registry.copy_did_setup_into(src_map);
        return;
    }

    let fixed = match GLOBAL_REGISTRY.transition_to_read(NOOP) {
        Ok(_) => true,
        Err(e) => matches!(
            e.kind(),
            PhasedErrorKind::PhaseIsAlreadyCleanup | PhasedErrorKind::DuringTransitionToRead
        ),
    };
    if fixed {
        if let Ok(registry) = GLOBAL_REGISTRY.read_relaxed() {
            registry.copy_did_setup_into(src_map);
        }
    }
}

pub(crate) fn create_conn_from_global_data_src<C>(
    index: usize,
    name: impl AsRef<str>,
) -> errs::Result<Box<DataConnEntry>>
where
    C: DataConn + 'static,
{
    match GLOBAL_REGISTRY.read_relaxed() {
        Ok(registry) => registry.create_conn::<C>(index, name),
        Err(e) => Err(errs::Err::with_source(
            DataSrcError::FailToCreateDataConn {
                name: name.as_ref().into(),
                data_conn_type: any::type_name::<C>(),
            },
            e,
        )),
    }
}

// Copyright (C) 2025-2026 The Tsunagi Authors. All Rights Reserved.
// This program is free software under MIT License.
// See the file LICENSE in this distribution for more details.

use crate::AsyncGroup;

use std::sync::Arc;
use std::thread;

/// An enum type representing the reasons for errors that can occur within
/// [`AsyncGroup`] operations.
#[derive(Debug)]
pub enum AsyncGroupError {
    /// Indicates that a function added to an [`AsyncGroup`] panicked on its
    /// worker thread.
    ThreadPanicked {
        /// The panic payload, recovered as a message where possible.
        message: String,
    },
}

impl AsyncGroup {
    pub(crate) fn new() -> Self {
        Self {
            names: Vec::new(),
            join_handles: Vec::new(),
            name: Arc::from(""),
        }
    }

    /// Adds a function to this group and starts running it on a new worker
    /// thread.
    ///
    /// The function is executed concurrently with other added functions. Its
    /// result is collected when the framework joins the group at the end of
    /// the current phase, keyed by the name of the participant whose phase
    /// method added it.
    pub fn add<F>(&mut self, func: F)
    where
        F: FnOnce() -> errs::Result<()> + Send + 'static,
    {
        self.names.push(self.name.clone());
        self.join_handles.push(thread::spawn(func));
    }

    pub(crate) fn join_and_collect_errors(&mut self, errors: &mut Vec<(Arc<str>, errs::Err)>) {
        for (name, handle) in self.names.drain(..).zip(self.join_handles.drain(..)) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    errors.push((name, err));
                }
                Err(payload) => {
                    let message = match payload.downcast_ref::<&'static str>() {
                        Some(s) => *s,
                        None => match payload.downcast_ref::<String>() {
                            Some(s) => &s[..],
                            None => "thread panicked",
                        },
                    };
                    errors.push((
                        name,
                        errs::Err::new(AsyncGroupError::ThreadPanicked {
                            message: message.to_string(),
                        }),
                    ));
                }
            }
        }
    }

    pub(crate) fn join_and_ignore_errors(&mut self) {
        self.names.clear();
        for handle in self.join_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests_of_async_group {
    use super::*;
    use std::time;

    #[test]
    fn test_join_with_no_function() {
        let mut ag = AsyncGroup::new();
        let mut errors = Vec::new();
        ag.join_and_collect_errors(&mut errors);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_join_with_one_function() {
        let mut ag = AsyncGroup::new();
        ag.name = "foo".into();
        ag.add(|| Ok(()));
        let mut errors = Vec::new();
        ag.join_and_collect_errors(&mut errors);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_join_with_two_functions() {
        let mut ag = AsyncGroup::new();
        ag.name = "foo".into();
        ag.add(|| {
            thread::sleep(time::Duration::from_millis(20));
            Ok(())
        });
        ag.name = "bar".into();
        ag.add(|| {
            thread::sleep(time::Duration::from_millis(10));
            Ok(())
        });
        let mut errors = Vec::new();
        ag.join_and_collect_errors(&mut errors);
        assert!(errors.is_empty());
    }

    #[derive(Debug, PartialEq)]
    enum Reasons {
        BadNumber(u32),
        BadString(String),
    }

    #[test]
    fn test_collect_error_of_one_function() {
        let mut ag = AsyncGroup::new();
        ag.name = "foo".into();
        ag.add(|| Err(errs::Err::new(Reasons::BadNumber(123u32))));
        let mut errors = Vec::new();
        ag.join_and_collect_errors(&mut errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "foo".into());
        assert_eq!(
            *(errors[0].1.reason::<Reasons>().unwrap()),
            Reasons::BadNumber(123u32)
        );
    }

    #[test]
    fn test_collect_errors_of_two_functions() {
        let mut ag = AsyncGroup::new();
        ag.name = "foo".into();
        ag.add(|| {
            thread::sleep(time::Duration::from_millis(20));
            Err(errs::Err::new(Reasons::BadNumber(123u32)))
        });
        ag.name = "bar".into();
        ag.add(|| {
            thread::sleep(time::Duration::from_millis(10));
            Err(errs::Err::new(Reasons::BadString("hello".to_string())))
        });
        let mut errors = Vec::new();
        ag.join_and_collect_errors(&mut errors);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].0, "foo".into());
        assert_eq!(
            *(errors[0].1.reason::<Reasons>().unwrap()),
            Reasons::BadNumber(123u32)
        );
        assert_eq!(errors[1].0, "bar".into());
        assert_eq!(
            *(errors[1].1.reason::<Reasons>().unwrap()),
            Reasons::BadString("hello".to_string())
        );
    }

    #[test]
    fn test_collect_panic_as_error() {
        let mut ag = AsyncGroup::new();
        ag.name = "foo".into();
        ag.add(|| {
            thread::sleep(time::Duration::from_millis(20));
            panic!("panic 1");
        });
        let mut errors = Vec::new();
        ag.join_and_collect_errors(&mut errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "foo".into());
        match errors[0].1.reason::<AsyncGroupError>().unwrap() {
            AsyncGroupError::ThreadPanicked { message } => assert_eq!(message, "panic 1"),
        }
    }

    #[test]
    fn test_ignore_errors() {
        let mut ag = AsyncGroup::new();
        ag.name = "foo".into();
        ag.add(|| Err(errs::Err::new(Reasons::BadNumber(123u32))));
        ag.name = "bar".into();
        ag.add(|| Ok(()));
        ag.join_and_ignore_errors();
        assert!(ag.names.is_empty());
        assert!(ag.join_handles.is_empty());
    }
}

#[cfg(test)]
mod txn_tests {
    use std::sync::{Arc, Mutex};
    use tsunagi::{AsyncGroup, DataAcc, DataConn, DataConnError, DataHub, DataHubError, DataSrc};

    // The "external service" state of a data source is an Arc<Mutex<String>>;
    // a connection works on a session copy and publishes it on commit.

    pub struct TextDataSrc {
        store: Arc<Mutex<String>>,
    }
    impl TextDataSrc {
        pub fn new(store: Arc<Mutex<String>>) -> Self {
            Self { store }
        }
    }
    impl DataSrc<TextDataConn> for TextDataSrc {
        fn setup(&mut self, _ag: &mut AsyncGroup) -> errs::Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
        fn create_conn(&mut self) -> errs::Result<Box<TextDataConn>> {
            Ok(Box::new(TextDataConn::new(self.store.clone())))
        }
    }

    pub struct TextDataConn {
        store: Arc<Mutex<String>>,
        temp: String,
        committed: bool,
    }
    impl TextDataConn {
        fn new(store: Arc<Mutex<String>>) -> Self {
            let temp = store.lock().unwrap().clone();
            Self {
                store,
                temp,
                committed: false,
            }
        }
        pub fn get_text(&self) -> String {
            self.temp.clone()
        }
        pub fn set_text(&mut self, text: &str) {
            self.temp = text.to_string();
        }
    }
    impl DataConn for TextDataConn {
        fn commit(&mut self, _ag: &mut AsyncGroup) -> errs::Result<()> {
            *self.store.lock().unwrap() = self.temp.clone();
            self.committed = true;
            Ok(())
        }
        fn should_force_back(&self) -> bool {
            self.committed
        }
        fn rollback(&mut self, _ag: &mut AsyncGroup) {
            self.temp = self.store.lock().unwrap().clone();
        }
        fn force_back(&mut self, _ag: &mut AsyncGroup) {
            self.temp.clear();
            *self.store.lock().unwrap() = String::new();
        }
        fn close(&mut self) {}
    }

    pub struct FailingDataSrc {}
    impl DataSrc<TextDataConn> for FailingDataSrc {
        fn setup(&mut self, _ag: &mut AsyncGroup) -> errs::Result<()> {
            Err(errs::Err::new("XXX".to_string()))
        }
        fn close(&mut self) {}
        fn create_conn(&mut self) -> errs::Result<Box<TextDataConn>> {
            Ok(Box::new(TextDataConn::new(Arc::new(Mutex::new(
                String::new(),
            )))))
        }
    }

    pub struct PreCommitFailingDataSrc {}
    pub struct PreCommitFailingDataConn {}
    impl DataSrc<PreCommitFailingDataConn> for PreCommitFailingDataSrc {
        fn setup(&mut self, _ag: &mut AsyncGroup) -> errs::Result<()> {
            Ok(())
        }
        fn close(&mut self) {}
        fn create_conn(&mut self) -> errs::Result<Box<PreCommitFailingDataConn>> {
            Ok(Box::new(PreCommitFailingDataConn {}))
        }
    }
    impl DataConn for PreCommitFailingDataConn {
        fn pre_commit(&mut self, _ag: &mut AsyncGroup) -> errs::Result<()> {
            Err(errs::Err::new("zzz".to_string()))
        }
        fn commit(&mut self, _ag: &mut AsyncGroup) -> errs::Result<()> {
            panic!("must never be committed");
        }
        fn rollback(&mut self, _ag: &mut AsyncGroup) {}
        fn close(&mut self) {}
    }

    trait GettingDataAcc: DataAcc {
        fn get_text(&mut self) -> errs::Result<String> {
            let conn = self.get_conn::<TextDataConn>("foo")?;
            Ok(conn.get_text())
        }
    }
    impl GettingDataAcc for DataHub {}

    trait SettingDataAcc: DataAcc {
        fn set_text(&mut self, text: &str) -> errs::Result<()> {
            let conn = self.get_conn::<TextDataConn>("bar")?;
            conn.set_text(text);
            Ok(())
        }
    }
    impl SettingDataAcc for DataHub {}

    trait CopyData: GettingDataAcc + SettingDataAcc {}
    impl CopyData for DataHub {}

    fn copy_logic(data: &mut impl CopyData) -> errs::Result<()> {
        let text = data.get_text()?;
        data.set_text(&text)
    }

    #[test]
    fn txn_commits_the_copied_value() {
        let foo_store = Arc::new(Mutex::new("Hello".to_string()));
        let bar_store = Arc::new(Mutex::new(String::new()));

        let mut hub = DataHub::new();
        hub.uses("foo", TextDataSrc::new(foo_store.clone()));
        hub.uses("bar", TextDataSrc::new(bar_store.clone()));

        hub.txn(copy_logic).unwrap();

        assert_eq!(*foo_store.lock().unwrap(), "Hello");
        assert_eq!(*bar_store.lock().unwrap(), "Hello");
    }

    #[test]
    fn run_does_not_commit() {
        let foo_store = Arc::new(Mutex::new("Hello".to_string()));
        let bar_store = Arc::new(Mutex::new(String::new()));

        let mut hub = DataHub::new();
        hub.uses("foo", TextDataSrc::new(foo_store.clone()));
        hub.uses("bar", TextDataSrc::new(bar_store.clone()));

        hub.run(copy_logic).unwrap();

        assert_eq!(*bar_store.lock().unwrap(), "");
    }

    #[test]
    fn txn_rolls_back_when_logic_fails() {
        let bar_store = Arc::new(Mutex::new("original".to_string()));

        let mut hub = DataHub::new();
        hub.uses("bar", TextDataSrc::new(bar_store.clone()));

        let result = hub.txn(|data| {
            data.set_text("changed")?;
            Err(errs::Err::new("ZZZ".to_string()))
        });

        match result {
            Err(err) => assert_eq!(err.reason::<String>().unwrap(), "ZZZ"),
            Ok(_) => panic!(),
        }
        assert_eq!(*bar_store.lock().unwrap(), "original");
    }

    #[test]
    fn txn_does_not_invoke_logic_when_local_setup_fails() {
        let invoked = Arc::new(Mutex::new(false));

        let mut hub = DataHub::new();
        hub.uses("foo", FailingDataSrc {});

        let invoked_clone = invoked.clone();
        let result = hub.txn(move |_data| {
            *invoked_clone.lock().unwrap() = true;
            Ok(())
        });

        match result {
            Err(err) => match err.reason::<DataHubError>() {
                Ok(DataHubError::FailToSetupLocalDataSrcs { errors }) => {
                    assert_eq!(errors.len(), 1);
                    assert_eq!(errors[0].0, "foo".into());
                    assert_eq!(errors[0].1.reason::<String>().unwrap(), "XXX");
                }
                _ => panic!(),
            },
            Ok(_) => panic!(),
        }
        assert!(!*invoked.lock().unwrap());
    }

    #[test]
    fn txn_commits_nothing_when_a_pre_commit_fails() {
        let foo_store = Arc::new(Mutex::new("Hello".to_string()));
        let bar_store = Arc::new(Mutex::new(String::new()));

        let mut hub = DataHub::new();
        hub.uses("foo", TextDataSrc::new(foo_store.clone()));
        hub.uses("bar", TextDataSrc::new(bar_store.clone()));
        hub.uses("baz", PreCommitFailingDataSrc {});

        let result = hub.txn(|data| {
            copy_logic(data)?;
            let _ = data.get_conn::<PreCommitFailingDataConn>("baz")?;
            Ok(())
        });

        match result {
            Err(err) => match err.reason::<DataConnError>() {
                Ok(DataConnError::FailToPreCommitDataConn { errors }) => {
                    assert_eq!(errors.len(), 1);
                    assert_eq!(errors[0].0, "baz".into());
                    assert_eq!(errors[0].1.reason::<String>().unwrap(), "zzz");
                }
                _ => panic!(),
            },
            Ok(_) => panic!(),
        }

        // Nothing was committed.
        assert_eq!(*bar_store.lock().unwrap(), "");
    }
}

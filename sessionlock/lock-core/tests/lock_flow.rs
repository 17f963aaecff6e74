//! End-to-end scenarios against a real state directory and an in-memory
//! keyring.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sessionlock_core::{
    LockConfig, LockController, LockEvent, LockReason, LockState, ManualClock, Partition,
    SecuritySettingsPatch, SessionLockError, StorageProtection, UnlockOutcome, WipeTrigger,
};
use sessionlock_secretstore::MemorySecretStore;
use tokio::sync::broadcast;

const TEST_ITERATIONS: u32 = 1_000;

struct Harness {
    dir: tempfile::TempDir,
    clock: Arc<ManualClock>,
    secrets: Arc<MemorySecretStore>,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            clock: Arc::new(ManualClock::default()),
            secrets: Arc::new(MemorySecretStore::new()),
        }
    }

    fn partition(&self, name: &str) -> Partition {
        Partition::new(name, self.dir.path().join("Partitions").join(name))
    }

    fn partitions(&self) -> Vec<Partition> {
        vec![self.partition("persist_main"), self.partition("persist_work")]
    }

    fn populate(&self) {
        for partition in self.partitions() {
            fs::create_dir_all(partition.path.join("Local Storage")).unwrap();
            fs::write(partition.path.join("Cookies"), b"sid=abc").unwrap();
            fs::write(partition.path.join("Local Storage/leveldb"), b"token").unwrap();
        }
    }

    async fn open(&self) -> Arc<LockController> {
        let config = LockConfig::new(self.dir.path().join("state"))
            .with_partitions(self.partitions())
            .with_kdf_iterations(TEST_ITERATIONS);
        LockController::open_with_clock(config, self.secrets.clone(), self.clock.clone())
            .await
            .unwrap()
    }

    /// Fail one attempt, then wait out whatever delay it imposed.
    async fn fail_once(&self, controller: &LockController) -> UnlockOutcome {
        let outcome = controller.unlock("0000").await.unwrap();
        if let UnlockOutcome::Delay { retry_after_secs, .. } = outcome {
            self.clock.advance(Duration::from_secs(retry_after_secs));
        }
        outcome
    }
}

async fn next_event(events: &mut broadcast::Receiver<LockEvent>) -> LockEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("Timed out waiting for lock event")
        .unwrap()
}

fn tree_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

#[tokio::test]
async fn test_setup_and_unlock_round_trip_for_valid_pins() {
    for pin in ["0000", "1234", "98765", "000000", "1029384", "99999999"] {
        let h = Harness::new();
        let controller = h.open().await;
        controller.setup_pin(pin).await.unwrap();
        controller.lock_now().await;

        let outcome = controller.unlock(pin).await.unwrap();
        assert_eq!(outcome, UnlockOutcome::Unlocked, "PIN {} should unlock", pin);
    }
}

#[tokio::test]
async fn test_invalid_pins_are_rejected_at_setup() {
    let h = Harness::new();
    let controller = h.open().await;
    for pin in ["", "123", "123456789", "12a4", "１２３４", " 1234"] {
        let err = controller.setup_pin(pin).await.unwrap_err();
        assert!(
            matches!(err, SessionLockError::Validation(_)),
            "PIN {:?} should fail validation, got {:?}",
            pin,
            err
        );
    }
    assert!(!controller.is_pin_configured().await);
}

#[tokio::test]
async fn test_fresh_install_scenario() {
    let h = Harness::new();
    let controller = h.open().await;
    assert!(!controller.is_pin_configured().await);
    assert_eq!(controller.state().await, LockState::Unlocked);

    controller.setup_pin("1234").await.unwrap();

    let outcome = controller.unlock("9999").await.unwrap();
    assert_eq!(
        outcome,
        UnlockOutcome::Delay {
            retry_after_secs: 0,
            remaining_attempts: 9,
        }
    );

    let outcome = controller.unlock("1234").await.unwrap();
    assert_eq!(outcome, UnlockOutcome::Unlocked);
}

#[tokio::test]
async fn test_mismatched_pin_right_after_setup_counts_once() {
    let h = Harness::new();
    let controller = h.open().await;
    controller.setup_pin("2468").await.unwrap();

    let first = controller.unlock("1357").await.unwrap();
    let second = controller.unlock("1357").await.unwrap();
    assert_eq!(
        (first, second),
        (
            UnlockOutcome::Delay {
                retry_after_secs: 0,
                remaining_attempts: 9,
            },
            UnlockOutcome::Delay {
                retry_after_secs: 0,
                remaining_attempts: 8,
            },
        )
    );
}

#[tokio::test]
async fn test_wrong_pin_while_locked_stays_locked() {
    let h = Harness::new();
    let controller = h.open().await;
    controller.setup_pin("2468").await.unwrap();
    controller.lock_now().await;

    let outcome = controller.unlock("1357").await.unwrap();
    assert_eq!(
        outcome,
        UnlockOutcome::Delay {
            retry_after_secs: 0,
            remaining_attempts: 9,
        }
    );
    assert_eq!(controller.state().await, LockState::Locked);
    assert!(!controller.is_content_accessible().await);
}

#[tokio::test]
async fn test_concurrent_wrong_pins_are_both_counted() {
    let h = Harness::new();
    let controller = h.open().await;
    controller.setup_pin("2468").await.unwrap();
    controller.lock_now().await;

    let (a, b) = (controller.clone(), controller.clone());
    let (first, second) = tokio::join!(
        tokio::spawn(async move { a.unlock("1111").await }),
        tokio::spawn(async move { b.unlock("2222").await }),
    );

    let mut remaining: Vec<u32> = [first, second]
        .into_iter()
        .map(|joined| match joined.unwrap().unwrap() {
            UnlockOutcome::Delay {
                remaining_attempts, ..
            } => remaining_attempts,
            other => panic!("Expected delay, got {:?}", other),
        })
        .collect();
    remaining.sort_unstable();
    assert_eq!(remaining, vec![8, 9], "Each attempt must see the other's failure");

    match controller.unlock("3333").await.unwrap() {
        UnlockOutcome::Delay {
            remaining_attempts, ..
        } => assert_eq!(remaining_attempts, 7, "Two failures should already be on record"),
        other => panic!("Expected delay, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_timer_locks_after_timeout() {
    let h = Harness::new();
    let controller = h.open().await;
    controller.setup_pin("2468").await.unwrap();
    let mut events = controller.subscribe();

    let timeout = controller.get_settings().await.auto_lock_timeout();
    let event = tokio::time::timeout(timeout + Duration::from_secs(60), events.recv())
        .await
        .expect("Inactivity timer never fired")
        .unwrap();

    assert_eq!(
        event,
        LockEvent::Locked {
            reason: LockReason::Inactivity,
        }
    );
    assert_eq!(controller.state().await, LockState::Locked);
}

#[tokio::test]
async fn test_wrong_pin_counts_exactly_one() {
    let h = Harness::new();
    let controller = h.open().await;
    controller.setup_pin("2468").await.unwrap();
    controller.lock_now().await;

    for expected_remaining in (7..=9).rev() {
        match controller.unlock("1111").await.unwrap() {
            UnlockOutcome::Delay {
                remaining_attempts, ..
            } => assert_eq!(remaining_attempts, expected_remaining),
            other => panic!("Unexpected outcome {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_delay_table_boundaries() {
    let h = Harness::new();
    let controller = h.open().await;
    controller.setup_pin("2468").await.unwrap();
    controller.lock_now().await;

    let expected = [0, 0, 0, 5, 5, 30, 30, 300, 300];
    for (i, delay) in expected.iter().enumerate() {
        let failures = i as u32 + 1;
        assert_eq!(
            h.fail_once(&controller).await,
            UnlockOutcome::Delay {
                retry_after_secs: *delay,
                remaining_attempts: 10 - failures,
            },
            "Wrong delay after {} failures",
            failures
        );
    }

    let outcome = controller.unlock("0000").await.unwrap();
    assert_eq!(outcome, UnlockOutcome::LockedOut { remaining_secs: 30 * 60 });
    assert!(matches!(controller.state().await, LockState::LockedOut { .. }));

    // Even the right PIN is refused while locked out.
    let outcome = controller.unlock("2468").await.unwrap();
    assert!(matches!(outcome, UnlockOutcome::LockedOut { .. }));
}

#[tokio::test]
async fn test_success_resets_attempts() {
    let h = Harness::new();
    let controller = h.open().await;
    controller.setup_pin("2468").await.unwrap();
    controller.lock_now().await;

    for _ in 0..5 {
        h.fail_once(&controller).await;
    }
    assert!(controller.unlock("2468").await.unwrap().is_unlocked());

    controller.lock_now().await;
    assert_eq!(
        controller.unlock("0000").await.unwrap(),
        UnlockOutcome::Delay {
            retry_after_secs: 0,
            remaining_attempts: 9,
        },
        "Counter should restart from zero after a success"
    );
}

#[tokio::test]
async fn test_lock_now_is_idempotent() {
    let h = Harness::new();
    let controller = h.open().await;
    controller.setup_pin("2468").await.unwrap();
    let mut events = controller.subscribe();

    assert_eq!(controller.lock_now().await, LockState::Locked);
    assert_eq!(controller.lock_now().await, LockState::Locked);

    assert_eq!(
        next_event(&mut events).await,
        LockEvent::Locked {
            reason: LockReason::Manual
        }
    );
    assert!(events.try_recv().is_err(), "Second lock must not emit an event");
}

#[tokio::test]
async fn test_lockout_survives_restart_and_elapses() {
    let h = Harness::new();
    let controller = h.open().await;
    controller.setup_pin("2468").await.unwrap();
    controller
        .save_settings(SecuritySettingsPatch {
            max_attempts: Some(3),
            lockout_duration_minutes: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    controller.lock_now().await;

    h.fail_once(&controller).await;
    h.fail_once(&controller).await;
    let outcome = controller.unlock("0000").await.unwrap();
    assert_eq!(outcome, UnlockOutcome::LockedOut { remaining_secs: 60 });
    drop(controller);

    let reopened = h.open().await;
    assert!(matches!(reopened.state().await, LockState::LockedOut { .. }));
    assert!(reopened.check_lockout_status().await.locked);

    h.clock.advance(Duration::from_secs(61));
    assert!(!reopened.check_lockout_status().await.locked);
    assert_eq!(reopened.state().await, LockState::Locked);
    assert!(reopened.unlock("2468").await.unwrap().is_unlocked());
}

#[tokio::test]
async fn test_wipe_takes_precedence_at_max_attempts() {
    let h = Harness::new();
    h.populate();
    let controller = h.open().await;
    controller.setup_pin("2468").await.unwrap();
    controller
        .save_settings(SecuritySettingsPatch {
            delete_on_max_attempts: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    controller.lock_now().await;

    for _ in 0..9 {
        assert!(matches!(
            h.fail_once(&controller).await,
            UnlockOutcome::Delay { .. }
        ));
    }
    let mut events = controller.subscribe();

    let outcome = controller.unlock("0000").await.unwrap();
    assert_eq!(outcome, UnlockOutcome::Wiped);
    assert_eq!(controller.state().await, LockState::Wiping);
    assert!(!controller.is_content_accessible().await);
    for partition in h.partitions() {
        assert!(!tree_exists(&partition.path), "{} should be erased", partition.name);
    }

    assert_eq!(
        next_event(&mut events).await,
        LockEvent::WipeStarted {
            trigger: WipeTrigger::MaxAttempts
        }
    );
    assert_eq!(next_event(&mut events).await, LockEvent::ProtectionDisabled);
    assert!(matches!(next_event(&mut events).await, LockEvent::Wiped { .. }));
    assert_eq!(next_event(&mut events).await, LockEvent::RelaunchRequested);

    // Further attempts are refused for the rest of the session.
    assert!(matches!(
        controller.unlock("2468").await,
        Err(SessionLockError::Wiping)
    ));
    drop(controller);

    // Next launch starts with protection disabled.
    let reopened = h.open().await;
    assert_eq!(reopened.state().await, LockState::Unlocked);
    assert!(!reopened.is_pin_enabled().await);
    assert!(!reopened.is_pin_configured().await);
}

#[tokio::test]
async fn test_destructive_reset_recovers_from_lockout() {
    let h = Harness::new();
    h.populate();
    let controller = h.open().await;
    controller.setup_pin("2468").await.unwrap();
    controller
        .save_settings(SecuritySettingsPatch {
            max_attempts: Some(3),
            ..Default::default()
        })
        .await
        .unwrap();
    controller.lock_now().await;
    for _ in 0..3 {
        h.fail_once(&controller).await;
    }
    assert!(matches!(controller.state().await, LockState::LockedOut { .. }));

    let token = controller.issue_reset_token();
    let report = controller
        .request_destructive_reset(&token.token)
        .await
        .unwrap();
    assert_eq!(report.partitions.len(), 2);
    assert_eq!(report.fallback_count(), 0);
    assert!(!tree_exists(&h.partition("persist_main").path));
    assert!(!controller.is_pin_configured().await);

    // Tokens are single use.
    assert!(matches!(
        controller.request_destructive_reset(&token.token).await,
        Err(SessionLockError::ResetNotConfirmed)
    ));
}

#[tokio::test]
async fn test_suspend_locks_through_scheduler() {
    let h = Harness::new();
    let controller = h.open().await;
    controller.setup_pin("2468").await.unwrap();
    let mut events = controller.subscribe();

    controller.on_system_suspend();
    assert_eq!(
        next_event(&mut events).await,
        LockEvent::Locked {
            reason: LockReason::Suspend
        }
    );
    assert_eq!(controller.state().await, LockState::Locked);
}

#[tokio::test]
async fn test_screen_lock_respects_setting() {
    let h = Harness::new();
    let controller = h.open().await;
    controller.setup_pin("2468").await.unwrap();
    controller
        .save_settings(SecuritySettingsPatch {
            lock_on_screen_lock: Some(false),
            ..Default::default()
        })
        .await
        .unwrap();

    controller.on_screen_lock();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(controller.state().await, LockState::Unlocked);
}

#[tokio::test]
async fn test_integrity_mismatch_is_advisory() {
    let h = Harness::new();
    h.populate();
    let controller = h.open().await;
    controller.setup_pin("2468").await.unwrap();

    let first = controller.verify_session_integrity().await.unwrap();
    assert!(first.first_run);
    controller.shutdown().await.unwrap();
    drop(controller);

    fs::write(h.partition("persist_work").path.join("Cookies"), b"sid=evil").unwrap();

    let reopened = h.open().await;
    let mut events = reopened.subscribe();
    let report = reopened.verify_session_integrity().await.unwrap();
    assert_eq!(report.mismatched(), vec!["persist_work".to_string()]);
    assert_eq!(
        next_event(&mut events).await,
        LockEvent::IntegrityMismatch {
            partitions: vec!["persist_work".to_string()]
        }
    );

    // Advisory only: unlocking still works.
    assert!(reopened.unlock("2468").await.unwrap().is_unlocked());
}

#[tokio::test]
async fn test_weak_storage_requires_opt_in() {
    let dir = tempfile::tempdir().unwrap();
    let no_keyring = Arc::new(MemorySecretStore::unavailable("no session keyring"));

    let strict = LockController::open(
        LockConfig::new(dir.path().join("strict")).with_kdf_iterations(TEST_ITERATIONS),
        no_keyring.clone(),
    )
    .await
    .unwrap();
    assert!(matches!(
        strict.setup_pin("2468").await,
        Err(SessionLockError::Crypto(_))
    ));

    let lenient = LockController::open(
        LockConfig::new(dir.path().join("lenient"))
            .with_kdf_iterations(TEST_ITERATIONS)
            .allow_weak_pin_storage(true),
        no_keyring,
    )
    .await
    .unwrap();
    let protection = lenient.setup_pin("2468").await.unwrap();
    assert_eq!(protection, StorageProtection::Base64Fallback);
    assert_eq!(
        lenient.storage_protection().unwrap(),
        Some(StorageProtection::Base64Fallback)
    );
}

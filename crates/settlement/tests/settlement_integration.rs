//! Integration tests for payment settlement.
//!
//! These drive the coordinator the way the HTTP layer does, against the
//! in-memory ledger, order repository and gateway.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{Currency, Money, Principal, RequestId, UserId};
use domain::{
    InMemoryOrderRepository, OrderRepository, PaymentStatus, Quote, RequestStatus, Session,
    StudentRequest,
};
use ledger::{
    InMemoryLedger, NewTransaction, Provider, Reference, TransactionLedger, TransactionLedgerExt,
    TransactionStatus,
};
use serde_json::json;
use settlement::gateway::memory::charge;
use settlement::{
    CoordinatorConfig, GatewayError, InMemoryGateway, NotificationOutcome, PaymentCoordinator,
    RemoteStatus, ReviewReason, SettleOutcome, SettlementError, SignatureVerifier, StatusWatcher,
    WatchConfig, WatchOutcome,
};

const SECRET: &str = "sk_test_integration";

type TestCoordinator = PaymentCoordinator<InMemoryLedger, InMemoryOrderRepository, InMemoryGateway>;

struct TestHarness {
    coordinator: TestCoordinator,
    ledger: InMemoryLedger,
    orders: InMemoryOrderRepository,
    gateway: InMemoryGateway,
    signer: SignatureVerifier,
}

impl TestHarness {
    fn new() -> Self {
        let ledger = InMemoryLedger::new();
        let orders = InMemoryOrderRepository::new();
        let gateway = InMemoryGateway::new();
        let coordinator = PaymentCoordinator::new(
            ledger.clone(),
            orders.clone(),
            gateway.clone(),
            SignatureVerifier::new(SECRET),
            CoordinatorConfig::default(),
        );

        Self {
            coordinator,
            ledger,
            orders,
            gateway,
            signer: SignatureVerifier::new(SECRET),
        }
    }

    /// A matched request awaiting payment, with its pending session.
    async fn awaiting_payment(&self, student: &Principal, price: Money) -> Session {
        let request =
            StudentRequest::open(RequestId::new(), student.user_id, "Sciences", "Physics", None)
                .unwrap();
        self.orders.insert_request(request.clone()).await.unwrap();
        let invited = self
            .orders
            .invite_teachers(request.id, &[UserId::new()])
            .await
            .unwrap();
        self.orders
            .submit_quote(invited[0].id, Quote::new(price, 60).unwrap(), None)
            .await
            .unwrap();
        let session = self
            .orders
            .accept_proposal(invited[0].id)
            .await
            .unwrap()
            .session;
        self.orders.confirm_match(request.id).await.unwrap();
        self.orders.get_session(session.id).await.unwrap().unwrap()
    }

    /// Inserts an `initialized` transaction linked to `session`.
    async fn transaction_for(&self, session: &Session, reference: &str) -> Reference {
        let reference = Reference::parse(reference).unwrap();
        self.ledger
            .create(
                NewTransaction::new(Provider::paystack(), reference.clone(), session.price.clone())
                    .session(session.id)
                    .request(session.request_id)
                    .student(session.student_id)
                    .teacher(session.teacher_id),
            )
            .await
            .unwrap();
        reference
    }

    fn webhook_body(&self, reference: &Reference, amount_minor: i64) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event": "charge.success",
            "data": {
                "reference": reference.as_str(),
                "status": "success",
                "amount": amount_minor,
                "currency": "NGN",
                "metadata": {}
            }
        }))
        .unwrap()
    }

    async fn deliver(&self, body: &[u8]) -> settlement::Result<NotificationOutcome> {
        let signature = self.signer.sign(body).unwrap();
        self.coordinator
            .handle_notification(body, Some(&signature))
            .await
    }

    async fn transaction_status(&self, reference: &Reference) -> TransactionStatus {
        self.ledger
            .get_by_reference(&Provider::paystack(), reference)
            .await
            .unwrap()
            .status
    }

    async fn session(&self, session: &Session) -> Session {
        self.orders.get_session(session.id).await.unwrap().unwrap()
    }

    async fn request_status(&self, session: &Session) -> (RequestStatus, i64) {
        let request = self
            .orders
            .get_request(session.request_id)
            .await
            .unwrap()
            .unwrap();
        (request.status, request.version)
    }
}

fn naira(major: i64) -> Money {
    Money::from_major(major, Currency::ngn())
}

fn student() -> Principal {
    Principal::student(UserId::new()).with_email("ada@example.com")
}

mod example_scenario {
    use super::*;

    #[tokio::test]
    async fn matching_success_settles_everything_once() {
        let h = TestHarness::new();
        let student = student();
        let session = h.awaiting_payment(&student, naira(5000)).await;
        let reference = h.transaction_for(&session, "REQ_9_17000000").await;
        let (_, request_version) = h.request_status(&session).await;

        h.gateway.succeed(&reference, &naira(5000));
        let snapshot = h.coordinator.verify(&student, &reference).await.unwrap();
        assert!(snapshot.paid);
        assert_eq!(snapshot.session_id, Some(session.id));

        assert_eq!(h.transaction_status(&reference).await, TransactionStatus::Success);
        let paid_session = h.session(&session).await;
        assert_eq!(paid_session.payment_status, PaymentStatus::Paid);
        assert_eq!(
            h.request_status(&session).await,
            (RequestStatus::Paid, request_version + 1)
        );

        // Second call changes nothing and still reports success.
        let snapshot = h.coordinator.verify(&student, &reference).await.unwrap();
        assert!(snapshot.paid);
        assert_eq!(h.session(&session).await.version, paid_session.version);
        assert_eq!(
            h.request_status(&session).await,
            (RequestStatus::Paid, request_version + 1)
        );
    }

    #[tokio::test]
    async fn short_amount_is_not_settled() {
        let h = TestHarness::new();
        let student = student();
        let session = h.awaiting_payment(&student, naira(5000)).await;
        let reference = h.transaction_for(&session, "REQ_9_17000000").await;
        let before = h.request_status(&session).await;

        h.gateway.succeed(&reference, &naira(4000));
        let snapshot = h.coordinator.verify(&student, &reference).await.unwrap();
        assert!(!snapshot.paid);
        assert!(!snapshot.failed);

        assert_eq!(
            h.transaction_status(&reference).await,
            TransactionStatus::Initialized
        );
        assert_eq!(h.session(&session).await, session);
        assert_eq!(h.request_status(&session).await, before);
    }

    #[tokio::test]
    async fn short_amount_webhook_is_flagged_for_review() {
        let h = TestHarness::new();
        let student = student();
        let session = h.awaiting_payment(&student, naira(5000)).await;
        let reference = h.transaction_for(&session, "REQ_9_17000000").await;

        let outcome = h.deliver(&h.webhook_body(&reference, 400_000)).await.unwrap();
        assert_eq!(
            outcome,
            NotificationOutcome::Processed(SettleOutcome::NeedsReview(
                ReviewReason::AmountMismatch {
                    expected: 500_000,
                    reported: 400_000,
                }
            ))
        );
        assert_eq!(
            h.transaction_status(&reference).await,
            TransactionStatus::Initialized
        );
    }
}

mod idempotence {
    use super::*;

    #[tokio::test]
    async fn replayed_webhooks_apply_cascade_once() {
        let h = TestHarness::new();
        let student = student();
        let session = h.awaiting_payment(&student, naira(5000)).await;
        let reference = h.transaction_for(&session, "LC_replay_1").await;
        let body = h.webhook_body(&reference, 500_000);

        let first = h.deliver(&body).await.unwrap();
        assert!(matches!(
            first,
            NotificationOutcome::Processed(SettleOutcome::Settled { .. })
        ));

        for _ in 0..5 {
            assert_eq!(
                h.deliver(&body).await.unwrap(),
                NotificationOutcome::Processed(SettleOutcome::AlreadySettled { repaired: false })
            );
        }

        assert_eq!(h.session(&session).await.version, session.version + 1);
    }

    #[tokio::test]
    async fn webhook_then_verify_agree() {
        let h = TestHarness::new();
        let student = student();
        let session = h.awaiting_payment(&student, naira(5000)).await;
        let reference = h.transaction_for(&session, "LC_both_1").await;

        h.deliver(&h.webhook_body(&reference, 500_000)).await.unwrap();
        let snapshot = h.coordinator.verify(&student, &reference).await.unwrap();
        assert!(snapshot.paid);

        // Already settled: verify never needed the gateway.
        assert_eq!(h.gateway.verify_calls(), 0);
    }

    #[tokio::test]
    async fn unrelated_events_are_acknowledged() {
        let h = TestHarness::new();
        let body = br#"{"event":"subscription.create","data":{}}"#;
        assert_eq!(
            h.deliver(body).await.unwrap(),
            NotificationOutcome::Ignored {
                event: "subscription.create".into()
            }
        );
        assert_eq!(h.ledger.transaction_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_reference_creates_nothing() {
        let h = TestHarness::new();
        let reference = Reference::parse("LC_not_ours_1").unwrap();
        let outcome = h.deliver(&h.webhook_body(&reference, 500_000)).await.unwrap();
        assert_eq!(
            outcome,
            NotificationOutcome::Processed(SettleOutcome::UnknownReference)
        );
        assert_eq!(h.ledger.transaction_count().await, 0);
    }

    #[tokio::test]
    async fn unparseable_reference_is_acknowledged() {
        let h = TestHarness::new();
        let too_long = "x".repeat(Reference::MAX_LEN + 1);
        for reference in ["T 123/ext", "", too_long.as_str()] {
            let body = serde_json::to_vec(&json!({
                "event": "charge.success",
                "data": {
                    "reference": reference,
                    "status": "success",
                    "amount": 500_000,
                    "currency": "NGN"
                }
            }))
            .unwrap();

            let outcome = h.deliver(&body).await.unwrap();
            assert_eq!(
                outcome,
                NotificationOutcome::Processed(SettleOutcome::UnknownReference)
            );
        }
        assert_eq!(h.ledger.transaction_count().await, 0);
    }
}

mod races {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_settles_cascade_once() {
        let h = Arc::new(TestHarness::new());
        let student = student();
        let session = h.awaiting_payment(&student, naira(5000)).await;
        let reference = h.transaction_for(&session, "LC_race_1").await;
        let paid = charge(&reference, RemoteStatus::Success, &naira(5000));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let h = h.clone();
                let reference = reference.clone();
                let paid = paid.clone();
                tokio::spawn(async move {
                    h.coordinator
                        .engine()
                        .settle(&Provider::paystack(), &reference, &paid)
                        .await
                        .unwrap()
                        .outcome
                })
            })
            .collect();

        let mut settled = 0;
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert!(outcome.is_paid());
            if matches!(outcome, SettleOutcome::Settled { .. }) {
                settled += 1;
            }
        }
        assert_eq!(settled, 1);
        assert_eq!(h.session(&session).await.version, session.version + 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn webhook_verify_and_sweep_race() {
        let h = Arc::new(TestHarness::new());
        let student = student();
        let session = h.awaiting_payment(&student, naira(5000)).await;
        let reference = h.transaction_for(&session, "LC_race_2").await;
        h.gateway.succeed(&reference, &naira(5000));
        let body = h.webhook_body(&reference, 500_000);

        let webhook = {
            let h = h.clone();
            tokio::spawn(async move { h.deliver(&body).await.unwrap() })
        };
        let verify = {
            let (h, student, reference) = (h.clone(), student.clone(), reference.clone());
            tokio::spawn(async move { h.coordinator.verify(&student, &reference).await.unwrap() })
        };
        let sweep = {
            let (h, student) = (h.clone(), student.clone());
            tokio::spawn(async move { h.coordinator.reconcile(&student).await.unwrap() })
        };

        webhook.await.unwrap();
        assert!(verify.await.unwrap().paid);
        sweep.await.unwrap();

        assert_eq!(h.session(&session).await.version, session.version + 1);
        assert_eq!(h.request_status(&session).await.0, RequestStatus::Paid);
    }
}

mod signatures {
    use super::*;

    #[tokio::test]
    async fn tampered_body_is_rejected_without_writes() {
        let h = TestHarness::new();
        let student = student();
        let session = h.awaiting_payment(&student, naira(5000)).await;
        let reference = h.transaction_for(&session, "LC_tamper_1").await;

        let body = h.webhook_body(&reference, 500_000);
        let signature = h.signer.sign(&body).unwrap();

        for i in 0..body.len() {
            let mut tampered = body.clone();
            tampered[i] ^= 0x20;
            let err = h
                .coordinator
                .handle_notification(&tampered, Some(&signature))
                .await
                .unwrap_err();
            assert!(matches!(err, SettlementError::Signature(_)), "byte {i}");
        }

        assert_eq!(
            h.transaction_status(&reference).await,
            TransactionStatus::Initialized
        );
        assert_eq!(h.session(&session).await, session);
    }

    #[tokio::test]
    async fn missing_secret_rejects_everything() {
        let h = TestHarness::new();
        let coordinator = PaymentCoordinator::new(
            h.ledger.clone(),
            h.orders.clone(),
            h.gateway.clone(),
            SignatureVerifier::new(""),
            CoordinatorConfig::default(),
        );
        let body = br#"{"event":"charge.success","data":{}}"#;
        let signature = h.signer.sign(body).unwrap();

        assert!(matches!(
            coordinator.handle_notification(body, Some(&signature)).await,
            Err(SettlementError::Signature(_))
        ));
    }

    #[tokio::test]
    async fn signed_garbage_is_malformed() {
        let h = TestHarness::new();
        assert!(matches!(
            h.deliver(b"{not json").await,
            Err(SettlementError::MalformedNotification(_))
        ));
    }
}

mod verification {
    use super::*;

    #[tokio::test]
    async fn gateway_outage_means_still_confirming() {
        let h = TestHarness::new();
        let student = student();
        let session = h.awaiting_payment(&student, naira(5000)).await;
        let reference = h.transaction_for(&session, "LC_outage_1").await;
        h.gateway
            .set_verify_error(Some(GatewayError::Transient("502 from gateway".into())));

        let snapshot = h.coordinator.verify(&student, &reference).await.unwrap();
        assert!(snapshot.found);
        assert!(!snapshot.paid);
        assert!(!snapshot.failed);
        assert_eq!(
            h.transaction_status(&reference).await,
            TransactionStatus::Initialized
        );
    }

    #[tokio::test]
    async fn slow_gateway_times_out_as_still_confirming() {
        let ledger = InMemoryLedger::new();
        let orders = InMemoryOrderRepository::new();
        let gateway = InMemoryGateway::new();
        let coordinator = PaymentCoordinator::new(
            ledger.clone(),
            orders,
            gateway.clone(),
            SignatureVerifier::new(SECRET),
            CoordinatorConfig {
                gateway_timeout: Duration::from_millis(20),
                ..Default::default()
            },
        );
        let student = student();
        let reference = Reference::parse("LC_slow_1").unwrap();
        ledger
            .create(
                NewTransaction::new(Provider::paystack(), reference.clone(), naira(5000))
                    .student(student.user_id),
            )
            .await
            .unwrap();
        gateway.succeed(&reference, &naira(5000));
        gateway.set_latency(Some(Duration::from_secs(5)));

        let snapshot = coordinator.verify(&student, &reference).await.unwrap();
        assert!(!snapshot.paid);
    }

    #[tokio::test]
    async fn explicit_failure_is_terminal() {
        let h = TestHarness::new();
        let student = student();
        let session = h.awaiting_payment(&student, naira(5000)).await;
        let reference = h.transaction_for(&session, "LC_declined_1").await;
        h.gateway
            .resolve(&reference, RemoteStatus::Failed, &naira(5000));

        let snapshot = h.coordinator.verify(&student, &reference).await.unwrap();
        assert!(snapshot.failed);
        assert_eq!(h.transaction_status(&reference).await, TransactionStatus::Failed);

        let status = h.coordinator.status(&student, &reference).await.unwrap();
        assert!(status.failed);
        assert!(!status.paid);
    }

    #[tokio::test]
    async fn only_the_owner_may_verify_or_read_status() {
        let h = TestHarness::new();
        let student = student();
        let session = h.awaiting_payment(&student, naira(5000)).await;
        let reference = h.transaction_for(&session, "LC_owner_1").await;
        let intruder = Principal::student(UserId::new());

        assert!(matches!(
            h.coordinator.verify(&intruder, &reference).await,
            Err(SettlementError::Unauthorized { .. })
        ));
        assert!(matches!(
            h.coordinator.status(&intruder, &reference).await,
            Err(SettlementError::Unauthorized { .. })
        ));
        assert_eq!(h.gateway.verify_calls(), 0);
    }

    #[tokio::test]
    async fn status_for_unknown_reference_is_not_found() {
        let h = TestHarness::new();
        let reference = Reference::parse("LC_missing_1").unwrap();
        let status = h.coordinator.status(&student(), &reference).await.unwrap();
        assert!(!status.found);
        assert!(matches!(
            h.coordinator.verify(&student(), &reference).await,
            Err(SettlementError::TransactionNotFound(_))
        ));
    }
}

mod sweeping {
    use super::*;

    #[tokio::test]
    async fn sweep_is_scoped_to_owner_window_and_limit() {
        let h = TestHarness::new();
        let alice = student();
        let bob = student();

        let alice_session = h.awaiting_payment(&alice, naira(5000)).await;
        let bob_session = h.awaiting_payment(&bob, naira(5000)).await;

        let alice_recent = h.transaction_for(&alice_session, "LC_alice_recent").await;
        let bob_recent = h.transaction_for(&bob_session, "LC_bob_recent").await;

        let alice_old = Reference::parse("LC_alice_old").unwrap();
        h.ledger
            .create(
                NewTransaction::new(Provider::paystack(), alice_old.clone(), naira(5000))
                    .session(alice_session.id)
                    .student(alice.user_id)
                    .created_at(Utc::now() - chrono::Duration::hours(3)),
            )
            .await
            .unwrap();

        for reference in [&alice_recent, &bob_recent, &alice_old] {
            h.gateway.succeed(reference, &naira(5000));
        }

        let report = h.coordinator.reconcile(&alice).await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.settled, 1);
        assert_eq!(h.gateway.verify_calls(), 1);

        assert_eq!(h.transaction_status(&alice_recent).await, TransactionStatus::Success);
        assert_eq!(h.transaction_status(&bob_recent).await, TransactionStatus::Initialized);
        assert_eq!(h.transaction_status(&alice_old).await, TransactionStatus::Initialized);
    }

    #[tokio::test]
    async fn aged_out_transactions_are_listed_for_admins() {
        let h = TestHarness::new();
        let alice = student();
        let old = Reference::parse("LC_stale_1").unwrap();
        h.ledger
            .create(
                NewTransaction::new(Provider::paystack(), old.clone(), naira(5000))
                    .student(alice.user_id)
                    .created_at(Utc::now() - chrono::Duration::hours(5)),
            )
            .await
            .unwrap();
        h.ledger
            .create(
                NewTransaction::new(
                    Provider::paystack(),
                    Reference::parse("LC_fresh_1").unwrap(),
                    naira(5000),
                )
                .student(alice.user_id),
            )
            .await
            .unwrap();

        let admin = Principal::admin(UserId::new());
        let stale = h.coordinator.stale(&admin, 50).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].reference, old);

        assert!(matches!(
            h.coordinator.stale(&alice, 50).await,
            Err(SettlementError::Unauthorized { .. })
        ));
    }
}

mod checkout_flow {
    use super::*;

    #[tokio::test]
    async fn checkout_webhook_then_watch() {
        let h = TestHarness::new();
        let student = student();
        let session = h.awaiting_payment(&student, naira(7500)).await;

        let handle = h.coordinator.checkout(&student, session.id).await.unwrap();
        assert_eq!(handle.amount, 750_000);
        assert_eq!(
            h.transaction_status(&handle.reference).await,
            TransactionStatus::Initialized
        );

        let watcher = StatusWatcher::new(
            h.coordinator.status_source(student.clone()),
            WatchConfig {
                interval: Duration::from_millis(10),
                max_attempts: 100,
            },
        );

        let body = h.webhook_body(&handle.reference, handle.amount);
        let (outcome, delivered) = tokio::join!(watcher.watch(&handle.reference), async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            h.deliver(&body).await.unwrap()
        });

        assert!(matches!(
            delivered,
            NotificationOutcome::Processed(SettleOutcome::Settled { .. })
        ));
        let WatchOutcome::Paid(snapshot) = outcome else {
            panic!("expected the watcher to see the payment, got {outcome:?}");
        };
        assert_eq!(snapshot.session_id, Some(session.id));
        assert_eq!(snapshot.request_id, Some(session.request_id));
    }

    #[tokio::test]
    async fn paid_session_cannot_be_checked_out_again() {
        let h = TestHarness::new();
        let student = student();
        let session = h.awaiting_payment(&student, naira(5000)).await;

        let handle = h.coordinator.checkout(&student, session.id).await.unwrap();
        h.deliver(&h.webhook_body(&handle.reference, handle.amount))
            .await
            .unwrap();

        assert!(matches!(
            h.coordinator.checkout(&student, session.id).await,
            Err(SettlementError::InvalidState(_))
        ));
    }
}

//! Integration tests for the order lifecycle.
//!
//! These tests drive requests, proposals and sessions through the service
//! the way the HTTP layer does, including concurrent acceptance.

use chrono::{Duration, Utc};
use common::{Currency, Money, Principal, UserId};
use domain::{
    CascadeWrite, DomainError, InMemoryOrderRepository, InviteTeachers, OpenRequest,
    OrderError, OrderRepository, OrderService, PaymentStatus, ProposalStatus, RequestStatus,
    ScheduleSession, SubmitQuote, TeacherProposal,
};

struct Cast {
    student: Principal,
    admin: Principal,
    teachers: Vec<Principal>,
}

impl Cast {
    fn new(teachers: usize) -> Self {
        Self {
            student: Principal::student(UserId::new()).with_email("ada@example.com"),
            admin: Principal::admin(UserId::new()),
            teachers: (0..teachers)
                .map(|_| Principal::teacher(UserId::new()))
                .collect(),
        }
    }
}

fn naira(major: i64) -> Money {
    Money::from_major(major, Currency::ngn())
}

fn create_service() -> OrderService<InMemoryOrderRepository> {
    OrderService::new(InMemoryOrderRepository::new())
}

/// Opens a request, invites every teacher and has each quote `fees[i]`.
async fn quoted_request(
    service: &OrderService<InMemoryOrderRepository>,
    cast: &Cast,
    fees: &[i64],
) -> (domain::StudentRequest, Vec<TeacherProposal>) {
    let request = service
        .open_request(
            &cast.student,
            OpenRequest::new("Sciences", "Physics").with_topic("Kinematics"),
        )
        .await
        .unwrap();

    let invited = service
        .invite_teachers(
            &cast.admin,
            InviteTeachers::new(request.id, cast.teachers.iter().map(|t| t.user_id)),
        )
        .await
        .unwrap();

    let mut proposals = Vec::new();
    for (teacher, fee) in cast.teachers.iter().zip(fees) {
        let proposal = invited
            .iter()
            .find(|p| p.teacher_id == teacher.user_id)
            .unwrap();
        proposals.push(
            service
                .submit_quote(teacher, SubmitQuote::new(proposal.id, naira(*fee), 60))
                .await
                .unwrap(),
        );
    }
    (request, proposals)
}

mod request_lifecycle {
    use super::*;

    #[tokio::test]
    async fn complete_request_lifecycle() {
        let service = create_service();
        let cast = Cast::new(2);
        let (request, proposals) = quoted_request(&service, &cast, &[5000, 6500]).await;

        let acceptance = service
            .accept_proposal(&cast.student, proposals[0].id)
            .await
            .unwrap();
        assert_eq!(acceptance.request.status, RequestStatus::Matched);
        assert_eq!(acceptance.session.price, naira(5000));
        assert_eq!(acceptance.session.payment_status, PaymentStatus::Pending);

        let request = service
            .accept_match(&cast.student, request.id)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::AwaitingPayment);

        // Payment lands through the settlement cascade
        let repo = service.repository();
        assert_eq!(
            repo.mark_session_paid(acceptance.session.id, &naira(5000))
                .await
                .unwrap(),
            CascadeWrite::Applied
        );
        assert_eq!(
            repo.mark_request_paid(request.id).await.unwrap(),
            CascadeWrite::Applied
        );

        let teacher = &cast.teachers[0];
        let at = Utc::now() + Duration::days(2);
        let session = service
            .schedule_session(teacher, ScheduleSession::new(acceptance.session.id, at))
            .await
            .unwrap();
        assert_eq!(session.scheduled_at, Some(at));

        let request = service
            .get_request(&cast.student, request.id)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Scheduled);

        let request = service
            .complete_session(teacher, acceptance.session.id)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Completed);
        assert!(request.status.is_terminal());
    }

    #[tokio::test]
    async fn decline_reopens_request_for_new_invitations() {
        let service = create_service();
        let cast = Cast::new(1);
        let (request, proposals) = quoted_request(&service, &cast, &[5000]).await;

        service
            .accept_proposal(&cast.student, proposals[0].id)
            .await
            .unwrap();
        let request = service
            .decline_match(&cast.student, request.id)
            .await
            .unwrap();
        assert_eq!(request.status, RequestStatus::Open);
        assert!(request.matched_teacher_id.is_none());

        let proposals = service
            .proposals(&cast.student, request.id)
            .await
            .unwrap();
        assert!(
            proposals
                .iter()
                .all(|p| p.status == ProposalStatus::Rejected)
        );

        // The first teacher stays rejected; re-inviting them is a no-op.
        let reinvited = service
            .invite_teachers(
                &cast.admin,
                InviteTeachers::new(request.id, [cast.teachers[0].user_id]),
            )
            .await
            .unwrap();
        assert!(reinvited.is_empty());
    }

    #[tokio::test]
    async fn cancel_before_payment_only() {
        let service = create_service();
        let cast = Cast::new(1);
        let (request, proposals) = quoted_request(&service, &cast, &[5000]).await;
        let acceptance = service
            .accept_proposal(&cast.student, proposals[0].id)
            .await
            .unwrap();
        service
            .repository()
            .mark_session_paid(acceptance.session.id, &naira(5000))
            .await
            .unwrap();
        service
            .repository()
            .mark_request_paid(request.id)
            .await
            .unwrap();

        let err = service
            .cancel_request(&cast.student, request.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Order(OrderError::InvalidTransition {
                current: "paid",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn quoting_closes_once_matched() {
        let service = create_service();
        let cast = Cast::new(2);
        let (_, proposals) = quoted_request(&service, &cast, &[5000, 6000]).await;

        service
            .accept_proposal(&cast.student, proposals[0].id)
            .await
            .unwrap();

        let err = service
            .submit_quote(
                &cast.teachers[1],
                SubmitQuote::new(proposals[1].id, naira(4000), 60),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::Order(OrderError::InvalidTransition { .. })
        ));
    }
}

mod proposal_exclusivity {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn accepting_rejects_all_siblings() {
        let service = create_service();
        let cast = Cast::new(3);
        let (request, proposals) = quoted_request(&service, &cast, &[5000, 6000, 7000]).await;

        service
            .accept_proposal(&cast.student, proposals[2].id)
            .await
            .unwrap();

        let stored = service
            .proposals(&cast.student, request.id)
            .await
            .unwrap();
        for proposal in stored {
            let expected = if proposal.id == proposals[2].id {
                ProposalStatus::Accepted
            } else {
                ProposalStatus::Rejected
            };
            assert_eq!(proposal.status, expected);
        }
    }

    #[tokio::test]
    async fn second_accept_is_invalid_transition() {
        let service = create_service();
        let cast = Cast::new(2);
        let (_, proposals) = quoted_request(&service, &cast, &[5000, 6000]).await;

        service
            .accept_proposal(&cast.student, proposals[0].id)
            .await
            .unwrap();
        for proposal in &proposals {
            let err = service
                .accept_proposal(&cast.student, proposal.id)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                DomainError::Order(OrderError::InvalidTransition { .. })
            ));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_accepts_have_exactly_one_winner() {
        let service = Arc::new(create_service());
        let cast = Arc::new(Cast::new(5));
        let (request, proposals) =
            quoted_request(&service, &cast, &[5000, 5500, 6000, 6500, 7000]).await;

        let handles: Vec<_> = proposals
            .iter()
            .map(|p| {
                let service = service.clone();
                let cast = cast.clone();
                let id = p.id;
                tokio::spawn(async move { service.accept_proposal(&cast.student, id).await })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let accepted = service
            .proposals(&cast.student, request.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.status == ProposalStatus::Accepted)
            .count();
        assert_eq!(accepted, 1);

        let session = service
            .repository()
            .session_for_request(request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.version, 1);
    }
}

use common::{Currency, Money, RequestId, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{InMemoryOrderRepository, OrderRepository, Quote, Session, StudentRequest};
use ledger::{InMemoryLedger, NewTransaction, Provider, Reference, TransactionLedger};
use settlement::gateway::memory::charge;
use settlement::{RemoteStatus, SettlementEngine, SignatureVerifier};

type Engine = SettlementEngine<InMemoryLedger, InMemoryOrderRepository>;

async fn pending_payment(price: &Money) -> (Engine, Reference) {
    let orders = InMemoryOrderRepository::new();
    let request =
        StudentRequest::open(RequestId::new(), UserId::new(), "Maths", "Algebra", None).unwrap();
    orders.insert_request(request.clone()).await.unwrap();
    let invited = orders
        .invite_teachers(request.id, &[UserId::new()])
        .await
        .unwrap();
    orders
        .submit_quote(invited[0].id, Quote::new(price.clone(), 60).unwrap(), None)
        .await
        .unwrap();
    let session: Session = orders.accept_proposal(invited[0].id).await.unwrap().session;

    let ledger = InMemoryLedger::new();
    let reference = Reference::parse(format!("LC_{}_1", session.id)).unwrap();
    ledger
        .create(
            NewTransaction::new(Provider::paystack(), reference.clone(), price.clone())
                .session(session.id)
                .request(request.id)
                .student(request.student_id),
        )
        .await
        .unwrap();

    (SettlementEngine::new(ledger, orders), reference)
}

fn bench_settle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let price = Money::from_major(5000, Currency::ngn());

    c.bench_function("settlement/settle_first_success", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (engine, reference) = pending_payment(&price).await;
                let paid = charge(&reference, RemoteStatus::Success, &price);
                engine
                    .settle(&Provider::paystack(), &reference, &paid)
                    .await
                    .unwrap();
            });
        });
    });

    let (engine, reference) = rt.block_on(pending_payment(&price));
    let paid = charge(&reference, RemoteStatus::Success, &price);
    rt.block_on(engine.settle(&Provider::paystack(), &reference, &paid))
        .unwrap();

    c.bench_function("settlement/settle_replay", |b| {
        b.iter(|| {
            rt.block_on(engine.settle(&Provider::paystack(), &reference, &paid))
                .unwrap();
        });
    });
}

fn bench_signature(c: &mut Criterion) {
    let verifier = SignatureVerifier::new("sk_bench_secret");
    let body = serde_json::to_vec(&serde_json::json!({
        "event": "charge.success",
        "data": {"reference": "LC_bench_1", "status": "success", "amount": 500000, "currency": "NGN"}
    }))
    .unwrap();
    let signature = verifier.sign(&body).unwrap();

    c.bench_function("settlement/verify_signature", |b| {
        b.iter(|| verifier.verify(&body, Some(&signature)).unwrap());
    });
}

criterion_group!(benches, bench_settle, bench_signature);
criterion_main!(benches);

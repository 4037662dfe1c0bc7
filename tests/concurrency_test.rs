//! Racing client polls and worker ticks never issue more than one voucher
//! per payment, nor hand one voucher to two payments.

mod common;

use common::{harness, NORMALIZED_PHONE, PHONE};
use futures::future::join_all;
use std::collections::HashSet;
use voucher_backend::database::payment_repository::{FailureReason, PaymentStatus};
use voucher_backend::database::repository::{PaymentRecordStore, VoucherInventory};
use voucher_backend::payments::providers::SandboxReply;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_paths_issue_one_voucher_per_payment() {
    let h = harness();
    h.stock(1000, &["WIFI-R1", "WIFI-R2", "WIFI-R3", "WIFI-R4"]).await;
    let payment = h.state.initiation.initiate(PHONE, 1000).await.unwrap();
    let reference = payment.reference.clone();
    h.sandbox
        .script(
            payment.transaction_uuid.as_deref().unwrap(),
            vec![SandboxReply::Status("successful".to_string())],
        )
        .await;

    let polls = (0..12).map(|_| {
        let status = h.state.status.clone();
        let reference = reference.clone();
        tokio::spawn(async move { status.check_by_reference(&reference).await })
    });
    let ticks = (0..2).map(|_| {
        let worker = h.state.worker.clone();
        tokio::spawn(async move { worker.run_tick().await })
    });
    let (polls, ticks) = futures::join!(join_all(polls), join_all(ticks));
    for tick in ticks {
        tick.unwrap().unwrap();
    }

    let record = h.store.get(&reference).await.unwrap();
    assert_eq!(record.status, PaymentStatus::Successful);
    let code = record.voucher.clone().unwrap();

    for view in polls {
        let view = view.unwrap().unwrap();
        if view.status == PaymentStatus::Successful {
            assert_eq!(view.voucher.as_deref(), Some(code.as_str()));
        }
    }

    assert_eq!(h.store.count_unused(1000).await.unwrap(), 3);
    let bound: Vec<_> = h
        .store
        .vouchers()
        .await
        .into_iter()
        .filter(|v| v.payment_reference.as_deref() == Some(reference.as_str()))
        .collect();
    assert_eq!(bound.len(), 1);
    assert_eq!(bound[0].assigned_to.as_deref(), Some(NORMALIZED_PHONE));

    let originals = h
        .sms
        .sent()
        .await
        .into_iter()
        .filter(|(_, message)| !message.contains("(Resent)"))
        .count();
    assert_eq!(originals, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn small_tier_is_never_oversold() {
    let h = harness();
    h.stock(2000, &["WIFI-S1", "WIFI-S2", "WIFI-S3"]).await;

    let mut references = Vec::new();
    for i in 0..6 {
        let payment = h
            .state
            .initiation
            .initiate(&format!("07001000{:02}", i), 2000)
            .await
            .unwrap();
        h.sandbox
            .script(
                payment.transaction_uuid.as_deref().unwrap(),
                vec![SandboxReply::Status("successful".to_string())],
            )
            .await;
        references.push(payment.reference);
    }

    let polls = references.iter().cloned().map(|reference| {
        let status = h.state.status.clone();
        tokio::spawn(async move { status.check_by_reference(&reference).await })
    });
    for poll in join_all(polls).await {
        poll.unwrap().unwrap();
    }

    let mut issued = HashSet::new();
    let mut turned_away = 0;
    for reference in &references {
        let record = h.store.get(reference).await.unwrap();
        match record.status {
            PaymentStatus::Successful => {
                assert!(issued.insert(record.voucher.clone().unwrap()));
            }
            PaymentStatus::Failed => {
                assert_eq!(record.failure_reason, Some(FailureReason::NoVoucherAvailable));
                turned_away += 1;
            }
            PaymentStatus::Processing => panic!("payment {reference} left open"),
        }
    }
    // Every voucher in stock is sold before anyone is turned away.
    assert_eq!(issued.len(), 3);
    assert_eq!(turned_away, 3);
    assert_eq!(h.store.count_unused(2000).await.unwrap(), 0);

    let used = h.store.vouchers().await.into_iter().filter(|v| v.used).count();
    assert_eq!(used, issued.len());
}

use super::{harness, send_request, tokens, users};
use backstage_core::TokenFamily;
use backstage_delivery::GatewayErrorCode;

#[tokio::test]
async fn unregistered_token_and_only_that_token_is_deactivated() {
    let h = harness();
    h.store.add_token("u1", "old-phone", "fcm-stale", TokenFamily::Fcm);
    h.store.add_token("u1", "tablet", "fcm-fresh", TokenFamily::Fcm);
    h.store.add_token("u2", "phone", "fcm-other", TokenFamily::Fcm);
    h.gateway
        .fail_token("fcm-stale", GatewayErrorCode::RegistrationTokenNotRegistered);

    let stats = h
        .dispatcher
        .dispatch(&send_request(vec![users(&["u1", "u2"])]))
        .await
        .unwrap();

    assert_eq!(stats.fcm_success, 2);
    assert_eq!(stats.fcm_failure, 1);
    assert_eq!(h.store.is_active("u1", "fcm-stale"), Some(false));
    assert_eq!(h.store.is_active("u1", "fcm-fresh"), Some(true));
    assert_eq!(h.store.is_active("u2", "fcm-other"), Some(true));

    let batches = h.store.deactivations();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0].by_owner,
        vec![("u1".to_string(), vec!["fcm-stale".to_string()])]
    );
    assert!(batches[0].unowned.is_empty());
}

#[tokio::test]
async fn payload_error_keeps_token_active() {
    let h = harness();
    h.store.add_token("u1", "phone", "fcm-u1", TokenFamily::Fcm);
    h.gateway.fail_token("fcm-u1", GatewayErrorCode::InvalidArgument);

    let stats = h.dispatcher.dispatch(&send_request(vec![users(&["u1"])])).await.unwrap();

    assert_eq!(stats.fcm_failure, 1);
    assert_eq!(h.store.is_active("u1", "fcm-u1"), Some(true));
    assert!(h.store.deactivations().is_empty());
}

#[tokio::test]
async fn mismatched_credential_and_invalid_token_are_deactivated() {
    let h = harness();
    h.store.add_token("u1", "a", "fcm-mismatch", TokenFamily::Fcm);
    h.store.add_token("u1", "b", "fcm-garbled", TokenFamily::Fcm);
    h.store.add_token("u1", "c", "fcm-busy", TokenFamily::Fcm);
    h.gateway.fail_token("fcm-mismatch", GatewayErrorCode::MismatchedCredential);
    h.gateway.fail_token("fcm-garbled", GatewayErrorCode::InvalidRegistrationToken);
    h.gateway.fail_token("fcm-busy", GatewayErrorCode::ServerUnavailable);

    h.dispatcher.dispatch(&send_request(vec![users(&["u1"])])).await.unwrap();

    assert_eq!(h.store.is_active("u1", "fcm-mismatch"), Some(false));
    assert_eq!(h.store.is_active("u1", "fcm-garbled"), Some(false));
    assert_eq!(h.store.is_active("u1", "fcm-busy"), Some(true));
}

#[tokio::test]
async fn unreadable_user_is_skipped_others_still_reconciled() {
    let h = harness();
    h.store.add_token("u1", "phone", "fcm-u1-dead", TokenFamily::Fcm);
    h.store.add_token("u2", "phone", "fcm-u2-dead", TokenFamily::Fcm);
    h.gateway
        .fail_token("fcm-u1-dead", GatewayErrorCode::RegistrationTokenNotRegistered);
    h.gateway
        .fail_token("fcm-u2-dead", GatewayErrorCode::RegistrationTokenNotRegistered);
    h.store.fail_reads_for("u1");

    let stats = h
        .dispatcher
        .dispatch(&send_request(vec![users(&["u1", "u2"])]))
        .await
        .unwrap();

    assert_eq!(stats.fcm_failure, 2);
    assert_eq!(h.store.is_active("u1", "fcm-u1-dead"), Some(true));
    assert_eq!(h.store.is_active("u2", "fcm-u2-dead"), Some(false));
}

#[tokio::test]
async fn direct_token_without_owner_is_deactivated_where_stored() {
    let h = harness();
    h.store.add_token("u9", "phone", "ExponentPushToken[orphan]", TokenFamily::Expo);
    h.relay.fail_token("ExponentPushToken[orphan]", "DeviceNotRegistered");

    h.dispatcher
        .dispatch(&send_request(vec![tokens(&["ExponentPushToken[orphan]"])]))
        .await
        .unwrap();

    let batches = h.store.deactivations();
    assert_eq!(batches.len(), 1);
    assert!(batches[0].by_owner.is_empty());
    assert_eq!(batches[0].unowned, vec!["ExponentPushToken[orphan]".to_string()]);
    assert_eq!(h.store.is_active("u9", "ExponentPushToken[orphan]"), Some(false));
}

#[tokio::test]
async fn expo_ticket_errors_other_than_not_registered_keep_token() {
    let h = harness();
    h.store.add_token("u1", "phone", "ExponentPushToken[big]", TokenFamily::Expo);
    h.relay.fail_token("ExponentPushToken[big]", "MessageTooBig");

    let stats = h.dispatcher.dispatch(&send_request(vec![users(&["u1"])])).await.unwrap();

    assert_eq!(stats.expo_failure, 1);
    assert_eq!(h.store.is_active("u1", "ExponentPushToken[big]"), Some(true));
}

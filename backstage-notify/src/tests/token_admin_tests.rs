use super::harness;
use crate::{DispatchError, Reactivation, RegisterToken};
use backstage_core::{Platform, TokenFamily};

#[tokio::test]
async fn reactivate_unknown_user_is_not_found() {
    let h = harness();

    let err = h.dispatcher.reactivate("ghost").await.unwrap_err();
    assert!(matches!(err, DispatchError::NotFound(_)));
}

#[tokio::test]
async fn reactivate_flips_every_inactive_token() {
    let h = harness();
    h.store.add_token("u1", "a", "fcm-a", TokenFamily::Fcm);
    h.store.add_token("u1", "b", "fcm-b", TokenFamily::Fcm);
    h.store.add_token("u1", "c", "ExponentPushToken[c]", TokenFamily::Expo);
    h.store.set_active("u1", "fcm-a", false);
    h.store.set_active("u1", "ExponentPushToken[c]", false);

    let summary = h.dispatcher.reactivate("u1").await.unwrap();

    assert_eq!(summary, Reactivation { reactivated: 2, total: 3 });
    assert_eq!(h.store.is_active("u1", "fcm-a"), Some(true));
    assert_eq!(h.store.is_active("u1", "ExponentPushToken[c]"), Some(true));
}

#[tokio::test]
async fn reactivate_user_without_tokens() {
    let h = harness();
    h.store.add_user("u1");

    let summary = h.dispatcher.reactivate("u1").await.unwrap();
    assert_eq!(summary, Reactivation { reactivated: 0, total: 0 });
}

#[tokio::test]
async fn register_classifies_and_replaces_device_token() {
    let h = harness();

    let first = h
        .dispatcher
        .register(RegisterToken {
            user_id: "u1".into(),
            device_id: "iphone".into(),
            token: "ExpoPushToken[first]".into(),
            platform: Platform::Ios,
            token_type: None,
        })
        .await
        .unwrap();
    assert_eq!(first.token_type, TokenFamily::Expo);

    let second = h
        .dispatcher
        .register(RegisterToken {
            user_id: "u1".into(),
            device_id: "iphone".into(),
            token: "fcm-after-migration".into(),
            platform: Platform::Ios,
            token_type: None,
        })
        .await
        .unwrap();
    assert_eq!(second.token_type, TokenFamily::Fcm);
    assert_eq!(h.store.is_active("u1", "ExpoPushToken[first]"), None);
    assert_eq!(h.store.is_active("u1", "fcm-after-migration"), Some(true));
}

#[tokio::test]
async fn disable_one_device_leaves_the_others() {
    let h = harness();
    h.store.add_token("u1", "phone", "fcm-phone", TokenFamily::Fcm);
    h.store.add_token("u1", "laptop", "fcm-laptop", TokenFamily::Fcm);

    let changed = h.dispatcher.disable("u1", Some("phone")).await.unwrap();
    assert_eq!(changed, 1);
    assert_eq!(h.store.is_active("u1", "fcm-phone"), Some(false));
    assert_eq!(h.store.is_active("u1", "fcm-laptop"), Some(true));

    let changed = h.dispatcher.disable("u1", None).await.unwrap();
    assert_eq!(changed, 1);
    assert_eq!(h.store.is_active("u1", "fcm-laptop"), Some(false));
}

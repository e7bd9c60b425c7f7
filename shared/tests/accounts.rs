mod common;

use agosh_shared::auth::{self, SessionKeys};
use agosh_shared::error::ErrorKind;
use agosh_shared::store::memory::MemoryStore;
use agosh_shared::types::{LoginRequest, RegisterDonorRequest, Role, UpdateUserRequest};
use agosh_shared::users;
use common::*;

fn sessions() -> SessionKeys {
    SessionKeys::new("integration-secret-integration-secret", 1)
}

fn login_as(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
    }
}

#[tokio::test]
async fn deactivation_blocks_login_and_existing_sessions() {
    let store = MemoryStore::new();
    let hq = head_office(&store).await;
    let sessions = sessions();

    let profile = users::register_donor(
        &store,
        RegisterDonorRequest {
            name: "Ayesha".into(),
            email: "Ayesha@Example.com".into(),
            password: "secret1".into(),
            address: None,
            phone_number: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(profile.role, Role::Donor);

    let session = users::login(&store, &sessions, login_as("ayesha@example.com", "secret1"))
        .await
        .unwrap();
    let user_id = sessions.verify(&session.token).unwrap();
    let caller = auth::resolve_caller(&store, Some(user_id.as_str())).await.unwrap();
    assert_eq!(caller.user_id(), profile.id);

    let deactivate = UpdateUserRequest {
        is_active: Some(false),
        ..Default::default()
    };
    users::update(&store, &hq, &profile.id, deactivate).await.unwrap();

    let err = users::login(&store, &sessions, login_as("ayesha@example.com", "secret1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    let err = auth::resolve_caller(&store, Some(user_id.as_str())).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
}

#[tokio::test]
async fn wrong_password_and_unknown_email_look_the_same() {
    let store = MemoryStore::new();
    donor(&store, "donor-1").await;
    let sessions = sessions();

    let wrong = users::login(&store, &sessions, login_as("donor-1@agosh.test", "nope-nope"))
        .await
        .unwrap_err();
    let unknown = users::login(&store, &sessions, login_as("ghost@agosh.test", "secret1"))
        .await
        .unwrap_err();
    assert_eq!(wrong.kind(), ErrorKind::Authentication);
    assert_eq!(wrong.public_message(), unknown.public_message());
}

#[tokio::test]
async fn account_administration_is_head_office_only() {
    let store = MemoryStore::new();
    let hq = head_office(&store).await;
    let (_, admin) = branch_with_admin(&store, &hq, "Lahore").await;
    let donor = donor(&store, "donor-1").await;

    for caller in [&admin, &donor] {
        let err = users::list(&store, caller, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        let err = users::delete(&store, caller, "hq").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    let admins = users::list(&store, &hq, Some(Role::BranchAdmin)).await.unwrap();
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0].id, admin.user_id());
    assert_eq!(users::list(&store, &hq, None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn callers_cannot_reactivate_themselves() {
    let store = MemoryStore::new();
    let donor = donor(&store, "donor-1").await;

    let err = users::update_me(
        &store,
        &donor,
        UpdateUserRequest {
            is_active: Some(true),
            ..Default::default()
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let updated = users::update_me(
        &store,
        &donor,
        UpdateUserRequest {
            address: Some("Model Town, Lahore".into()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(updated.address.as_deref(), Some("Model Town, Lahore"));
}

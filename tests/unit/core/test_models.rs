// Domain model behaviour used across services

use crate::common::test_user;
use business_hub::core::models::{AuthenticatedIdentity, BusinessFilter, UserRole};
use uuid::Uuid;

#[test]
fn test_identity_copies_account_state() {
    let user = test_user(true, false, true);
    let identity = AuthenticatedIdentity::from(&user);

    assert_eq!(identity.user_id, user.id);
    assert_eq!(identity.email, user.email);
    assert_eq!(identity.role, UserRole::Entrepreneur);
    assert!(identity.is_active);
    assert!(!identity.is_verified);
    assert!(identity.is_entrepreneur);
}

#[test]
fn test_only_owner_or_admin_can_manage() {
    let owner = test_user(true, true, true);
    let identity = AuthenticatedIdentity::from(&owner);
    assert!(identity.can_manage(owner.id));
    assert!(!identity.can_manage(Uuid::new_v4()));

    let mut admin = AuthenticatedIdentity::from(&test_user(true, true, false));
    admin.role = UserRole::Admin;
    assert!(admin.can_manage(owner.id));
}

#[test]
fn test_normalized_filters_share_a_fingerprint() {
    let oversized = BusinessFilter {
        per_page: 10_000,
        page: 0,
        ..BusinessFilter::default()
    }
    .normalized();
    let clamped = BusinessFilter {
        per_page: BusinessFilter::MAX_PER_PAGE,
        page: 1,
        ..BusinessFilter::default()
    };

    assert_eq!(oversized.fingerprint(), clamped.fingerprint());
}

#[test]
fn test_filter_query_defaults() {
    let filter: BusinessFilter = serde_json::from_str(r#"{"city":"Lyon"}"#).unwrap();
    assert_eq!(filter.page, 1);
    assert_eq!(filter.per_page, 20);
    assert_eq!(filter.city.as_deref(), Some("Lyon"));
    assert_eq!(filter.category, None);
}

#[test]
fn test_blank_filters_normalize_to_unfiltered() {
    let blank = BusinessFilter {
        category: Some(String::new()),
        city: Some("  ".to_string()),
        ..BusinessFilter::default()
    }
    .normalized();

    assert_eq!(blank.category, None);
    assert_eq!(blank.city, None);
    assert_eq!(blank.fingerprint(), BusinessFilter::default().fingerprint());
}

#[test]
fn test_empty_filter_value_does_not_share_unfiltered_key() {
    let empty = BusinessFilter {
        category: Some(String::new()),
        ..BusinessFilter::default()
    };
    assert_ne!(empty.fingerprint(), BusinessFilter::default().fingerprint());
}

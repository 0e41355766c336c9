// Key namespace rendering

use business_hub::state::{build_key, EntityKind, KeyPrefix};

#[test]
fn test_every_prefix_renders_distinctly() {
    let prefixes = [
        KeyPrefix::Session,
        KeyPrefix::EmailVerification,
        KeyPrefix::PasswordReset,
        KeyPrefix::RefreshToken,
        KeyPrefix::Entity(EntityKind::User),
        KeyPrefix::Entity(EntityKind::Business),
        KeyPrefix::Entity(EntityKind::Job),
        KeyPrefix::EntityList(EntityKind::User),
        KeyPrefix::EntityList(EntityKind::Business),
        KeyPrefix::EntityList(EntityKind::Job),
    ];

    let mut rendered: Vec<&str> = prefixes.iter().map(KeyPrefix::as_str).collect();
    rendered.sort_unstable();
    rendered.dedup();
    assert_eq!(rendered.len(), prefixes.len());
}

#[test]
fn test_credential_keys() {
    assert_eq!(
        build_key(KeyPrefix::EmailVerification, ["42"]),
        "email-verification:42"
    );
    assert_eq!(build_key(KeyPrefix::RefreshToken, ["abc"]), "refresh-token:abc");
    assert_eq!(build_key(KeyPrefix::Session, ["u1", "device"]), "session:u1:device");
}

#[test]
fn test_list_pattern_covers_only_its_namespace() {
    assert_eq!(KeyPrefix::EntityList(EntityKind::Business).pattern(), "business-list:*");
    assert_eq!(KeyPrefix::Entity(EntityKind::Business).to_string(), "business");
}

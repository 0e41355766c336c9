// Shipped email templates

use business_hub::services::users::VERIFY_EMAIL_TEMPLATE;
use business_hub::services::{TemplateRegistry, TemplateRenderer};
use serde_json::json;
use std::path::Path;

fn shipped_templates() -> TemplateRegistry {
    TemplateRegistry::load_dir(&Path::new(env!("CARGO_MANIFEST_DIR")).join("templates")).unwrap()
}

#[test]
fn test_verification_template_is_shipped() {
    assert!(shipped_templates().contains(VERIFY_EMAIL_TEMPLATE));
}

#[test]
fn test_verification_template_renders_code() {
    let html = shipped_templates()
        .render(
            VERIFY_EMAIL_TEMPLATE,
            &json!({"name": "Ada <3", "code": "042137", "expires_in_minutes": 15}),
        )
        .unwrap();

    assert!(html.contains("042137"));
    assert!(html.contains("Ada &lt;3"));
    assert!(html.contains("15 minutes"));
    assert!(!html.contains("{{"));
}

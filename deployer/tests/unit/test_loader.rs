//! Application loader tests

use serde_json::json;

use oci_lxc_deployer::loader::application::ApplicationLoader;
use oci_lxc_deployer::models::application::TaskType;

use crate::support::MemoryRepository;

#[tokio::test]
async fn test_self_extension_is_cyclic() {
    let repository = MemoryRepository::new()
        .application("loop", json!({"name": "Loop", "extends": "loop"}))
        .into_arc();

    let err = ApplicationLoader::new(repository)
        .load("loop")
        .await
        .unwrap_err();
    assert!(err.mentions("Cyclic inheritance"));
}

#[tokio::test]
async fn test_longer_cycle_is_detected() {
    let repository = MemoryRepository::new()
        .application("a", json!({"name": "A", "extends": "b"}))
        .application("b", json!({"name": "B", "extends": "c"}))
        .application("c", json!({"name": "C", "extends": "a"}))
        .into_arc();

    let err = ApplicationLoader::new(repository)
        .load("a")
        .await
        .unwrap_err();
    assert!(err.mentions("Cyclic inheritance"));
    assert_eq!(err.application, vec!["json:a", "json:b", "json:c"]);
}

#[tokio::test]
async fn test_ancestor_first_merge() {
    let repository = MemoryRepository::new()
        .application(
            "oci-image",
            json!({
                "name": "OCI image",
                "installation": ["create-lxc", "start-lxc"],
                "backup": ["backup-volumes"]
            }),
        )
        .application(
            "mosquitto",
            json!({
                "name": "Mosquitto",
                "extends": "oci-image",
                "installation": [
                    {"name": "write-config", "before": "start-lxc"},
                    {"name": "health-check", "after": "start-lxc"},
                    "print-summary"
                ]
            }),
        )
        .into_arc();

    let application = ApplicationLoader::new(repository)
        .load("mosquitto")
        .await
        .unwrap();

    assert_eq!(application.name, "Mosquitto");
    assert_eq!(application.hierarchy, vec!["json:mosquitto", "json:oci-image"]);
    assert_eq!(
        application.templates(TaskType::Installation),
        &["create-lxc", "write-config", "start-lxc", "health-check", "print-summary"]
    );
    assert_eq!(application.templates(TaskType::Backup), &["backup-volumes"]);
    assert!(application.templates(TaskType::Uninstall).is_empty());
}

#[tokio::test]
async fn test_missing_parent_reports_trail() {
    let repository = MemoryRepository::new()
        .application("child", json!({"name": "Child", "extends": "ghost"}))
        .into_arc();

    let err = ApplicationLoader::new(repository)
        .load("child")
        .await
        .unwrap_err();
    assert!(err.mentions("Application not found: ghost"));
    assert_eq!(err.application, vec!["json:child"]);
}

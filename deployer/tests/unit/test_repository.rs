//! File-backed repository and state store tests

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use oci_lxc_deployer::filesys::file::File;
use oci_lxc_deployer::loader::application::ApplicationLoader;
use oci_lxc_deployer::loader::template::TemplateProcessor;
use oci_lxc_deployer::models::application::{CatalogSource, TaskType};
use oci_lxc_deployer::models::execution::{NameValue, RestartInfo, ValueMap, VmIdentity};
use oci_lxc_deployer::models::template::CommandBody;
use oci_lxc_deployer::storage::context::{ContextStore, FileContextStore};
use oci_lxc_deployer::storage::layout::StorageLayout;
use oci_lxc_deployer::storage::repository::{FileRepository, Repository};

use crate::support::values;

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn repository(dir: &TempDir) -> FileRepository {
    FileRepository::new(StorageLayout::new(dir.path()), 16)
}

#[tokio::test]
async fn test_local_catalog_overrides_json() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "json/applications/mqtt/application.json", r#"{"name": "Mosquitto"}"#);
    write(
        dir.path(),
        "local/json/applications/mqtt/application.json",
        r#"{"name": "Local Mosquitto"}"#,
    );
    let repository = repository(&dir);

    let preferred = repository.read_application("mqtt").await.unwrap().unwrap();
    assert_eq!(preferred.source, CatalogSource::Local);
    assert_eq!(preferred.document.name, "Local Mosquitto");

    let explicit = repository.read_application("json:mqtt").await.unwrap().unwrap();
    assert_eq!(explicit.source, CatalogSource::Json);
    assert_eq!(explicit.document.name, "Mosquitto");

    assert!(repository.read_application("nginx").await.unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_json_reports_line() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "json/applications/broken/application.json",
        "{\n  \"name\": \"broken\",\n  installation: []\n}",
    );

    let err = repository(&dir).read_application("broken").await.unwrap_err();
    assert_eq!(err.details.len(), 1);
    assert_eq!(err.details[0].line, Some(3));
    assert!(err.details[0]
        .template
        .as_deref()
        .unwrap()
        .ends_with("application.json"));
}

#[tokio::test]
async fn test_template_lookup_order() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "json/applications/mqtt/templates/configure.json", r#"{"commands": []}"#);
    write(dir.path(), "json/shared/templates/configure.json", r#"{"name": "shared configure"}"#);
    write(dir.path(), "json/shared/templates/create-ct.json", r#"{"commands": []}"#);
    let repository = repository(&dir);
    let hierarchy = vec!["json:mqtt".to_string()];

    let own = repository
        .resolve_template_path("configure", &hierarchy, false)
        .await
        .unwrap();
    assert!(own.ends_with("applications/mqtt/templates/configure.json"));

    let shared = repository
        .resolve_template_path("configure.json", &hierarchy, true)
        .await
        .unwrap();
    assert!(shared.ends_with("shared/templates/configure.json"));

    assert!(repository
        .resolve_template_path("create-ct", &hierarchy, false)
        .await
        .is_none());

    let template = repository.load_template(&own).await.unwrap().unwrap();
    assert_eq!(template.name, "configure");
    let template = repository.load_template(&shared).await.unwrap().unwrap();
    assert_eq!(template.name, "shared configure");
}

#[tokio::test]
async fn test_script_lookup_prefers_application() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "json/applications/base/scripts/setup.sh", "echo base");
    write(dir.path(), "local/json/applications/mqtt/scripts/setup.sh", "echo mqtt");
    write(dir.path(), "json/shared/scripts/lib.sh", "echo shared");
    let repository = repository(&dir);
    let hierarchy = vec!["local:mqtt".to_string(), "json:base".to_string()];

    assert_eq!(
        repository.get_script("setup.sh", &hierarchy).await.as_deref(),
        Some("echo mqtt")
    );
    assert_eq!(
        repository.get_script("setup.sh", &hierarchy[1..]).await.as_deref(),
        Some("echo base")
    );
    assert_eq!(
        repository.get_script("lib.sh", &hierarchy).await.as_deref(),
        Some("echo shared")
    );
    assert!(repository.get_script("missing.sh", &hierarchy).await.is_none());
}

#[tokio::test]
async fn test_local_resources_stay_inside_local_dir() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "local/certs/ca.pem", "PEM");
    write(dir.path(), "settings.json", "{}");
    let repository = repository(&dir);

    assert_eq!(
        repository.get_local_resource("certs/ca.pem").await,
        Some(b"PEM".to_vec())
    );
    assert!(repository.get_local_resource("../settings.json").await.is_none());
    assert!(repository
        .get_local_resource(dir.path().join("settings.json").to_str().unwrap())
        .await
        .is_none());
}

#[tokio::test]
async fn test_loader_walks_catalogs() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "json/applications/mqtt/application.json",
        r#"{"name": "Mosquitto", "installation": ["create-ct", "install"]}"#,
    );
    write(
        dir.path(),
        "local/json/applications/mqtt/application.json",
        r#"{"name": "Tuned", "extends": "json:mqtt", "installation": [{"name": "tune", "after": "install"}]}"#,
    );

    let loader = ApplicationLoader::new(Arc::new(repository(&dir)));
    let app = loader.load("mqtt").await.unwrap();

    assert_eq!(app.name, "Tuned");
    assert_eq!(app.hierarchy, vec!["local:mqtt", "json:mqtt"]);
    assert_eq!(
        app.templates(TaskType::Installation),
        ["create-ct", "install", "tune"]
    );
}

#[tokio::test]
async fn test_resolution_from_files() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "json/applications/mqtt/application.json",
        r#"{"installation": ["install"]}"#,
    );
    write(
        dir.path(),
        "json/applications/mqtt/templates/install.json",
        r#"{
            "execute_on": "lxc",
            "parameters": [{"id": "port", "default": 1883}],
            "commands": [{"script": "install.sh", "library": "common.sh"}]
        }"#,
    );
    write(
        dir.path(),
        "json/applications/mqtt/scripts/install.sh",
        "#!/bin/sh\nlisten {{ port }}\n",
    );
    write(dir.path(), "json/shared/scripts/common.sh", "log() { echo \"$@\"; }\n");

    let processor = TemplateProcessor::new(Arc::new(repository(&dir)));
    let resolved = processor
        .load_application("mqtt", TaskType::Installation, &ValueMap::new())
        .await
        .unwrap();

    assert_eq!(resolved.commands.len(), 1);
    let command = &resolved.commands[0];
    assert!(matches!(&command.body, CommandBody::Script { name, .. } if name == "install.sh"));
    assert_eq!(
        command.library.as_ref().and_then(|l| l.content.as_deref()),
        Some("log() { echo \"$@\"; }\n")
    );
    assert_eq!(resolved.defaults.get("port"), Some(&json!(1883)));
}

#[tokio::test]
async fn test_context_store_round_trip() {
    let dir = TempDir::new().unwrap();
    let file = File::new(dir.path().join("local").join("contexts.json"));

    let store = FileContextStore::new(file.clone());
    assert!(store.vm_identity("mqtt").await.unwrap().is_none());

    let identity = VmIdentity {
        hostname: Some("mqtt".to_string()),
        vm_id: Some(110),
        node: Some("pve1".to_string()),
        data: values(json!({"ip": "10.0.0.10"})),
        installed_at: None,
    };
    assert_ok!(store.save_vm_identity(&identity).await);

    let reopened = FileContextStore::new(file);
    assert_eq!(reopened.vm_identity("mqtt").await.unwrap(), Some(identity));

    let anonymous = VmIdentity::default();
    assert_err!(reopened.save_vm_identity(&anonymous).await);
}

#[tokio::test]
async fn test_restart_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let file = File::new(dir.path().join("restart").join("mqtt-installation.json"));
    let info = RestartInfo {
        vm_id: Some(110),
        last_successful: 2,
        inputs: vec![NameValue::new("hostname", "mqtt")],
        outputs: vec![NameValue::new("vm_id", 110)],
        defaults: vec![NameValue::new("port", 1883)],
    };

    assert_ok!(info.save(&file).await);
    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
    assert_eq!(raw["lastSuccessfull"], 2);

    assert_eq!(RestartInfo::load(&file).await.unwrap(), info);
}

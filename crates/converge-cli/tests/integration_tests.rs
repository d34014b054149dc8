//! Integration tests for CLI commands that run without a cluster

use std::path::Path;
use std::process::Command;

/// Helper to run converge command
fn converge(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_converge"))
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute converge")
}

fn write_manifest(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

const APP: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: shop
spec:
  replicas: 2
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: web-config
  namespace: shop
data:
  mode: production
---
# comment-only document
---
apiVersion: v1
kind: Namespace
metadata:
  name: shop
"#;

mod order_command {
    use super::*;

    #[test]
    fn test_order_sorts_by_install_rank() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_manifest(dir.path(), "app.yaml", APP);

        let output = converge(&["order", "-f", &file]);
        assert!(output.status.success(), "Expected success for valid manifests");

        let stdout = String::from_utf8_lossy(&output.stdout);
        let namespace = stdout.find("Namespace/shop").unwrap();
        let config_map = stdout.find("shop/ConfigMap/web-config").unwrap();
        let deployment = stdout.find("shop/Deployment/web").unwrap();
        assert!(namespace < config_map);
        assert!(config_map < deployment);
    }

    #[test]
    fn test_order_reads_directories() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "app.yaml", APP);
        write_manifest(
            dir.path(),
            "crd.json",
            r#"{"apiVersion": "apiextensions.k8s.io/v1", "kind": "CustomResourceDefinition", "metadata": {"name": "widgets.example.com"}}"#,
        );

        let output = converge(&["order", "-f", &dir.path().to_string_lossy()]);
        assert!(output.status.success());

        let stdout = String::from_utf8_lossy(&output.stdout);
        let crd = stdout.find("CustomResourceDefinition/widgets.example.com").unwrap();
        assert!(stdout.find("shop/ConfigMap/web-config").unwrap() < crd);
        assert!(crd < stdout.find("shop/Deployment/web").unwrap());
    }

    #[test]
    fn test_order_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let doc = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: a\n  namespace: x\n";
        let file = write_manifest(dir.path(), "dup.yaml", &format!("{doc}---\n{doc}"));

        let output = converge(&["order", "-f", &file]);
        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("more than once"));
    }

    #[test]
    fn test_order_reports_invalid_document() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_manifest(dir.path(), "bad.yaml", "apiVersion: v1\nmetadata:\n  name: a\n");

        let output = converge(&["order", "-f", &file]);
        assert_eq!(output.status.code(), Some(2));
    }

    #[test]
    fn test_order_missing_file() {
        let output = converge(&["order", "-f", "/nonexistent/app.yaml"]);
        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("cannot read"));
    }
}

mod input_validation {
    use super::*;

    #[test]
    fn test_apply_rejects_malformed_label_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_manifest(dir.path(), "app.yaml", APP);

        let output = converge(&["apply", "-f", &file, "-l", "app"]);
        assert_eq!(output.status.code(), Some(2));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("Invalid input"));
    }

    #[test]
    fn test_apply_requires_labels() {
        let output = converge(&["apply", "-f", "app.yaml"]);
        assert!(!output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("--label"));
    }

    #[test]
    fn test_help_lists_commands() {
        let output = converge(&["--help"]);
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        for command in ["apply", "plan", "purge", "list", "order"] {
            assert!(stdout.contains(command), "missing {command} in help");
        }
    }
}

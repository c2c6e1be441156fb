//! Host command flows against a mock runtime and static upstream metadata
//!
//! - deploy: context, image and deploy record
//! - build: up-to-date short circuit, initial build plan and launch
//! - prerequisites: missing deploy record

use std::cell::Cell;
use std::fs;
use std::path::Path;

use serde_json::json;
use tempfile::TempDir;

use localstack::container::RuntimeCall;
use localstack::{
    build, container_command, deploy, BuildOutcome, DeployOptions, DeployRecord,
    EffectiveConfig, LocalstackError, MockRuntime, Orchestrator, StateLayout,
};
use localstack_builder::resolve::{Endpoints, CHROME_URL_LATEST, STACK_URL_LATEST};
use localstack_builder::{write_checkpoint, BlobStore, FsBlobStore, StaticMetadataSource};
use localstack_model::{layout, BuildConfig, BuildPlan, ComponentVersionSet};

// =============================================================================
// Helpers
// =============================================================================

fn effective(state_dir: &Path) -> EffectiveConfig {
    EffectiveConfig::build(
        None,
        Some(json!({
            "device": "crosshatch",
            "stack_version": "v5",
            "state_dir": state_dir,
        })),
    )
    .expect("config should merge")
}

fn fake_builder(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("localstack-builder");
    fs::write(&path, b"#!/bin/sh\nexit 0\n").unwrap();
    path
}

fn upstream() -> StaticMetadataSource {
    let e = Endpoints::default();
    StaticMetadataSource::new()
        .with(STACK_URL_LATEST, json!({"name": "v5"}))
        .with(
            CHROME_URL_LATEST,
            json!([{"os": "android", "versions": [
                {"channel": "stable", "current_version": "90.0.4430.1"}
            ]}]),
        )
        .with(
            e.fdroid_json("10.0"),
            json!({"client": "1.9", "privilegedextention": "0.2.10"}),
        )
        .with(
            e.aosp_json("10.0"),
            json!({"crosshatch": {"build": "QQ3A.200805.001", "branch": "android-10.0.0_r41"}}),
        )
}

fn latest() -> ComponentVersionSet {
    ComponentVersionSet {
        stack: "v5".to_string(),
        platform_build: "QQ3A.200805.001".to_string(),
        platform_branch: "android-10.0.0_r41".to_string(),
        browser_engine: "90.0.4430.1".to_string(),
        app_store_client: "1.9".to_string(),
        privileged_extension: "0.2.10".to_string(),
    }
}

/// Deploy into `state` and return the build config
fn deployed(state: &TempDir, runtime: &MockRuntime) -> BuildConfig {
    let effective = effective(state.path());
    let builder = fake_builder(state.path());
    deploy(&effective, runtime, &builder, &DeployOptions::default(), |_| true)
        .expect("deploy should succeed");
    effective.to_build_config().unwrap()
}

// =============================================================================
// Deploy
// =============================================================================

#[test]
fn test_deploy_builds_image_and_records() {
    let state = TempDir::new().unwrap();
    let runtime = MockRuntime::new();
    let config = deployed(&state, &runtime);

    let layout = StateLayout::new(&config.state_dir);
    let record = DeployRecord::load(&layout.deploy_record()).expect("record should load");
    assert_eq!(record.device, "crosshatch");
    assert_eq!(record.stack_version, "v5");
    assert_eq!(record.image, "localstack-build-image");
    assert_eq!(record.context_digest.len(), 64);

    let context = layout.context_dir();
    for file in ["Dockerfile", "build.sh", "build-config.json", "localstack-builder"] {
        assert!(context.join(file).is_file(), "missing {}", file);
    }
    assert!(layout.effective_config().is_file());
    assert!(layout.release_dir().is_dir());

    assert_eq!(
        runtime.calls(),
        vec![RuntimeCall::BuildImage("localstack-build-image".to_string())]
    );
}

#[test]
fn test_deploy_declined_writes_nothing() {
    let state = TempDir::new().unwrap();
    let runtime = MockRuntime::new();
    let builder = fake_builder(state.path());

    let err = deploy(
        &effective(state.path()),
        &runtime,
        &builder,
        &DeployOptions::default(),
        |_| false,
    )
    .unwrap_err();

    assert!(matches!(err, LocalstackError::Aborted));
    assert!(!StateLayout::new(state.path()).root.exists());
    assert!(runtime.calls().is_empty());
}

#[test]
fn test_deploy_unsupported_device() {
    let state = TempDir::new().unwrap();
    let runtime = MockRuntime::new();
    let builder = fake_builder(state.path());
    let effective = EffectiveConfig::build(
        None,
        Some(json!({"device": "hammerhead", "state_dir": state.path()})),
    )
    .unwrap();

    let err = deploy(&effective, &runtime, &builder, &DeployOptions::default(), |_| true)
        .unwrap_err();
    assert!(matches!(err, LocalstackError::UnsupportedDevice { .. }));
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_deploy_saves_config() {
    let state = TempDir::new().unwrap();
    let runtime = MockRuntime::new();
    let builder = fake_builder(state.path());
    let saved = state.path().join("config.toml");
    let options = DeployOptions {
        save_config: Some(saved.clone()),
        verbose: false,
    };

    deploy(&effective(state.path()), &runtime, &builder, &options, |_| true).unwrap();

    let reloaded = EffectiveConfig::build(Some(saved.as_path()), None).unwrap();
    assert_eq!(reloaded.get_str("device"), Some("crosshatch"));
    assert_eq!(reloaded.get_str("stack_version"), Some("v5"));
}

// =============================================================================
// Build
// =============================================================================

#[test]
fn test_build_up_to_date_never_launches() {
    let state = TempDir::new().unwrap();
    let runtime = MockRuntime::new();
    let config = deployed(&state, &runtime);
    let deploy_calls = runtime.calls().len();

    let release = StateLayout::new(&config.state_dir).release_dir();
    write_checkpoint(&FsBlobStore::new(&release), "crosshatch", &latest()).unwrap();

    let launched = Cell::new(false);
    let outcome = build(&config, false, &upstream(), |_| {
        launched.set(true);
        Ok(())
    })
    .unwrap();

    assert_eq!(outcome, BuildOutcome::UpToDate);
    assert!(!launched.get());
    assert_eq!(runtime.calls().len(), deploy_calls);
    assert!(!release.join(layout::BUILD_PLAN).exists());
}

#[test]
fn test_build_forced_when_up_to_date() {
    let state = TempDir::new().unwrap();
    let runtime = MockRuntime::new();
    let config = deployed(&state, &runtime);
    let release = StateLayout::new(&config.state_dir).release_dir();
    write_checkpoint(&FsBlobStore::new(&release), "crosshatch", &latest()).unwrap();

    let outcome = build(&config, true, &upstream(), |_| Ok(())).unwrap();
    match outcome {
        BuildOutcome::Built(plan) => {
            assert!(plan.force);
            assert_eq!(plan.reasons.len(), 1);
            assert!(plan.reasons[0].contains("forced"));
        }
        other => panic!("expected a build, got {:?}", other),
    }
}

#[test]
fn test_initial_build_writes_plan_and_runs_container() {
    let state = TempDir::new().unwrap();
    let runtime = MockRuntime::new();
    let config = deployed(&state, &runtime);
    let release = StateLayout::new(&config.state_dir).release_dir();

    let outcome = build(&config, false, &upstream(), |_| {
        Orchestrator::new(&runtime, release.clone())
            .run(&container_command(), &[])
            .map_err(LocalstackError::from)
    })
    .unwrap();

    let plan = match outcome {
        BuildOutcome::Built(plan) => plan,
        other => panic!("expected a build, got {:?}", other),
    };
    assert_eq!(plan.device, "crosshatch");
    assert_eq!(plan.reasons, vec!["initial build".to_string()]);
    assert_eq!(plan.latest, latest());

    let written = BuildPlan::from_file(&release.join(layout::BUILD_PLAN)).unwrap();
    assert_eq!(written.run_id, plan.run_id);

    let exec = runtime
        .calls()
        .into_iter()
        .find_map(|call| match call {
            RuntimeCall::Exec(_, command) => Some(command),
            _ => None,
        })
        .expect("builder should be exec'd");
    assert_eq!(exec, container_command());
    assert!(runtime.calls().contains(&RuntimeCall::Stop("mock-1".to_string())));
}

#[test]
fn test_interrupted_first_checkpoint_is_initial_build() {
    let state = TempDir::new().unwrap();
    let runtime = MockRuntime::new();
    let config = deployed(&state, &runtime);
    let store = FsBlobStore::new(StateLayout::new(&config.state_dir).release_dir());
    store.put_string(layout::CHROMIUM_REVISION, "89.0.4389.105").unwrap();

    match build(&config, false, &upstream(), |_| Ok(())).unwrap() {
        BuildOutcome::Built(plan) => {
            assert_eq!(plan.reasons, vec!["initial build".to_string()]);
        }
        other => panic!("expected a build, got {:?}", other),
    }
}

#[test]
fn test_build_failure_propagates_from_launch() {
    let state = TempDir::new().unwrap();
    let runtime = MockRuntime::new().with_exec_exit_code(60);
    let config = deployed(&state, &runtime);
    let release = StateLayout::new(&config.state_dir).release_dir();

    let err = build(&config, false, &upstream(), |_| {
        Orchestrator::new(&runtime, release.clone())
            .run(&container_command(), &[])
            .map_err(LocalstackError::from)
    })
    .unwrap_err();
    assert_eq!(err.exit_code(), 20);
}

#[test]
fn test_build_without_deploy_is_prerequisite_error() {
    let state = TempDir::new().unwrap();
    let config = effective(state.path()).to_build_config().unwrap();

    let launched = Cell::new(false);
    let err = build(&config, false, &upstream(), |_| {
        launched.set(true);
        Ok(())
    })
    .unwrap_err();

    assert!(matches!(err, LocalstackError::NotDeployed(_)));
    assert_eq!(err.exit_code(), 10);
    assert!(!launched.get());
}

#[test]
fn test_build_rejects_device_mismatch() {
    let state = TempDir::new().unwrap();
    let runtime = MockRuntime::new();
    let mut config = deployed(&state, &runtime);
    config.device = "blueline".to_string();

    let err = build(&config, false, &upstream(), |_| Ok(())).unwrap_err();
    assert!(err.to_string().contains("deployed for crosshatch"));
}

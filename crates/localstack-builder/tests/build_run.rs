//! Full build runs against a recording runner
//!
//! The runner stands in for the platform toolchain: each effect leaves the
//! file the real tool would produce, so every stage from dependency setup
//! to checkpoint runs against a real directory tree and release store.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use localstack_builder::executor::vendor_source_dir;
use localstack_builder::keys::PLATFORM_KEYS;
use localstack_builder::publish::OTA_METADATA_ENTRY;
use localstack_builder::{
    decide, recorded_versions, run_build, BlobStore, BuildStage, CommandSpec, Executor,
    FsBlobStore, RecordingRunner, RetryPolicy, Workspace,
};
use localstack_model::{layout, BuildConfig, BuildPlan, ComponentVersionSet};

const BUILD_ID: &str = "QQ3A.200805.001";
const BUILD_NUMBER: &str = "2021.04.01.12";
const POST_TIMESTAMP: &str = "1617278400";

// =============================================================================
// Fixtures
// =============================================================================

fn config(device: &str) -> BuildConfig {
    BuildConfig {
        schema_version: localstack_model::config::SCHEMA_VERSION,
        schema_id: localstack_model::config::SCHEMA_ID.to_string(),
        name: "localstack".to_string(),
        device: device.to_string(),
        stack_version: "v5".to_string(),
        ignore_version_checks: false,
        chromium_version: None,
        hosts_file: None,
        enable_attestation: false,
        custom_manifest_remotes: Vec::new(),
        custom_manifest_projects: Vec::new(),
        custom_patches: Vec::new(),
        custom_scripts: Vec::new(),
        custom_prebuilts: Vec::new(),
        nproc: 8,
        state_dir: PathBuf::from("/var/lib/localstack"),
        release_channel: "stable".to_string(),
        build_type: "user".to_string(),
        android_version: "10.0".to_string(),
        release_url: "https://ota.example.net".to_string(),
        aosp_build: None,
        aosp_branch: None,
    }
}

fn latest() -> ComponentVersionSet {
    ComponentVersionSet {
        stack: "v5".to_string(),
        platform_build: BUILD_ID.to_string(),
        platform_branch: "android-10.0.0_r41".to_string(),
        browser_engine: "90.0.4430.1".to_string(),
        app_store_client: "1.9".to_string(),
        privileged_extension: "0.2.10".to_string(),
    }
}

fn plan(device: &str) -> BuildPlan {
    BuildPlan::new(
        "01f2run",
        device,
        false,
        latest(),
        vec!["initial build".to_string()],
        Utc.with_ymd_and_hms(2021, 4, 1, 12, 0, 0).unwrap(),
    )
}

struct Harness {
    _tmp: TempDir,
    ws: Workspace,
    store: FsBlobStore,
}

/// Workspace where the toolchain is installed, keys exist and chromium is
/// already built for the target version
fn harness(device: &str) -> Harness {
    let tmp = TempDir::new().unwrap();
    let ws = Workspace::under(&tmp.path().join("ws"));
    let store = FsBlobStore::new(tmp.path().join("release"));

    let sdkmanager = ws.sdk().join("tools/bin/sdkmanager");
    fs::create_dir_all(sdkmanager.parent().unwrap()).unwrap();
    fs::write(&sdkmanager, b"").unwrap();
    fs::create_dir_all(ws.depot_tools()).unwrap();

    let keys = ws.keys.join(device);
    fs::create_dir_all(&keys).unwrap();
    for key in PLATFORM_KEYS {
        fs::write(keys.join(format!("{}.pk8", key)), b"pk8").unwrap();
        fs::write(keys.join(format!("{}.x509.pem", key)), b"pem").unwrap();
    }
    for file in ["avb.pem", "avb_pkmd.bin", "verity_key.pub", "verity_user.der.x509"] {
        fs::write(keys.join(file), b"key").unwrap();
    }

    let tree = &ws.tree;
    let product = tree.join("build/make/target/product");
    fs::create_dir_all(&product).unwrap();
    fs::write(product.join("handheld_system.mk"), "PRODUCT_PACKAGES += \\\n    Dialer\n").unwrap();
    fs::write(
        product.join("handheld_product.mk"),
        "PRODUCT_PACKAGES += \\\n    Browser2 \\\n    Calendar \\\n    Camera2\n",
    )
    .unwrap();
    fs::create_dir_all(tree.join("build/core")).unwrap();
    fs::write(tree.join("build/core/build_id.mk"), format!("BUILD_ID={}\n", BUILD_ID)).unwrap();
    fs::create_dir_all(tree.join("device/google/marlin-kernel")).unwrap();

    store
        .put_string(layout::CHROMIUM_BUILT_REVISION, &latest().browser_engine)
        .unwrap();
    store.put(layout::CHROMIUM_WEBVIEW_APK, b"webview").unwrap();
    store.put(layout::CHROMIUM_BROWSER_APK, b"chrome").unwrap();

    Harness {
        _tmp: tmp,
        ws,
        store,
    }
}

fn last_arg(spec: &CommandSpec) -> io::Result<PathBuf> {
    spec.args
        .last()
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::other(format!("no arguments: {}", spec.display())))
}

fn env_var<'a>(spec: &'a CommandSpec, key: &str) -> io::Result<&'a str> {
    spec.env
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| io::Error::other(format!("{} not set", key)))
}

fn write_file(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)
}

/// Runner whose effects produce every toolchain output
fn toolchain(ws: &Workspace, device: &str) -> RecordingRunner {
    let tree = ws.tree.clone();
    let fdroid = ws.fdroid.clone();
    let kernel = ws.kernel.clone();
    let vendor_device = device.to_string();
    let kernel_built = ws.kernel.join("out/arch/arm64/boot/Image.lz4-dtb");

    RecordingRunner::new()
        .on("execute-all.sh", move |_| {
            let dir = vendor_source_dir(&tree, &vendor_device, BUILD_ID).join(&vendor_device);
            write_file(
                &dir.join("vendor-board-info.txt"),
                b"require board=crosshatch\nrequire version-bootloader=B1C1-0.2-5673193\nrequire version-baseband=G845-00048-190308-B-5428357\n",
            )
        })
        .on("./gradlew assembleRelease", move |_| {
            write_file(
                &fdroid.join("app/build/outputs/apk/full/release/app-full-release-unsigned.apk"),
                b"apk",
            )
        })
        .on("kernel/msm", move |_| fs::create_dir_all(&kernel))
        .respond(
            "lz4cat",
            "Linux version 3.18.137-g8a9ad1e (android-build@abfarm) (gcc version 4.9.x)\n",
        )
        .on("CROSS_COMPILE=", move |_| write_file(&kernel_built, b"kernel"))
        .respond("keytool", "Certificate fingerprints:\n\t SHA256: 12:34:AB\n")
        .on("sign_target_files_apks", |spec| write_file(&last_arg(spec)?, b"target"))
        .on("ota_from_target_files", |spec| {
            let path = last_arg(spec)?;
            let mut zip = zip::ZipWriter::new(File::create(path)?);
            zip.start_file(OTA_METADATA_ENTRY, SimpleFileOptions::default())
                .map_err(io::Error::other)?;
            zip.write_all(format!("ota-type=BLOCK\npost-timestamp={}\n", POST_TIMESTAMP).as_bytes())?;
            zip.finish().map_err(io::Error::other)?;
            Ok(())
        })
        .on("img_from_target_files", |spec| write_file(&last_arg(spec)?, b"img"))
        .on("generate-factory-images-common.sh", |spec| {
            let cwd = spec.cwd.clone().unwrap_or_default();
            let name = format!(
                "{}-{}-factory.tar",
                env_var(spec, "DEVICE")?,
                env_var(spec, "VERSION")?
            );
            write_file(&cwd.join(name), b"tar")
        })
        .on("pxz", |spec| {
            let tar = last_arg(spec)?;
            let xz = PathBuf::from(format!("{}.xz", tar.display()));
            fs::remove_file(&tar)?;
            write_file(&xz, b"xz")
        })
}

// =============================================================================
// Successful runs
// =============================================================================

#[test]
fn test_full_build_publishes_and_checkpoints() {
    let h = harness("crosshatch");
    let config = config("crosshatch");
    let runner = toolchain(&h.ws, "crosshatch");
    let stale_target = layout::target_files("crosshatch", "2021.03.01.12");
    h.store.put(&stale_target, b"old").unwrap();

    let executor = Executor::new(&runner, &h.store, &config, h.ws.clone())
        .with_retry(RetryPolicy::immediate(3));
    let state = run_build(plan("crosshatch"), &config, &executor, &runner).expect("build should succeed");

    assert_eq!(state.build_number, BUILD_NUMBER);
    assert_eq!(state.completed.len(), 17);
    assert_eq!(state.completed.last(), Some(&BuildStage::Checkpoint));
    assert!(!state.completed.contains(&BuildStage::KernelRebuild));

    // Release store
    assert!(h.store.exists(&layout::ota_package("crosshatch", BUILD_NUMBER)).unwrap());
    assert!(h.store.exists(&layout::factory_latest("crosshatch")).unwrap());
    assert!(h.store.exists(&layout::target_files("crosshatch", BUILD_NUMBER)).unwrap());
    assert!(!h.store.exists(&stale_target).unwrap());
    assert_eq!(
        h.store.get_string(&layout::release_pointer("crosshatch-stable")).unwrap(),
        Some(format!("{} {} {}", BUILD_NUMBER, POST_TIMESTAMP, BUILD_ID))
    );
    assert_eq!(
        h.store.get_string(&layout::true_timestamp("crosshatch-stable")).unwrap(),
        Some("1617278400".to_string())
    );

    // Checkpoint makes the next decision a no-op
    let recorded = recorded_versions(&h.store, "crosshatch").unwrap().expect("checkpoint written");
    assert_eq!(recorded.stack, "v5");
    assert_eq!(recorded.platform_build, BUILD_ID);
    assert_eq!(recorded.browser_engine, "90.0.4430.1");
    assert!(!decide(&latest(), Some(&recorded), false, false).required);

    // Retrofit devices pass the dynamic partitions flag
    let commands = runner.commands();
    let ota = commands
        .iter()
        .find(|c| c.contains("ota_from_target_files"))
        .unwrap();
    assert!(ota.contains("--block -k"));
    assert!(ota.contains("--retrofit_dynamic_partitions"));

    let sign = commands.iter().find(|c| c.contains("sign_target_files_apks")).unwrap();
    assert!(sign.contains("--avb_system_key"));

    // Chromium was cached, the platform build was not
    assert_eq!(runner.count("autoninja"), 0);
    assert_eq!(runner.count("make -j 8 target-files-package"), 1);
    assert_eq!(
        runner.count("choosecombo release aosp_crosshatch user && make -j 8 target-files-package"),
        1
    );
    assert!(runner.position("repo sync").unwrap() < runner.position("execute-all.sh").unwrap());

    // Vendor files, the app store APK and package registration landed in the tree
    let tree = &h.ws.tree;
    assert!(tree
        .join("vendor/google_devices/crosshatch/vendor-board-info.txt")
        .is_file());
    assert!(tree.join("packages/apps/F-Droid/F-Droid.apk").is_file());
    assert!(tree
        .join("external/chromium-webview/prebuilt/arm64/webview.apk")
        .is_file());
    let packages = fs::read_to_string(tree.join("build/make/target/product/handheld_system.mk")).unwrap();
    assert!(packages.lines().any(|l| l == "PRODUCT_PACKAGES += chromium"));
    assert!(packages.lines().any(|l| l == "PRODUCT_PACKAGES += F-Droid"));
    let product = fs::read_to_string(tree.join("build/make/target/product/handheld_product.mk")).unwrap();
    assert!(!product.contains("Browser2"));
    assert!(product.contains("Camera2"));
}

#[test]
fn test_legacy_device_rebuilds_kernel() {
    let h = harness("marlin");
    let config = config("marlin");
    let runner = toolchain(&h.ws, "marlin");

    let executor = Executor::new(&runner, &h.store, &config, h.ws.clone())
        .with_retry(RetryPolicy::immediate(3));
    let state = run_build(plan("marlin"), &config, &executor, &runner).expect("build should succeed");

    assert_eq!(state.completed.len(), 18);
    assert!(state.completed.contains(&BuildStage::KernelRebuild));

    let checkout = runner.position("git checkout 8a9ad1e").expect("kernel commit checked out");
    let defconfig = runner.position("marlin_defconfig").unwrap();
    let compile = runner.position("target-files-package").unwrap();
    assert!(checkout < defconfig && defconfig < compile);
    assert!(runner.position("keytool").unwrap() < defconfig);

    assert!(h.ws.kernel.join("verity_user.der.x509").is_file());
    assert_eq!(
        fs::read(h.ws.tree.join("device/google/marlin-kernel/Image.lz4-dtb")).unwrap(),
        b"kernel"
    );

    let commands = runner.commands();
    let sign = commands.iter().find(|c| c.contains("sign_target_files_apks")).unwrap();
    assert!(sign.contains("--replace_verity_public_key"));
    assert!(!sign.contains("--avb_vbmeta_key"));
    let ota = commands.iter().find(|c| c.contains("ota_from_target_files")).unwrap();
    assert!(!ota.contains("--retrofit_dynamic_partitions"));
}

#[test]
fn test_clone_retried_until_success() {
    let h = harness("crosshatch");
    let config = config("crosshatch");
    let runner = toolchain(&h.ws, "crosshatch").fail_times("gitlab.com/fdroid/fdroidclient", 2);

    let executor = Executor::new(&runner, &h.store, &config, h.ws.clone())
        .with_retry(RetryPolicy::immediate(3));
    run_build(plan("crosshatch"), &config, &executor, &runner).expect("third clone succeeds");

    assert_eq!(runner.count("gitlab.com/fdroid/fdroidclient"), 3);
    assert_eq!(runner.count("./gradlew assembleRelease"), 1);
}

// =============================================================================
// Failed runs
// =============================================================================

#[test]
fn test_compile_failure_is_not_retried_or_checkpointed() {
    let h = harness("crosshatch");
    let config = config("crosshatch");
    let runner = toolchain(&h.ws, "crosshatch").fail_always("target-files-package");

    let executor = Executor::new(&runner, &h.store, &config, h.ws.clone())
        .with_retry(RetryPolicy::immediate(3));
    let err = run_build(plan("crosshatch"), &config, &executor, &runner).unwrap_err();

    assert_eq!(err.exit_code(), 60);
    assert!(err.to_string().contains("[compile]"));
    assert_eq!(runner.count("target-files-package"), 1);
    assert_eq!(runner.count("sign_target_files_apks"), 0);

    assert_eq!(recorded_versions(&h.store, "crosshatch").unwrap(), None);
    assert!(h
        .store
        .get_string(&layout::release_pointer("crosshatch-stable"))
        .unwrap()
        .is_none());

    // Diagnostics follow the failure
    let df = runner.position("df -h").expect("diagnostics collected");
    assert!(df > runner.position("target-files-package").unwrap());
    assert_eq!(runner.count("uptime"), 1);
}

#[test]
fn test_exhausted_clone_stops_the_run() {
    let h = harness("crosshatch");
    let config = config("crosshatch");
    let runner = toolchain(&h.ws, "crosshatch").fail_always("gitlab.com/fdroid/fdroidclient");

    let executor = Executor::new(&runner, &h.store, &config, h.ws.clone())
        .with_retry(RetryPolicy::immediate(3));
    let err = run_build(plan("crosshatch"), &config, &executor, &runner).unwrap_err();

    assert!(err.to_string().contains("[app-store-client]"));
    assert_eq!(runner.count("gitlab.com/fdroid/fdroidclient"), 3);
    assert_eq!(runner.count("keytool"), 0);
    assert_eq!(recorded_versions(&h.store, "crosshatch").unwrap(), None);
}

#[test]
fn test_plan_for_other_device_is_rejected() {
    let h = harness("crosshatch");
    let config = config("crosshatch");
    let runner = RecordingRunner::new();

    let executor = Executor::new(&runner, &h.store, &config, h.ws.clone());
    let err = run_build(plan("sargo"), &config, &executor, &runner).unwrap_err();

    assert_eq!(err.exit_code(), 1);
    assert!(runner.commands().is_empty());
}

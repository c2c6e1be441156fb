//! Built-in source edits applied to every build

use std::path::Path;

use localstack_model::DeviceProfile;

use super::{CustomizeError, TextEdit};
use crate::runner::{CommandRunner, CommandSpec};

/// Release key fingerprint whitelisted upstream by the privileged extension
pub const OFFICIAL_FDROID_KEY: &str =
    "43238d512c1e5eb2d6569f4a3afbf5523418b82e0a3ed1552770abb9a9c9ccab";

const PRIV_EXT_SRC: &str =
    "packages/apps/F-DroidPrivilegedExtension/app/src/main/java/org/fdroid/fdroid/privileged";

const WEBVIEW_PROVIDERS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<webviewproviders>
    <webviewprovider description="Chromium" packageName="org.chromium.chrome" availableByDefault="true">
    </webviewprovider>
</webviewproviders>
"#;

/// Updater URL entry as shipped, with the placeholder host
const UPDATER_URL_LINE: &str = r#"<string name="url" translatable="false">s3bucket</string>"#;

const UPDATABLE_APEX: &str = "$(call inherit-product, $(SRC_TARGET_DIR)/product/updatable_apex.mk)";

/// Edits for config toggles, model names, webview provider, updater URL,
/// launcher, DeskClock and APEX opt-out
pub fn builtin_edits(release_url: &str, profile: &DeviceProfile) -> Vec<TextEdit> {
    let mut edits = vec![
        TextEdit::replace(
            "frameworks/base/core/res/res/values/config.xml",
            r#"<bool name="config_swipe_up_gesture_setting_available">false</bool>"#,
            r#"<bool name="config_swipe_up_gesture_setting_available">true</bool>"#,
        ),
        TextEdit::replace(
            "packages/apps/Settings/res/values/config.xml",
            r#"<bool name="config_use_legacy_suggestion">true</bool>"#,
            r#"<bool name="config_use_legacy_suggestion">false</bool>"#,
        ),
    ];

    edits.extend(model_edits(profile));

    edits.push(TextEdit::write_file(
        "frameworks/base/core/res/res/xml/config_webview_packages.xml",
        WEBVIEW_PROVIDERS,
    ));
    edits.push(TextEdit::replace(
        "packages/apps/Updater/res/values/config.xml",
        UPDATER_URL_LINE,
        UPDATER_URL_LINE.replace("s3bucket", &format!("{}/", release_url.trim_end_matches('/'))),
    ));
    edits.push(TextEdit::replace(
        format!("{}/PrivilegedService.java", PRIV_EXT_SRC),
        "BuildConfig.APPLICATION_ID",
        "\"org.fdroid.fdroid.privileged\"",
    ));

    let launcher = "packages/apps/Launcher3/src/com/android/launcher3";
    edits.push(TextEdit::replace(
        format!("{}/config/BaseFlags.java", launcher),
        "QSB_ON_FIRST_SCREEN = true;",
        "QSB_ON_FIRST_SCREEN = false;",
    ));
    edits.push(TextEdit::replace(
        format!("{}/provider/ImportDataTask.java", launcher),
        "boolean createEmptyRowOnFirstScreen;",
        "boolean createEmptyRowOnFirstScreen = false;",
    ));

    let deskclock = "packages/apps/DeskClock/AndroidManifest.xml";
    edits.push(TextEdit::insert_after(
        deskclock,
        r#"<uses-permission android:name="android.permission.READ_EXTERNAL_STORAGE" />"#,
        r#"<uses-permission android:name="android.permission.FOREGROUND_SERVICE" />"#,
        "android.permission.FOREGROUND_SERVICE",
    ));
    edits.push(TextEdit::replace(
        deskclock,
        r#"<uses-sdk android:minSdkVersion="19" android:targetSdkVersion="28" />"#,
        r#"<uses-sdk android:minSdkVersion="19" android:targetSdkVersion="25" />"#,
    ));

    // Pixel 2 opts in from the device tree, everything newer from mainline
    for mk in [
        "device/google/wahoo/device.mk",
        "build/make/target/product/mainline_system.mk",
    ] {
        edits.push(TextEdit::replace(mk, UPDATABLE_APEX, ""));
    }

    edits
}

fn model_edits(profile: &DeviceProfile) -> Vec<TextEdit> {
    let Some(name) = &profile.name else {
        return Vec::new();
    };
    let mk = format!(
        "device/google/{}/aosp_{}.mk",
        profile.family, profile.codename
    );
    if profile.kernel_rebuild {
        vec![
            TextEdit::replace(
                mk.clone(),
                "PRODUCT_MODEL := AOSP on msm8996",
                format!("PRODUCT_MODEL := {}", name),
            ),
            TextEdit::replace(
                mk,
                "PRODUCT_MANUFACTURER := google",
                "PRODUCT_MANUFACTURER := Google",
            ),
        ]
    } else {
        vec![TextEdit::replace(
            mk,
            format!("PRODUCT_MODEL := AOSP on {}", profile.codename),
            format!("PRODUCT_MODEL := {}", name),
        )]
    }
}

/// Swap the upstream release key in the client whitelist for our own
pub(super) fn whitelist_edit(release_hash: &str, platform_hash: &str) -> TextEdit {
    TextEdit::replace(
        format!("{}/ClientWhitelist.java", PRIV_EXT_SRC),
        format!("{}\")", OFFICIAL_FDROID_KEY),
        format!(
            "{}\"),\n            new Pair<>(\"org.fdroid.fdroid\", \"{}\")",
            release_hash, platform_hash
        ),
    )
}

/// SHA-256 fingerprint of a certificate as the privileged extension expects it
pub fn client_whitelist_hash(
    runner: &dyn CommandRunner,
    cert: &Path,
) -> Result<String, CustomizeError> {
    let spec = CommandSpec::new("keytool")
        .args(["-list", "-printcert", "-file"])
        .arg(cert.to_string_lossy())
        .capture();
    let output = runner.run(&spec).map_err(|e| CustomizeError::Certificate {
        cert: cert.display().to_string(),
        message: e.to_string(),
    })?;
    parse_fingerprint(&output.stdout).ok_or_else(|| CustomizeError::Certificate {
        cert: cert.display().to_string(),
        message: "no SHA256 fingerprint in keytool output".to_string(),
    })
}

fn parse_fingerprint(output: &str) -> Option<String> {
    let line = output.lines().find(|l| l.contains("SHA256:"))?;
    let cleaned = line.replace(':', "");
    let mut tokens = cleaned.split_whitespace();
    tokens.find(|t| *t == "SHA256")?;
    tokens.next().map(str::to_string)
}

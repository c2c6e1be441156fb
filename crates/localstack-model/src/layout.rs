//! Release store key layout
//!
//! Keys are path-like and relative to the release root. The host mounts the
//! same directory into the container at `/release`.

/// Build plan written by the host before each container run
pub const BUILD_PLAN: &str = "build-plan.json";

/// Recorded chromium version (checkpoint)
pub const CHROMIUM_REVISION: &str = "chromium/revision";

/// Chromium version of the cached APKs, written when chromium is built
pub const CHROMIUM_BUILT_REVISION: &str = "chromium/built-revision";

/// Cached WebView APK
pub const CHROMIUM_WEBVIEW_APK: &str = "chromium/SystemWebView.apk";

/// Cached browser APK
pub const CHROMIUM_BROWSER_APK: &str = "chromium/ChromeModernPublic.apk";

/// Recorded F-Droid client version
pub const FDROID_REVISION: &str = "fdroid/revision";

/// Recorded F-Droid privileged extension version
pub const FDROID_PRIV_REVISION: &str = "fdroid-priv/revision";

/// Recorded stack version
pub const STACK_REVISION: &str = "rattlesnakeos-stack/revision";

/// Recorded platform build id for a device
pub fn vendor_revision(device: &str) -> String {
    format!("{}-vendor", device)
}

/// Update pointer read by the updater app (e.g. "crosshatch-stable")
pub fn release_pointer(channel_key: &str) -> String {
    channel_key.to_string()
}

/// Build timestamp companion of the update pointer
pub fn true_timestamp(channel_key: &str) -> String {
    format!("{}-true-timestamp", channel_key)
}

/// Most recent factory image
pub fn factory_latest(device: &str) -> String {
    format!("{}-factory-latest.tar.xz", device)
}

/// Directory holding archived target-files packages
pub fn target_dir(device: &str) -> String {
    format!("{}-target", device)
}

/// Archived target-files package for a build number
pub fn target_files(device: &str, build_number: &str) -> String {
    format!("{}/{}-target-files-{}.zip", target_dir(device), device, build_number)
}

/// File name of the OTA package for a build number
pub fn ota_package(device: &str, build_number: &str) -> String {
    format!("{}-ota_update-{}.zip", device, build_number)
}

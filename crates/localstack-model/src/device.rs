//! Device catalog
//!
//! Device special cases are data, not conditionals scattered through the
//! build: each codename maps to a family, a signing mode, extra OTA flags and
//! whether the legacy kernel rebuild applies. Unknown codenames resolve to a
//! fallback profile flagged as unknown so callers can warn and continue.

use serde::{Deserialize, Serialize};

/// Verified-boot signing scheme used by a device family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningMode {
    /// Legacy dm-verity key replacement
    VerityOnly,
    /// One AVB vbmeta struct, no chaining
    VbmetaSimple,
    /// Root vbmeta struct chaining to a system vbmeta struct
    VbmetaChained,
}

impl SigningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningMode::VerityOnly => "verity_only",
            SigningMode::VbmetaSimple => "vbmeta_simple",
            SigningMode::VbmetaChained => "vbmeta_chained",
        }
    }

    /// Whether this mode signs with an AVB key rather than a verity key
    pub fn uses_avb(&self) -> bool {
        !matches!(self, SigningMode::VerityOnly)
    }
}

impl std::fmt::Display for SigningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OTA flag for devices that shipped before dynamic partitions
pub const RETROFIT_DYNAMIC_PARTITIONS: &str = "--retrofit_dynamic_partitions";

struct CatalogEntry {
    codename: &'static str,
    family: &'static str,
    name: &'static str,
    signing_mode: SigningMode,
    retrofit: bool,
    legacy: bool,
}

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        codename: "sailfish",
        family: "marlin",
        name: "Pixel",
        signing_mode: SigningMode::VerityOnly,
        retrofit: false,
        legacy: true,
    },
    CatalogEntry {
        codename: "marlin",
        family: "marlin",
        name: "Pixel XL",
        signing_mode: SigningMode::VerityOnly,
        retrofit: false,
        legacy: true,
    },
    CatalogEntry {
        codename: "walleye",
        family: "muskie",
        name: "Pixel 2",
        signing_mode: SigningMode::VbmetaSimple,
        retrofit: false,
        legacy: false,
    },
    CatalogEntry {
        codename: "taimen",
        family: "taimen",
        name: "Pixel 2 XL",
        signing_mode: SigningMode::VbmetaSimple,
        retrofit: false,
        legacy: false,
    },
    CatalogEntry {
        codename: "blueline",
        family: "crosshatch",
        name: "Pixel 3",
        signing_mode: SigningMode::VbmetaChained,
        retrofit: true,
        legacy: false,
    },
    CatalogEntry {
        codename: "crosshatch",
        family: "crosshatch",
        name: "Pixel 3 XL",
        signing_mode: SigningMode::VbmetaChained,
        retrofit: true,
        legacy: false,
    },
    CatalogEntry {
        codename: "sargo",
        family: "bonito",
        name: "Pixel 3a",
        signing_mode: SigningMode::VbmetaChained,
        retrofit: true,
        legacy: false,
    },
    CatalogEntry {
        codename: "bonito",
        family: "bonito",
        name: "Pixel 3a XL",
        signing_mode: SigningMode::VbmetaChained,
        retrofit: true,
        legacy: false,
    },
];

/// Supported codenames with their marketing names, in catalog order
pub const SUPPORTED_DEVICES: &[(&str, &str)] = &[
    ("sailfish", "Pixel"),
    ("marlin", "Pixel XL"),
    ("walleye", "Pixel 2"),
    ("taimen", "Pixel 2 XL"),
    ("blueline", "Pixel 3"),
    ("crosshatch", "Pixel 3 XL"),
    ("sargo", "Pixel 3a"),
    ("bonito", "Pixel 3a XL"),
];

/// Resolved per-device build profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Device codename (e.g. "crosshatch")
    pub codename: String,

    /// Device family; vendor files for the family are needed when it differs
    pub family: String,

    /// Marketing name, None for unknown devices
    pub name: Option<String>,

    /// Verified-boot signing scheme
    pub signing_mode: SigningMode,

    /// Extra flags passed to OTA generation
    pub extra_ota_flags: Vec<String>,

    /// Whether the legacy kernel rebuild stage runs
    pub kernel_rebuild: bool,

    /// Whether the device is in the catalog
    pub known: bool,
}

impl DeviceProfile {
    /// Resolve a codename against the catalog.
    ///
    /// Unknown codenames get a profile with `family == codename`, chained
    /// AVB signing and `known == false`.
    pub fn resolve(codename: &str) -> Self {
        match CATALOG.iter().find(|e| e.codename == codename) {
            Some(entry) => Self {
                codename: entry.codename.to_string(),
                family: entry.family.to_string(),
                name: Some(entry.name.to_string()),
                signing_mode: entry.signing_mode,
                extra_ota_flags: if entry.retrofit {
                    vec![RETROFIT_DYNAMIC_PARTITIONS.to_string()]
                } else {
                    Vec::new()
                },
                kernel_rebuild: entry.legacy,
                known: true,
            },
            None => Self {
                codename: codename.to_string(),
                family: codename.to_string(),
                name: None,
                signing_mode: SigningMode::VbmetaChained,
                extra_ota_flags: Vec::new(),
                kernel_rebuild: false,
                known: false,
            },
        }
    }

    /// Whether a codename is in the catalog
    pub fn is_supported(codename: &str) -> bool {
        CATALOG.iter().any(|e| e.codename == codename)
    }

    /// Devices still buildable but no longer receiving upstream releases
    pub fn is_deprecated(&self) -> bool {
        self.known && self.kernel_rebuild
    }

    /// Product name passed to the build system's combo selection
    pub fn build_product(&self) -> String {
        format!("aosp_{}", self.codename)
    }

    /// Whether the vendor files of the family must be copied as well
    pub fn needs_family_vendor(&self) -> bool {
        self.codename != self.family
    }
}

//! Device identity, stage, and variant classification (components D and
//! part of B). See spec §3 (`DeviceIdentity`, `CpuInfo`) and §4.D
//! (classification rules).

/// Which side of the ROM→firmware transition the device is currently on.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Stage {
    RomBoot,
    Firmware,
}

/// The recognized XBurst part families.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Variant {
    T20,
    T21,
    T23,
    T30,
    T31,
    T31X,
    T31ZX,
    T40,
    T41,
    A1,
    X1000,
    X1600,
    X1700,
    X2000,
    X2100,
    X2600,
    Unknown,
}

impl Default for Variant {
    fn default() -> Self {
        Variant::Unknown
    }
}

/// A USB vendor/product ID pair this crate recognizes as a candidate device.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UsbId {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Vendor/product ID pairs accepted by `Registry::enumerate` (§4.B.1).
pub const RECOGNIZED_VENDOR_IDS: &[u16] = &[0x601A, 0xA108];
pub const RECOGNIZED_PRODUCT_IDS: &[u16] = &[0x4770, 0xC309, 0x601A, 0x8887, 0x601E];

/// Product IDs that tentatively indicate firmware stage before any CPU-info
/// probe (§4.B.2).
pub const FIRMWARE_STAGE_PRODUCT_IDS: &[u16] = &[0x8887, 0x601E];

/// Identifies a USB device's topology position, protocol identifiers,
/// stage, and resolved variant. See spec §3 for the invariant that `stage`
/// and `product_id` may transiently disagree during the ROM→firmware
/// transition.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub stage: Stage,
    pub variant: Variant,
}

impl DeviceIdentity {
    pub fn tentative_stage_from_product_id(product_id: u16) -> Stage {
        if FIRMWARE_STAGE_PRODUCT_IDS.contains(&product_id) {
            Stage::Firmware
        } else {
            Stage::RomBoot
        }
    }
}

/// CPU-magic bytes reported by `GET_CPU_INFO`, and the projections derived
/// from them (spec §3, §4.C `GET_CPU_INFO`).
#[derive(Debug, Clone)]
pub struct CpuInfo {
    /// The raw 8 or 16 bytes as delivered by the device.
    pub magic_raw: Vec<u8>,
    /// The printable-ASCII projection of `magic_raw`, preserving embedded
    /// spaces, used for variant classification.
    pub magic_clean: String,
    pub stage: Stage,
}

impl CpuInfo {
    /// Builds a `CpuInfo` from the raw magic bytes, applying the printable-
    /// ASCII projection and stage classification from spec §3/§4.C.
    ///
    /// Only the first 8 bytes are the magic; if 16 were delivered, the
    /// remaining bytes are diagnostic-only and are kept in `magic_raw` but
    /// excluded from `magic_clean`.
    pub fn from_raw(magic_raw: &[u8]) -> CpuInfo {
        let magic_bytes = &magic_raw[..magic_raw.len().min(8)];
        let magic_clean: String = magic_bytes
            .iter()
            .filter(|&&b| (0x20..=0x7e).contains(&b))
            .map(|&b| b as char)
            .collect();
        let magic_clean = magic_clean.trim().to_string();

        let stage = classify_stage(&magic_clean);

        CpuInfo {
            magic_raw: magic_raw.to_vec(),
            magic_clean,
            stage,
        }
    }
}

/// Classifies a cleaned CPU-magic string as `Firmware` if it begins with
/// `"Boot"`/`"BOOT"` or equals `"X2580"`/`"A1"` (case-insensitive);
/// otherwise `RomBoot` (spec §3 `CpuInfo.stage`).
fn classify_stage(magic_clean: &str) -> Stage {
    let lower = magic_clean.to_ascii_lowercase();

    if lower.starts_with("boot") || lower == "x2580" || lower == "a1" {
        Stage::Firmware
    } else {
        Stage::RomBoot
    }
}

/// Classifies `magic_clean` into a [`Variant`] per the ordered rules in
/// spec §4.D. Order matters: the first matching rule wins.
pub fn classify_variant(magic_clean: &str) -> Variant {
    let lower = magic_clean.to_ascii_lowercase();

    // Rule 1: XBurst2/T41N board.
    if lower.contains("x2580") {
        return Variant::T41;
    }

    // Rule 2: A1.
    if lower == "a1" {
        return Variant::A1;
    }

    // Rule 3: X1000..X2600.
    for (needle, variant) in &[
        ("x1000", Variant::X1000),
        ("x1600", Variant::X1600),
        ("x1700", Variant::X1700),
        ("x2000", Variant::X2000),
        ("x2100", Variant::X2100),
        ("x2600", Variant::X2600),
    ] {
        if lower.contains(needle) {
            return *variant;
        }
    }

    // Rule 4: T31ZX spellings.
    if lower.contains("t31zx") || lower.contains("zx") {
        return Variant::T31ZX;
    }

    // Rule 5: compact-magic prefix matching.
    let compact: String = magic_clean.chars().filter(|c| !c.is_whitespace()).collect();
    let compact_upper = compact.to_ascii_uppercase();

    if compact_upper.starts_with("T31V") {
        return Variant::T31ZX;
    }
    if compact_upper.starts_with("T31") {
        return Variant::T31;
    }
    for (prefix, variant) in &[
        ("T20", Variant::T20),
        ("T21", Variant::T21),
        ("T23", Variant::T23),
        ("T30", Variant::T30),
        ("T40", Variant::T40),
        ("T41", Variant::T41),
    ] {
        if compact_upper.starts_with(prefix) {
            return *variant;
        }
    }

    // Rule 6: "BOOT47XX"-style fallback — inspect the 7th/8th characters as
    // a numeric suffix.
    if magic_clean.len() >= 8 {
        let suffix = &magic_clean.as_bytes()[6..8];
        if let Ok(suffix_str) = std::str::from_utf8(suffix) {
            if let Ok(code) = suffix_str.trim().parse::<u32>() {
                if let Some(variant) = variant_from_boot_suffix(code) {
                    return variant;
                }
            }
        }
    }

    // Rule 7: default.
    Variant::T31X
}

/// Maps the two-digit numeric suffix of a `"BOOT47XX"`-style magic string
/// to a variant, for the fallback rule in spec §4.D step 6.
fn variant_from_boot_suffix(code: u32) -> Option<Variant> {
    match code {
        20 => Some(Variant::T20),
        21 => Some(Variant::T21),
        23 => Some(Variant::T23),
        30 => Some(Variant::T30),
        31 => Some(Variant::T31),
        40 => Some(Variant::T40),
        41 => Some(Variant::T41),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Table-driven test over documented CPU-magic strings (testable
    /// property #4).
    #[test]
    fn classifies_documented_magics() {
        let cases: &[(&str, Variant)] = &[
            ("T31V", Variant::T31ZX),
            ("T31ZX", Variant::T31ZX),
            ("T31", Variant::T31),
            ("T20", Variant::T20),
            ("T21", Variant::T21),
            ("T23", Variant::T23),
            ("T30", Variant::T30),
            ("T40", Variant::T40),
            ("T41", Variant::T41),
            ("X2580", Variant::T41),
            ("A1", Variant::A1),
            ("a1", Variant::A1),
            ("x1000", Variant::X1000),
            ("x1600", Variant::X1600),
            ("x1700", Variant::X1700),
            ("x2000", Variant::X2000),
            ("x2100", Variant::X2100),
            ("x2600", Variant::X2600),
        ];

        for (magic, expected) in cases {
            assert_eq!(
                classify_variant(magic),
                *expected,
                "magic {:?} should classify as {:?}",
                magic,
                expected
            );
        }
    }

    #[test]
    fn default_variant_is_t31x() {
        assert_eq!(classify_variant("totally-unknown"), Variant::T31X);
    }

    #[test]
    fn boot_prefix_classifies_as_firmware() {
        let info = CpuInfo::from_raw(b"BOOT4731");
        assert_eq!(info.stage, Stage::Firmware);
        assert_eq!(info.magic_clean, "BOOT4731");
    }

    #[test]
    fn mixed_case_boot_classifies_as_firmware() {
        let info = CpuInfo::from_raw(b"Boot47x1");
        assert_eq!(info.stage, Stage::Firmware);
    }

    #[test]
    fn rom_magic_classifies_as_rom_boot() {
        let info = CpuInfo::from_raw(b"T31\0\0\0\0\0");
        assert_eq!(info.stage, Stage::RomBoot);
    }

    #[test]
    fn cpu_info_preserves_embedded_spaces_in_magic_clean() {
        let info = CpuInfo::from_raw(b"T31 ZX\0\0");
        assert_eq!(info.magic_clean, "T31 ZX");
    }
}

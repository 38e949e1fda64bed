use crate::global_var::LOGGER;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    Fixed,
    Removable,
}

/// One watchable mount.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub root: PathBuf,
    pub kind: VolumeKind,
}

impl Volume {
    pub fn fixed(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            kind: VolumeKind::Fixed,
        }
    }
}

/// Enumerate the volumes to watch. Explicit roots win; otherwise the
/// host's mount table is read, keeping fixed and removable block devices
/// and skipping pseudo-filesystems. A host where nothing qualifies falls
/// back to the filesystem root.
pub fn enumerate_volumes(override_roots: &[PathBuf]) -> Vec<Volume> {
    if !override_roots.is_empty() {
        return override_roots.iter().map(Volume::fixed).collect();
    }

    let mut volumes = platform_volumes();
    if volumes.is_empty() {
        LOGGER.warn("no block-device mounts found; falling back to the filesystem root");
        volumes.push(Volume::fixed(PathBuf::from("/")));
    }
    volumes
}

#[cfg(target_os = "linux")]
fn platform_volumes() -> Vec<Volume> {
    match std::fs::read_to_string("/proc/mounts") {
        Ok(table) => parse_mount_table(&table, device_is_removable),
        Err(e) => {
            LOGGER.warn(format!("cannot read mount table: {}", e));
            Vec::new()
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn platform_volumes() -> Vec<Volume> {
    Vec::new()
}

// Filesystems that never hold user documents.
const PSEUDO_FS: [&str; 8] = [
    "squashfs", "overlay", "tmpfs", "ramfs", "devtmpfs", "proc", "sysfs", "autofs",
];

/// Parse a `/proc/mounts`-shaped table. `removable` resolves whether the
/// backing device is removable; injected so the parser stays testable.
fn parse_mount_table<F>(table: &str, removable: F) -> Vec<Volume>
where
    F: Fn(&str) -> bool,
{
    let mut volumes: Vec<Volume> = Vec::new();
    let mut seen_devices: Vec<String> = Vec::new();

    for line in table.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mount_point), Some(fs_type)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if !device.starts_with("/dev/") {
            continue;
        }
        if PSEUDO_FS.contains(&fs_type) {
            continue;
        }
        // A device mounted in several places gets one watcher; the first
        // (shortest-lived in fstab order) mount wins.
        if seen_devices.iter().any(|d| d == device) {
            continue;
        }
        seen_devices.push(device.to_string());

        let kind = if removable(device) {
            VolumeKind::Removable
        } else {
            VolumeKind::Fixed
        };
        volumes.push(Volume {
            root: PathBuf::from(decode_mount_point(mount_point)),
            kind,
        });
    }
    volumes
}

/// `/proc/mounts` escapes space, tab, newline, and backslash octally.
fn decode_mount_point(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let oct = &raw[i + 1..i + 4];
            if let Ok(code) = u8::from_str_radix(oct, 8) {
                out.push(code as char);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

/// Best-effort removability probe via sysfs; unknown devices read fixed.
#[cfg(target_os = "linux")]
fn device_is_removable(device: &str) -> bool {
    let name = match std::path::Path::new(device)
        .file_name()
        .and_then(|n| n.to_str())
    {
        Some(n) => n,
        None => return false,
    };
    // Partition names carry the disk name as a prefix (sda1 -> sda).
    let disk = name.trim_end_matches(|c: char| c.is_ascii_digit());
    let sys = format!("/sys/block/{}/removable", disk);
    matches!(std::fs::read_to_string(sys), Ok(s) if s.trim() == "1")
}

#[cfg(not(target_os = "linux"))]
#[allow(dead_code)]
fn device_is_removable(_device: &str) -> bool {
    false
}

//! File naming for downloaded captures.

const RAW_EXTENSIONS: &[&str] = &[
    "cr3", "cr2", "nef", "arw", "dng", "raf", "orf", "pef", "rw2", "srw", "crw",
];

/// Pick the real extension out of a camera-side file name such as `capt0000.jpg`,
/// `IMG_1234.CR3`, `capt0001.cr2.0` or `CR2.0001`. Falls back to `jpg`.
pub fn normalize_extension(original_name: &str) -> String {
    let lower = original_name.to_lowercase();

    // Right to left, stem included.
    for (index, part) in lower.rsplit('.').enumerate() {
        if part.is_empty() || part.chars().all(|c| c.is_ascii_digit()) || part.starts_with("capt")
        {
            continue;
        }
        if part == "jpeg" {
            return "jpg".to_string();
        }
        if part == "jpg" || RAW_EXTENSIONS.contains(&part) {
            return part.to_string();
        }
        if index > 0 {
            break;
        }
    }

    "jpg".to_string()
}

pub fn is_raw_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    match lower.rsplit_once('.') {
        Some((_, ext)) => RAW_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// `capture_<10-digit unix seconds>.<ext>`
pub fn capture_file_name(original_name: &str, unix_secs: u64) -> String {
    format!("capture_{:010}.{}", unix_secs, normalize_extension(original_name))
}

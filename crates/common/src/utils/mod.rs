/// 工具函数集合

use crate::{Error, Result};
use std::path::Path;

/// 格式化字节大小
pub fn format_bytes(bytes: i64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size.abs() >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// 校验卷标识
///
/// 卷名会直接作为 LV 名称和 restic tag 使用，只允许 LVM 接受的字符
pub fn validate_volume_id(volume_id: &str) -> Result<()> {
    if volume_id.is_empty() {
        return Err(Error::InvalidRequest("volume id must be provided".to_string()));
    }
    if volume_id.len() > 127 {
        return Err(Error::InvalidRequest(format!(
            "volume id {} exceeds 127 characters",
            volume_id
        )));
    }
    // 以 '.' 开头的名称保留给暂存目录下的内部目录（如 .snapshots）
    if volume_id.starts_with('-') || volume_id.starts_with('.') {
        return Err(Error::InvalidRequest(format!("invalid volume id: {}", volume_id)));
    }
    let valid = volume_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'));
    if !valid {
        return Err(Error::InvalidRequest(format!(
            "volume id {} contains characters outside [A-Za-z0-9+_.-]",
            volume_id
        )));
    }
    Ok(())
}

/// 校验挂载目标路径（非空且为绝对路径）
pub fn validate_target_path(target_path: &str) -> Result<()> {
    if target_path.is_empty() {
        return Err(Error::InvalidRequest("target path must be provided".to_string()));
    }
    if !Path::new(target_path).is_absolute() {
        return Err(Error::InvalidRequest(format!(
            "target path {} must be absolute",
            target_path
        )));
    }
    Ok(())
}

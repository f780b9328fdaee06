/// 格式化字节数，保留两位小数
pub fn format_bytes(bytes: u64) -> String {
    format_bytes_with(bytes, 2)
}

/// 格式化字节数
///
/// 以 1024 为进制，去掉末尾的 0：`1536000` -> `"1.46 MB"`，`1024` -> `"1 KB"`
pub fn format_bytes_with(bytes: u64, decimals: usize) -> String {
    const UNITS: &[&str] = &["Bytes", "KB", "MB", "GB", "TB"];
    const UNIT_SIZE: f64 = 1024.0;

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= UNIT_SIZE && unit_index < UNITS.len() - 1 {
        size /= UNIT_SIZE;
        unit_index += 1;
    }

    format!("{} {}", trim_decimals(format!("{:.*}", decimals, size)), UNITS[unit_index])
}

fn trim_decimals(formatted: String) -> String {
    if !formatted.contains('.') {
        return formatted;
    }
    formatted.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// 格式化速度
pub fn format_speed(bytes_per_second: f64) -> String {
    let bytes = if bytes_per_second.is_finite() && bytes_per_second > 0.0 {
        bytes_per_second as u64
    } else {
        0
    };
    format!("{}/s", format_bytes(bytes))
}

/// 格式化为 `MM:SS`，非正数或非有限值返回 `--:--`
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "--:--".to_string();
    }

    let minutes = (seconds / 60.0).floor() as u64;
    let secs = (seconds % 60.0).floor() as u64;

    format!("{:02}:{:02}", minutes, secs)
}

/// 估算剩余时间
pub fn calculate_time_remaining(bytes_uploaded: u64, total_bytes: u64, bytes_per_second: f64) -> String {
    if bytes_per_second <= 0.0 || !bytes_per_second.is_finite() {
        return "--:--".to_string();
    }

    let remaining = total_bytes as f64 - bytes_uploaded as f64;
    format_time(remaining / bytes_per_second)
}

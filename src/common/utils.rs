use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

/// 从文件中读取行, 跳过空行和 # 注释行
pub fn read_lines_from_file(file_path: impl AsRef<Path>) -> io::Result<Vec<String>> {
    let file = File::open(file_path)?;
    let reader = BufReader::new(file);
    let mut lines = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() && !line.starts_with('#') {
            lines.push(line.to_string());
        }
    }

    Ok(lines)
}

lazy_static! {
    // host:port 或 [v6]:port; 裸 IPv6 因含多个冒号不会被误拆
    static ref HOST_PORT: Regex =
        Regex::new(r"^\[([^\]]+)\]:(\d{1,5})$|^([^:]+):(\d{1,5})$").unwrap();
}

/// 拆出目标里的主机和可选端口。带端口的 IPv6 字面量须写成 [addr]:port。
pub fn split_host_port(target: &str) -> (String, Option<u16>) {
    if let Some(caps) = HOST_PORT.captures(target) {
        let pair = if caps.get(1).is_some() {
            (caps.get(1), caps.get(2))
        } else {
            (caps.get(3), caps.get(4))
        };
        if let (Some(host), Some(port)) = pair {
            if let Ok(port) = port.as_str().parse::<u16>() {
                return (host.as_str().to_string(), Some(port));
            }
        }
    }
    let bare = target.trim_start_matches('[').trim_end_matches(']');
    (bare.to_string(), None)
}

/// 目标缺省端口时补上协议默认端口, 已带端口的原样返回。
pub fn host_with_port(target: &str, default_port: u16) -> String {
    match split_host_port(target) {
        (_, Some(_)) => target.to_string(),
        (host, None) => {
            if host.contains(':') {
                // 裸 IPv6 补端口时需要方括号
                format!("[{}]:{}", host, default_port)
            } else {
                format!("{}:{}", host, default_port)
            }
        }
    }
}

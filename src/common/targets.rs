use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use ipnetwork::IpNetwork;
use log::debug;

use crate::common::utils::read_lines_from_file;
use crate::inputs::Strategy;
use crate::plugins::Credential;

/// 展开 CIDR 为包含的全部地址, 网络地址和广播地址都算在内, 升序。
pub fn expand_cidr(cidr: &str) -> Result<Vec<String>> {
    let network =
        IpNetwork::from_str(cidr).map_err(|e| anyhow!("invalid CIDR {}: {}", cidr, e))?;
    Ok(network.iter().map(|ip| ip.to_string()).collect())
}

/// 目标文件 -> 策略。普通行原样加入 (可带 :port), CIDR 行展开后加入。
/// 返回加入的目标数。
pub fn load_targets(path: &Path, strategy: &mut dyn Strategy) -> Result<usize> {
    let lines = read_lines_from_file(path)
        .with_context(|| format!("unable to read target file {}", path.display()))?;
    let mut count = 0;
    for line in lines {
        if line.contains('/') {
            let expanded = expand_cidr(&line)?;
            debug!("expanded {} into {} addresses", line, expanded.len());
            for addr in expanded {
                strategy.add_target(addr);
                count += 1;
            }
        } else {
            strategy.add_target(line);
            count += 1;
        }
    }
    Ok(count)
}

/// 凭据行 account,auth-data: 只按第一个逗号拆, 逗号本身谁也不保留,
/// auth-data 里后续的逗号原样属于 auth-data。没有逗号视为格式错误。
pub fn parse_credential(line: &str, kind: &str) -> Result<Credential> {
    match line.split_once(',') {
        Some((account, auth_data)) => Ok(Credential::new(kind, account, auth_data)),
        None => bail!(
            "malformed credential line (expected account,auth-data): {}",
            line
        ),
    }
}

/// 凭据文件 -> 策略。返回加入的凭据数。
pub fn load_credentials(path: &Path, kind: &str, strategy: &mut dyn Strategy) -> Result<usize> {
    let lines = read_lines_from_file(path)
        .with_context(|| format!("unable to read credential file {}", path.display()))?;
    let mut count = 0;
    for line in lines {
        strategy.add_cred(parse_credential(&line, kind)?);
        count += 1;
    }
    Ok(count)
}

// src/plugins/mod.rs
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use anyhow::{anyhow, Context};
use crossbeam_channel::Sender;
use serde::Serialize;

pub mod ldap;
pub mod ntlm;
pub mod smb;
pub mod smtp;
pub mod ssh;
pub mod vnc;
pub mod winrm;
pub mod wmi;

/// 一条认证凭据。`auth_data` 的含义由协议插件按 `kind` 解释:
/// 密码、私钥路径或协议特定的附加数据。解析后不再修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credential {
    pub kind: String,
    pub account: String,
    pub auth_data: String,
}

impl Credential {
    pub fn new(kind: &str, account: &str, auth_data: &str) -> Self {
        Credential {
            kind: kind.to_string(),
            account: account.to_string(),
            auth_data: auth_data.to_string(),
        }
    }
}

/// 单次扫描尝试的结果。`status` 为 true 表示认证成功;
/// `output` 仅在请求了远程命令且认证成功时非空。
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub host: String,
    pub cred: Credential,
    pub status: bool,
    pub message: String,
    pub output: String,
}

impl ScanResult {
    pub fn success(host: &str, cred: &Credential, message: impl Into<String>) -> Self {
        ScanResult {
            host: host.to_string(),
            cred: cred.clone(),
            status: true,
            message: message.into(),
            output: String::new(),
        }
    }

    pub fn failure(host: &str, cred: &Credential, message: impl Into<String>) -> Self {
        ScanResult {
            host: host.to_string(),
            cred: cred.clone(),
            status: false,
            message: message.into(),
            output: String::new(),
        }
    }
}

/// 协议插件接口。每个协议实现 `attempt`: 连接, 认证, 可选执行命令,
/// 无论哪条路径都返回一个 ScanResult。`scan` 负责把结果投递到
/// 结果通道, 保证每次调用恰好产生一条结果。
pub trait Scanner: Send + Sync {
    /// 注册名, 小写, 也是命令行 -P 的取值。
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// 支持的认证类型集合。
    fn supported_auth(&self) -> &'static [&'static str];

    /// 认证类型 -> 凭据文件行格式示例。
    fn auth_examples(&self) -> &'static [(&'static str, &'static str)];

    /// 对单个目标执行一次认证尝试。阻塞调用, 网络 I/O 受 `timeout` 约束。
    /// 目标缺省端口时补协议默认端口; 连接和会话在返回前全部释放。
    fn attempt(
        &self,
        target: &str,
        command: &str,
        cred: &Credential,
        timeout: Duration,
    ) -> ScanResult;

    fn scan(
        &self,
        target: &str,
        command: &str,
        cred: &Credential,
        timeout: Duration,
        results: &Sender<ScanResult>,
    ) {
        let result = self.attempt(target, command, cred, timeout);
        let _ = results.send(result);
    }
}

/// 构建全部协议插件, 注册顺序即 --list-protocols 的展示顺序。
pub fn registry() -> Vec<Box<dyn Scanner>> {
    vec![
        Box::new(ssh::SshScanner),
        Box::new(winrm::WinrmScanner),
        Box::new(smb::SmbScanner),
        Box::new(ldap::LdapScanner),
        Box::new(smtp::SmtpScanner),
        Box::new(vnc::VncScanner),
        Box::new(wmi::WmiScanner),
    ]
}

/// 按协议名查找插件。
pub fn lookup(name: &str) -> Option<Box<dyn Scanner>> {
    registry().into_iter().find(|s| s.name() == name)
}

/// 解析目标地址并在超时限制内建立 TCP 连接, 读写超时同步设置。
pub(crate) fn open_tcp(addr: &str, timeout: Duration) -> anyhow::Result<TcpStream> {
    let sock_addr = addr
        .to_socket_addrs()
        .with_context(|| format!("unable to resolve {}", addr))?
        .next()
        .ok_or_else(|| anyhow!("no address found for {}", addr))?;
    let stream = TcpStream::connect_timeout(&sock_addr, timeout)
        .with_context(|| format!("connect to {} failed", addr))?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    Ok(stream)
}

/// --list-protocols 的输出: 协议、描述、认证类型与凭据行示例。
pub fn render_protocol_help() -> String {
    let mut out = String::from("Supported protocols:\n");
    for scanner in registry() {
        out.push_str(&format!("\n  {} - {}\n", scanner.name(), scanner.description()));
        for (kind, example) in scanner.auth_examples() {
            out.push_str(&format!(
                "      auth type \"{}\", credential line: {}\n",
                kind, example
            ));
        }
    }
    out
}

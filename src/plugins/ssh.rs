// src/plugins/ssh.rs
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::debug;
use ssh2::Session;

use super::{open_tcp, Credential, ScanResult, Scanner};
use crate::common::utils::host_with_port;

pub const DEFAULT_PORT: u16 = 22;

pub struct SshScanner;

impl SshScanner {
    fn connect(&self, addr: &str, timeout: Duration) -> Result<Session> {
        let tcp = open_tcp(addr, timeout)?;

        let mut session = Session::new().context("ssh session init failed")?;
        // libssh2 的超时以毫秒计, 覆盖握手与认证阶段
        session.set_timeout(timeout.as_millis() as u32);
        session.set_tcp_stream(tcp);
        session.handshake().context("ssh handshake failed")?;
        Ok(session)
    }

    fn authenticate(&self, session: &Session, cred: &Credential) -> Result<()> {
        match cred.kind.as_str() {
            "basic" => session
                .userauth_password(&cred.account, &cred.auth_data)
                .context("authentication failed")?,
            "sshkey" => session
                .userauth_pubkey_file(&cred.account, None, Path::new(&cred.auth_data), None)
                .with_context(|| format!("key authentication with {} failed", cred.auth_data))?,
            other => bail!("unsupported auth type: {}", other),
        }
        if !session.authenticated() {
            bail!("authentication failed");
        }
        Ok(())
    }

    /// 在已认证会话上执行远程命令, 返回 stdout 与 stderr 的合并输出。
    fn execute(&self, session: &Session, command: &str) -> Result<String> {
        let mut channel = session
            .channel_session()
            .context("opening exec channel failed")?;
        channel.exec(command).context("remote exec failed")?;

        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .context("reading command output failed")?;
        let mut stderr = String::new();
        let _ = channel.stderr().read_to_string(&mut stderr);
        output.push_str(&stderr);

        let _ = channel.wait_close();
        Ok(output)
    }
}

impl Scanner for SshScanner {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn description(&self) -> &'static str {
        "Secure Shell (SSH)"
    }

    fn supported_auth(&self) -> &'static [&'static str] {
        &["basic", "sshkey"]
    }

    fn auth_examples(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("basic", "USERNAME,PASSWORD"),
            ("sshkey", "USERNAME,/path/to/key/file.pem"),
        ]
    }

    fn attempt(
        &self,
        target: &str,
        command: &str,
        cred: &Credential,
        timeout: Duration,
    ) -> ScanResult {
        let addr = host_with_port(target, DEFAULT_PORT);
        debug!("ssh attempt on {} as {}", addr, cred.account);

        let session = match self.connect(&addr, timeout) {
            Ok(session) => session,
            Err(e) => return ScanResult::failure(&addr, cred, format!("{:#}", e)),
        };
        if let Err(e) = self.authenticate(&session, cred) {
            return ScanResult::failure(&addr, cred, format!("{:#}", e));
        }

        let mut result = ScanResult::success(&addr, cred, "Successfully connected");
        if !command.is_empty() {
            match self.execute(&session, command) {
                Ok(output) => result.output = output,
                // 执行失败不推翻认证结论, 错误记进输出列
                Err(e) => result.output = format!("Execution Error: {:#}", e),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn metadata() {
        let scanner = SshScanner;
        assert_eq!(scanner.name(), "ssh");
        assert_eq!(scanner.supported_auth(), &["basic", "sshkey"]);
        assert_eq!(scanner.auth_examples().len(), 2);
    }

    #[test]
    fn default_port_is_applied() {
        assert_eq!(host_with_port("10.0.0.1", DEFAULT_PORT), "10.0.0.1:22");
        assert_eq!(host_with_port("10.0.0.1:2222", DEFAULT_PORT), "10.0.0.1:2222");
    }

    #[test]
    fn unreachable_target_yields_one_failure() {
        let (tx, rx) = unbounded();
        let cred = Credential::new("basic", "root", "toor");
        SshScanner.scan("127.0.0.1:1", "", &cred, Duration::from_millis(500), &tx);
        drop(tx);

        let results: Vec<ScanResult> = rx.iter().collect();
        assert_eq!(results.len(), 1);
        assert!(!results[0].status);
        assert!(results[0].message.contains("127.0.0.1:1"));
        assert!(results[0].output.is_empty());
    }

    #[test]
    fn unknown_auth_kind_is_rejected() {
        let scanner = SshScanner;
        let session = Session::new().unwrap();
        let cred = Credential::new("token", "root", "abc");
        let err = scanner.authenticate(&session, &cred).unwrap_err();
        assert!(err.to_string().contains("unsupported auth type"));
    }
}

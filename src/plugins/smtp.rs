// src/plugins/smtp.rs
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::debug;

use super::{open_tcp, Credential, ScanResult, Scanner};
use crate::common::utils::host_with_port;

pub const DEFAULT_PORT: u16 = 25;

pub struct SmtpScanner;

/// SMTP 是行协议, 读写分离以便 BufReader 按行消费应答。
struct SmtpStream {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl SmtpStream {
    fn open(addr: &str, timeout: Duration) -> Result<Self> {
        let stream = open_tcp(addr, timeout)?;
        let writer = stream.try_clone().context("cloning smtp stream failed")?;
        Ok(SmtpStream {
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\r\n")?;
        Ok(())
    }

    /// 读完一组应答, 跳过 "250-" 式续行, 返回末行应答码与全文。
    fn read_reply(&mut self) -> Result<(u16, String)> {
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                bail!("connection closed by server");
            }
            let line = line.trim_end();
            match parse_reply_line(line) {
                Some((code, true)) => {
                    debug!("smtp continuation {} {}", code, line);
                }
                Some((code, false)) => return Ok((code, line.to_string())),
                None => bail!("malformed smtp reply: {}", line),
            }
        }
    }
}

/// 单行应答解析为 (应答码, 是否续行)。
fn parse_reply_line(line: &str) -> Option<(u16, bool)> {
    let code = line.get(..3)?.parse::<u16>().ok()?;
    match line.as_bytes().get(3) {
        Some(b'-') => Some((code, true)),
        Some(b' ') | None => Some((code, false)),
        Some(_) => None,
    }
}

/// AUTH PLAIN 的凭据串: base64("\0account\0password")。
fn plain_token(account: &str, password: &str) -> String {
    STANDARD.encode(format!("\0{}\0{}", account, password))
}

impl SmtpScanner {
    fn try_login(&self, addr: &str, cred: &Credential, timeout: Duration) -> Result<()> {
        let mut smtp = SmtpStream::open(addr, timeout)?;

        let (code, line) = smtp.read_reply().context("reading smtp greeting failed")?;
        if code != 220 {
            bail!("unexpected greeting: {}", line);
        }

        smtp.send_line("EHLO credscan.local")?;
        let (code, line) = smtp.read_reply()?;
        if code != 250 {
            bail!("EHLO rejected: {}", line);
        }

        smtp.send_line(&format!(
            "AUTH PLAIN {}",
            plain_token(&cred.account, &cred.auth_data)
        ))?;
        let (code, line) = smtp.read_reply()?;
        let _ = smtp.send_line("QUIT");

        match code {
            235 => Ok(()),
            535 => Err(anyhow!("authentication failed: {}", line)),
            _ => Err(anyhow!("unexpected reply to AUTH: {}", line)),
        }
    }
}

impl Scanner for SmtpScanner {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn description(&self) -> &'static str {
        "Simple Mail Transfer Protocol (SMTP)"
    }

    fn supported_auth(&self) -> &'static [&'static str] {
        &["basic"]
    }

    fn auth_examples(&self) -> &'static [(&'static str, &'static str)] {
        &[("basic", "USERNAME,PASSWORD")]
    }

    fn attempt(
        &self,
        target: &str,
        command: &str,
        cred: &Credential,
        timeout: Duration,
    ) -> ScanResult {
        let addr = host_with_port(target, DEFAULT_PORT);
        debug!("smtp attempt on {} as {}", addr, cred.account);
        if cred.kind != "basic" {
            return ScanResult::failure(
                &addr,
                cred,
                format!("unsupported auth type: {}", cred.kind),
            );
        }
        if !command.is_empty() {
            debug!("smtp does not execute remote commands, ignoring -c");
        }

        match self.try_login(&addr, cred, timeout) {
            Ok(()) => ScanResult::success(&addr, cred, "Successfully connected"),
            Err(e) => ScanResult::failure(&addr, cred, format!("{:#}", e)),
        }
    }
}

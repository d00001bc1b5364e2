// src/plugins/ldap.rs
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::debug;

use super::{open_tcp, Credential, ScanResult, Scanner};
use crate::common::utils::host_with_port;

pub const DEFAULT_PORT: u16 = 389;

const RESULT_SUCCESS: u32 = 0;
const RESULT_INVALID_CREDENTIALS: u32 = 49;

pub struct LdapScanner;

/// BER 长度域: 128 以内短格式, 否则 0x8N 前缀的长格式。
fn ber_len(len: usize) -> Vec<u8> {
    if len < 128 {
        return vec![len as u8];
    }
    let mut bytes = Vec::new();
    let mut value = len;
    while value > 0 {
        bytes.insert(0, (value & 0xff) as u8);
        value >>= 8;
    }
    let mut out = vec![0x80 | bytes.len() as u8];
    out.extend(bytes);
    out
}

fn ber_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend(ber_len(content.len()));
    out.extend_from_slice(content);
    out
}

/// LDAPv3 简单绑定请求, messageID 固定为 1。
fn build_simple_bind(account: &str, password: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend(ber_tlv(0x02, &[0x03])); // version 3
    body.extend(ber_tlv(0x04, account.as_bytes())); // bind DN
    body.extend(ber_tlv(0x80, password.as_bytes())); // simple 认证选项 [0]

    let mut msg = Vec::new();
    msg.extend(ber_tlv(0x02, &[0x01])); // messageID
    msg.extend(ber_tlv(0x60, &body)); // [APPLICATION 0] BindRequest
    ber_tlv(0x30, &msg)
}

/// UnbindRequest, messageID 2, 礼貌收尾不等应答。
fn build_unbind() -> Vec<u8> {
    let mut msg = Vec::new();
    msg.extend(ber_tlv(0x02, &[0x02]));
    msg.extend(ber_tlv(0x42, &[])); // [APPLICATION 2] null
    ber_tlv(0x30, &msg)
}

struct BerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BerReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BerReader { data, pos: 0 }
    }

    fn read_tlv(&mut self) -> Result<(u8, &'a [u8])> {
        let tag = *self
            .data
            .get(self.pos)
            .ok_or_else(|| anyhow!("truncated BER element"))?;
        self.pos += 1;

        let first = *self
            .data
            .get(self.pos)
            .ok_or_else(|| anyhow!("truncated BER length"))?;
        self.pos += 1;
        let len = if first & 0x80 == 0 {
            first as usize
        } else {
            let count = (first & 0x7f) as usize;
            if count == 0 || count > 4 {
                bail!("unsupported BER length encoding");
            }
            let mut len = 0usize;
            for _ in 0..count {
                let byte = *self
                    .data
                    .get(self.pos)
                    .ok_or_else(|| anyhow!("truncated BER length"))?;
                self.pos += 1;
                len = (len << 8) | byte as usize;
            }
            len
        };

        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| anyhow!("BER length {} exceeds message", len))?;
        let content = &self.data[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }
}

/// 从 LDAPMessage 里剥出 BindResponse 的 resultCode。
fn parse_bind_result(data: &[u8]) -> Result<u32> {
    let mut outer = BerReader::new(data);
    let (tag, message) = outer.read_tlv()?;
    if tag != 0x30 {
        bail!("not an LDAPMessage (tag 0x{:02X})", tag);
    }

    let mut message = BerReader::new(message);
    let (tag, _) = message.read_tlv()?;
    if tag != 0x02 {
        bail!("missing messageID");
    }
    let (tag, response) = message.read_tlv()?;
    if tag != 0x61 {
        bail!("not a BindResponse (tag 0x{:02X})", tag);
    }

    let mut response = BerReader::new(response);
    let (tag, code) = response.read_tlv()?;
    if tag != 0x0a {
        bail!("missing resultCode");
    }
    Ok(code.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
}

/// 按外层 TLV 声明的长度读完整的一条 BER 消息。
fn read_ber_message(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head)?;
    let mut msg = head.to_vec();

    let content_len = if head[1] & 0x80 == 0 {
        head[1] as usize
    } else {
        let count = (head[1] & 0x7f) as usize;
        if count == 0 || count > 4 {
            bail!("unsupported BER length encoding");
        }
        let mut ext = vec![0u8; count];
        stream.read_exact(&mut ext)?;
        msg.extend_from_slice(&ext);
        ext.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
    };
    if content_len > 0x10000 {
        bail!("unreasonable LDAP message length {}", content_len);
    }

    let mut content = vec![0u8; content_len];
    stream.read_exact(&mut content)?;
    msg.extend(content);
    Ok(msg)
}

impl LdapScanner {
    fn try_bind(&self, addr: &str, cred: &Credential, timeout: Duration) -> Result<()> {
        let mut stream = open_tcp(addr, timeout)?;

        stream
            .write_all(&build_simple_bind(&cred.account, &cred.auth_data))
            .context("sending bind request failed")?;
        let reply = read_ber_message(&mut stream).context("reading bind response failed")?;

        let code = parse_bind_result(&reply)?;
        let _ = stream.write_all(&build_unbind());

        match code {
            RESULT_SUCCESS => Ok(()),
            RESULT_INVALID_CREDENTIALS => Err(anyhow!("authentication failed (invalid credentials)")),
            other => Err(anyhow!("bind failed (result code {})", other)),
        }
    }
}

impl Scanner for LdapScanner {
    fn name(&self) -> &'static str {
        "ldap"
    }

    fn description(&self) -> &'static str {
        "Lightweight Directory Access Protocol (LDAP)"
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
        debug!("ldap attempt on {} as {}", addr, cred.account);
        if cred.kind != "basic" {
            return ScanResult::failure(
                &addr,
                cred,
                format!("unsupported auth type: {}", cred.kind),
            );
        }
        if !command.is_empty() {
            debug!("ldap does not execute remote commands, ignoring -c");
        }

        match self.try_bind(&addr, cred, timeout) {
            Ok(()) => ScanResult::success(&addr, cred, "Successfully bound to directory"),
            Err(e) => ScanResult::failure(&addr, cred, format!("{:#}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn metadata() {
        let scanner = LdapScanner;
        assert_eq!(scanner.name(), "ldap");
        assert_eq!(scanner.supported_auth(), &["basic"]);
    }

    #[test]
    fn bind_request_encodes_exactly() {
        let expected: Vec<u8> = vec![
            0x30, 0x17, // LDAPMessage
            0x02, 0x01, 0x01, // messageID 1
            0x60, 0x12, // BindRequest
            0x02, 0x01, 0x03, // version 3
            0x04, 0x05, b'a', b'd', b'm', b'i', b'n', // DN
            0x80, 0x06, b's', b'e', b'c', b'r', b'e', b't', // simple
        ];
        assert_eq!(build_simple_bind("admin", "secret"), expected);
    }

    #[test]
    fn long_form_length_for_large_password() {
        assert_eq!(ber_len(5), vec![0x05]);
        assert_eq!(ber_len(127), vec![0x7f]);
        assert_eq!(ber_len(128), vec![0x81, 0x80]);
        assert_eq!(ber_len(300), vec![0x82, 0x01, 0x2c]);

        let bind = build_simple_bind("admin", &"x".repeat(300));
        let mut reader = BerReader::new(&bind);
        let (tag, content) = reader.read_tlv().unwrap();
        assert_eq!(tag, 0x30);
        assert!(content.len() > 300);
        // 外层长度域恰好覆盖整条消息
        assert_eq!(reader.pos, bind.len());
    }

    #[test]
    fn bind_response_result_codes_parse() {
        // resultCode 0, 空 matchedDN 和 diagnosticMessage
        let ok: Vec<u8> = vec![
            0x30, 0x0c, 0x02, 0x01, 0x01, 0x61, 0x07, 0x0a, 0x01, 0x00, 0x04, 0x00, 0x04, 0x00,
        ];
        assert_eq!(parse_bind_result(&ok).unwrap(), 0);

        let invalid: Vec<u8> = vec![
            0x30, 0x0c, 0x02, 0x01, 0x01, 0x61, 0x07, 0x0a, 0x01, 0x31, 0x04, 0x00, 0x04, 0x00,
        ];
        assert_eq!(parse_bind_result(&invalid).unwrap(), 49);
    }

    #[test]
    fn truncated_response_is_an_error() {
        assert!(parse_bind_result(&[0x30, 0x20, 0x02]).is_err());
        assert!(parse_bind_result(&[]).is_err());
    }

    #[test]
    fn unreachable_target_yields_one_failure() {
        let (tx, rx) = unbounded();
        let cred = Credential::new("basic", "cn=admin", "secret");
        LdapScanner.scan("127.0.0.1:1", "", &cred, Duration::from_millis(500), &tx);
        drop(tx);

        let results: Vec<ScanResult> = rx.iter().collect();
        assert_eq!(results.len(), 1);
        assert!(!results[0].status);
    }
}

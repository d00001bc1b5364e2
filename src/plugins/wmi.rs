// src/plugins/wmi.rs
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use log::debug;

use super::{ntlm, open_tcp, Credential, ScanResult, Scanner};
use crate::common::utils::host_with_port;

pub const DEFAULT_PORT: u16 = 135;

const PTYPE_REQUEST: u8 = 0;
const PTYPE_RESPONSE: u8 = 2;
const PTYPE_FAULT: u8 = 3;
const PTYPE_BIND: u8 = 11;
const PTYPE_BIND_ACK: u8 = 12;
const PTYPE_AUTH3: u8 = 16;

const AUTH_TYPE_NTLMSSP: u8 = 10;
const AUTH_LEVEL_CONNECT: u8 = 2;

const EPT_LOOKUP_OPNUM: u16 = 2;
const FAULT_ACCESS_DENIED: u32 = 0x0000_0005;

// 端点映射器接口 e1af8308-5d1f-11c9-91a4-08002b14a0fa v3.0, 前三段小端
const EPM_UUID: [u8; 16] = [
    0x08, 0x83, 0xaf, 0xe1, 0x1f, 0x5d, 0xc9, 0x11, 0x91, 0xa4, 0x08, 0x00, 0x2b, 0x14, 0xa0,
    0xfa,
];
// NDR 传输语法 8a885d04-1ceb-11c9-9fe8-08002b104860 v2.0
const NDR32_UUID: [u8; 16] = [
    0x04, 0x5d, 0x88, 0x8a, 0xeb, 0x1c, 0xc9, 0x11, 0x9f, 0xe8, 0x08, 0x00, 0x2b, 0x10, 0x48,
    0x60,
];

pub struct WmiScanner;

/// 16 字节 DCERPC 包头, 版本 5.0, 小端 NDR。
fn dcerpc_header(ptype: u8, frag_len: u16, auth_len: u16, call_id: u32) -> Vec<u8> {
    let mut h = Vec::with_capacity(16);
    h.push(5);
    h.push(0);
    h.push(ptype);
    h.push(0x03); // first frag | last frag
    h.extend_from_slice(&[0x10, 0x00, 0x00, 0x00]); // drep: 小端
    h.extend_from_slice(&frag_len.to_le_bytes());
    h.extend_from_slice(&auth_len.to_le_bytes());
    h.extend_from_slice(&call_id.to_le_bytes());
    h
}

/// bind 请求体: 单个表示上下文, EPM 接口加 NDR32 传输语法。
fn build_bind_body() -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&5840u16.to_le_bytes()); // max xmit frag
    b.extend_from_slice(&5840u16.to_le_bytes()); // max recv frag
    b.extend_from_slice(&0u32.to_le_bytes()); // assoc group
    b.push(1); // 上下文数量
    b.push(0);
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes()); // context id 0
    b.push(1); // 传输语法数量
    b.push(0);
    b.extend_from_slice(&EPM_UUID);
    b.extend_from_slice(&3u16.to_le_bytes()); // 接口主版本
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&NDR32_UUID);
    b.extend_from_slice(&2u16.to_le_bytes()); // 语法版本
    b.extend_from_slice(&0u16.to_le_bytes());
    b
}

/// connect 级认证尾: 8 字节描述加 NTLMSSP 令牌。
fn auth_trailer(token: &[u8]) -> Vec<u8> {
    let mut t = Vec::with_capacity(8 + token.len());
    t.push(AUTH_TYPE_NTLMSSP);
    t.push(AUTH_LEVEL_CONNECT);
    t.push(0); // pad
    t.push(0); // reserved
    t.extend_from_slice(&0u32.to_le_bytes()); // auth context id
    t.extend_from_slice(token);
    t
}

/// 组装完整 PDU, auth_len 只计令牌本身。
fn build_pdu(ptype: u8, call_id: u32, body: &[u8], auth_token: Option<&[u8]>) -> Vec<u8> {
    let trailer = auth_token.map(auth_trailer);
    let trailer_len = trailer.as_ref().map_or(0, |t| t.len());
    let auth_len = auth_token.map_or(0, |t| t.len());
    let frag_len = 16 + body.len() + trailer_len;

    let mut pdu = dcerpc_header(ptype, frag_len as u16, auth_len as u16, call_id);
    pdu.extend_from_slice(body);
    if let Some(t) = trailer {
        pdu.extend_from_slice(&t);
    }
    pdu
}

/// ept_lookup 请求体: 40 字节 NDR 桩, 空句柄查一条注册项。
fn build_lookup_body() -> Vec<u8> {
    let mut stub = Vec::with_capacity(40);
    stub.extend_from_slice(&0u32.to_le_bytes()); // inquiry_type: 全部
    stub.extend_from_slice(&0u32.to_le_bytes()); // object: null 指针
    stub.extend_from_slice(&0u32.to_le_bytes()); // interface: null 指针
    stub.extend_from_slice(&0u32.to_le_bytes()); // vers_option
    stub.extend_from_slice(&[0u8; 20]); // entry handle
    stub.extend_from_slice(&1u32.to_le_bytes()); // max_ents

    let mut b = Vec::with_capacity(8 + stub.len());
    b.extend_from_slice(&(stub.len() as u32).to_le_bytes()); // alloc hint
    b.extend_from_slice(&0u16.to_le_bytes()); // context id
    b.extend_from_slice(&EPT_LOOKUP_OPNUM.to_le_bytes());
    b.extend_from_slice(&stub);
    b
}

/// 按头部 frag_len 读一条 PDU, 返回 (类型, 头后内容)。
fn read_pdu(stream: &mut TcpStream) -> Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 16];
    stream.read_exact(&mut header)?;
    if header[0] != 5 {
        bail!("not a DCERPC response");
    }
    let ptype = header[2];
    let frag_len = u16::from_le_bytes([header[8], header[9]]) as usize;
    if frag_len < 16 {
        bail!("unreasonable DCERPC fragment length {}", frag_len);
    }
    let mut rest = vec![0u8; frag_len - 16];
    stream.read_exact(&mut rest)?;
    Ok((ptype, rest))
}

/// fault 体里偏移 8 处的状态码。
fn fault_status(body: &[u8]) -> u32 {
    match body.get(8..12) {
        Some(bytes) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        None => 0,
    }
}

impl WmiScanner {
    fn try_auth(&self, addr: &str, cred: &Credential, timeout: Duration) -> Result<()> {
        let (domain, user) = ntlm::split_domain_account(&cred.account);
        // 凭据列为 "PASSWORD" 或 "PASSWORD,HASH", 口令在前
        let password = cred
            .auth_data
            .split_once(',')
            .map_or(cred.auth_data.as_str(), |(password, _)| password);

        let mut stream = open_tcp(addr, timeout)?;

        // bind 携带 NTLM 协商, bind_ack 带回挑战
        stream.write_all(&build_pdu(
            PTYPE_BIND,
            1,
            &build_bind_body(),
            Some(&ntlm::build_negotiate()),
        ))?;
        let (ptype, body) = read_pdu(&mut stream)?;
        if ptype != PTYPE_BIND_ACK {
            bail!("endpoint mapper rejected bind (pdu type {})", ptype);
        }
        let challenge = ntlm::parse_challenge(&body)?;

        // AUTH3 无应答, 紧跟的请求见认证结果
        let token = ntlm::build_authenticate(user, domain, password, &challenge)?;
        stream.write_all(&build_pdu(PTYPE_AUTH3, 1, &[0u8; 4], Some(&token)))?;

        stream.write_all(&build_pdu(PTYPE_REQUEST, 2, &build_lookup_body(), None))?;
        match read_pdu(&mut stream)? {
            (PTYPE_RESPONSE, _) => Ok(()),
            (PTYPE_FAULT, body) => {
                let status = fault_status(&body);
                if status == FAULT_ACCESS_DENIED {
                    Err(anyhow!("authentication failed (access denied)"))
                } else {
                    Err(anyhow!("rpc fault 0x{:08X}", status))
                }
            }
            (other, _) => Err(anyhow!("unexpected pdu type {}", other)),
        }
    }
}

impl Scanner for WmiScanner {
    fn name(&self) -> &'static str {
        "wmi"
    }

    fn description(&self) -> &'static str {
        "Windows Management Instrumentation (WMI)"
    }

    fn supported_auth(&self) -> &'static [&'static str] {
        &["basic"]
    }

    fn auth_examples(&self) -> &'static [(&'static str, &'static str)] {
        &[("basic", "DOMAIN\\USERNAME,PASSWORD,HASH")]
    }

    fn attempt(
        &self,
        target: &str,
        command: &str,
        cred: &Credential,
        timeout: Duration,
    ) -> ScanResult {
        let addr = host_with_port(target, DEFAULT_PORT);
        debug!("wmi attempt on {} as {}", addr, cred.account);
        if cred.kind != "basic" {
            return ScanResult::failure(
                &addr,
                cred,
                format!("unsupported auth type: {}", cred.kind),
            );
        }
        if !command.is_empty() {
            debug!("wmi does not execute remote commands, ignoring -c");
        }

        match self.try_auth(&addr, cred, timeout) {
            Ok(()) => ScanResult::success(&addr, cred, "Successfully connected"),
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
        let scanner = WmiScanner;
        assert_eq!(scanner.name(), "wmi");
        assert_eq!(
            scanner.auth_examples(),
            &[("basic", "DOMAIN\\USERNAME,PASSWORD,HASH")]
        );
    }

    #[test]
    fn header_carries_lengths_and_call_id() {
        let h = dcerpc_header(PTYPE_BIND, 120, 32, 7);
        assert_eq!(h.len(), 16);
        assert_eq!(h[0], 5);
        assert_eq!(h[2], PTYPE_BIND);
        assert_eq!(h[4], 0x10);
        assert_eq!(u16::from_le_bytes([h[8], h[9]]), 120);
        assert_eq!(u16::from_le_bytes([h[10], h[11]]), 32);
        assert_eq!(u32::from_le_bytes([h[12], h[13], h[14], h[15]]), 7);
    }

    #[test]
    fn bind_pdu_accounts_for_auth_trailer() {
        let token = ntlm::build_negotiate();
        let pdu = build_pdu(PTYPE_BIND, 1, &build_bind_body(), Some(&token));

        let frag_len = u16::from_le_bytes([pdu[8], pdu[9]]) as usize;
        let auth_len = u16::from_le_bytes([pdu[10], pdu[11]]) as usize;
        assert_eq!(frag_len, pdu.len());
        assert_eq!(auth_len, token.len());
        // 尾部即认证令牌
        assert_eq!(&pdu[pdu.len() - token.len()..], token.as_slice());
        assert_eq!(pdu[pdu.len() - token.len() - 8], AUTH_TYPE_NTLMSSP);
    }

    #[test]
    fn bind_body_lists_epm_interface() {
        let b = build_bind_body();
        // 偏移 12 起: context id, 语法数, EPM UUID
        assert_eq!(&b[16..32], &EPM_UUID);
        assert_eq!(u16::from_le_bytes([b[32], b[33]]), 3);
        assert_eq!(&b[36..52], &NDR32_UUID);
    }

    #[test]
    fn lookup_stub_is_40_bytes() {
        let b = build_lookup_body();
        assert_eq!(b.len(), 8 + 40);
        assert_eq!(u32::from_le_bytes([b[0], b[1], b[2], b[3]]), 40);
        assert_eq!(u16::from_le_bytes([b[6], b[7]]), EPT_LOOKUP_OPNUM);
        // max_ents 1 收尾
        assert_eq!(&b[b.len() - 4..], &[1, 0, 0, 0]);
    }

    #[test]
    fn fault_status_reads_offset_8() {
        let mut body = vec![0u8; 16];
        body[8..12].copy_from_slice(&FAULT_ACCESS_DENIED.to_le_bytes());
        assert_eq!(fault_status(&body), FAULT_ACCESS_DENIED);
        assert_eq!(fault_status(&[0u8; 4]), 0);
    }

    #[test]
    fn password_and_hash_split_on_first_comma() {
        let auth = "s3cret,aabbccdd";
        assert_eq!(auth.split_once(',').map(|(p, _)| p), Some("s3cret"));
        let bare = "s3cret";
        assert_eq!(bare.split_once(',').map_or(bare, |(p, _)| p), "s3cret");
    }

    #[test]
    fn unreachable_target_yields_one_failure() {
        let (tx, rx) = unbounded();
        let cred = Credential::new("basic", "CORP\\admin", "secret");
        WmiScanner.scan("127.0.0.1:1", "", &cred, Duration::from_millis(500), &tx);
        drop(tx);

        let results: Vec<ScanResult> = rx.iter().collect();
        assert_eq!(results.len(), 1);
        assert!(!results[0].status);
    }
}

// src/plugins/smb.rs
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::debug;

use super::{ntlm, open_tcp, Credential, ScanResult, Scanner};
use crate::common::utils::host_with_port;

pub const DEFAULT_PORT: u16 = 445;

const SMB2_NEGOTIATE: u16 = 0x0000;
const SMB2_SESSION_SETUP: u16 = 0x0001;
const DIALECT_0202: u16 = 0x0202;

const STATUS_SUCCESS: u32 = 0x0000_0000;
const STATUS_MORE_PROCESSING_REQUIRED: u32 = 0xC000_0016;
const STATUS_LOGON_FAILURE: u32 = 0xC000_006D;
const STATUS_ACCOUNT_DISABLED: u32 = 0xC000_0072;
const STATUS_ACCOUNT_LOCKED_OUT: u32 = 0xC000_0234;

pub struct SmbScanner;

/// 64 字节 SMB2 包头。
fn smb2_header(command: u16, message_id: u64, session_id: u64) -> Vec<u8> {
    let mut h = Vec::with_capacity(64);
    h.extend_from_slice(b"\xFESMB");
    h.extend_from_slice(&64u16.to_le_bytes()); // 结构大小
    h.extend_from_slice(&0u16.to_le_bytes()); // credit charge
    h.extend_from_slice(&0u32.to_le_bytes()); // status
    h.extend_from_slice(&command.to_le_bytes());
    h.extend_from_slice(&1u16.to_le_bytes()); // credit request
    h.extend_from_slice(&0u32.to_le_bytes()); // flags
    h.extend_from_slice(&0u32.to_le_bytes()); // next command
    h.extend_from_slice(&message_id.to_le_bytes());
    h.extend_from_slice(&0xFEFFu32.to_le_bytes()); // process id
    h.extend_from_slice(&0u32.to_le_bytes()); // tree id
    h.extend_from_slice(&session_id.to_le_bytes());
    h.extend_from_slice(&[0u8; 16]); // signature
    h
}

/// NEGOTIATE 请求体, 只报 2.0.2 方言。
fn build_negotiate_body() -> Vec<u8> {
    let client_guid: [u8; 16] = rand::random();
    let mut b = Vec::with_capacity(38);
    b.extend_from_slice(&36u16.to_le_bytes()); // 结构大小
    b.extend_from_slice(&1u16.to_le_bytes()); // 方言数
    b.extend_from_slice(&1u16.to_le_bytes()); // security mode: signing enabled
    b.extend_from_slice(&0u16.to_le_bytes()); // reserved
    b.extend_from_slice(&0u32.to_le_bytes()); // capabilities
    b.extend_from_slice(&client_guid);
    b.extend_from_slice(&0u64.to_le_bytes()); // client start time
    b.extend_from_slice(&DIALECT_0202.to_le_bytes());
    b
}

/// SESSION_SETUP 请求体, 安全缓冲区紧跟 24 字节固定部分。
fn build_session_setup_body(token: &[u8]) -> Vec<u8> {
    let mut b = Vec::with_capacity(24 + token.len());
    b.extend_from_slice(&25u16.to_le_bytes()); // 结构大小
    b.push(0); // flags
    b.push(1); // security mode: signing enabled
    b.extend_from_slice(&0u32.to_le_bytes()); // capabilities
    b.extend_from_slice(&0u32.to_le_bytes()); // channel
    b.extend_from_slice(&88u16.to_le_bytes()); // 缓冲区偏移: 64 头 + 24 固定
    b.extend_from_slice(&(token.len() as u16).to_le_bytes());
    b.extend_from_slice(&0u64.to_le_bytes()); // previous session id
    b.extend_from_slice(token);
    b
}

/// 直连 445 用 NetBIOS 会话头封帧: 类型 0x00 加 3 字节大端长度。
fn frame_message(header: &[u8], body: &[u8]) -> Vec<u8> {
    let len = header.len() + body.len();
    let mut packet = Vec::with_capacity(4 + len);
    packet.push(0x00);
    packet.push(((len >> 16) & 0xff) as u8);
    packet.push(((len >> 8) & 0xff) as u8);
    packet.push((len & 0xff) as u8);
    packet.extend_from_slice(header);
    packet.extend_from_slice(body);
    packet
}

fn parse_frame_len(frame: &[u8; 4]) -> usize {
    ((frame[1] as usize) << 16) | ((frame[2] as usize) << 8) | frame[3] as usize
}

fn read_message(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut frame = [0u8; 4];
    stream.read_exact(&mut frame)?;
    let len = parse_frame_len(&frame);
    if len == 0 || len > 0x1_0000 {
        bail!("unreasonable SMB message length {}", len);
    }
    let mut msg = vec![0u8; len];
    stream.read_exact(&mut msg)?;
    Ok(msg)
}

fn smb2_status(msg: &[u8]) -> Result<u32> {
    if msg.len() < 64 || &msg[..4] != b"\xFESMB" {
        bail!("malformed SMB2 response");
    }
    Ok(u32::from_le_bytes(msg[8..12].try_into()?))
}

impl SmbScanner {
    fn try_auth(&self, addr: &str, cred: &Credential, timeout: Duration) -> Result<()> {
        let (domain, user) = ntlm::split_domain_account(&cred.account);
        let mut stream = open_tcp(addr, timeout)?;

        stream
            .write_all(&frame_message(
                &smb2_header(SMB2_NEGOTIATE, 0, 0),
                &build_negotiate_body(),
            ))
            .context("sending negotiate failed")?;
        let reply = read_message(&mut stream).context("reading negotiate response failed")?;
        let status = smb2_status(&reply)?;
        if status != STATUS_SUCCESS {
            bail!("negotiate failed with status 0x{:08X}", status);
        }

        // 第一轮会话建立携带 NTLM 协商, 期待 MORE_PROCESSING_REQUIRED 与挑战
        stream.write_all(&frame_message(
            &smb2_header(SMB2_SESSION_SETUP, 1, 0),
            &build_session_setup_body(&ntlm::build_negotiate()),
        ))?;
        let reply = read_message(&mut stream).context("reading session setup response failed")?;
        let status = smb2_status(&reply)?;
        if status != STATUS_MORE_PROCESSING_REQUIRED {
            bail!("unexpected session setup status 0x{:08X}", status);
        }
        let session_id = u64::from_le_bytes(reply[40..48].try_into()?);
        let challenge = ntlm::parse_challenge(&reply)?;

        // 第二轮带 NTLMv2 应答, 此处见认证结果
        let token = ntlm::build_authenticate(user, domain, &cred.auth_data, &challenge)?;
        stream.write_all(&frame_message(
            &smb2_header(SMB2_SESSION_SETUP, 2, session_id),
            &build_session_setup_body(&token),
        ))?;
        let reply = read_message(&mut stream).context("reading authentication response failed")?;

        match smb2_status(&reply)? {
            STATUS_SUCCESS => Ok(()),
            STATUS_LOGON_FAILURE => Err(anyhow!("authentication failed (logon failure)")),
            STATUS_ACCOUNT_DISABLED => Err(anyhow!("authentication refused (account disabled)")),
            STATUS_ACCOUNT_LOCKED_OUT => {
                Err(anyhow!("authentication refused (account locked out)"))
            }
            other => Err(anyhow!("session setup failed with status 0x{:08X}", other)),
        }
    }
}

impl Scanner for SmbScanner {
    fn name(&self) -> &'static str {
        "smb"
    }

    fn description(&self) -> &'static str {
        "Server Message Block (SMB)"
    }

    fn supported_auth(&self) -> &'static [&'static str] {
        &["basic"]
    }

    fn auth_examples(&self) -> &'static [(&'static str, &'static str)] {
        &[("basic", "DOMAIN\\USERNAME,PASSWORD")]
    }

    fn attempt(
        &self,
        target: &str,
        command: &str,
        cred: &Credential,
        timeout: Duration,
    ) -> ScanResult {
        let addr = host_with_port(target, DEFAULT_PORT);
        debug!("smb attempt on {} as {}", addr, cred.account);
        if cred.kind != "basic" {
            return ScanResult::failure(
                &addr,
                cred,
                format!("unsupported auth type: {}", cred.kind),
            );
        }
        if !command.is_empty() {
            debug!("smb does not execute remote commands, ignoring -c");
        }

        match self.try_auth(&addr, cred, timeout) {
            Ok(()) => ScanResult::success(&addr, cred, "Successfully connected"),
            Err(e) => ScanResult::failure(&addr, cred, format!("{:#}", e)),
        }
    }
}

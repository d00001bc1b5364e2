// src/plugins/vnc.rs
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};
use des::Des;
use log::debug;

use super::{open_tcp, Credential, ScanResult, Scanner};
use crate::common::utils::host_with_port;

pub const DEFAULT_PORT: u16 = 5900;

const SECURITY_NONE: u8 = 1;
const SECURITY_VNC_AUTH: u8 = 2;

pub struct VncScanner;

/// "RFB 003.008\n" 形式的版本串解析为 (major, minor)。
fn parse_version(banner: &[u8; 12]) -> Result<(u32, u32)> {
    if &banner[..4] != b"RFB " || banner[7] != b'.' || banner[11] != b'\n' {
        bail!("not an RFB server");
    }
    let major = std::str::from_utf8(&banner[4..7])?
        .parse::<u32>()
        .context("malformed RFB major version")?;
    let minor = std::str::from_utf8(&banner[8..11])?
        .parse::<u32>()
        .context("malformed RFB minor version")?;
    Ok((major, minor))
}

/// RFB 的 DES 变体: 口令截断/零填充到 8 字节, 每个密钥字节按位反转,
/// 再对 16 字节挑战按块 ECB 加密。
fn encrypt_challenge(password: &str, challenge: &[u8; 16]) -> [u8; 16] {
    let mut key = [0u8; 8];
    for (slot, byte) in key.iter_mut().zip(password.bytes()) {
        *slot = byte.reverse_bits();
    }

    let cipher = Des::new(GenericArray::from_slice(&key));
    let mut response = *challenge;
    for block in response.chunks_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    response
}

/// 服务器在拒绝与认证失败时附带的原因串。
fn read_reason(stream: &mut TcpStream) -> String {
    let mut len = [0u8; 4];
    if stream.read_exact(&mut len).is_err() {
        return String::from("no reason given");
    }
    let len = (u32::from_be_bytes(len) as usize).min(1024);
    let mut reason = vec![0u8; len];
    if stream.read_exact(&mut reason).is_err() {
        return String::from("no reason given");
    }
    String::from_utf8_lossy(&reason).into_owned()
}

impl VncScanner {
    fn try_auth(&self, addr: &str, password: &str, timeout: Duration) -> Result<&'static str> {
        let mut stream = open_tcp(addr, timeout)?;

        let mut banner = [0u8; 12];
        stream
            .read_exact(&mut banner)
            .context("reading RFB version failed")?;
        let (major, minor) = parse_version(&banner)?;
        if major != 3 {
            bail!("unsupported RFB version {}.{}", major, minor);
        }

        // 以服务器支持的最高已知小版本应答
        let client_version: &[u8] = if minor >= 8 {
            b"RFB 003.008\n"
        } else if minor == 7 {
            b"RFB 003.007\n"
        } else {
            b"RFB 003.003\n"
        };
        stream.write_all(client_version)?;

        let security_type = if minor < 7 {
            // 3.3: 服务器直接指定 u32 类型, 0 表示拒绝
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf)?;
            match u32::from_be_bytes(buf) {
                0 => bail!("server refused connection: {}", read_reason(&mut stream)),
                t => t as u8,
            }
        } else {
            // 3.7+: 服务器给类型列表, 客户端挑一个
            let mut count = [0u8; 1];
            stream.read_exact(&mut count)?;
            if count[0] == 0 {
                bail!("server refused connection: {}", read_reason(&mut stream));
            }
            let mut types = vec![0u8; count[0] as usize];
            stream.read_exact(&mut types)?;

            let chosen = if types.contains(&SECURITY_VNC_AUTH) {
                SECURITY_VNC_AUTH
            } else if types.contains(&SECURITY_NONE) {
                SECURITY_NONE
            } else {
                bail!("no supported security type offered: {:?}", types);
            };
            stream.write_all(&[chosen])?;
            chosen
        };

        match security_type {
            SECURITY_NONE => {
                // 3.8 在 None 下仍回 SecurityResult
                if minor >= 8 {
                    self.read_security_result(&mut stream)?;
                }
                Ok("No authentication required")
            }
            SECURITY_VNC_AUTH => {
                let mut challenge = [0u8; 16];
                stream
                    .read_exact(&mut challenge)
                    .context("reading VNC challenge failed")?;
                stream.write_all(&encrypt_challenge(password, &challenge))?;
                self.read_security_result(&mut stream)?;
                Ok("Successfully connected")
            }
            other => bail!("unsupported security type {}", other),
        }
    }

    fn read_security_result(&self, stream: &mut TcpStream) -> Result<()> {
        let mut buf = [0u8; 4];
        stream
            .read_exact(&mut buf)
            .context("reading security result failed")?;
        match u32::from_be_bytes(buf) {
            0 => Ok(()),
            _ => Err(anyhow!("authentication failed: {}", read_reason(stream))),
        }
    }
}

impl Scanner for VncScanner {
    fn name(&self) -> &'static str {
        "vnc"
    }

    fn description(&self) -> &'static str {
        "Virtual Network Computing (VNC)"
    }

    fn supported_auth(&self) -> &'static [&'static str] {
        &["basic"]
    }

    fn auth_examples(&self) -> &'static [(&'static str, &'static str)] {
        // VNC 认证只有口令, 账号列留空
        &[("basic", ",PASSWORD")]
    }

    fn attempt(
        &self,
        target: &str,
        command: &str,
        cred: &Credential,
        timeout: Duration,
    ) -> ScanResult {
        let addr = host_with_port(target, DEFAULT_PORT);
        debug!("vnc attempt on {}", addr);
        if cred.kind != "basic" {
            return ScanResult::failure(
                &addr,
                cred,
                format!("unsupported auth type: {}", cred.kind),
            );
        }
        if !command.is_empty() {
            debug!("vnc does not execute remote commands, ignoring -c");
        }

        match self.try_auth(&addr, &cred.auth_data, timeout) {
            Ok(message) => ScanResult::success(&addr, cred, message),
            Err(e) => ScanResult::failure(&addr, cred, format!("{:#}", e)),
        }
    }
}

// src/plugins/ntlm.rs
//! NTLMSSP 消息构造与解析, SMB 与 WMI 的会话认证共用。
//! NTLMv2 应答按 MS-NLMP 3.3.2 计算。

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;

type HmacMd5 = Hmac<Md5>;

pub const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SECURITY: u32 = 0x0008_0000;

pub const DEFAULT_FLAGS: u32 = NEGOTIATE_UNICODE
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SECURITY;

/// 秒级 Unix 时间换算为 Windows FILETIME (1601 年起的 100ns 计数)。
const EPOCH_DELTA_SECS: u64 = 11_644_473_600;

/// DOMAIN\user 形式拆成 (域, 用户), 无域时域为空。
pub fn split_domain_account(account: &str) -> (&str, &str) {
    match account.split_once('\\') {
        Some((domain, user)) => (domain, user),
        None => ("", account),
    }
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}

/// NT 哈希: MD4(UTF-16LE(password))。
pub fn nt_hash(password: &str) -> [u8; 16] {
    let digest = Md4::digest(utf16le(password));
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

fn hmac_md5(key: &[u8], data: &[u8]) -> Result<[u8; 16]> {
    let mut mac =
        HmacMd5::new_from_slice(key).map_err(|_| anyhow!("invalid hmac key length"))?;
    mac.update(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// NTLMv2 密钥: HMAC-MD5(NT 哈希, UTF-16LE(大写用户名 + 域))。
fn ntlmv2_hash(user: &str, domain: &str, password: &str) -> Result<[u8; 16]> {
    let key = nt_hash(password);
    let mut identity = user.to_uppercase();
    identity.push_str(domain);
    hmac_md5(&key, &utf16le(&identity))
}

fn filetime_now() -> u64 {
    let unix = Utc::now().timestamp().max(0) as u64;
    (unix + EPOCH_DELTA_SECS) * 10_000_000
}

/// Type 1 协商消息, 域与工作站缓冲区留空。
pub fn build_negotiate() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&1u32.to_le_bytes());
    msg.extend_from_slice(&DEFAULT_FLAGS.to_le_bytes());
    msg.extend_from_slice(&[0u8; 8]);
    msg.extend_from_slice(&[0u8; 8]);
    msg
}

/// Type 2 消息里我们需要的部分。
pub struct Challenge {
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
    pub flags: u32,
}

/// 在包裹层(SPNEGO 或安全缓冲区)里定位 NTLMSSP 签名。
pub fn find_signature(data: &[u8]) -> Option<usize> {
    data.windows(SIGNATURE.len()).position(|w| w == SIGNATURE)
}

/// 从服务器应答中剥出 Type 2 挑战。
pub fn parse_challenge(data: &[u8]) -> Result<Challenge> {
    let start =
        find_signature(data).ok_or_else(|| anyhow!("no NTLMSSP token in server response"))?;
    let msg = &data[start..];
    if msg.len() < 48 {
        bail!("NTLM challenge message too short ({} bytes)", msg.len());
    }

    let msg_type = u32::from_le_bytes(msg[8..12].try_into()?);
    if msg_type != 2 {
        bail!("unexpected NTLM message type {}", msg_type);
    }

    let flags = u32::from_le_bytes(msg[20..24].try_into()?);
    let mut server_challenge = [0u8; 8];
    server_challenge.copy_from_slice(&msg[24..32]);

    let ti_len = u16::from_le_bytes(msg[40..42].try_into()?) as usize;
    let ti_off = u32::from_le_bytes(msg[44..48].try_into()?) as usize;
    let target_info = match ti_off.checked_add(ti_len) {
        Some(end) if ti_len > 0 && end <= msg.len() => msg[ti_off..end].to_vec(),
        _ => Vec::new(),
    };

    Ok(Challenge {
        server_challenge,
        target_info,
        flags,
    })
}

/// Type 3 认证消息, NTLMv2 应答加 LMv2 应答。
pub fn build_authenticate(
    user: &str,
    domain: &str,
    password: &str,
    challenge: &Challenge,
) -> Result<Vec<u8>> {
    let key = ntlmv2_hash(user, domain, password)?;
    let client_nonce: [u8; 8] = rand::random();
    let timestamp = filetime_now();

    // NTLMv2 blob: 版本 + 时间戳 + 客户端随机数 + 服务器 target info
    let mut blob = Vec::with_capacity(32 + challenge.target_info.len());
    blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(&client_nonce);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&challenge.target_info);
    blob.extend_from_slice(&[0u8; 4]);

    let mut proof_input = Vec::with_capacity(8 + blob.len());
    proof_input.extend_from_slice(&challenge.server_challenge);
    proof_input.extend_from_slice(&blob);
    let nt_proof = hmac_md5(&key, &proof_input)?;

    let mut nt_response = Vec::with_capacity(16 + blob.len());
    nt_response.extend_from_slice(&nt_proof);
    nt_response.extend_from_slice(&blob);

    let mut lm_input = [0u8; 16];
    lm_input[..8].copy_from_slice(&challenge.server_challenge);
    lm_input[8..].copy_from_slice(&client_nonce);
    let lm_proof = hmac_md5(&key, &lm_input)?;
    let mut lm_response = Vec::with_capacity(24);
    lm_response.extend_from_slice(&lm_proof);
    lm_response.extend_from_slice(&client_nonce);

    let domain_bytes = utf16le(domain);
    let user_bytes = utf16le(user);
    let workstation = utf16le("CREDSCAN");

    // 头 64 字节: 签名, 类型, 六个安全缓冲区描述, 标志
    let mut offset = 64usize;
    let mut msg = Vec::new();
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&3u32.to_le_bytes());
    for len in [
        lm_response.len(),
        nt_response.len(),
        domain_bytes.len(),
        user_bytes.len(),
        workstation.len(),
        0, // session key
    ] {
        msg.extend_from_slice(&(len as u16).to_le_bytes());
        msg.extend_from_slice(&(len as u16).to_le_bytes());
        msg.extend_from_slice(&(offset as u32).to_le_bytes());
        offset += len;
    }
    msg.extend_from_slice(&DEFAULT_FLAGS.to_le_bytes());

    // 负载与缓冲区描述同序
    msg.extend_from_slice(&lm_response);
    msg.extend_from_slice(&nt_response);
    msg.extend_from_slice(&domain_bytes);
    msg.extend_from_slice(&user_bytes);
    msg.extend_from_slice(&workstation);
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_account_splitting() {
        assert_eq!(split_domain_account("CORP\\admin"), ("CORP", "admin"));
        assert_eq!(split_domain_account("admin"), ("", "admin"));
        assert_eq!(split_domain_account("CORP\\"), ("CORP", ""));
    }

    #[test]
    fn utf16le_encodes_ascii() {
        assert_eq!(utf16le("ab"), vec![0x61, 0x00, 0x62, 0x00]);
        assert!(utf16le("").is_empty());
    }

    // MS-NLMP 4.2.2.1.2 的样例口令
    #[test]
    fn nt_hash_matches_published_vector() {
        assert_eq!(
            nt_hash("Password"),
            [
                0xa4, 0xf4, 0x9c, 0x40, 0x65, 0x10, 0xbd, 0xca, 0xb6, 0x82, 0x4e, 0xe7, 0xc3,
                0x0f, 0xd8, 0x52
            ]
        );
    }

    // MS-NLMP 4.2.4.1.1: NTOWFv2(Password, User, Domain)
    #[test]
    fn ntlmv2_key_matches_published_vector() {
        assert_eq!(
            ntlmv2_hash("User", "Domain", "Password").unwrap(),
            [
                0x0c, 0x86, 0x8a, 0x40, 0x3b, 0xfd, 0x7a, 0x93, 0xa3, 0x00, 0x1e, 0xf2, 0x2e,
                0xf0, 0x2e, 0x3f
            ]
        );
    }

    #[test]
    fn negotiate_message_layout() {
        let msg = build_negotiate();
        assert_eq!(msg.len(), 32);
        assert_eq!(&msg[..8], SIGNATURE);
        assert_eq!(u32::from_le_bytes(msg[8..12].try_into().unwrap()), 1);
        assert_eq!(
            u32::from_le_bytes(msg[12..16].try_into().unwrap()),
            DEFAULT_FLAGS
        );
    }

    fn sample_type2(target_info: &[u8]) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&2u32.to_le_bytes());
        msg.extend_from_slice(&[0u8; 8]); // target name 缓冲区留空
        msg.extend_from_slice(&0x0008_8205u32.to_le_bytes());
        msg.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        msg.extend_from_slice(&[0u8; 8]); // reserved
        msg.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
        msg.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
        msg.extend_from_slice(&48u32.to_le_bytes());
        msg.extend_from_slice(target_info);
        msg
    }

    fn sample_target_info() -> Vec<u8> {
        // AvId 2 (域名) "DOM" + 终结对
        vec![
            0x02, 0x00, 0x06, 0x00, b'D', 0, b'O', 0, b'M', 0, 0x00, 0x00, 0x00, 0x00,
        ]
    }

    #[test]
    fn challenge_parses_from_raw_message() {
        let ti = sample_target_info();
        let challenge = parse_challenge(&sample_type2(&ti)).unwrap();
        assert_eq!(challenge.server_challenge, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(challenge.target_info, ti);
        assert_eq!(challenge.flags, 0x0008_8205);
    }

    #[test]
    fn challenge_parses_when_wrapped() {
        // 签名前带无关字节, 如 SMB 应答里的 SPNEGO 包装
        let ti = sample_target_info();
        let mut wrapped = vec![0x60, 0x28, 0x06, 0x06, 0x2b, 0x06];
        wrapped.extend(sample_type2(&ti));
        let challenge = parse_challenge(&wrapped).unwrap();
        assert_eq!(challenge.server_challenge, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn challenge_rejects_wrong_type() {
        let ti = sample_target_info();
        let mut msg = sample_type2(&ti);
        msg[8] = 3;
        assert!(parse_challenge(&msg).is_err());
        assert!(parse_challenge(b"no token here").is_err());
    }

    #[test]
    fn authenticate_message_layout() {
        let ti = sample_target_info();
        let challenge = Challenge {
            server_challenge: [9u8; 8],
            target_info: ti.clone(),
            flags: 0x0008_8205,
        };
        let msg = build_authenticate("Admin", "CORP", "hunter2", &challenge).unwrap();

        assert_eq!(&msg[..8], SIGNATURE);
        assert_eq!(u32::from_le_bytes(msg[8..12].try_into().unwrap()), 3);

        // LMv2 应答 24 字节
        let lm_len = u16::from_le_bytes(msg[12..14].try_into().unwrap()) as usize;
        let lm_off = u32::from_le_bytes(msg[16..20].try_into().unwrap()) as usize;
        assert_eq!(lm_len, 24);
        assert_eq!(lm_off, 64);

        // NTLMv2 应答 = 16 字节证明 + blob
        let nt_len = u16::from_le_bytes(msg[20..22].try_into().unwrap()) as usize;
        let nt_off = u32::from_le_bytes(msg[24..28].try_into().unwrap()) as usize;
        assert_eq!(nt_len, 48 + ti.len());
        let nt = &msg[nt_off..nt_off + nt_len];
        assert_eq!(&nt[16..20], &[0x01, 0x01, 0x00, 0x00]);

        // 域与用户名 UTF-16LE 入负载
        let dom_len = u16::from_le_bytes(msg[28..30].try_into().unwrap()) as usize;
        let dom_off = u32::from_le_bytes(msg[32..36].try_into().unwrap()) as usize;
        assert_eq!(&msg[dom_off..dom_off + dom_len], utf16le("CORP").as_slice());

        let user_len = u16::from_le_bytes(msg[36..38].try_into().unwrap()) as usize;
        let user_off = u32::from_le_bytes(msg[40..44].try_into().unwrap()) as usize;
        assert_eq!(
            &msg[user_off..user_off + user_len],
            utf16le("Admin").as_slice()
        );

        // 会话密钥缓冲区为空, 负载总长对得上
        let sk_len = u16::from_le_bytes(msg[52..54].try_into().unwrap());
        assert_eq!(sk_len, 0);
        let ws_len = u16::from_le_bytes(msg[44..46].try_into().unwrap()) as usize;
        assert_eq!(msg.len(), 64 + lm_len + nt_len + dom_len + user_len + ws_len);
    }

    #[test]
    fn filetime_is_past_unix_epoch() {
        // 2020-01-01 的 FILETIME 下界
        assert!(filetime_now() > 132_223_104_000_000_000);
    }
}

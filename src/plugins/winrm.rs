// src/plugins/winrm.rs
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::debug;

use super::{Credential, ScanResult, Scanner};
use crate::common::utils::host_with_port;

pub const DEFAULT_PORT: u16 = 5985;

const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";

pub struct WinrmScanner;

struct WinrmClient {
    client: reqwest::blocking::Client,
    url: String,
    user: String,
    password: String,
}

/// WS-Man 信封, shell_selector 在建 shell 前为空。
fn envelope(action: &str, url: &str, shell_selector: &str, body: &str) -> String {
    format!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:wsman="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd" xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell"><s:Header><wsa:To>{url}</wsa:To><wsman:ResourceURI s:mustUnderstand="true">http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd</wsman:ResourceURI><wsa:ReplyTo><wsa:Address s:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</wsa:Address></wsa:ReplyTo><wsa:Action s:mustUnderstand="true">{action}</wsa:Action><wsman:MaxEnvelopeSize s:mustUnderstand="true">153600</wsman:MaxEnvelopeSize><wsa:MessageID>uuid:{message_id}</wsa:MessageID><wsman:OperationTimeout>PT60S</wsman:OperationTimeout>{shell_selector}</s:Header><s:Body>{body}</s:Body></s:Envelope>"#,
        url = url,
        action = action,
        message_id = message_uuid(),
        shell_selector = shell_selector,
        body = body,
    )
}

fn shell_selector(shell_id: &str) -> String {
    format!(
        r#"<wsman:SelectorSet><wsman:Selector Name="ShellId">{}</wsman:Selector></wsman:SelectorSet>"#,
        shell_id
    )
}

fn message_uuid() -> String {
    let b: [u8; 16] = rand::random();
    format!(
        "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13],
        b[14], b[15]
    )
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// 按 `<前缀:Tag>` 元素或 `Name="Tag"` 属性两种形态取首个标签文本。
fn extract_tag(body: &str, tag: &str) -> Option<String> {
    let patterns = [
        format!(":{}>", tag),
        format!("<{}>", tag),
        format!("\"{}\">", tag),
    ];
    for pattern in &patterns {
        if let Some(start) = body.find(pattern.as_str()) {
            let rest = &body[start + pattern.len()..];
            if let Some(end) = rest.find('<') {
                let value = rest[..end].trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Receive 应答里的全部 Stream 段, base64 原文按出现顺序返回。
fn extract_stream_chunks(body: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = body;
    while let Some(open) = rest.find(":Stream ") {
        let after = &rest[open..];
        let close = match after.find('>') {
            Some(pos) => pos,
            None => break,
        };
        let content = &after[close + 1..];
        let end = match content.find('<') {
            Some(pos) => pos,
            None => break,
        };
        let chunk = content[..end].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        rest = &content[end..];
    }
    chunks
}

impl WinrmClient {
    fn new(addr: &str, cred: &Credential, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("building http client failed")?;
        Ok(WinrmClient {
            client,
            url: format!("http://{}/wsman", addr),
            user: cred.account.clone(),
            password: cred.auth_data.clone(),
        })
    }

    fn post(&self, envelope: String) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .header("Content-Type", "application/soap+xml;charset=UTF-8")
            .body(envelope)
            .send()
            .context("wsman request failed")?;

        let status = response.status();
        let body = response.text().unwrap_or_default();
        if status.as_u16() == 401 {
            bail!("authentication failed (401 unauthorized)");
        }
        if !status.is_success() {
            let fault = extract_tag(&body, "Text").unwrap_or_else(|| String::from("no detail"));
            bail!("wsman request failed with status {}: {}", status, fault);
        }
        Ok(body)
    }

    /// 建 shell 即认证检查, 拿不到 ShellId 视为失败。
    fn create_shell(&self) -> Result<String> {
        let body = "<rsp:Shell><rsp:InputStreams>stdin</rsp:InputStreams><rsp:OutputStreams>stdout stderr</rsp:OutputStreams></rsp:Shell>";
        let reply = self.post(envelope(ACTION_CREATE, &self.url, "", body))?;
        extract_tag(&reply, "ShellId")
            .ok_or_else(|| anyhow!("shell creation response carried no ShellId"))
    }

    fn run_command(&self, shell_id: &str, command: &str) -> Result<String> {
        let body = format!(
            "<rsp:CommandLine><rsp:Command>{}</rsp:Command></rsp:CommandLine>",
            xml_escape(command)
        );
        let reply = self.post(envelope(
            ACTION_COMMAND,
            &self.url,
            &shell_selector(shell_id),
            &body,
        ))?;
        extract_tag(&reply, "CommandId")
            .ok_or_else(|| anyhow!("command response carried no CommandId"))
    }

    /// 轮询 Receive 直到 CommandState 为 Done, 输出流按到达顺序拼接。
    fn receive_output(&self, shell_id: &str, command_id: &str, deadline: Duration) -> Result<String> {
        let started = Instant::now();
        let mut output = String::new();
        loop {
            let body = format!(
                r#"<rsp:Receive><rsp:DesiredStream CommandId="{}">stdout stderr</rsp:DesiredStream></rsp:Receive>"#,
                command_id
            );
            let reply = self.post(envelope(
                ACTION_RECEIVE,
                &self.url,
                &shell_selector(shell_id),
                &body,
            ))?;

            for chunk in extract_stream_chunks(&reply) {
                let decoded = STANDARD
                    .decode(chunk.as_bytes())
                    .context("malformed stream encoding in receive response")?;
                output.push_str(&String::from_utf8_lossy(&decoded));
            }
            if reply.contains("CommandState/Done") {
                return Ok(output);
            }
            if started.elapsed() > deadline {
                bail!("command execution timed out");
            }
        }
    }

    fn signal_terminate(&self, shell_id: &str, command_id: &str) {
        let body = format!(
            r#"<rsp:Signal CommandId="{}"><rsp:Code>{}</rsp:Code></rsp:Signal>"#,
            command_id, SIGNAL_TERMINATE
        );
        let _ = self.post(envelope(
            ACTION_SIGNAL,
            &self.url,
            &shell_selector(shell_id),
            &body,
        ));
    }

    fn delete_shell(&self, shell_id: &str) {
        let _ = self.post(envelope(
            ACTION_DELETE,
            &self.url,
            &shell_selector(shell_id),
            "",
        ));
    }

    fn execute(&self, shell_id: &str, command: &str, deadline: Duration) -> Result<String> {
        let command_id = self.run_command(shell_id, command)?;
        let output = self.receive_output(shell_id, &command_id, deadline);
        self.signal_terminate(shell_id, &command_id);
        output
    }
}

impl Scanner for WinrmScanner {
    fn name(&self) -> &'static str {
        "winrm"
    }

    fn description(&self) -> &'static str {
        "Windows Remote Management (WinRM)"
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
        debug!("winrm attempt on {} as {}", addr, cred.account);
        if cred.kind != "basic" {
            return ScanResult::failure(
                &addr,
                cred,
                format!("unsupported auth type: {}", cred.kind),
            );
        }

        let client = match WinrmClient::new(&addr, cred, timeout) {
            Ok(client) => client,
            Err(e) => return ScanResult::failure(&addr, cred, format!("{:#}", e)),
        };
        let shell_id = match client.create_shell() {
            Ok(id) => id,
            Err(e) => return ScanResult::failure(&addr, cred, format!("{:#}", e)),
        };

        let mut result = ScanResult::success(&addr, cred, "Successfully connected");
        if !command.is_empty() {
            match client.execute(&shell_id, command, timeout) {
                Ok(output) => result.output = output,
                // 执行失败不推翻认证结论, 错误记进输出列
                Err(e) => result.output = format!("Execution Error: {:#}", e),
            }
        }
        client.delete_shell(&shell_id);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn metadata() {
        let scanner = WinrmScanner;
        assert_eq!(scanner.name(), "winrm");
        assert_eq!(scanner.supported_auth(), &["basic"]);
    }

    #[test]
    fn envelope_carries_action_and_selector() {
        let env = envelope(
            ACTION_COMMAND,
            "http://10.0.0.1:5985/wsman",
            &shell_selector("SHELL-1"),
            "<x/>",
        );
        assert!(env.contains(ACTION_COMMAND));
        assert!(env.contains("http://10.0.0.1:5985/wsman"));
        assert!(env.contains(r#"<wsman:Selector Name="ShellId">SHELL-1</wsman:Selector>"#));
        assert!(env.contains("<wsa:MessageID>uuid:"));
        assert!(env.ends_with("<s:Body><x/></s:Body></s:Envelope>"));
    }

    #[test]
    fn message_uuids_are_unique_and_shaped() {
        let a = message_uuid();
        let b = message_uuid();
        assert_eq!(a.len(), 36);
        assert_eq!(a.chars().filter(|&c| c == '-').count(), 4);
        assert_ne!(a, b);
    }

    #[test]
    fn command_text_is_escaped() {
        assert_eq!(
            xml_escape(r#"echo "a<b" & whoami"#),
            "echo &quot;a&lt;b&quot; &amp; whoami"
        );
    }

    #[test]
    fn tag_extraction_handles_element_and_selector_forms() {
        let element = "<rsp:Shell><rsp:ShellId>ABC-123</rsp:ShellId></rsp:Shell>";
        assert_eq!(extract_tag(element, "ShellId").as_deref(), Some("ABC-123"));

        let selector = r#"<w:Selector Name="ShellId">DEF-456</w:Selector>"#;
        assert_eq!(extract_tag(selector, "ShellId").as_deref(), Some("DEF-456"));

        assert_eq!(extract_tag("<other/>", "ShellId"), None);
    }

    #[test]
    fn stream_chunks_extract_in_order() {
        let reply = concat!(
            r#"<rsp:ReceiveResponse>"#,
            r#"<rsp:Stream Name="stdout" CommandId="C1">aGVsbG8=</rsp:Stream>"#,
            r#"<rsp:Stream Name="stderr" CommandId="C1">d29ybGQ=</rsp:Stream>"#,
            r#"<rsp:Stream Name="stdout" CommandId="C1" End="true"/>"#,
            r#"<rsp:CommandState CommandId="C1" State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done"/>"#,
            r#"</rsp:ReceiveResponse>"#,
        );
        assert_eq!(extract_stream_chunks(reply), vec!["aGVsbG8=", "d29ybGQ="]);
        assert!(reply.contains("CommandState/Done"));
    }

    #[test]
    fn unreachable_target_yields_one_failure() {
        let (tx, rx) = unbounded();
        let cred = Credential::new("basic", "admin", "secret");
        WinrmScanner.scan("127.0.0.1:1", "", &cred, Duration::from_millis(500), &tx);
        drop(tx);

        let results: Vec<ScanResult> = rx.iter().collect();
        assert_eq!(results.len(), 1);
        assert!(!results[0].status);
    }
}

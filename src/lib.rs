// src/lib.rs
//! # credscan
//!
//! 多协议网络认证扫描器。给定目标列表和凭据列表, 按选定的枚举策略
//! 生成 (目标, 凭据) 任务流, 由固定大小的工作线程池并发调用协议插件,
//! 结果统一写入控制台和报告文件。
//!
//! ```text
//! credscan -t targets.txt -a creds.txt -P ssh -o report.csv
//! credscan -t targets.txt -a creds.txt -P smb -s deep -T 20 -o report.csv
//! credscan -t targets.txt -a keys.txt -P ssh --auth-type sshkey -c "id" -o report.csv
//! credscan --list-protocols
//! ```
//!
//! 支持的协议: ssh, winrm, smb, ldap, smtp, vnc, wmi。

pub mod cli;
pub mod common;
pub mod engine;
pub mod inputs;
pub mod output;
pub mod plugins;

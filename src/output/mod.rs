// src/output/mod.rs
pub mod report;

/// 把文本里的换行压成字面 "<br>", 先替换 \r\n 再替换残留的 \n,
/// 使远程命令输出在报告里保持一条记录一行。
pub fn flatten_newlines(text: &str) -> String {
    text.replace("\r\n", "<br>").replace('\n', "<br>")
}

// src/inputs/mod.rs
use crossbeam_channel::Receiver;

use crate::plugins::Credential;

pub mod deep;
pub mod random;
pub mod wide;

/// 任务通道容量。生产者最多领先消费者这么多任务,
/// 任意大的 目标×凭据 叉积下内存占用仍然有界。
pub const JOB_BUFFER: usize = 20;

/// 一次扫描任务: 单个目标配单条凭据。每对恰好生成一个 Job。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub target: String,
    pub cred: Credential,
}

/// 枚举策略: 先 add_target/add_cred 填充, 再调用一次 run()。
pub trait Strategy: Send {
    fn description(&self) -> &'static str;

    /// 追加一个目标。只追加, 不去重。
    fn add_target(&mut self, target: String);

    /// 追加一条凭据。只追加, 不去重。
    fn add_cred(&mut self, cred: Credential);

    /// 消费端句柄, 克隆后分发给各工作线程。
    fn jobs(&self) -> Receiver<Job>;

    /// 阻塞发射全部任务, 每对 (目标, 凭据) 恰好一次, 之后返回。
    /// 不关闭通道也不发送完成信号, 终止由调度器的关停协议驱动。
    fn run(&mut self);
}

/// 按名字构建策略, 未知名字返回 None。
pub fn make_strategy(name: &str) -> Option<Box<dyn Strategy>> {
    match name {
        "wide" => Some(Box::new(wide::Wide::new())),
        "deep" => Some(Box::new(deep::Deep::new())),
        "random" => Some(Box::new(random::Random::new())),
        _ => None,
    }
}

//! 定时器调度：重试 / 事务超时 / 步骤超时

pub mod key;
pub mod registry;

pub use key::TimerNamespace;
pub use registry::TimerRegistry;

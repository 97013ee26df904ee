// 该文件是 Kashi （卡识） 项目的一部分。
// src/lifecycle.rs - 宿主生命周期信号
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use tracing::{debug, info};

#[derive(Debug, Default)]
struct Signals {
  suspended: AtomicBool,
  paused: AtomicBool,
  unfocused: AtomicBool,
  disabled: AtomicBool,
  destroyed: AtomicBool,
}

/// 宿主向流水线投递生命周期事件的句柄
///
/// 可以克隆后交给其他线程（例如 Ctrl-C 处理函数），流水线在每个 tick 开始
/// 以及周期内的检查点读取这些标志。
#[derive(Debug, Clone, Default)]
pub struct LifecycleHandle {
  signals: Arc<Signals>,
}

impl LifecycleHandle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn on_pause(&self, paused: bool) {
    debug!("宿主暂停状态: {}", paused);
    self.signals.paused.store(paused, Ordering::SeqCst);
  }

  pub fn on_focus_change(&self, focused: bool) {
    debug!("宿主焦点状态: {}", focused);
    self.signals.unfocused.store(!focused, Ordering::SeqCst);
  }

  pub fn on_enable(&self, enabled: bool) {
    debug!("组件启用状态: {}", enabled);
    self.signals.disabled.store(!enabled, Ordering::SeqCst);
  }

  pub fn on_destroy(&self) {
    info!("收到销毁信号");
    self.signals.destroyed.store(true, Ordering::SeqCst);
  }

  /// 显式挂起请求，与宿主暂停/失焦相互独立
  pub fn suspend(&self) {
    self.signals.suspended.store(true, Ordering::SeqCst);
  }

  pub fn resume(&self) {
    self.signals.suspended.store(false, Ordering::SeqCst);
  }

  pub fn is_destroyed(&self) -> bool {
    self.signals.destroyed.load(Ordering::SeqCst)
  }

  /// 流水线当前是否允许运行
  pub fn should_run(&self) -> bool {
    !(self.signals.suspended.load(Ordering::SeqCst)
      || self.signals.paused.load(Ordering::SeqCst)
      || self.signals.unfocused.load(Ordering::SeqCst)
      || self.signals.disabled.load(Ordering::SeqCst)
      || self.is_destroyed())
  }
}

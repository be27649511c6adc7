// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/task.rs - 逐帧处理循环
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

use std::{
  sync::mpsc::{self, Receiver},
  thread,
  time::{Duration, Instant},
};

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::{
  frame::Frame,
  model::{DetectResult, Model},
  output::{Display, Draw, FrameStats, KeyCommand, Overlay, Snapshot},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 安装 Ctrl-C 处理，收到信号后通道中出现一条消息；
/// 30 秒内未退出则强制结束进程
pub fn interrupt_channel() -> Result<Receiver<()>, ctrlc::Error> {
  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;
  Ok(rx)
}

/// 由相邻两帧的间隔计算瞬时帧率
#[derive(Debug, Clone, Copy)]
pub struct FpsMeter {
  prev: Instant,
}

impl FpsMeter {
  pub fn new(start: Instant) -> Self {
    Self { prev: start }
  }

  pub fn tick(&mut self, now: Instant) -> f64 {
    let interval = now.saturating_duration_since(self.prev).as_secs_f64();
    self.prev = now;
    if interval > 0.0 { 1.0 / interval } else { 0.0 }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSummary {
  pub frames: u64,
  pub detections: u64,
  pub snapshots: u64,
}

/// 实时预览任务：缩放、推理、标注、显示、响应按键
pub struct LiveTask<V> {
  overlay: V,
  draw: Draw,
  snapshot: Snapshot,
  max_side: u32,
  frame_number: Option<u64>,
  interrupt: Option<Receiver<()>>,
}

impl<V: Overlay> LiveTask<V> {
  pub fn new(overlay: V, draw: Draw) -> Self {
    Self {
      overlay,
      draw,
      snapshot: Snapshot::default(),
      max_side: 0,
      frame_number: None,
      interrupt: None,
    }
  }

  pub fn with_snapshot(mut self, snapshot: Snapshot) -> Self {
    self.snapshot = snapshot;
    self
  }

  /// 长边超过 `max_side` 时缩小，0 表示不缩放
  pub fn with_max_side(mut self, max_side: u32) -> Self {
    self.max_side = max_side;
    self
  }

  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number.filter(|n| *n > 0);
    self
  }

  pub fn with_interrupt(mut self, interrupt: Receiver<()>) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  fn interrupted(&self) -> bool {
    self
      .interrupt
      .as_ref()
      .map(|rx| rx.try_recv().is_ok())
      .unwrap_or(false)
  }

  fn save(&self, image: &RgbImage, summary: &mut TaskSummary) {
    match self.snapshot.save(image) {
      Ok(_) => summary.snapshots += 1,
      Err(e) => warn!("保存帧失败: {}", e),
    }
  }
}

impl<V, ME, DE, I, M, O> Task<I, M, O> for LiveTask<V>
where
  V: Overlay,
  ME: std::error::Error + Send + Sync + 'static,
  DE: std::error::Error + Send + Sync + 'static,
  I: Iterator<Item = Frame>,
  M: Model<Input = RgbImage, Output = DetectResult, Error = ME>,
  O: Display<Error = DE>,
{
  type Output = TaskSummary;
  type Error = anyhow::Error;

  fn run_task(mut self, input: I, mut model: M, mut output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let mut summary = TaskSummary::default();
    let mut fps = FpsMeter::new(Instant::now());

    for frame in input {
      if self.interrupted() {
        warn!("中断信号接收，退出任务循环");
        break;
      }

      let frame = frame.fit_within(self.max_side);
      let now = Instant::now();
      let result = model.infer(&frame.image)?;
      let elapsed = now.elapsed();

      let stats = FrameStats {
        index: frame.index,
        fps: fps.tick(Instant::now()),
      };
      debug!(
        "第 {} 帧: {} 个目标，推理耗时 {:.2?}，FPS {:.1}",
        frame.index,
        result.len(),
        elapsed,
        stats.fps
      );

      let mut image = frame.image;
      self.overlay.annotate(&self.draw, &mut image, &result, &stats);
      output.show(&image)?;

      summary.frames += 1;
      summary.detections += result.len() as u64;

      match output.poll_key() {
        Some(KeyCommand::Save) => self.save(&image, &mut summary),
        Some(KeyCommand::Quit) => {
          info!("收到退出命令");
          break;
        }
        None => {}
      }

      if self.frame_number.is_some_and(|n| summary.frames >= n) {
        info!("达到指定帧数 {}, 退出任务循环", summary.frames);
        break;
      }
    }

    info!(
      "任务完成: {} 帧, {} 个目标, {} 张截图",
      summary.frames, summary.detections, summary.snapshots
    );
    Ok(summary)
  }
}

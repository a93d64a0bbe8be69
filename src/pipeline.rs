// 该文件是 Shouwang （守望） 项目的一部分。
// src/pipeline.rs - 检测处理流程
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

//! 读取 → 检测 → 分类 → 坐标映射 → 绘制 → 写出。
//!
//! 状态：`Idle → Loading → {ImagePath | VideoPath} → Done | Failed`。
//! 每一帧完整处理后才读取下一帧，帧来源与视频输出在流程结束时一定被释放。

use std::{
  error::Error as StdError,
  path::{Path, PathBuf},
  time::Instant,
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  classify::FrameResult,
  config::DEFAULT_LIVE_INPUT_SIZE,
  frame::VideoProperties,
  input::{FrameSource, InputError, MediaKind, SourceOpener, VideoSourceOpener, read_image},
  model::Detector,
  normalize::{LiveDownscale, Scale},
  output::{
    FrameSink, SinkError, SinkFactory, SinkSpec, VideoSinkFactory,
    draw::{AnnotationMode, Draw},
    report::{DetectionRecorder, LiveReport},
    save_image,
    transcode::{TranscodeReport, Transcoder},
  },
};

/// 进度日志间隔（帧）
pub const PROGRESS_INTERVAL: u64 = 30;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  Loading,
  ImagePath,
  VideoPath,
  Done,
  Failed,
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("输入文件不存在: {0}")]
  InputNotFound(PathBuf),
  #[error("解码失败: {0}")]
  Decode(#[source] InputError),
  #[error("无法创建视频输出: {0}")]
  SinkCreation(#[source] SinkError),
  #[error("检测器错误: {0}")]
  Detector(#[source] BoxError),
  #[error("输出失败: {0}")]
  Output(#[source] BoxError),
}

impl From<InputError> for PipelineError {
  fn from(err: InputError) -> Self {
    match err {
      InputError::NotFound(path) => PipelineError::InputNotFound(path),
      other => PipelineError::Decode(other),
    }
  }
}

impl PipelineError {
  fn output(err: impl StdError + Send + Sync + 'static) -> Self {
    PipelineError::Output(Box::new(err))
  }
}

/// 一次运行的汇总
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
  pub frames_processed: u64,
  /// 含有至少一个人的帧数
  pub human_frame_count: u64,
  /// 含有至少一只宠物的帧数
  pub pet_alert_count: u64,
  pub total_humans: u64,
  pub total_pets: u64,
  pub output_path: PathBuf,
  pub transcode: Option<TranscodeReport>,
}

impl RunSummary {
  pub fn new(output_path: &Path) -> Self {
    Self {
      frames_processed: 0,
      human_frame_count: 0,
      pet_alert_count: 0,
      total_humans: 0,
      total_pets: 0,
      output_path: output_path.to_path_buf(),
      transcode: None,
    }
  }

  pub fn record(&mut self, result: &FrameResult) {
    self.frames_processed += 1;
    if result.has_human() {
      self.human_frame_count += 1;
    }
    if result.has_pet() {
      self.pet_alert_count += 1;
    }
    self.total_humans += result.human_count as u64;
    self.total_pets += result.pet_count as u64;
  }
}

/// 单帧处理结果
#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutcome {
  pub result: FrameResult,
  /// 绘制在画面上的摘要文本
  pub overlay: String,
}

pub struct MediaPipeline<D> {
  detector: D,
  draw: Draw,
  clamp_boxes: bool,
  live_input_size: u32,
  transcoder: Option<Transcoder>,
  recorder: Option<DetectionRecorder>,
  state: PipelineState,
}

impl<D: Detector> MediaPipeline<D> {
  /// 加载检测器并创建流程
  pub fn load<E>(loader: impl FnOnce() -> Result<D, E>, draw: Draw) -> Result<Self, PipelineError>
  where
    E: StdError + Send + Sync + 'static,
  {
    debug!("流程状态: {:?} -> {:?}", PipelineState::Idle, PipelineState::Loading);
    info!("正在加载检测器...");
    let now = Instant::now();
    let detector = loader().map_err(|e| {
      error!("检测器加载失败: {}", e);
      PipelineError::Detector(Box::new(e))
    })?;
    info!("检测器加载完成，耗时: {:.2?}", now.elapsed());
    Ok(Self::new(detector, draw))
  }

  /// 使用已加载的检测器创建流程
  pub fn new(detector: D, draw: Draw) -> Self {
    Self {
      detector,
      draw,
      clamp_boxes: false,
      live_input_size: DEFAULT_LIVE_INPUT_SIZE,
      transcoder: None,
      recorder: None,
      state: PipelineState::Loading,
    }
  }

  pub fn clamp_boxes(mut self, clamp: bool) -> Self {
    self.clamp_boxes = clamp;
    self
  }

  pub fn live_input_size(mut self, size: u32) -> Self {
    self.live_input_size = size;
    self
  }

  pub fn transcoder(mut self, transcoder: Option<Transcoder>) -> Self {
    self.transcoder = transcoder;
    self
  }

  pub fn recorder(mut self, recorder: Option<DetectionRecorder>) -> Self {
    self.recorder = recorder;
    self
  }

  pub fn state(&self) -> PipelineState {
    self.state
  }

  fn transition(&mut self, next: PipelineState) {
    debug!("流程状态: {:?} -> {:?}", self.state, next);
    self.state = next;
  }

  fn settle<T>(&mut self, result: Result<T, PipelineError>) -> Result<T, PipelineError> {
    match result {
      Ok(value) => {
        self.transition(PipelineState::Done);
        Ok(value)
      }
      Err(e) => {
        error!("处理失败: {}", e);
        self.transition(PipelineState::Failed);
        Err(e)
      }
    }
  }

  /// 按扩展名选择图像或视频流程，视频使用默认的来源与输出
  pub fn run(&mut self, input: &Path, output: &Path) -> Result<RunSummary, PipelineError> {
    self.run_with(input, output, &VideoSourceOpener, &VideoSinkFactory)
  }

  pub fn run_with<O, F>(
    &mut self,
    input: &Path,
    output: &Path,
    opener: &O,
    factory: &F,
  ) -> Result<RunSummary, PipelineError>
  where
    O: SourceOpener,
    F: SinkFactory,
  {
    if !input.exists() {
      self.transition(PipelineState::Failed);
      return Err(PipelineError::InputNotFound(input.to_path_buf()));
    }

    match MediaKind::from_path(input) {
      MediaKind::Image => self.process_image(input, output),
      MediaKind::Video => self.process_video(input, output, opener, factory),
    }
  }

  fn detect(
    &self,
    image: &RgbImage,
    input_size: Option<u32>,
    scale: Scale,
  ) -> Result<FrameResult, PipelineError> {
    let raw = self
      .detector
      .detect(image, input_size)
      .map_err(|e| PipelineError::Detector(Box::new(e)))?;
    Ok(FrameResult::from_raw(&raw, scale))
  }

  /// 检测并在原始帧上绘制；实时模式在缩小后的帧上检测
  pub fn process_frame(
    &self,
    image: &mut RgbImage,
    mode: &AnnotationMode,
  ) -> Result<FrameOutcome, PipelineError> {
    let (width, height) = image.dimensions();

    let mut result = match mode {
      AnnotationMode::Live => {
        let plan = LiveDownscale::for_frame(width, height);
        let small = plan.apply(image);
        self.detect(&small, Some(self.live_input_size), plan.scale)?
      }
      _ => self.detect(image, None, Scale::IDENTITY)?,
    };

    if self.clamp_boxes {
      result.clamp_to(width, height);
    }

    let overlay = self.draw.annotate(image, &result, mode);
    Ok(FrameOutcome { result, overlay })
  }

  fn record(&mut self, frame: u64, result: &FrameResult) -> Result<(), PipelineError> {
    if let Some(recorder) = self.recorder.as_mut() {
      recorder
        .record(frame, result)
        .map_err(PipelineError::output)?;
    }
    Ok(())
  }

  fn flush_recorder(&mut self) -> Result<(), PipelineError> {
    if let Some(recorder) = self.recorder.as_mut() {
      recorder.flush().map_err(PipelineError::output)?;
      info!("检测记录已写入 {} 帧", recorder.records());
    }
    Ok(())
  }

  pub fn process_image(&mut self, input: &Path, output: &Path) -> Result<RunSummary, PipelineError> {
    self.transition(PipelineState::ImagePath);
    let result = self.image_path(input, output);
    self.settle(result)
  }

  fn image_path(&mut self, input: &Path, output: &Path) -> Result<RunSummary, PipelineError> {
    info!("处理图像: {}", input.display());
    let mut image = read_image(input)?;

    let now = Instant::now();
    let outcome = self.process_frame(&mut image, &AnnotationMode::Image)?;
    info!("检测完成，耗时: {:.2?}，{}", now.elapsed(), outcome.overlay);

    self.record(0, &outcome.result)?;
    self.flush_recorder()?;
    save_image(&image, output).map_err(PipelineError::output)?;

    let mut summary = RunSummary::new(output);
    summary.record(&outcome.result);
    Ok(summary)
  }

  pub fn process_video<O, F>(
    &mut self,
    input: &Path,
    output: &Path,
    opener: &O,
    factory: &F,
  ) -> Result<RunSummary, PipelineError>
  where
    O: SourceOpener,
    F: SinkFactory,
  {
    self.transition(PipelineState::VideoPath);
    let result = self.video_path(input, output, opener, factory);
    self.settle(result)
  }

  fn video_path<O, F>(
    &mut self,
    input: &Path,
    output: &Path,
    opener: &O,
    factory: &F,
  ) -> Result<RunSummary, PipelineError>
  where
    O: SourceOpener,
    F: SinkFactory,
  {
    info!("处理视频: {}", input.display());
    let mut source = opener.open(input)?;
    let properties = source.properties();
    if properties.width == 0 || properties.height == 0 {
      return Err(PipelineError::Decode(InputError::Decode {
        path: input.to_path_buf(),
        reason: "视频尺寸为 0".to_string(),
      }));
    }

    info!(
      "视频属性: {}x{} @ {:.2} fps, 共 {} 帧",
      properties.width, properties.height, properties.fps, properties.total_frames
    );

    let spec = SinkSpec {
      path: output.to_path_buf(),
      fps: properties.fps,
      width: properties.width,
      height: properties.height,
    };
    let mut sink = factory
      .create_sink(&spec)
      .map_err(PipelineError::SinkCreation)?;

    let mut summary = RunSummary::new(output);
    let looped = self.encode_frames(&mut source, &mut sink, &properties, &mut summary);
    let finished = sink.finish().map_err(PipelineError::output);
    drop(sink);
    drop(source);

    looped?;
    finished?;
    self.flush_recorder()?;

    info!(
      "视频处理完成: {} 帧, 含人帧 {}, 宠物警报 {}",
      summary.frames_processed, summary.human_frame_count, summary.pet_alert_count
    );

    if let Some(transcoder) = self.transcoder.as_ref() {
      match transcoder.transcode_in_place(output) {
        Ok(report) => summary.transcode = Some(report),
        Err(e) => warn!("转码失败，保留原始输出: {}", e),
      }
    }

    Ok(summary)
  }

  fn encode_frames<S, K>(
    &mut self,
    source: &mut S,
    sink: &mut K,
    properties: &VideoProperties,
    summary: &mut RunSummary,
  ) -> Result<(), PipelineError>
  where
    S: FrameSource,
    K: FrameSink,
  {
    for frame in source {
      let mut frame = frame?;
      let mode = AnnotationMode::Video {
        frame_index: summary.frames_processed + 1,
        total_frames: properties.total_frames,
      };

      let outcome = self.process_frame(&mut frame.image, &mode)?;
      sink
        .write_frame(&frame.image)
        .map_err(PipelineError::output)?;
      self.record(frame.index, &outcome.result)?;
      summary.record(&outcome.result);

      if summary.frames_processed % PROGRESS_INTERVAL == 0 {
        match properties.progress_percent(summary.frames_processed) {
          Some(percent) => info!(
            "处理进度: {}/{} 帧 ({:.1}%)",
            summary.frames_processed, properties.total_frames, percent
          ),
          None => info!("已处理 {} 帧", summary.frames_processed),
        }
      }
    }
    Ok(())
  }

  /// 实时模式：处理单帧并原地覆盖为绘制后的图像
  pub fn process_live_frame(&mut self, path: &Path) -> Result<LiveReport, PipelineError> {
    self.transition(PipelineState::ImagePath);
    let result = self.live_path(path);
    self.settle(result)
  }

  fn live_path(&mut self, path: &Path) -> Result<LiveReport, PipelineError> {
    let mut image = read_image(path)?;
    let outcome = self.process_frame(&mut image, &AnnotationMode::Live)?;
    save_image(&image, path).map_err(PipelineError::output)?;
    debug!("实时帧已覆盖: {}, {}", path.display(), outcome.overlay);
    Ok(LiveReport::from(&outcome.result))
  }
}

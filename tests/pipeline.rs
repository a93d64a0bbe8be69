// 该文件是 Shouwang （守望） 项目的一部分。
// tests/pipeline.rs - 处理流程集成测试
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
  cell::{Cell, RefCell},
  collections::VecDeque,
  path::{Path, PathBuf},
  rc::Rc,
};

use image::{Rgb, RgbImage};
use shouwang::{
  frame::{Frame, VideoProperties},
  input::{FrameSource, InputError, SourceOpener},
  model::{Detector, RawDetection},
  output::{
    FrameSink, SinkError, SinkFactory, SinkSpec,
    draw::{AnnotationMode, Draw, HUMAN_COLOR},
    report::DetectionRecorder,
    transcode::Transcoder,
  },
  pipeline::{MediaPipeline, PipelineError, PipelineState},
};

/// 固定返回同一组检测结果，并记录每次调用的输入尺寸
struct StubDetector {
  detections: Vec<RawDetection>,
  calls: RefCell<Vec<(u32, u32, Option<u32>)>>,
}

impl StubDetector {
  fn new(detections: Vec<RawDetection>) -> Self {
    Self {
      detections,
      calls: RefCell::new(Vec::new()),
    }
  }

  fn empty() -> Self {
    Self::new(Vec::new())
  }

  fn human_and_pet() -> Self {
    Self::new(vec![
      RawDetection::new([10.0, 60.0, 50.0, 110.0], 0.91, 0),
      RawDetection::new([80.0, 60.0, 140.0, 110.0], 0.76, 15),
      RawDetection::new([5.0, 5.0, 9.0, 9.0], 0.99, 2),
    ])
  }
}

impl Detector for StubDetector {
  type Error = std::io::Error;

  fn detect(
    &self,
    image: &RgbImage,
    input_size: Option<u32>,
  ) -> Result<Vec<RawDetection>, Self::Error> {
    self
      .calls
      .borrow_mut()
      .push((image.width(), image.height(), input_size));
    Ok(self.detections.clone())
  }
}

struct BrokenDetector;

impl Detector for BrokenDetector {
  type Error = std::io::Error;

  fn detect(&self, _: &RgbImage, _: Option<u32>) -> Result<Vec<RawDetection>, Self::Error> {
    Err(std::io::Error::other("inference backend crashed"))
  }
}

struct MemorySource {
  frames: VecDeque<RgbImage>,
  properties: VideoProperties,
  index: u64,
}

impl Iterator for MemorySource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let image = self.frames.pop_front()?;
    let frame = Frame::new(image, self.index);
    self.index += 1;
    Some(Ok(frame))
  }
}

impl FrameSource for MemorySource {
  fn properties(&self) -> VideoProperties {
    self.properties
  }
}

struct MemoryOpener {
  frames: Vec<RgbImage>,
  fps: f64,
}

impl SourceOpener for MemoryOpener {
  type Source = MemorySource;

  fn open(&self, _path: &Path) -> Result<Self::Source, InputError> {
    let (width, height) = self.frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
    Ok(MemorySource {
      frames: self.frames.iter().cloned().collect(),
      properties: VideoProperties::new(width, height, self.fps, self.frames.len() as u64),
      index: 0,
    })
  }
}

/// 记录写入的帧，结束时写出一个占位文件
#[derive(Default, Clone)]
struct Recording {
  frames: Rc<RefCell<Vec<RgbImage>>>,
  spec: Rc<RefCell<Option<SinkSpec>>>,
  finished: Rc<Cell<bool>>,
}

struct RecordingSink {
  recording: Recording,
  path: PathBuf,
}

impl FrameSink for RecordingSink {
  fn write_frame(&mut self, frame: &RgbImage) -> Result<(), SinkError> {
    self.recording.frames.borrow_mut().push(frame.clone());
    Ok(())
  }

  fn finish(&mut self) -> Result<(), SinkError> {
    std::fs::write(&self.path, b"mpeg4 video")?;
    self.recording.finished.set(true);
    Ok(())
  }
}

impl SinkFactory for Recording {
  type Sink = RecordingSink;

  fn create_sink(&self, spec: &SinkSpec) -> Result<Self::Sink, SinkError> {
    *self.spec.borrow_mut() = Some(spec.clone());
    Ok(RecordingSink {
      recording: self.clone(),
      path: spec.path.clone(),
    })
  }
}

struct NoCodec;

impl SinkFactory for NoCodec {
  type Sink = RecordingSink;

  fn create_sink(&self, _spec: &SinkSpec) -> Result<Self::Sink, SinkError> {
    Err(SinkError::EncoderUnavailable("no codec".to_string()))
  }
}

fn gradient(width: u32, height: u32, seed: u8) -> RgbImage {
  RgbImage::from_fn(width, height, |x, y| {
    Rgb([
      (x as u8).wrapping_add(seed),
      (y as u8).wrapping_mul(3),
      seed.wrapping_mul(7),
    ])
  })
}

fn pipeline<D: Detector>(detector: D) -> MediaPipeline<D> {
  MediaPipeline::new(detector, Draw::new(None))
}

#[test]
fn human_and_pet_are_counted_and_summarized() {
  let pipeline = pipeline(StubDetector::human_and_pet());
  let mut image = gradient(160, 120, 1);

  let outcome = pipeline
    .process_frame(&mut image, &AnnotationMode::Image)
    .unwrap();

  assert_eq!(outcome.result.human_count, 1);
  assert_eq!(outcome.result.pet_count, 1);
  assert_eq!(outcome.result.detections.len(), 2);
  assert_eq!(outcome.overlay, "Pets: 1 | Humans: 1");
  assert_eq!(*image.get_pixel(10, 90), HUMAN_COLOR);
}

#[test]
fn image_run_writes_annotated_file() {
  let dir = tempfile::tempdir().unwrap();
  let input = dir.path().join("snapshot.JPG");
  let output = dir.path().join("out/annotated.png");
  gradient(160, 120, 9).save_with_format(&input, image::ImageFormat::Jpeg).unwrap();

  let mut pipeline = pipeline(StubDetector::human_and_pet());
  let summary = pipeline.run(&input, &output).unwrap();

  assert_eq!(summary.frames_processed, 1);
  assert_eq!(summary.human_frame_count, 1);
  assert_eq!(summary.pet_alert_count, 1);
  assert_eq!(summary.output_path, output);
  assert_eq!(pipeline.state(), PipelineState::Done);

  let written = image::open(&output).unwrap().into_rgb8();
  assert_eq!(written.dimensions(), (160, 120));
  assert_eq!(*written.get_pixel(10, 90), HUMAN_COLOR);
}

#[test]
fn empty_frames_pass_through_unchanged() {
  let dir = tempfile::tempdir().unwrap();
  let frames: Vec<RgbImage> = (0..5).map(|i| gradient(160, 120, i)).collect();
  let opener = MemoryOpener {
    frames: frames.clone(),
    fps: 0.0,
  };
  let recording = Recording::default();
  let output = dir.path().join("clip.mp4");

  let mut pipeline = pipeline(StubDetector::empty());
  let summary = pipeline
    .process_video(Path::new("clip.avi"), &output, &opener, &recording)
    .unwrap();

  assert_eq!(summary.frames_processed, 5);
  assert_eq!(summary.human_frame_count, 0);
  assert_eq!(summary.pet_alert_count, 0);
  assert!(recording.finished.get());

  let spec = recording.spec.borrow().clone().unwrap();
  assert_eq!((spec.width, spec.height), (160, 120));
  assert_eq!(spec.fps, 20.0);

  // 叠加文字只出现在左上角，其余像素保持原样
  let written = recording.frames.borrow();
  assert_eq!(written.len(), frames.len());
  for (original, annotated) in frames.iter().zip(written.iter()) {
    for y in 80..120 {
      for x in 0..160 {
        assert_eq!(original.get_pixel(x, y), annotated.get_pixel(x, y));
      }
    }
  }

  let mut image = gradient(160, 120, 0);
  let outcome = pipeline
    .process_frame(
      &mut image,
      &AnnotationMode::Video {
        frame_index: 1,
        total_frames: 5,
      },
    )
    .unwrap();
  assert_eq!(outcome.overlay, "Pets: 0 | Humans: 0");
}

#[test]
fn sink_creation_failure_processes_no_frames() {
  let dir = tempfile::tempdir().unwrap();
  let output = dir.path().join("clip.mp4");
  let opener = MemoryOpener {
    frames: vec![gradient(64, 48, 0); 3],
    fps: 25.0,
  };

  let mut pipeline = pipeline(StubDetector::human_and_pet());
  let result = pipeline.process_video(Path::new("clip.mp4"), &output, &opener, &NoCodec);

  assert!(matches!(result, Err(PipelineError::SinkCreation(_))));
  assert_eq!(pipeline.state(), PipelineState::Failed);
  assert!(!output.exists());
}

#[test]
fn missing_transcoder_keeps_original_output() {
  let dir = tempfile::tempdir().unwrap();
  let output = dir.path().join("clip.mp4");
  let opener = MemoryOpener {
    frames: vec![gradient(64, 48, 0); 3],
    fps: 25.0,
  };
  let recording = Recording::default();

  let mut pipeline = pipeline(StubDetector::human_and_pet())
    .transcoder(Some(Transcoder::new("definitely-not-a-real-transcoder")));
  let summary = pipeline
    .process_video(Path::new("clip.mp4"), &output, &opener, &recording)
    .unwrap();

  assert_eq!(summary.frames_processed, 3);
  assert_eq!(summary.human_frame_count, 3);
  assert_eq!(summary.pet_alert_count, 3);
  assert_eq!(summary.transcode, None);
  assert_eq!(std::fs::read(&output).unwrap(), b"mpeg4 video");
  assert_eq!(pipeline.state(), PipelineState::Done);
}

#[test]
fn video_run_records_every_frame() {
  let dir = tempfile::tempdir().unwrap();
  let record = dir.path().join("detections.jsonl");
  let opener = MemoryOpener {
    frames: vec![gradient(64, 48, 0); 4],
    fps: 30.0,
  };

  let mut pipeline = pipeline(StubDetector::human_and_pet())
    .recorder(Some(DetectionRecorder::create(&record).unwrap()));
  pipeline
    .process_video(
      Path::new("clip.mp4"),
      &dir.path().join("clip.mp4"),
      &opener,
      &Recording::default(),
    )
    .unwrap();

  let content = std::fs::read_to_string(&record).unwrap();
  let frames: Vec<u64> = content
    .lines()
    .map(|line| {
      let value: serde_json::Value = serde_json::from_str(line).unwrap();
      value["frame"].as_u64().unwrap()
    })
    .collect();
  assert_eq!(frames, vec![0, 1, 2, 3]);
}

#[test]
fn live_frame_is_downscaled_and_rescaled() {
  let dir = tempfile::tempdir().unwrap();
  let frame = dir.path().join("frame.png");
  gradient(200, 100, 3).save(&frame).unwrap();

  let detector = StubDetector::new(vec![RawDetection::new([10.0, 20.0, 30.0, 40.0], 0.8734, 0)]);
  let mut pipeline = pipeline(&detector);
  let report = pipeline.process_live_frame(&frame).unwrap();

  assert_eq!(detector.calls.borrow().as_slice(), &[(100, 50, Some(416))]);
  assert_eq!(report.humans, 1);
  assert_eq!(report.pets, 0);

  let json = report.to_json().unwrap();
  assert!(json.contains(r#""confidence":0.8734"#), "{json}");
  assert!(json.contains(r#""bbox":[20,40,60,80]"#), "{json}");

  let value: serde_json::Value = serde_json::from_str(&json).unwrap();
  let bbox = value["detections"][0]["bbox"].as_array().unwrap();
  assert_eq!(bbox.len(), 4);
  assert!(bbox.iter().all(|v| v.is_i64()));

  let annotated = image::open(&frame).unwrap().into_rgb8();
  assert_eq!(annotated.dimensions(), (200, 100));
  assert_eq!(*annotated.get_pixel(20, 60), HUMAN_COLOR);
}

#[test]
fn missing_input_is_reported() {
  let dir = tempfile::tempdir().unwrap();
  let mut pipeline = pipeline(StubDetector::empty());

  let result = pipeline.run(&dir.path().join("nope.png"), &dir.path().join("out.png"));
  assert!(matches!(result, Err(PipelineError::InputNotFound(_))));
  assert_eq!(pipeline.state(), PipelineState::Failed);
}

#[test]
fn detector_failure_is_fatal() {
  let dir = tempfile::tempdir().unwrap();
  let input = dir.path().join("in.png");
  let output = dir.path().join("out.png");
  gradient(32, 32, 0).save(&input).unwrap();

  let mut pipeline = pipeline(BrokenDetector);
  let result = pipeline.run(&input, &output);

  assert!(matches!(result, Err(PipelineError::Detector(_))));
  assert!(!output.exists());
}

#[test]
fn clamping_is_opt_in() {
  let detector = StubDetector::new(vec![RawDetection::new([-20.0, 10.0, 500.0, 40.0], 0.6, 16)]);

  let mut image = gradient(100, 50, 0);
  let unclamped = pipeline(&detector)
    .process_frame(&mut image, &AnnotationMode::Image)
    .unwrap();
  let bbox = unclamped.result.detections[0].bbox;
  assert_eq!((bbox.x1, bbox.x2), (-20, 500));

  let mut image = gradient(100, 50, 0);
  let clamped = pipeline(&detector)
    .clamp_boxes(true)
    .process_frame(&mut image, &AnnotationMode::Image)
    .unwrap();
  let bbox = clamped.result.detections[0].bbox;
  assert_eq!((bbox.x1, bbox.x2), (0, 99));
}

#[test]
fn far_offscreen_detections_are_annotated() {
  let detector = StubDetector::new(vec![
    RawDetection::new([-3e9, -3e9, 3e9, 3e9], 0.9, 0),
    RawDetection::new([10.0, -3e9, 20.0, 30.0], 0.8, 16),
  ]);
  let pipeline = pipeline(&detector);

  for mode in [
    AnnotationMode::Image,
    AnnotationMode::Video {
      frame_index: 1,
      total_frames: 1,
    },
    AnnotationMode::Live,
  ] {
    let mut image = gradient(120, 80, 0);
    let outcome = pipeline.process_frame(&mut image, &mode).unwrap();
    assert_eq!(outcome.result.human_count, 1);
    assert_eq!(outcome.result.pet_count, 1);
    assert_eq!(outcome.result.detections[0].bbox.x1, i32::MIN);
  }
}

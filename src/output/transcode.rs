// 该文件是 Shouwang （守望） 项目的一部分。
// src/output/transcode.rs - 视频输出的 H.264 转码
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

//! 写帧结束后调用外部 `ffmpeg` 将输出重新编码为 H.264（CRF 质量控制，faststart）。
//!
//! 转码结果先写入同目录的临时文件，只有进程成功退出且结果非空时才替换原文件。
//! 任何失败都保留原文件，调用方只记录警告。

use std::{
  collections::VecDeque,
  ffi::OsString,
  path::{Path, PathBuf},
  process::Stdio,
  time::Duration,
};

use thiserror::Error;
use tokio::{
  io::{AsyncBufReadExt, BufReader},
  process::Command,
};
use tracing::{debug, info, warn};

use crate::config::DEFAULT_TRANSCODE_TIMEOUT_SECS;

const DEFAULT_PROGRAM: &str = "ffmpeg";
// 失败时保留的错误输出行数
const STDERR_TAIL_LINES: usize = 20;

#[derive(Error, Debug)]
pub enum TranscodeError {
  #[error("找不到转码程序 {program}: {reason}")]
  Unavailable { program: String, reason: String },
  #[error("转码失败 ({status}): {stderr}")]
  Failed { status: String, stderr: String },
  #[error("转码超时 ({0:?})")]
  Timeout(Duration),
  #[error("转码结果为空")]
  EmptyOutput,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 转码前后的文件大小
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeReport {
  pub before_bytes: u64,
  pub after_bytes: u64,
}

/// 外部转码器
#[derive(Debug, Clone)]
pub struct Transcoder {
  program: OsString,
  timeout: Duration,
  codec: String,
  preset: String,
  crf: u8,
}

impl Default for Transcoder {
  fn default() -> Self {
    Self {
      program: OsString::from(DEFAULT_PROGRAM),
      timeout: Duration::from_secs(DEFAULT_TRANSCODE_TIMEOUT_SECS),
      codec: "libx264".to_string(),
      preset: "fast".to_string(),
      crf: 23,
    }
  }
}

impl Transcoder {
  pub fn new(program: impl Into<OsString>) -> Self {
    Self {
      program: program.into(),
      ..Self::default()
    }
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn crf(mut self, crf: u8) -> Self {
    self.crf = crf;
    self
  }

  pub fn preset(mut self, preset: impl Into<String>) -> Self {
    self.preset = preset.into();
    self
  }

  /// 传给转码程序的参数
  pub fn build_args(&self, input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-loglevel", "error", "-i"]
      .into_iter()
      .map(OsString::from)
      .collect();
    args.push(input.as_os_str().to_os_string());
    let crf = self.crf.to_string();
    for arg in [
      "-c:v",
      self.codec.as_str(),
      "-preset",
      self.preset.as_str(),
      "-crf",
      crf.as_str(),
      "-pix_fmt",
      "yuv420p",
      "-movflags",
      "+faststart",
    ] {
      args.push(OsString::from(arg));
    }
    args.push(output.as_os_str().to_os_string());
    args
  }

  /// 同目录下的临时文件，保留扩展名以便转码程序识别容器
  pub fn temp_path(path: &Path) -> PathBuf {
    let stem = path
      .file_stem()
      .map(|s| s.to_string_lossy().to_string())
      .unwrap_or_default();
    let name = match path.extension() {
      Some(ext) => format!(".{}.transcoding.{}", stem, ext.to_string_lossy()),
      None => format!(".{}.transcoding", stem),
    };
    path.with_file_name(name)
  }

  /// 原地转码，成功时原文件被替换
  pub fn transcode_in_place(&self, path: &Path) -> Result<TranscodeReport, TranscodeError> {
    let program = which::which(&self.program).map_err(|e| TranscodeError::Unavailable {
      program: self.program.to_string_lossy().to_string(),
      reason: e.to_string(),
    })?;

    let before_bytes = std::fs::metadata(path)?.len();
    let temp = Self::temp_path(path);
    debug!("转码 {} -> {}", path.display(), temp.display());

    let result = self
      .run(&program, path, &temp)
      .and_then(|()| match std::fs::metadata(&temp) {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        _ => Err(TranscodeError::EmptyOutput),
      })
      .and_then(|after_bytes| {
        std::fs::rename(&temp, path)?;
        Ok(after_bytes)
      });

    match result {
      Ok(after_bytes) => {
        let report = TranscodeReport {
          before_bytes,
          after_bytes,
        };
        info!(
          "转码完成: {} ({} 字节 -> {} 字节)",
          path.display(),
          report.before_bytes,
          report.after_bytes
        );
        Ok(report)
      }
      Err(e) => {
        if temp.exists() {
          let _ = std::fs::remove_file(&temp);
        }
        Err(e)
      }
    }
  }

  fn run(&self, program: &Path, input: &Path, output: &Path) -> Result<(), TranscodeError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()?;
    runtime.block_on(self.run_child(program, input, output))
  }

  async fn run_child(
    &self,
    program: &Path,
    input: &Path,
    output: &Path,
  ) -> Result<(), TranscodeError> {
    let mut child = Command::new(program)
      .args(self.build_args(input, output))
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()?;

    // 错误输出边运行边读取，只保留最后几行
    let stderr = child.stderr.take();
    let collector = tokio::spawn(async move {
      let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
      if let Some(stderr) = stderr {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
          if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
          }
          tail.push_back(line);
        }
      }
      tail
    });

    let waited = tokio::time::timeout(self.timeout, child.wait()).await;
    let status = match waited {
      Ok(status) => status?,
      Err(_) => {
        warn!("转码超过 {:?}，终止进程", self.timeout);
        let _ = child.kill().await;
        collector.abort();
        return Err(TranscodeError::Timeout(self.timeout));
      }
    };

    let tail = collector.await.unwrap_or_default();
    if status.success() {
      return Ok(());
    }

    Err(TranscodeError::Failed {
      status: status.to_string(),
      stderr: Vec::from(tail).join("\n").trim().to_string(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn video_file(dir: &Path) -> PathBuf {
    let path = dir.join("out.mp4");
    std::fs::write(&path, b"mpeg4 payload").unwrap();
    path
  }

  #[test]
  fn args_request_h264_faststart() {
    let args = Transcoder::default().build_args(Path::new("in.mp4"), Path::new("tmp.mp4"));
    let args: Vec<String> = args
      .iter()
      .map(|a| a.to_string_lossy().to_string())
      .collect();
    assert_eq!(
      args,
      vec![
        "-y",
        "-loglevel",
        "error",
        "-i",
        "in.mp4",
        "-c:v",
        "libx264",
        "-preset",
        "fast",
        "-crf",
        "23",
        "-pix_fmt",
        "yuv420p",
        "-movflags",
        "+faststart",
        "tmp.mp4",
      ]
    );
  }

  #[test]
  fn temp_path_is_a_sibling() {
    let temp = Transcoder::temp_path(Path::new("/data/out/video.mp4"));
    assert_eq!(temp, PathBuf::from("/data/out/.video.transcoding.mp4"));
  }

  #[test]
  fn missing_program_keeps_original() {
    let dir = tempfile::tempdir().unwrap();
    let path = video_file(dir.path());

    let result = Transcoder::new("definitely-not-a-real-transcoder").transcode_in_place(&path);
    assert!(matches!(result, Err(TranscodeError::Unavailable { .. })));
    assert_eq!(std::fs::read(&path).unwrap(), b"mpeg4 payload");
  }

  #[cfg(unix)]
  #[test]
  fn failing_program_keeps_original() {
    let dir = tempfile::tempdir().unwrap();
    let path = video_file(dir.path());

    let program = script(dir.path(), "echo 'Unknown encoder libx264' >&2; exit 1");
    let result = Transcoder::new(program.as_os_str()).transcode_in_place(&path);
    match result {
      Err(TranscodeError::Failed { stderr, .. }) => assert_eq!(stderr, "Unknown encoder libx264"),
      other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(std::fs::read(&path).unwrap(), b"mpeg4 payload");
    assert!(!Transcoder::temp_path(&path).exists());
  }

  #[cfg(unix)]
  #[test]
  fn empty_result_keeps_original() {
    let dir = tempfile::tempdir().unwrap();
    let path = video_file(dir.path());

    let result = Transcoder::new("true").transcode_in_place(&path);
    assert!(matches!(result, Err(TranscodeError::EmptyOutput)));
    assert_eq!(std::fs::read(&path).unwrap(), b"mpeg4 payload");
    assert!(!Transcoder::temp_path(&path).exists());
  }

  #[cfg(unix)]
  fn script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-transcoder.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
  }

  #[cfg(unix)]
  #[test]
  fn successful_transcode_replaces_original() {
    let dir = tempfile::tempdir().unwrap();
    let path = video_file(dir.path());
    let program = script(
      dir.path(),
      r#"for arg in "$@"; do last="$arg"; done; printf 'h264' > "$last""#,
    );

    let report = Transcoder::new(program.as_os_str())
      .transcode_in_place(&path)
      .unwrap();
    assert_eq!(
      report,
      TranscodeReport {
        before_bytes: 13,
        after_bytes: 4
      }
    );
    assert_eq!(std::fs::read(&path).unwrap(), b"h264");
    assert!(!Transcoder::temp_path(&path).exists());
  }

  #[cfg(unix)]
  #[test]
  fn slow_program_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = video_file(dir.path());
    let program = script(dir.path(), "exec sleep 5");

    let result = Transcoder::new(program.as_os_str())
      .timeout(Duration::from_millis(200))
      .transcode_in_place(&path);
    assert!(matches!(result, Err(TranscodeError::Timeout(_))));
    assert_eq!(std::fs::read(&path).unwrap(), b"mpeg4 payload");
  }

  #[cfg(unix)]
  #[test]
  fn verbose_program_is_not_mistaken_for_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let path = video_file(dir.path());
    // 约 330 KB 的错误输出，超过管道缓冲区
    let program = script(
      dir.path(),
      r#"yes 'frame=  120 fps= 30 q=28.0 size=  256kB time=00:00:04.00 bitrate= 524.3kbits/s' | head -n 4000 >&2
for arg in "$@"; do last="$arg"; done; printf 'h264' > "$last""#,
    );

    let report = Transcoder::new(program.as_os_str())
      .timeout(Duration::from_secs(30))
      .transcode_in_place(&path)
      .unwrap();
    assert_eq!(report.after_bytes, 4);
    assert_eq!(std::fs::read(&path).unwrap(), b"h264");
  }
}

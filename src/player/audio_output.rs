//! 音频输出设备
//!
//! 输出设备在自己的回调线程里向引擎拉取 S16 交错数据。

use crate::core::{AudioParams, PlayerError, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 拉取回调：填满整个缓冲区
pub type AudioCallback = Box<dyn FnMut(&mut [u8]) + Send + 'static>;

/// 期望/实际的输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub params: AudioParams,
    /// 每次回调的采样帧数
    pub buffer_frames: usize,
}

impl AudioSpec {
    pub fn buffer_bytes(&self) -> usize {
        self.buffer_frames * self.params.bytes_per_frame()
    }

    pub fn buffer_duration(&self) -> Duration {
        Duration::from_secs_f64(self.buffer_frames as f64 / self.params.sample_rate.max(1) as f64)
    }
}

/// 音频输出设备抽象
pub trait AudioOutput: Send {
    /// 打开设备并开始拉取；返回设备实际接受的格式
    fn open(&mut self, spec: AudioSpec, callback: AudioCallback) -> Result<AudioSpec>;

    fn pause(&mut self, paused: bool);

    /// 关闭设备；返回后回调不会再被调用
    fn close(&mut self);
}

/// 手动驱动的输出（测试/无声环境）
///
/// 由调用方通过 [`ManualAudioHandle::pull`] 模拟设备回调。
#[derive(Default)]
pub struct ManualAudioOutput {
    shared: Arc<Mutex<Option<AudioCallback>>>,
    paused: Arc<AtomicBool>,
}

#[derive(Clone)]
pub struct ManualAudioHandle {
    shared: Arc<Mutex<Option<AudioCallback>>>,
    paused: Arc<AtomicBool>,
}

impl ManualAudioOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> ManualAudioHandle {
        ManualAudioHandle {
            shared: self.shared.clone(),
            paused: self.paused.clone(),
        }
    }
}

impl ManualAudioHandle {
    /// 拉取 `len` 字节；设备未打开时返回 `None`，暂停时输出静音
    pub fn pull(&self, len: usize) -> Option<Vec<u8>> {
        let mut guard = self.shared.lock();
        let callback = guard.as_mut()?;
        let mut buf = vec![0u8; len];
        if !self.paused.load(Ordering::SeqCst) {
            callback(&mut buf);
        }
        Some(buf)
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().is_some()
    }
}

impl AudioOutput for ManualAudioOutput {
    fn open(&mut self, spec: AudioSpec, callback: AudioCallback) -> Result<AudioSpec> {
        *self.shared.lock() = Some(callback);
        Ok(spec)
    }

    fn pause(&mut self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn close(&mut self) {
        self.shared.lock().take();
    }
}

/// 按实时节奏拉取并丢弃数据的输出（没有声卡时使用）
#[derive(Default)]
pub struct PacedAudioOutput {
    worker: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl PacedAudioOutput {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioOutput for PacedAudioOutput {
    fn open(&mut self, spec: AudioSpec, mut callback: AudioCallback) -> Result<AudioSpec> {
        self.close();
        self.stop.store(false, Ordering::SeqCst);

        let stop = self.stop.clone();
        let paused = self.paused.clone();
        let period = spec.buffer_duration();
        let mut buf = vec![0u8; spec.buffer_bytes()];

        let worker = thread::Builder::new()
            .name("paced-audio".to_string())
            .spawn(move || {
                debug!("🔊 空输出线程启动, 周期 {:?}", period);
                while !stop.load(Ordering::SeqCst) {
                    if !paused.load(Ordering::SeqCst) {
                        callback(&mut buf);
                    }
                    thread::sleep(period);
                }
                debug!("🔊 空输出线程退出");
            })
            .map_err(PlayerError::IoError)?;

        self.worker = Some(worker);
        Ok(spec)
    }

    fn pause(&mut self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("⚠️ 空输出线程异常退出");
            }
        }
    }
}

impl Drop for PacedAudioOutput {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "audio-device")]
pub use device::CpalAudioOutput;

#[cfg(feature = "audio-device")]
mod device {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Stream, StreamConfig, SupportedStreamConfigRange};

    /// 使用 cpal 默认设备的输出
    #[derive(Default)]
    pub struct CpalAudioOutput {
        stream: Option<Stream>,
    }

    // cpal::Stream 不是 Send；只在创建它的管理器内部使用
    unsafe impl Send for CpalAudioOutput {}

    impl CpalAudioOutput {
        pub fn new() -> Self {
            Self::default()
        }

        fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
            config.sample_rate.0 >= supported.min_sample_rate().0
                && config.sample_rate.0 <= supported.max_sample_rate().0
                && config.channels == supported.channels()
        }
    }

    impl AudioOutput for CpalAudioOutput {
        fn open(&mut self, spec: AudioSpec, mut callback: AudioCallback) -> Result<AudioSpec> {
            info!(
                "初始化音频输出: {} Hz, {} 声道",
                spec.params.sample_rate, spec.params.channels
            );
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;
            debug!("使用音频设备: {}", device.name().unwrap_or_default());

            let config = StreamConfig {
                channels: spec.params.channels,
                sample_rate: cpal::SampleRate(spec.params.sample_rate),
                buffer_size: cpal::BufferSize::Fixed(spec.buffer_frames as u32),
            };
            let supported = device
                .supported_output_configs()
                .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?
                .any(|range| Self::is_config_compatible(&config, &range));
            if !supported {
                return Err(PlayerError::AudioError(format!(
                    "音频设备不支持 {} Hz, {} 声道",
                    spec.params.sample_rate, spec.params.channels
                )));
            }

            let mut scratch: Vec<u8> = Vec::new();
            let stream = device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len() * 2, 0);
                        callback(&mut scratch);
                        for (sample, bytes) in data.iter_mut().zip(scratch.chunks_exact(2)) {
                            *sample = i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0;
                        }
                    },
                    move |err| {
                        warn!("音频流错误: {}", err);
                    },
                    None,
                )
                .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

            stream
                .play()
                .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;
            self.stream = Some(stream);
            info!("音频输出已启动");
            Ok(spec)
        }

        fn pause(&mut self, paused: bool) {
            if let Some(stream) = &self.stream {
                let result = if paused { stream.pause() } else { stream.play() };
                if let Err(e) = result {
                    warn!("⚠️ 切换音频流状态失败: {}", e);
                }
            }
        }

        fn close(&mut self) {
            if self.stream.take().is_some() {
                info!("音频输出已停止");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> AudioSpec {
        AudioSpec {
            params: AudioParams {
                sample_rate: 8_000,
                channels: 1,
            },
            buffer_frames: 80,
        }
    }

    #[test]
    fn test_manual_output_pulls_through_callback() {
        let mut output = ManualAudioOutput::new();
        let handle = output.handle();
        assert!(handle.pull(4).is_none());

        output.open(spec(), Box::new(|buf: &mut [u8]| buf.fill(7))).unwrap();
        assert_eq!(handle.pull(4).unwrap(), vec![7; 4]);

        output.pause(true);
        assert_eq!(handle.pull(4).unwrap(), vec![0; 4]);

        output.close();
        assert!(!handle.is_open());
    }

    #[test]
    fn test_paced_output_calls_back_until_closed() {
        let calls = Arc::new(Mutex::new(0usize));
        let c2 = calls.clone();
        let mut output = PacedAudioOutput::new();
        let accepted = output
            .open(spec(), Box::new(move |buf: &mut [u8]| {
                assert_eq!(buf.len(), 160);
                *c2.lock() += 1;
            }))
            .unwrap();
        assert_eq!(accepted.buffer_duration().as_millis(), 10);
        thread::sleep(Duration::from_millis(60));
        output.close();
        let after_close = *calls.lock();
        assert!(after_close >= 2);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(*calls.lock(), after_close);
    }
}

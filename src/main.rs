use anyhow::{Context, Result};
use log::{info, warn};
use myy_core::core::{AudioParams, PlayerConfig, WorldConfig};
use myy_core::physics::{Body, Joint, PhysicsWorld, Shape, Vector2, World};
use myy_core::player::demuxer_thread::DemuxerEvent;
use myy_core::player::{
    AudioOutput, DemuxerSource, MediaBackend, MemorySource, NullSink, PacedAudioOutput, PlaybackManager,
    SyntheticBackend,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 命令行参数：`myy_core_demo [媒体路径] [--config 配置.json] [--world 物理配置.json]`
struct Args {
    media: Option<String>,
    config: Option<String>,
    world: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        media: None,
        config: None,
        world: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => args.config = Some(iter.next().context("--config 缺少文件路径")?),
            "--world" => args.world = Some(iter.next().context("--world 缺少文件路径")?),
            _ => args.media = Some(arg),
        }
    }
    Ok(args)
}

fn open_source(media: Option<&str>) -> Result<(Box<dyn DemuxerSource>, Arc<dyn MediaBackend>)> {
    match media {
        #[cfg(feature = "ffmpeg")]
        Some(path) => {
            use myy_core::core::MediaSource;
            use myy_core::player::ffmpeg::{FfmpegBackend, FfmpegSource};
            let source = MediaSource::from_url(path);
            let demuxer = FfmpegSource::open(&source)?;
            Ok((Box::new(demuxer), Arc::new(FfmpegBackend::new(source))))
        }
        #[cfg(not(feature = "ffmpeg"))]
        Some(path) => {
            warn!("⚠️ 未启用 ffmpeg 特性，忽略 {}，改用合成媒体", path);
            Ok(synthetic_source())
        }
        None => Ok(synthetic_source()),
    }
}

fn synthetic_source() -> (Box<dyn DemuxerSource>, Arc<dyn MediaBackend>) {
    let audio = AudioParams {
        sample_rate: 48_000,
        channels: 2,
    };
    let source = MemorySource::synthetic(Some((320, 240, 25.0)), Some(audio), 3.0)
        .with_subtitles(&[(0.5, 1.0, "你好"), (2.0, 0.8, "再见")]);
    (Box::new(source), Arc::new(SyntheticBackend::new()))
}

fn audio_output() -> Box<dyn AudioOutput> {
    #[cfg(feature = "audio-device")]
    {
        Box::new(myy_core::player::audio_output::CpalAudioOutput::new())
    }
    #[cfg(not(feature = "audio-device"))]
    {
        Box::new(PacedAudioOutput::new())
    }
}

/// 播放演示：正常播放，中途暂停、Seek，直到播完
fn run_player(args: &Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => PlayerConfig::load(path).with_context(|| format!("读取配置失败: {}", path))?,
        None => PlayerConfig::default(),
    };
    let (source, backend) = open_source(args.media.as_deref())?;
    let mut player = PlaybackManager::open(source, backend, audio_output(), config)?;
    let mut sink = NullSink::new(640, 360);

    let started = Instant::now();
    let mut paused_once = false;
    let mut seeked = false;
    let mut eof = false;

    while started.elapsed() < Duration::from_secs(10) {
        let delay = player.video_refresh(&mut sink);

        for event in player.poll_events() {
            match event {
                DemuxerEvent::EndOfFile => eof = true,
                DemuxerEvent::SeekDone { target_us } => {
                    eof = false;
                    info!("🎯 Seek 完成: {:.3}s", target_us as f64 / 1e6);
                }
                other => warn!("⚠️ {:?}", other),
            }
        }

        let elapsed = started.elapsed();
        if !paused_once && elapsed > Duration::from_millis(800) {
            paused_once = true;
            player.pause();
            info!("⏸ 暂停于 {:.3}s", player.position());
            thread::sleep(Duration::from_millis(300));
            player.resume();
            info!("▶️ 恢复于 {:.3}s", player.position());
        }
        if !seeked && elapsed > Duration::from_millis(1500) {
            seeked = true;
            player.seek(0.5)?;
        }

        let status = player.buffer_status();
        if eof && status.pictures == 0 && status.video_packets == 0 {
            break;
        }
        thread::sleep(delay.min(Duration::from_millis(50)));
    }

    info!(
        "📊 显示 {} 帧，最终位置 {:.3}s，最后字幕 {:?}",
        sink.frames,
        player.position(),
        sink.last_subtitle
    );
    player.stop();
    Ok(())
}

/// 物理演示：地面上的两个箱子 + 一个单摆
fn run_physics(args: &Args) -> Result<()> {
    let config = match &args.world {
        Some(path) => WorldConfig::load(path).with_context(|| format!("读取物理配置失败: {}", path))?,
        None => WorldConfig::default(),
    };
    let mut world = World::new(config);

    world.add_body(Body::new_static(Shape::rect(20.0, 1.0), Vector2::new(0.0, -0.5)))?;
    let lower = world.add_body(Body::new(Shape::rect(1.0, 1.0), 1.0, Vector2::new(0.0, 0.6)))?;
    let upper = world.add_body(Body::new(Shape::rect(1.0, 1.0), 1.0, Vector2::new(0.1, 1.8)))?;

    let pivot = Body::new_static(Shape::circle(0.05), Vector2::new(5.0, 4.0));
    let bob = Body::new(Shape::circle(0.2), 2.0, Vector2::new(6.5, 4.0)).with_material(0.5, 0.2);
    let rod = Joint::distance(&pivot, Vector2::ZERO, &bob, Vector2::ZERO);
    world.add_body(pivot)?;
    let bob = world.add_body(bob)?;
    world.add_joint(rod)?;

    let step = 1.0 / 60.0;
    for frame in 0..=180 {
        world.update(step)?;
        if frame % 60 == 0 {
            for (name, id) in [("下层箱子", lower), ("上层箱子", upper), ("摆锤", bob)] {
                if let Some(body) = world.body(id) {
                    info!(
                        "🧱 t={:.2}s {}: ({:.3}, {:.3}) 转角 {:.3}",
                        frame as f64 * step,
                        name,
                        body.position.x,
                        body.position.y,
                        body.angle
                    );
                }
            }
            info!("   接触数: {}", world.contacts().len());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 MYY Core 演示启动");
    let args = parse_args()?;

    run_player(&args)?;
    run_physics(&args)?;

    info!("✅ 演示结束");
    Ok(())
}

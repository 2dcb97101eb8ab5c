// depthsync/examples/multi_device.rs

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use depthsync::prelude::*;
use depthsync::simulation::SimulatedHub;

const STREAM_FOR: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "depthsync=info".into()),
        )
        .init();

    // 1. 注册表 + 仿真台架 (0 号接 Sync Out，1 号接 Sync In)
    let registry = DeviceRegistry::new(Arc::new(SimulatedHub::master_subordinate_pair()));
    println!("Installed devices: {}", registry.installed_count());

    let master = registry.open(0)?;
    let subordinate = registry.open(1)?;
    println!(
        "Opened {} ({}) and {} ({})",
        master.serial_number(),
        master.sync_jacks(),
        subordinate.serial_number(),
        subordinate.sync_jacks()
    );

    // 2. 主从配置：从机曝光比主机晚 160us
    let base = DeviceConfiguration::disable_all()
        .color(ImageFormat::ColorMjpg, ColorResolution::R1080p)
        .depth(DepthMode::NfovBinned)
        .fps(Fps::Fps30)
        .depth_delay_usec(80);
    let master_config = base.with_role(WiredSyncMode::Master);
    let subordinate_config = base
        .with_role(WiredSyncMode::Subordinate)
        .subordinate_delay_usec(160);

    // 3. 从机先就绪，再在同一时刻放行
    let report = start_parallel(&[
        StartRequest::new(&subordinate, subordinate_config).with_imu(),
        StartRequest::new(&master, master_config).with_imu(),
    ]);
    match report.outcome() {
        ParallelOutcome::AllSucceeded => println!("Both devices streaming."),
        other => {
            eprintln!("Parallel start did not fully succeed: {:?}", other);
            for (index, err) in report.failed() {
                eprintln!("  device {}: {}", index, err);
            }
        }
    }

    // 4. 交替读取两台设备，打印时间戳差
    let started = Instant::now();
    let mut pairs = 0;
    while started.elapsed() < STREAM_FOR {
        let m = match master.get_next_capture(Duration::from_millis(500)) {
            Ok(capture) => capture,
            Err(e) if e.is_liveness() => break,
            Err(e) => return Err(e.into()),
        };
        let s = match subordinate.get_next_capture(Duration::from_millis(500)) {
            Ok(capture) => capture,
            Err(e) if e.is_liveness() => break,
            Err(e) => return Err(e.into()),
        };

        pairs += 1;
        if pairs % 10 == 0 {
            let offset = s.timestamp().device_usec() as i64 - m.timestamp().device_usec() as i64;
            println!(
                "pair {:>3}: master seq {} / subordinate seq {}, device offset {}us",
                pairs,
                m.sequence(),
                s.sequence(),
                offset
            );
        }
        m.release();
        s.release();
    }

    if let Ok(sample) = master.get_imu_sample(Duration::from_millis(100)) {
        println!("Latest master IMU: acc={:?} temp={:.1}C", sample.acc, sample.temperature_c);
    }
    println!("Master telemetry: {:?}", master.telemetry());

    // 5. 同时停止并关闭
    let report = stop_and_close_parallel(vec![master, subordinate]);
    println!("Closed: {:?}, registry idle: {}", report.outcome(), registry.is_idle());

    Ok(())
}

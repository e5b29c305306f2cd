use anyhow::{Context, Result, anyhow, bail};
use sonicport::{AudioEngine, AudioFormat, Converter, ConverterTier, EngineConfig};
use std::time::{Duration, Instant};

pub const USAGE: &str = "\
usage: sonicport-demo <command> [--driver NAME] [--seconds N] [--format FMT]

commands:
  devices   list playback and capture devices
  tone      play a 440 Hz sine on the default output
  record    record from the default input and report the peak level
  convert   time every converter tier available on this CPU

Environment variables SONICPORT_AUDIO_* and RUST_LOG are honoured.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Devices,
    Tone,
    Record,
    Convert,
}

#[derive(Debug, Clone)]
pub struct Command {
    pub action: Action,
    pub driver: Option<String>,
    pub seconds: f64,
    pub format: Option<AudioFormat>,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut iter = args.iter();
        let action = match iter.next().map(String::as_str) {
            Some("devices") => Action::Devices,
            Some("tone") => Action::Tone,
            Some("record") => Action::Record,
            Some("convert") => Action::Convert,
            Some(other) => bail!("unknown command {:?}", other),
            None => bail!("missing command"),
        };

        let mut command = Command {
            action,
            driver: None,
            seconds: 3.0,
            format: None,
        };
        while let Some(flag) = iter.next() {
            let mut value = || {
                iter.next()
                    .cloned()
                    .ok_or_else(|| anyhow!("{} needs a value", flag))
            };
            match flag.as_str() {
                "--driver" => command.driver = Some(value()?),
                "--seconds" => {
                    command.seconds = value()?.parse().context("--seconds takes a number")?
                }
                "--format" => command.format = Some(value()?.parse()?),
                other => bail!("unknown option {:?}", other),
            }
        }
        Ok(command)
    }

    fn engine(&self) -> Result<AudioEngine> {
        let mut config = EngineConfig::from_env()?;
        if let Some(driver) = &self.driver {
            config = config.driver(driver.clone());
        }
        if let Some(format) = self.format {
            config.default_spec.format = format;
        }
        let engine = AudioEngine::new(config)?;
        log::info!("Audio driver: {}", engine.driver_name());
        Ok(engine)
    }
}

pub fn run(command: Command) -> Result<()> {
    match command.action {
        Action::Devices => list_devices(&command),
        Action::Tone => play_tone(&command),
        Action::Record => record(&command),
        Action::Convert => bench_converters(),
    }
}

fn list_devices(command: &Command) -> Result<()> {
    let engine = command.engine()?;
    for is_capture in [false, true] {
        let default = engine.default_device(is_capture);
        println!("{}:", if is_capture { "Capture" } else { "Playback" });
        for info in engine.devices(is_capture) {
            println!(
                "  {} {}{} ({}, {} ch, {} Hz)",
                info.id,
                info.name,
                if Some(info.id) == default { " [default]" } else { "" },
                info.default_spec.format,
                info.default_spec.channels,
                info.default_spec.freq
            );
        }
    }
    Ok(())
}

fn report_events(engine: &AudioEngine) {
    for event in engine.poll_events() {
        if event.is_error() {
            log::warn!("{:?}", event);
        } else {
            log::debug!("{:?}", event);
        }
    }
}

fn play_tone(command: &Command) -> Result<()> {
    let engine = command.engine()?;
    let id = engine
        .default_device(false)
        .ok_or_else(|| anyhow!("no playback device"))?;
    let mut stream = engine.open_playback(id, None)?;
    let spec = stream.spec();
    log::info!(
        "Playing 440 Hz on {} as {} {} ch {} Hz",
        id,
        spec.format,
        spec.channels,
        spec.freq
    );

    let channels = spec.channels as usize;
    let step = std::f32::consts::TAU * 440.0 / spec.freq as f32;
    let mut phase = 0.0f32;
    let mut block = vec![0.0f32; 512 * channels];
    let end = Instant::now() + Duration::from_secs_f64(command.seconds);
    while Instant::now() < end && !stream.is_closed() {
        if stream.free() < block.len() {
            std::thread::sleep(Duration::from_millis(5));
            report_events(&engine);
            continue;
        }
        for frame in block.chunks_exact_mut(channels) {
            frame.fill(0.25 * phase.sin());
            phase = (phase + step) % std::f32::consts::TAU;
        }
        stream.write(&block);
    }

    while stream.queued() > 0 && !stream.is_closed() {
        std::thread::sleep(Duration::from_millis(5));
    }
    engine.close_device(id)?;
    report_events(&engine);
    Ok(())
}

fn record(command: &Command) -> Result<()> {
    let engine = command.engine()?;
    let id = engine
        .default_device(true)
        .ok_or_else(|| anyhow!("no capture device"))?;
    let mut stream = engine.open_capture(id, None)?;
    let spec = stream.spec();
    log::info!(
        "Recording from {} as {} {} ch {} Hz",
        id,
        spec.format,
        spec.channels,
        spec.freq
    );

    let mut block = vec![0.0f32; 4096];
    let mut total = 0usize;
    let mut peak = 0.0f32;
    let end = Instant::now() + Duration::from_secs_f64(command.seconds);
    while Instant::now() < end && !stream.is_closed() {
        let got = stream.read(&mut block);
        if got == 0 {
            std::thread::sleep(Duration::from_millis(10));
            report_events(&engine);
            continue;
        }
        total += got;
        peak = block[..got].iter().fold(peak, |p, s| p.max(s.abs()));
    }

    engine.close_device(id)?;
    report_events(&engine);
    println!(
        "Recorded {} frames, peak level {:.3}",
        total / spec.channels.max(1) as usize,
        peak
    );
    Ok(())
}

fn bench_converters() -> Result<()> {
    const SAMPLES: usize = 1 << 20;
    let input: Vec<f32> = (0..SAMPLES)
        .map(|i| ((i as f32) * 0.001).sin() * 1.1)
        .collect();
    let mut bytes = vec![0u8; SAMPLES * 4];
    let mut output = vec![0.0f32; SAMPLES];

    println!("Detected tier: {}", Converter::detect().tier());
    for tier in ConverterTier::PRIORITY.iter().rev() {
        let Ok(converter) = Converter::for_tier(*tier) else {
            continue;
        };
        for format in [AudioFormat::U8, AudioFormat::S16, AudioFormat::S32] {
            let size = SAMPLES * format.byte_size();
            let start = Instant::now();
            converter.f32_to_bytes(&input, format, &mut bytes[..size])?;
            converter.bytes_to_f32(format, &bytes[..size], &mut output)?;
            println!(
                "  {:>6} {:<6} {:>8.2} ms for {} samples each way",
                tier.to_string(),
                format.to_string(),
                start.elapsed().as_secs_f64() * 1000.0,
                SAMPLES
            );
        }
    }
    Ok(())
}

use crate::decode::{DecodedAudio, decode_file};
use alcore::backend::Backend;
use alcore::mixer::NullDriver;
use alcore::{
    BufferFormat, ContextAttributes, DeviceDesc, DeviceRegistry, MixerDesc, SoftwareMixer,
    SourceParam, Vec3,
};
use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Options {
    pub list: bool,
    /// Use only the null output, as the default device
    pub null: bool,
    pub device: Option<String>,
    pub seconds: u64,
    pub file: Option<PathBuf>,
}

impl Options {
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut options = Self {
            list: false,
            null: false,
            device: None,
            seconds: 5,
            file: None,
        };

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--list" => options.list = true,
                "--null" => options.null = true,
                "--device" => {
                    options.device = Some(args.next().context("--device needs a name")?);
                }
                "--seconds" => {
                    let value = args.next().context("--seconds needs a value")?;
                    options.seconds = value
                        .parse()
                        .with_context(|| format!("Invalid duration '{}'", value))?;
                }
                flag if flag.starts_with("--") => bail!("Unknown option {}", flag),
                path => options.file = Some(PathBuf::from(path)),
            }
        }
        Ok(options)
    }
}

pub fn run(options: Options) -> Result<()> {
    let null_only;
    let registry: &DeviceRegistry = if options.null {
        let mixer: Arc<dyn Backend> = Arc::new(SoftwareMixer::new(
            NullDriver::new().as_default(),
            MixerDesc::default(),
        ));
        null_only = DeviceRegistry::new(vec![mixer]);
        &null_only
    } else {
        DeviceRegistry::global()
    };

    if options.list {
        for name in registry.device_names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let audio = match &options.file {
        Some(path) => decode_file(path)?,
        None => DecodedAudio::tone(440.0, 48000),
    }
    .into_mono();

    let device = registry.open_device(options.device.as_deref(), DeviceDesc::default())?;
    log::info!(
        "Opened '{}' on backend '{}'",
        device.name(),
        device.backend_name()
    );

    let context = device.create_context(&ContextAttributes::new().with_refresh(50))?;
    device.make_context_current(Some(context))?;

    let buffer = device.gen_buffers(1)?[0];
    device.buffer_data(
        buffer,
        BufferFormat::MonoFloat32,
        &audio.to_bytes(),
        audio.sample_rate,
    )?;

    let source = device.gen_sources(context, 1)?[0];
    device.set_source_buffer(context, source, Some(buffer))?;
    device.set_source(context, source, SourceParam::Looping(true))?;
    device.set_source(context, source, SourceParam::ReferenceDistance(2.0))?;
    device.play_source(context, source)?;

    // Orbit the listener once every four seconds
    let radius = 3.0;
    let started = Instant::now();
    let duration = Duration::from_secs(options.seconds);
    let mut last_report = Duration::ZERO;
    while started.elapsed() < duration {
        let t = started.elapsed().as_secs_f32();
        let angle = t * std::f32::consts::TAU / 4.0;
        let position = Vec3::new(radius * angle.cos(), 0.0, radius * angle.sin());
        let velocity = Vec3::new(-angle.sin(), 0.0, angle.cos()) * radius * std::f32::consts::TAU / 4.0;
        device.set_source(context, source, SourceParam::Position(position))?;
        device.set_source(context, source, SourceParam::Velocity(velocity))?;

        if started.elapsed() - last_report >= Duration::from_secs(1) {
            last_report = started.elapsed();
            log::info!("Source at ({:.2}, {:.2}, {:.2})", position.x, position.y, position.z);
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    device.stop_source(context, source)?;
    device.delete_sources(context, &[source])?;
    device.delete_buffers(&[buffer])?;
    device.make_context_current(None)?;
    device.destroy_context(context)?;
    device.close();
    log::info!("Done");
    Ok(())
}

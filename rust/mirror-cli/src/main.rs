//! Mirrored Strategy Demo
//!
//! This binary builds a `MirroredStrategy` on a virtual host platform,
//! creates a replicated variable, and distributes a synthetic image/label
//! dataset across the mesh, logging the global and per-device shapes of
//! each step.
//!
//! # Usage
//!
//! ```bash
//! # Two logical CPUs, global batch of 8
//! mirror-demo --num-devices 2
//!
//! # Explicit device list
//! mirror-demo --devices /GPU:0,/GPU:1 --global-batch-size 16
//!
//! # Start from a configuration file
//! mirror-demo --config mirror.toml
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mirror_core::config::PlatformConfig;
use mirror_core::{
    unpack, Dataset, DeviceType, MirroredStrategy, ReduceOp, StrategyConfig, Tensor,
    VirtualPlatform,
};

/// Mirrored strategy demo
#[derive(Parser, Debug)]
#[command(name = "mirror-demo")]
#[command(about = "Distributes a synthetic dataset with a mirrored strategy")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Comma-separated device list (e.g. /CPU:0,/CPU:1)
    #[arg(long, value_delimiter = ',')]
    devices: Vec<String>,

    /// Device type to build the mesh from (cpu, gpu, tpu)
    #[arg(long)]
    device_type: Option<DeviceType>,

    /// Logical devices to expose for the selected device type
    #[arg(short, long)]
    num_devices: Option<u32>,

    /// Global batch size
    #[arg(short, long, default_value = "8")]
    global_batch_size: usize,

    /// Number of global batches to pull
    #[arg(long, default_value = "3")]
    steps: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => StrategyConfig::from_file(path)?,
        None => StrategyConfig::default(),
    }
    .with_env_overrides();

    if !args.devices.is_empty() {
        config.mesh.devices = args.devices.clone();
    }
    if let Some(device_type) = args.device_type {
        config.mesh.device_type = Some(device_type);
    }
    if let Some(count) = args.num_devices {
        let device_type = config.mesh.device_type.unwrap_or(DeviceType::Cpu);
        set_device_count(&mut config.platform, device_type, count);
    }
    config.validate()?;

    let platform = VirtualPlatform::from_config(&config.platform);
    let strategy = MirroredStrategy::from_config(&config, &platform)?;

    tracing::info!("Starting mirrored strategy demo");
    tracing::info!("  Replicas in sync: {}", strategy.num_replicas_in_sync());
    for device in strategy.extended().worker_devices() {
        tracing::info!("  Worker device: {}", device);
    }

    let kernel = {
        let scope = strategy.scope();
        scope.create_variable("dense/kernel", Tensor::full(&[3, 4], 0.5))
    };
    if let Some(layout) = kernel.layout() {
        tracing::info!("Variable '{}' layout: {}", kernel.name(), layout);
    }
    let total = strategy.reduce(ReduceOp::Sum, &kernel.to_dtensor()?)?;
    tracing::info!("Sum of replicas of '{}': shape {:?}", kernel.name(), total.shape());

    let images = Tensor::from_fn(&[8, 8, 3], |i| (i % 255) as f32 / 255.0);
    let labels = Tensor::full(&[1], 1.0);
    let dataset = Dataset::from_tensors((images, labels))
        .repeat(None)
        .batch(args.global_batch_size, false)?
        .prefetch(config.dataset.prefetch_buffer_size);

    let distributed = strategy.experimental_distribute_dataset(&dataset)?;
    for (step, element) in distributed.iter().take(args.steps).enumerate() {
        let element = element?;
        for (index, component) in element.components().iter().enumerate() {
            let shards: Vec<Vec<usize>> = unpack(component)
                .iter()
                .map(|shard| shard.shape().to_vec())
                .collect();
            tracing::info!(
                "Step {} component {}: global {:?}, shards {:?}",
                step,
                index,
                component.shape(),
                shards
            );
        }
    }

    tracing::info!("Demo finished");
    Ok(())
}

fn set_device_count(platform: &mut PlatformConfig, device_type: DeviceType, count: u32) {
    match device_type {
        DeviceType::Cpu => platform.cpu_devices = count,
        DeviceType::Gpu => platform.gpu_devices = count,
        DeviceType::Tpu => platform.tpu_devices = count,
    }
}
